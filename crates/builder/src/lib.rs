//! Kernel builds for vmtest.
//!
//! [`KernelBuilder`] turns a commit of a kernel git checkout into a
//! compressed vmlinux and a boot image, running git, make, objcopy and zstd
//! through [`process::Cmd`].

pub mod error;
pub mod kernel;
pub mod process;

pub use error::{BuildError, Result};
pub use kernel::KernelBuilder;
pub use process::Cmd;
