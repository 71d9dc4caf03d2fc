//! Listing of publicly shared folders.
//!
//! The API has no way to get the shared links of the entries inside a shared
//! folder, so listings come from the folder's web page: the first page is
//! embedded in the HTML, later pages come from the paging endpoint the page
//! itself calls.

use crate::client::{RemoteClient, check_status};
use crate::error::{RemoteError, RemoteResult};
use async_trait::async_trait;
use futures::Stream;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::pin::Pin;

const LIST_SHARED_LINKS: &str = "/2/sharing/list_shared_links";
const LIST_FOLDER_ENTRIES: &str = "/list_shared_link_folder_entries";

/// The listing JSON, embedded as a JSON string literal in the folder page.
static EMBEDDED_LISTING: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""\{\\"shared_link_infos\\".*[^\\]\}""#).expect("Invalid embedded listing regex")
});

/// One entry of a shared folder.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct FolderEntry {
    #[serde(rename = "filename")]
    pub name: String,
    pub is_dir: bool,
    /// Shared link of the entry.
    #[serde(rename = "href")]
    pub link: String,
}

#[derive(Debug, Deserialize)]
struct FolderPage {
    entries: Vec<FolderEntry>,
    has_more_entries: bool,
    #[serde(default)]
    next_request_voucher: Option<String>,
    #[serde(default)]
    folder_share_token: Option<FolderShareToken>,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FolderShareToken {
    link_key: Value,
    link_type: Value,
    secure_hash: Value,
    sub_path: Value,
}

#[derive(Debug, Deserialize)]
struct SharedLinks {
    links: Vec<SharedLink>,
}

#[derive(Debug, Deserialize)]
struct SharedLink {
    #[serde(rename = ".tag")]
    tag: String,
    url: String,
    #[serde(default)]
    link_permissions: Option<LinkPermissions>,
}

#[derive(Debug, Deserialize)]
struct LinkPermissions {
    #[serde(default)]
    resolved_visibility: Option<Tagged>,
}

#[derive(Debug, Deserialize)]
struct Tagged {
    #[serde(rename = ".tag")]
    tag: String,
}

impl SharedLink {
    fn is_public_folder(&self) -> bool {
        self.tag == "folder"
            && self
                .link_permissions
                .as_ref()
                .and_then(|perms| perms.resolved_visibility.as_ref())
                .is_some_and(|visibility| visibility.tag == "public")
    }
}

/// Entries of one shared folder, across all of its pages.
pub type EntryStream<'a> = Pin<Box<dyn Stream<Item = RemoteResult<FolderEntry>> + Send + 'a>>;

/// A tree of shared folders addressed by shared links.
#[async_trait]
pub trait SharedFolders: Send + Sync {
    /// Shared link of the public folder link set directly on `path`.
    async fn public_link(&self, path: &str) -> RemoteResult<String>;

    /// Stream the entries of the folder behind `link`, fetching further pages
    /// as the stream is consumed.
    fn list_entries<'a>(&'a self, link: &str) -> EntryStream<'a>;

    /// Fetch the text content behind a download URL.
    async fn fetch_text(&self, url: &str) -> RemoteResult<String>;
}

/// [`SharedFolders`] backed by the shared-folder web pages.
#[derive(Clone, Debug)]
pub struct WebSharedFolders {
    client: RemoteClient,
}

impl WebSharedFolders {
    pub fn new(client: RemoteClient) -> Self {
        Self { client }
    }

    async fn first_page(&self, link: &str) -> RemoteResult<FolderPage> {
        let response = self.client.http().get(link).send().await?;
        let html = check_status(response).await?.text().await?;
        parse_embedded_listing(&html).ok_or_else(|| RemoteError::ScrapeFailed(link.to_string()))
    }

    async fn next_page(&self, form: &[(&'static str, String)]) -> RemoteResult<FolderPage> {
        let response = self
            .client
            .http()
            .post(self.client.web_url(LIST_FOLDER_ENTRIES))
            .form(form)
            .send()
            .await?;
        Ok(check_status(response).await?.json().await?)
    }

    /// Paging form fields fixed for the whole folder; the voucher is added per
    /// request.
    fn paging_form(&self, token: &FolderShareToken) -> RemoteResult<Vec<(&'static str, String)>> {
        let session = self
            .client
            .cookie(&self.client.web_url(LIST_FOLDER_ENTRIES), "t")
            .ok_or(RemoteError::MissingField("t cookie"))?;
        Ok(vec![
            ("t", session),
            ("link_key", form_value(&token.link_key)),
            ("link_type", form_value(&token.link_type)),
            ("secure_hash", form_value(&token.secure_hash)),
            ("sub_path", form_value(&token.sub_path)),
        ])
    }
}

#[async_trait]
impl SharedFolders for WebSharedFolders {
    async fn public_link(&self, path: &str) -> RemoteResult<String> {
        let body = serde_json::json!({ "path": path, "direct_only": true });
        let links: SharedLinks = self.client.post_api(LIST_SHARED_LINKS, &body).await?;
        links
            .links
            .into_iter()
            .find(SharedLink::is_public_folder)
            .map(|link| link.url)
            .ok_or_else(|| RemoteError::SharedLinkNotFound(path.to_string()))
    }

    fn list_entries<'a>(&'a self, link: &str) -> EntryStream<'a> {
        let link = link.to_string();
        let stream = async_stream::try_stream! {
            let mut page = self.first_page(&link).await?;
            let mut form: Option<Vec<(&'static str, String)>> = None;
            loop {
                for entry in std::mem::take(&mut page.entries) {
                    yield entry;
                }
                if !page.has_more_entries {
                    break;
                }
                let voucher = page
                    .next_request_voucher
                    .take()
                    .ok_or(RemoteError::MissingField("next_request_voucher"))?;
                let mut fields = match form.take() {
                    Some(fields) => fields,
                    None => {
                        let token = page
                            .folder_share_token
                            .as_ref()
                            .ok_or(RemoteError::MissingField("folder_share_token"))?;
                        self.paging_form(token)?
                    }
                };
                fields.push(("voucher", voucher));
                page = self.next_page(&fields).await?;
                fields.pop();
                form = Some(fields);
            }
        };
        Box::pin(stream)
    }

    async fn fetch_text(&self, url: &str) -> RemoteResult<String> {
        let response = self.client.http().get(url).send().await?;
        Ok(check_status(response).await?.text().await?)
    }
}

/// Decode the listing embedded in a shared folder page.
fn parse_embedded_listing(html: &str) -> Option<FolderPage> {
    let literal = EMBEDDED_LISTING.find(html)?.as_str();
    let json: String = serde_json::from_str(literal).ok()?;
    serde_json::from_str(&json).ok()
}

fn form_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn embed(listing: &Value) -> String {
        let rest = listing.to_string();
        let listing = format!(r#"{{"shared_link_infos":[],{}"#, &rest[1..]);
        let literal = serde_json::to_string(&listing).unwrap();
        format!("<html><script>window.init({literal}, false);</script></html>")
    }

    #[test]
    fn embedded_listing_is_decoded_twice() {
        let listing = json!({
            "entries": [
                {"filename": "INDEX", "is_dir": false, "href": "https://h/s/1/INDEX?dl=0"},
                {"filename": "x86_64", "is_dir": true, "href": "https://h/sh/2/x86_64?dl=0"}
            ],
            "has_more_entries": true,
            "next_request_voucher": "v1",
            "folder_share_token": {"linkKey": "k", "linkType": "s", "secureHash": "h", "subPath": ""}
        });

        let page = parse_embedded_listing(&embed(&listing)).unwrap();
        assert_eq!(page.entries.len(), 2);
        assert_eq!(page.entries[1].name, "x86_64");
        assert!(page.entries[1].is_dir);
        assert!(page.has_more_entries);
        assert_eq!(page.next_request_voucher.as_deref(), Some("v1"));
        let token = page.folder_share_token.unwrap();
        assert_eq!(form_value(&token.link_key), "k");
        assert_eq!(form_value(&token.sub_path), "");
    }

    #[test]
    fn page_without_listing_is_rejected() {
        assert!(parse_embedded_listing("<html>nothing here</html>").is_none());
    }

    #[test]
    fn only_public_folder_links_qualify() {
        let links: SharedLinks = serde_json::from_value(json!({
            "links": [
                {".tag": "file", "url": "https://h/s/file",
                 "link_permissions": {"resolved_visibility": {".tag": "public"}}},
                {".tag": "folder", "url": "https://h/sh/team",
                 "link_permissions": {"resolved_visibility": {".tag": "team_only"}}},
                {".tag": "folder", "url": "https://h/sh/bare"},
                {".tag": "folder", "url": "https://h/sh/public",
                 "link_permissions": {"resolved_visibility": {".tag": "public"}}}
            ]
        }))
        .unwrap();
        let public: Vec<_> = links
            .links
            .iter()
            .filter(|link| link.is_public_folder())
            .map(|link| link.url.as_str())
            .collect();
        assert_eq!(public, vec!["https://h/sh/public"]);
    }

    #[test]
    fn form_values_are_plain_strings() {
        assert_eq!(form_value(&json!("s")), "s");
        assert_eq!(form_value(&json!(2)), "2");
        assert_eq!(form_value(&Value::Null), "");
    }
}
