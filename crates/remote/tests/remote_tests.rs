use httpmock::Method::{GET, POST};
use httpmock::MockServer;
use serde_json::{Value, json};
use std::net::TcpListener;
use tracing::Span;
use vmtest_core::{CHUNK_SIZE, CommitInfo, RemoteConfig, WriteMode};
use vmtest_remote::{CatalogResolver, IndexSynchronizer, RemoteClient, Uploader};

const TOKEN: &str = "secret-token";

fn can_bind_localhost() -> bool {
    TcpListener::bind("127.0.0.1:0").is_ok()
}

fn client_for(server: &MockServer) -> RemoteClient {
    let config = RemoteConfig {
        api_url: server.base_url(),
        content_url: server.base_url(),
        web_url: server.base_url(),
        manifest_url: server.url("/releases.json"),
        share_root: "/Public".to_string(),
        artifact_dir: "/Public/x86_64".to_string(),
    };
    RemoteClient::new(config, TOKEN).unwrap()
}

fn folder_page(entries: Value, voucher: Option<&str>) -> Value {
    json!({
        "entries": entries,
        "has_more_entries": voucher.is_some(),
        "next_request_voucher": voucher,
        "folder_share_token": {
            "linkKey": "key",
            "linkType": "sh",
            "secureHash": "hash",
            "subPath": ""
        }
    })
}

/// The page embeds the listing as a JSON string whose object starts with
/// `shared_link_infos`.
fn folder_html(page: &Value) -> String {
    let rest = page.to_string();
    let listing = format!(r#"{{"shared_link_infos":[],{}"#, &rest[1..]);
    let literal = serde_json::to_string(&listing).unwrap();
    format!("<html><body><script>window.prefetch({literal}, null);</script></body></html>")
}

#[tokio::test]
async fn small_file_is_uploaded_in_one_request() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let single = server.mock(|when, then| {
        when.method(POST)
            .path("/2/files/upload")
            .header("authorization", format!("Bearer {TOKEN}"))
            .header("content-type", "application/octet-stream")
            .header(
                "Dropbox-API-Arg",
                r#"{"path":"/Public/x86_64/vmlinuz-5.10.0","autorename":false}"#,
            )
            .body("boot image");
        then.status(200).json_body(json!({"name": "vmlinuz-5.10.0"}));
    });
    let start = server.mock(|when, then| {
        when.method(POST).path("/2/files/upload_session/start");
        then.status(200).json_body(json!({"session_id": "unexpected"}));
    });

    let dir = tempfile::tempdir().unwrap();
    let image = dir.path().join("bzImage");
    std::fs::write(&image, "boot image").unwrap();

    let mut uploader = Uploader::new(client_for(&server), &Span::none());
    uploader
        .queue_file(
            &image,
            CommitInfo::new("/Public/x86_64/vmlinuz-5.10.0").with_autorename(false),
        )
        .unwrap();
    let outcome = uploader.wait().await;

    assert_eq!(outcome.succeeded, vec!["/Public/x86_64/vmlinuz-5.10.0"]);
    assert!(outcome.failed.is_empty());
    single.assert_hits(1);
    start.assert_hits(0);
}

#[tokio::test]
async fn exactly_one_chunk_uses_single_request() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let single = server.mock(|when, then| {
        when.method(POST)
            .path("/2/files/upload")
            .header("Dropbox-API-Arg", r#"{"path":"/Public/x86_64/exact"}"#);
        then.status(200).json_body(json!({}));
    });
    let start = server.mock(|when, then| {
        when.method(POST).path("/2/files/upload_session/start");
        then.status(200).json_body(json!({"session_id": "unexpected"}));
    });

    let mut uploader = Uploader::new(client_for(&server), &Span::none());
    uploader
        .queue_bytes(vec![0u8; CHUNK_SIZE], CommitInfo::new("/Public/x86_64/exact"))
        .unwrap();
    let outcome = uploader.wait().await;

    assert!(outcome.is_success());
    single.assert_hits(1);
    start.assert_hits(0);
}

#[tokio::test]
async fn content_over_one_chunk_uses_upload_session() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let single = server.mock(|when, then| {
        when.method(POST).path("/2/files/upload");
        then.status(200).json_body(json!({}));
    });
    let start = server.mock(|when, then| {
        when.method(POST)
            .path("/2/files/upload_session/start")
            .header("authorization", format!("Bearer {TOKEN}"))
            .header("Dropbox-API-Arg", "{}");
        then.status(200).json_body(json!({"session_id": "sess-1"}));
    });
    let append = server.mock(|when, then| {
        when.method(POST)
            .path("/2/files/upload_session/append_v2")
            .header(
                "Dropbox-API-Arg",
                r#"{"cursor":{"session_id":"sess-1","offset":0}}"#,
            );
        then.status(200).json_body(Value::Null);
    });
    let finish = server.mock(|when, then| {
        when.method(POST)
            .path("/2/files/upload_session/finish")
            .header(
                "Dropbox-API-Arg",
                format!(
                    r#"{{"cursor":{{"session_id":"sess-1","offset":{CHUNK_SIZE}}},"commit":{{"path":"/Public/x86_64/big","autorename":false}}}}"#
                ),
            )
            .body("z");
        then.status(200).json_body(json!({"name": "big"}));
    });

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big");
    let mut data = vec![b'a'; CHUNK_SIZE];
    data.push(b'z');
    std::fs::write(&path, &data).unwrap();

    let mut uploader = Uploader::new(client_for(&server), &Span::none());
    uploader
        .queue_file(
            &path,
            CommitInfo::new("/Public/x86_64/big").with_autorename(false),
        )
        .unwrap();
    let outcome = uploader.wait().await;

    assert_eq!(outcome.succeeded, vec!["/Public/x86_64/big"]);
    single.assert_hits(0);
    start.assert_hits(1);
    append.assert_hits(1);
    finish.assert_hits(1);
}

#[tokio::test]
async fn session_offsets_advance_by_each_appended_chunk() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    let start = server.mock(|when, then| {
        when.method(POST).path("/2/files/upload_session/start");
        then.status(200).json_body(json!({"session_id": "sess-2"}));
    });
    let first_append = server.mock(|when, then| {
        when.method(POST)
            .path("/2/files/upload_session/append_v2")
            .header(
                "Dropbox-API-Arg",
                r#"{"cursor":{"session_id":"sess-2","offset":0}}"#,
            );
        then.status(200).json_body(Value::Null);
    });
    let second_append = server.mock(|when, then| {
        when.method(POST)
            .path("/2/files/upload_session/append_v2")
            .header(
                "Dropbox-API-Arg",
                format!(r#"{{"cursor":{{"session_id":"sess-2","offset":{CHUNK_SIZE}}}}}"#),
            );
        then.status(200).json_body(Value::Null);
    });
    let finish = server.mock(|when, then| {
        when.method(POST)
            .path("/2/files/upload_session/finish")
            .header(
                "Dropbox-API-Arg",
                format!(
                    r#"{{"cursor":{{"session_id":"sess-2","offset":{}}},"commit":{{"path":"/Public/x86_64/huge"}}}}"#,
                    2 * CHUNK_SIZE
                ),
            )
            .body("q");
        then.status(200).json_body(json!({"name": "huge"}));
    });

    let mut data = vec![b'p'; 2 * CHUNK_SIZE];
    data.push(b'q');

    let mut uploader = Uploader::new(client_for(&server), &Span::none());
    uploader
        .queue_bytes(data, CommitInfo::new("/Public/x86_64/huge"))
        .unwrap();
    let outcome = uploader.wait().await;

    assert_eq!(outcome.succeeded, vec!["/Public/x86_64/huge"]);
    assert!(outcome.failed.is_empty());
    assert_eq!(uploader.pending(), 0);
    start.assert_hits(1);
    first_append.assert_hits(1);
    second_append.assert_hits(1);
    finish.assert_hits(1);
}

#[tokio::test]
async fn failed_upload_does_not_affect_siblings() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST)
            .path("/2/files/upload")
            .header("Dropbox-API-Arg", r#"{"path":"/Public/conflict"}"#);
        then.status(409)
            .json_body(json!({"error_summary": "path/conflict/file/.."}));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/2/files/upload")
            .header("Dropbox-API-Arg", r#"{"path":"/Public/fine"}"#);
        then.status(200).json_body(json!({}));
    });

    let mut uploader = Uploader::new(client_for(&server), &Span::none());
    uploader
        .queue_bytes(&b"one"[..], CommitInfo::new("/Public/conflict"))
        .unwrap();
    uploader
        .queue_bytes(&b"two"[..], CommitInfo::new("/Public/fine"))
        .unwrap();

    let outcome = uploader.wait().await;
    assert_eq!(outcome.succeeded, vec!["/Public/fine"]);
    assert_eq!(outcome.failed, vec!["/Public/conflict"]);

    let next = uploader.wait().await;
    assert!(next.succeeded.is_empty());
    assert!(next.failed.is_empty());
}

fn mock_manifest(server: &MockServer) {
    server.mock(|when, then| {
        when.method(GET).path("/releases.json");
        then.status(200).json_body(json!({
            "releases": [
                {"moniker": "mainline", "version": "5.10-rc1"},
                {"moniker": "stable", "version": "5.9.1"},
                {"moniker": "longterm", "version": "5.4.70"},
                {"moniker": "longterm", "version": "3.16.85"},
                {"moniker": "linux-next", "version": "next-20201016"}
            ]
        }));
    });
}

#[tokio::test]
async fn catalog_queues_explicit_then_missing_releases() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    mock_manifest(&server);
    let first = server.mock(|when, then| {
        when.method(POST)
            .path("/2/files/list_folder")
            .header("authorization", format!("Bearer {TOKEN}"))
            .json_body(json!({"path": "/Public/x86_64"}));
        then.status(200).json_body(json!({
            "entries": [
                {".tag": "file", "name": "vmlinux-5.9.1.zst"},
                {".tag": "file", "name": "INDEX"}
            ],
            "cursor": "page-2",
            "has_more": true
        }));
    });
    let second = server.mock(|when, then| {
        when.method(POST)
            .path("/2/files/list_folder/continue")
            .json_body(json!({"cursor": "page-2"}));
        then.status(200).json_body(json!({
            "entries": [
                {".tag": "folder", "name": "vmlinux-5.4.70.zst"},
                {".tag": "file", "name": "vmlinuz-5.4.70"}
            ],
            "cursor": "page-3",
            "has_more": false
        }));
    });

    let resolver = CatalogResolver::new(client_for(&server), &Span::none());
    let published = resolver.published_releases().await.unwrap();
    assert_eq!(published.len(), 1);

    let queue = resolver
        .resolve(&["v5.8-rc2".to_string(), "v5.9.1".to_string()])
        .await
        .unwrap();
    let commits: Vec<&str> = queue.iter().collect();
    assert_eq!(commits, vec!["v5.8-rc2", "v5.9.1", "v5.10-rc1", "v5.4.70"]);

    first.assert_hits(2);
    second.assert_hits(2);
}

#[tokio::test]
async fn missing_artifact_folder_means_nothing_published() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    mock_manifest(&server);
    server.mock(|when, then| {
        when.method(POST).path("/2/files/list_folder");
        then.status(409).json_body(json!({
            "error_summary": "path/not_found/..",
            "error": {".tag": "path", "path": {".tag": "not_found"}}
        }));
    });

    let resolver = CatalogResolver::new(client_for(&server), &Span::none());
    let queue = resolver.resolve(&[]).await.unwrap();
    let commits: Vec<&str> = queue.iter().collect();
    assert_eq!(commits, vec!["v5.10-rc1", "v5.9.1", "v5.4.70"]);
}

#[tokio::test]
async fn other_listing_conflicts_are_errors() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    mock_manifest(&server);
    server.mock(|when, then| {
        when.method(POST).path("/2/files/list_folder");
        then.status(409)
            .json_body(json!({"error_summary": "path/not_folder/.."}));
    });

    let resolver = CatalogResolver::new(client_for(&server), &Span::none());
    let err = resolver.resolve(&[]).await.unwrap_err();
    assert_eq!(err.status_code(), Some(409));
    assert!(err.to_string().contains("path/not_folder/"));
}

fn mock_public_link(server: &MockServer) {
    server.mock(|when, then| {
        when.method(POST)
            .path("/2/sharing/list_shared_links")
            .header("authorization", format!("Bearer {TOKEN}"))
            .json_body(json!({"path": "/Public", "direct_only": true}));
        then.status(200).json_body(json!({
            "links": [
                {".tag": "file", "url": server.url("/s/stray"),
                 "link_permissions": {"resolved_visibility": {".tag": "public"}}},
                {".tag": "folder", "url": server.url("/sh/root"),
                 "link_permissions": {"resolved_visibility": {".tag": "public"}}}
            ],
            "has_more": false
        }));
    });
}

/// Root folder: its INDEX is current. `x86_64` arrives on the second page
/// and has no INDEX yet.
fn mock_shared_tree(server: &MockServer, root_index: &str) {
    let root_first = folder_page(
        json!([
            {"filename": "INDEX", "is_dir": false, "href": server.url("/s/root/INDEX?dl=0")}
        ]),
        Some("voucher-1"),
    );
    server.mock(|when, then| {
        when.method(GET).path("/sh/root");
        then.status(200)
            .header("set-cookie", "t=session-token; Path=/")
            .header("content-type", "text/html")
            .body(folder_html(&root_first));
    });
    server.mock(|when, then| {
        when.method(POST)
            .path("/list_shared_link_folder_entries")
            .x_www_form_urlencoded_tuple("t", "session-token")
            .x_www_form_urlencoded_tuple("link_key", "key")
            .x_www_form_urlencoded_tuple("link_type", "sh")
            .x_www_form_urlencoded_tuple("secure_hash", "hash")
            .x_www_form_urlencoded_tuple("voucher", "voucher-1");
        then.status(200).json_body(folder_page(
            json!([
                {"filename": "x86_64", "is_dir": true, "href": server.url("/sh/x86_64")}
            ]),
            None,
        ));
    });
    let x86_64 = folder_page(
        json!([
            {"filename": "vmlinux-5.10.0.zst", "is_dir": false,
             "href": server.url("/s/v/vmlinux-5.10.0.zst?dl=0")}
        ]),
        None,
    );
    server.mock(|when, then| {
        when.method(GET).path("/sh/x86_64");
        then.status(200).body(folder_html(&x86_64));
    });
    let root_index = root_index.to_string();
    server.mock(|when, then| {
        when.method(GET)
            .path("/s/root/INDEX")
            .query_param("dl", "1");
        then.status(200).body(root_index);
    });
}

#[tokio::test]
async fn index_sync_overwrites_only_stale_indexes() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    mock_public_link(&server);
    let root_index = format!(
        "INDEX\t{}\nx86_64/\t{}\n",
        server.url("/s/root/INDEX?dl=1"),
        server.url("/sh/x86_64?dl=1")
    );
    mock_shared_tree(&server, &root_index);

    let x86_64_index = format!(
        "vmlinux-5.10.0.zst\t{}\n",
        server.url("/s/v/vmlinux-5.10.0.zst?dl=1")
    );
    let child_update = server.mock(|when, then| {
        when.method(POST)
            .path("/2/files/upload")
            .header(
                "Dropbox-API-Arg",
                r#"{"path":"/Public/x86_64/INDEX","mode":"overwrite"}"#,
            )
            .body(x86_64_index.clone());
        then.status(200).json_body(json!({}));
    });
    let root_update = server.mock(|when, then| {
        when.method(POST)
            .path("/2/files/upload")
            .header("Dropbox-API-Arg", r#"{"path":"/Public/INDEX","mode":"overwrite"}"#);
        then.status(200).json_body(json!({}));
    });

    let client = client_for(&server);
    let mut uploader = Uploader::new(client.clone(), &Span::none());
    let synchronizer = IndexSynchronizer::new(client, &Span::none());

    assert!(synchronizer.synchronize(&mut uploader).await);
    child_update.assert_hits(1);
    root_update.assert_hits(0);
    assert_eq!(uploader.pending(), 0);
}

#[tokio::test]
async fn index_sync_reports_failed_updates() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    mock_public_link(&server);
    mock_shared_tree(&server, "stale\n");
    let updates = server.mock(|when, then| {
        when.method(POST).path("/2/files/upload");
        then.status(507)
            .json_body(json!({"error_summary": "insufficient_space/.."}));
    });

    let client = client_for(&server);
    let mut uploader = Uploader::new(client.clone(), &Span::none());
    let synchronizer = IndexSynchronizer::new(client, &Span::none());

    assert!(!synchronizer.synchronize(&mut uploader).await);
    updates.assert_hits(2);
}

#[tokio::test]
async fn index_sync_fails_without_public_link() {
    if !can_bind_localhost() {
        eprintln!("Skipping httpmock tests: cannot bind to localhost");
        return;
    }

    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(POST).path("/2/sharing/list_shared_links");
        then.status(200).json_body(json!({
            "links": [
                {".tag": "folder", "url": server.url("/sh/private"),
                 "link_permissions": {"resolved_visibility": {".tag": "team_only"}}}
            ],
            "has_more": false
        }));
    });
    let uploads = server.mock(|when, then| {
        when.method(POST).path("/2/files/upload");
        then.status(200).json_body(json!({}));
    });

    let client = client_for(&server);
    let mut uploader = Uploader::new(client.clone(), &Span::none());
    let synchronizer = IndexSynchronizer::new(client, &Span::none());

    assert!(!synchronizer.synchronize(&mut uploader).await);
    uploads.assert_hits(0);
}

#[test]
fn overwrite_mode_is_serialized_for_index_updates() {
    let commit = CommitInfo::new("/Public/INDEX").with_mode(WriteMode::Overwrite);
    assert_eq!(
        serde_json::to_string(&commit).unwrap(),
        r#"{"path":"/Public/INDEX","mode":"overwrite"}"#
    );
}
