#![cfg(feature = "http")]

use std::sync::mpsc;
use std::time::Duration;

use snipsync::data::{OEmbedResolver, RestStore, SnippetStore, TitleResolver};
use snipsync::Error;

// Serve exactly one request with `body` and report the requested URL.
fn serve_once(status: u16, body: &'static str) -> (String, mpsc::Receiver<String>) {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr();
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        if let Ok(req) = server.recv() {
            let _ = tx.send(req.url().to_string());
            let resp = tiny_http::Response::from_string(body).with_status_code(status);
            let _ = req.respond(resp);
        }
    });
    (format!("http://{}", addr), rx)
}

#[tokio::test]
async fn rest_store_fetches_snippet_records() {
    let body = r#"[
        { "snippet_id": "b", "video_id": "v2", "start_time": 5, "end_time": 25, "position": 1 },
        { "snippet_id": "a", "video_id": "v1", "start_time": 0, "end_time": 20, "title": "Intro", "position": 0 }
    ]"#;
    let (base, seen) = serve_once(200, body);
    let store = RestStore::new(&format!("{}/api", base), Duration::from_secs(5)).unwrap();

    let records = store.windows("mix").await.unwrap();
    assert_eq!(seen.recv().unwrap(), "/api/sniplists/mix/snippets");
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].title, "Intro");
    assert_eq!(records[0].end_time, 25.0);
}

#[tokio::test]
async fn rest_store_maps_server_errors_to_data_access() {
    let (base, _seen) = serve_once(500, "boom");
    let store = RestStore::new(&base, Duration::from_secs(5)).unwrap();
    assert!(matches!(store.windows("mix").await, Err(Error::DataAccess(_))));
}

#[tokio::test]
async fn rest_store_rejects_malformed_payloads() {
    let (base, _seen) = serve_once(200, r#"{"not": "a list"}"#);
    let store = RestStore::new(&base, Duration::from_secs(5)).unwrap();
    assert!(matches!(store.windows("mix").await, Err(Error::DataAccess(_))));
}

#[tokio::test]
async fn oembed_resolver_reads_title_and_author() {
    let (base, seen) = serve_once(200, r#"{"title": "Song", "author_name": "Band", "type": "video"}"#);
    let resolver = OEmbedResolver::with_endpoint(
        &format!("{}/oembed", base),
        "https://youtu.be/",
        Duration::from_secs(5),
    )
    .unwrap();

    let meta = resolver.title_for("v1").await.unwrap();
    assert_eq!(meta.title, "Song");
    assert_eq!(meta.uploader.as_deref(), Some("Band"));

    let url = seen.recv().unwrap();
    assert!(url.starts_with("/oembed?"), "{}", url);
    assert!(url.contains("url=https%3A%2F%2Fyoutu.be%2Fv1"), "{}", url);
    assert!(url.contains("format=json"), "{}", url);
}

#[test]
fn bad_urls_are_config_errors() {
    assert!(matches!(
        RestStore::new("not a url", Duration::from_secs(1)),
        Err(Error::ConfigError(_))
    ));
    assert!(matches!(
        OEmbedResolver::with_endpoint("::", "https://youtu.be/", Duration::from_secs(1)),
        Err(Error::ConfigError(_))
    ));
}
