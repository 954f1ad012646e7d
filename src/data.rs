//! Data-access and metadata collaborators.
//!
//! The engine only reads from these. [`SnippetStore`] returns the snippet
//! records of a sniplist; [`TitleResolver`] looks up a human title for a
//! video. Both have in-memory implementations for tests and the CLI, and HTTP
//! implementations behind the `http` feature.

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};

use crate::{lock, Error, Result, Window};

/// A persisted snippet as the backend returns it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnippetRecord {
    pub snippet_id: String,
    pub video_id: String,
    pub start_time: f64,
    pub end_time: f64,
    #[serde(default)]
    pub title: String,
    /// Playback order within the sniplist
    pub position: u32,
}

impl SnippetRecord {
    pub fn new(snippet_id: &str, video_id: &str, start: f64, end: f64, position: u32) -> Self {
        SnippetRecord {
            snippet_id: snippet_id.to_string(),
            video_id: video_id.to_string(),
            start_time: start,
            end_time: end,
            title: String::new(),
            position,
        }
    }

    pub fn with_title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn to_window(&self) -> Result<Window> {
        Window::new(&self.video_id, self.start_time, self.end_time, &self.title)
    }
}

/// Order records by `position` and turn them into windows. Records with
/// invalid bounds are skipped.
pub fn windows_from_records(mut records: Vec<SnippetRecord>) -> Vec<Window> {
    records.sort_by_key(|r| r.position);
    records
        .iter()
        .filter_map(|r| match r.to_window() {
            Ok(w) => Some(w),
            Err(e) => {
                log::warn!("skipping snippet {}: {}", r.snippet_id, e);
                None
            }
        })
        .collect()
}

/// Read-only source of sniplists
pub trait SnippetStore: Send + Sync {
    /// Snippet records of `sniplist_id`, in any order
    fn windows(&self, sniplist_id: &str) -> BoxFuture<'static, Result<Vec<SnippetRecord>>>;
}

/// A sniplist as stored in a JSON file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SniplistFile {
    pub id: String,
    #[serde(default)]
    pub title: String,
    pub snippets: Vec<SnippetRecord>,
}

/// In-process store
#[derive(Default, Clone)]
pub struct MemoryStore {
    lists: Arc<Mutex<HashMap<String, Vec<SnippetRecord>>>>,
    failing: Arc<Mutex<Option<String>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, sniplist_id: &str, records: Vec<SnippetRecord>) {
        lock(&self.lists).insert(sniplist_id.to_string(), records);
    }

    /// Make every lookup fail with `message`, or succeed again with `None`
    pub fn set_failure(&self, message: Option<&str>) {
        *lock(&self.failing) = message.map(str::to_string);
    }

    /// Load one sniplist file; returns the store and the sniplist id.
    pub fn from_json_file(path: &Path) -> Result<(Self, String)> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::DataAccess(format!("{}: {}", path.display(), e)))?;
        let file: SniplistFile = serde_json::from_str(&text)?;
        let store = MemoryStore::new();
        store.insert(&file.id, file.snippets);
        Ok((store, file.id))
    }
}

impl SnippetStore for MemoryStore {
    fn windows(&self, sniplist_id: &str) -> BoxFuture<'static, Result<Vec<SnippetRecord>>> {
        let result = match lock(&self.failing).clone() {
            Some(msg) => Err(Error::DataAccess(msg)),
            None => lock(&self.lists)
                .get(sniplist_id)
                .cloned()
                .ok_or_else(|| Error::DataAccess(format!("unknown sniplist {}", sniplist_id))),
        };
        futures::future::ready(result).boxed()
    }
}

/// Title and uploader of a video
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub title: String,
    pub uploader: Option<String>,
}

/// Fire-and-forget metadata lookup; failures only mean the fallback title stays
pub trait TitleResolver: Send + Sync {
    fn title_for(&self, video_id: &str) -> BoxFuture<'static, Result<VideoMetadata>>;
}

/// Fixed titles, for tests
#[derive(Default)]
pub struct StaticTitles {
    titles: HashMap<String, VideoMetadata>,
}

impl StaticTitles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, video_id: &str, title: &str) -> Self {
        self.titles.insert(
            video_id.to_string(),
            VideoMetadata {
                title: title.to_string(),
                uploader: None,
            },
        );
        self
    }
}

impl TitleResolver for StaticTitles {
    fn title_for(&self, video_id: &str) -> BoxFuture<'static, Result<VideoMetadata>> {
        let found = self
            .titles
            .get(video_id)
            .cloned()
            .ok_or_else(|| Error::NetworkError(format!("no metadata for {}", video_id)));
        futures::future::ready(found).boxed()
    }
}

#[cfg(feature = "http")]
mod http {
    use std::time::Duration;

    use futures::future::{BoxFuture, FutureExt};
    use serde::Deserialize;

    use super::{SnippetRecord, SnippetStore, TitleResolver, VideoMetadata};
    use crate::{Error, Result};

    const USER_AGENT: &str = concat!("snipsync/", env!("CARGO_PKG_VERSION"));

    fn client(timeout: Duration) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| Error::InitializationError(format!("Failed to build HTTP client: {}", e)))
    }

    /// Backend store: `GET {base}/sniplists/{id}/snippets`
    pub struct RestStore {
        client: reqwest::Client,
        base: url::Url,
    }

    impl RestStore {
        pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
            let mut base = url::Url::parse(base_url)
                .map_err(|e| Error::ConfigError(format!("bad store url {}: {}", base_url, e)))?;
            if !base.path().ends_with('/') {
                let path = format!("{}/", base.path());
                base.set_path(&path);
            }
            Ok(RestStore {
                client: client(timeout)?,
                base,
            })
        }

        fn snippets_url(&self, sniplist_id: &str) -> Result<url::Url> {
            self.base
                .join(&format!("sniplists/{}/snippets", sniplist_id))
                .map_err(|e| Error::DataAccess(e.to_string()))
        }
    }

    impl SnippetStore for RestStore {
        fn windows(&self, sniplist_id: &str) -> BoxFuture<'static, Result<Vec<SnippetRecord>>> {
            let client = self.client.clone();
            let url = self.snippets_url(sniplist_id);
            async move {
                let url = url?;
                log::debug!("GET {}", url);
                let resp = client.get(url).send().await?;
                if !resp.status().is_success() {
                    return Err(Error::DataAccess(format!("store answered {}", resp.status())));
                }
                let records: Vec<SnippetRecord> = resp
                    .json()
                    .await
                    .map_err(|e| Error::DataAccess(format!("bad snippet payload: {}", e)))?;
                Ok(records)
            }
            .boxed()
        }
    }

    #[derive(Deserialize)]
    struct OEmbed {
        title: String,
        #[serde(default)]
        author_name: Option<String>,
    }

    /// Looks titles up through the provider's oEmbed endpoint
    pub struct OEmbedResolver {
        client: reqwest::Client,
        endpoint: url::Url,
        watch_base: String,
    }

    impl OEmbedResolver {
        pub const YOUTUBE_ENDPOINT: &'static str = "https://www.youtube.com/oembed";

        pub fn new(timeout: Duration) -> Result<Self> {
            Self::with_endpoint(Self::YOUTUBE_ENDPOINT, "https://www.youtube.com/watch?v=", timeout)
        }

        /// Custom endpoint; `watch_base` plus the video id forms the `url` parameter.
        pub fn with_endpoint(endpoint: &str, watch_base: &str, timeout: Duration) -> Result<Self> {
            let endpoint = url::Url::parse(endpoint)
                .map_err(|e| Error::ConfigError(format!("bad oEmbed url {}: {}", endpoint, e)))?;
            Ok(OEmbedResolver {
                client: client(timeout)?,
                endpoint,
                watch_base: watch_base.to_string(),
            })
        }

        fn request_url(&self, video_id: &str) -> url::Url {
            let mut url = self.endpoint.clone();
            url.query_pairs_mut()
                .append_pair("url", &format!("{}{}", self.watch_base, video_id))
                .append_pair("format", "json");
            url
        }
    }

    impl TitleResolver for OEmbedResolver {
        fn title_for(&self, video_id: &str) -> BoxFuture<'static, Result<VideoMetadata>> {
            let client = self.client.clone();
            let url = self.request_url(video_id);
            async move {
                let resp = client.get(url).send().await?;
                if !resp.status().is_success() {
                    return Err(Error::NetworkError(format!("oEmbed answered {}", resp.status())));
                }
                let body: OEmbed = resp.json().await?;
                Ok(VideoMetadata {
                    title: body.title,
                    uploader: body.author_name,
                })
            }
            .boxed()
        }
    }

}

#[cfg(feature = "http")]
pub use http::{OEmbedResolver, RestStore};
