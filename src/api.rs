#![forbid(unsafe_code)]

//! Catalog API client and the paginated listing machinery.
//!
//! Two read-only endpoints are consumed: `playlists` (selected by channel id
//! or an explicit id set) and `playlistItems` (selected by playlist id). Both
//! return a JSON envelope of `{items: [...], nextPageToken?: ...}` and both
//! are walked through the same [`Paginator`], which fetches pages lazily and
//! refuses to follow a continuation token that stops advancing.

use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Page size requested from both listing endpoints.
pub const PAGE_SIZE: &str = "50";

const PLAYLISTS_ENDPOINT: &str = "playlists";
const PLAYLIST_ITEMS_ENDPOINT: &str = "playlistItems";

/// One page of a listing response.
///
/// Invariant: a page without `nextPageToken` is the final page.
#[derive(Debug, Clone, Deserialize)]
pub struct PageEnvelope {
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
}

/// Transport seam for the listing endpoints. Production code goes through
/// [`ApiClient`]; tests feed scripted envelopes through this trait instead.
pub trait PageSource {
    fn fetch_page(&self, endpoint: &str, params: &[(String, String)]) -> Result<PageEnvelope>;
}

/// Blocking HTTP client for the catalog API.
///
/// Transport failures and 5xx statuses can optionally be retried a bounded
/// number of times (`retry_limit`, off by default). 4xx statuses and the
/// pagination cycle guard are never retried.
pub struct ApiClient {
    agent: ureq::Agent,
    base_url: String,
    api_key: String,
    verbose: bool,
    retry_limit: u32,
    retry_delay: Duration,
}

impl ApiClient {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        Self {
            agent: ureq::AgentBuilder::new()
                .timeout(Duration::from_secs(30))
                .build(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            verbose: false,
            retry_limit: 0,
            retry_delay: Duration::from_secs(2),
        }
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_retry(mut self, limit: u32, delay: Duration) -> Self {
        self.retry_limit = limit;
        self.retry_delay = delay;
        self
    }
}

impl PageSource for ApiClient {
    fn fetch_page(&self, endpoint: &str, params: &[(String, String)]) -> Result<PageEnvelope> {
        let url = format!("{}/{}", self.base_url, endpoint);
        let mut attempts = 0u32;

        loop {
            if self.verbose {
                // The API key is deliberately left out of the log line.
                println!("API url: {url}, params: {params:?}");
            }

            let mut request = self.agent.get(&url);
            for (name, value) in params {
                request = request.query(name, value);
            }
            let request = request.query("key", &self.api_key);

            match request.call() {
                Ok(response) => {
                    return response
                        .into_json()
                        .with_context(|| format!("parsing listing response from {url}"));
                }
                Err(ureq::Error::Status(code, _)) if code >= 500 && attempts < self.retry_limit => {
                    attempts += 1;
                    eprintln!("Warning: API error {code} at {url}, retry {attempts}");
                    thread::sleep(self.retry_delay);
                }
                Err(ureq::Error::Status(code, _)) => {
                    bail!("API error {code} at url: {url}");
                }
                Err(err) if attempts < self.retry_limit => {
                    attempts += 1;
                    eprintln!("Warning: request to {url} failed ({err}), retry {attempts}");
                    thread::sleep(self.retry_delay);
                }
                Err(err) => {
                    return Err(anyhow!(err)).with_context(|| format!("request to {url} failed"));
                }
            }
        }
    }
}

/// Lazy pull-based iterator over a paginated listing.
///
/// Single-pass and non-restartable: pages are fetched on demand as the
/// consumer advances, each request carrying the token returned by the
/// previous response. Iteration ends after a token-less page, after an empty
/// page, or permanently after the first error.
pub struct Paginator<'a> {
    source: &'a dyn PageSource,
    endpoint: &'static str,
    params: Vec<(String, String)>,
    page_token: Option<String>,
    buffer: VecDeque<Value>,
    done: bool,
}

impl<'a> Paginator<'a> {
    pub fn new(
        source: &'a dyn PageSource,
        endpoint: &'static str,
        params: Vec<(String, String)>,
    ) -> Self {
        Self {
            source,
            endpoint,
            params,
            page_token: None,
            buffer: VecDeque::new(),
            done: false,
        }
    }

    fn fetch_next_page(&mut self) -> Result<()> {
        let mut params = self.params.clone();
        if let Some(token) = &self.page_token {
            params.push(("pageToken".to_string(), token.clone()));
        }

        let envelope = self.source.fetch_page(self.endpoint, &params)?;

        match envelope.next_page_token {
            None => self.done = true,
            Some(next) => {
                // Cycle guard: a token identical to the one just sent means
                // the listing would loop forever.
                if self.page_token.as_deref() == Some(next.as_str()) {
                    bail!(
                        "endless pagination detected: nextPageToken is not advancing at {}",
                        self.endpoint
                    );
                }
                self.page_token = Some(next);
            }
        }

        self.buffer.extend(envelope.items);
        Ok(())
    }
}

impl Iterator for Paginator<'_> {
    type Item = Result<Value>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(item) = self.buffer.pop_front() {
            return Some(Ok(item));
        }
        if self.done {
            return None;
        }

        if let Err(err) = self.fetch_next_page() {
            self.done = true;
            return Some(Err(err));
        }

        match self.buffer.pop_front() {
            Some(item) => Some(Ok(item)),
            None => {
                // An empty page ends the listing even when a token was
                // returned; anything else risks spinning on hollow pages.
                self.done = true;
                None
            }
        }
    }
}

/// Visibility of a playlist item. Only `Private` items are ever skipped;
/// records without a recognizable status are treated as public.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrivacyStatus {
    Public,
    Private,
    Unlisted,
}

impl PrivacyStatus {
    fn parse(value: Option<&str>) -> Self {
        match value {
            Some("private") => Self::Private,
            Some("unlisted") => Self::Unlisted,
            _ => Self::Public,
        }
    }
}

/// A named collection of items, as returned by the playlists endpoint.
#[derive(Debug, Clone)]
pub struct Playlist {
    pub id: String,
    pub title: String,
    pub raw: Value,
}

impl Playlist {
    pub fn from_value(raw: Value) -> Result<Self> {
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("playlist record is missing an id"))?
            .to_string();
        let title = str_at(&raw, &["snippet", "title"]).unwrap_or_default();
        Ok(Self { id, title, raw })
    }
}

/// One membership record from the playlistItems endpoint. The full catalog
/// record is kept in `raw` so the metadata sidecar can preserve it verbatim.
#[derive(Debug, Clone)]
pub struct PlaylistItem {
    pub video_id: String,
    pub title: String,
    /// When the item was added to the playlist.
    pub published_at: Option<DateTime<Utc>>,
    /// When the video itself was originally published.
    pub video_published_at: Option<DateTime<Utc>>,
    pub privacy: PrivacyStatus,
    pub raw: Value,
}

impl PlaylistItem {
    pub fn from_value(raw: Value) -> Result<Self> {
        let video_id = str_at(&raw, &["snippet", "resourceId", "videoId"])
            .ok_or_else(|| anyhow!("playlist item record is missing a video id"))?;
        let title = str_at(&raw, &["snippet", "title"]).unwrap_or_default();
        let published_at = parse_timestamp(&raw, &["snippet", "publishedAt"]);
        let video_published_at = parse_timestamp(&raw, &["contentDetails", "videoPublishedAt"]);
        let privacy = PrivacyStatus::parse(
            raw.get("status")
                .and_then(|status| status.get("privacyStatus"))
                .and_then(Value::as_str),
        );

        Ok(Self {
            video_id,
            title,
            published_at,
            video_published_at,
            privacy,
            raw,
        })
    }
}

fn str_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut current = value;
    for key in path {
        current = current.get(key)?;
    }
    current.as_str().map(str::to_string)
}

fn parse_timestamp(value: &Value, path: &[&str]) -> Option<DateTime<Utc>> {
    str_at(value, path)
        .and_then(|raw| DateTime::parse_from_rfc3339(&raw).ok())
        .map(|parsed| parsed.with_timezone(&Utc))
}

/// Selects which playlists to list: everything on a channel, or an explicit
/// set of playlist ids.
#[derive(Debug, Clone)]
pub enum PlaylistSelector {
    Channel(String),
    Ids(Vec<String>),
}

/// Enumerates playlists lazily. Shares all pagination logic (including the
/// cycle guard) with [`list_playlist_items`].
pub fn list_playlists<'a>(
    source: &'a dyn PageSource,
    selector: &PlaylistSelector,
) -> impl Iterator<Item = Result<Playlist>> + 'a {
    let mut params = vec![
        ("part".to_string(), "contentDetails,snippet".to_string()),
        ("maxResults".to_string(), PAGE_SIZE.to_string()),
    ];
    match selector {
        PlaylistSelector::Channel(channel_id) => {
            params.push(("channelId".to_string(), channel_id.clone()));
        }
        PlaylistSelector::Ids(ids) => {
            params.push(("id".to_string(), ids.join(",")));
        }
    }

    Paginator::new(source, PLAYLISTS_ENDPOINT, params)
        .map(|record| record.and_then(Playlist::from_value))
}

/// Enumerates the membership records of one playlist lazily.
pub fn list_playlist_items<'a>(
    source: &'a dyn PageSource,
    playlist_id: &str,
) -> impl Iterator<Item = Result<PlaylistItem>> + 'a {
    let params = vec![
        (
            "part".to_string(),
            "contentDetails,snippet,status".to_string(),
        ),
        ("maxResults".to_string(), PAGE_SIZE.to_string()),
        ("playlistId".to_string(), playlist_id.to_string()),
    ];

    Paginator::new(source, PLAYLIST_ITEMS_ENDPOINT, params)
        .map(|record| record.and_then(PlaylistItem::from_value))
}
