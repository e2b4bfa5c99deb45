//! YouTube resolver: streams-page scrape with Data API fallback

use regex::Regex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use super::{ChannelRef, IdentifierResolver, ResolveError};
use crate::live::LiveIdentifier;

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36";
const SEARCH_URL: &str = "https://www.googleapis.com/youtube/v3/search";
const VIDEOS_URL: &str = "https://www.googleapis.com/youtube/v3/videos";

/// Minimum spacing between streams-page requests
const HTML_MIN_INTERVAL: Duration = Duration::from_secs(2);
const API_TIMEOUT: Duration = Duration::from_secs(20);
/// Data API cost of one search or videos call
const QUOTA_PER_CALL: u64 = 100;

/// Patterns locating the first live video on a streams page
pub struct LivePagePatterns {
    video_renderer: Regex,
    grid_renderer: Regex,
}

impl LivePagePatterns {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            video_renderer: Regex::new(r#""videoRenderer":\{"videoId":"([^"]+)""#)?,
            grid_renderer: Regex::new(r#""gridVideoRenderer":\{"videoId":"([^"]+)""#)?,
        })
    }

    /// First well-formed video id on the page, preferring the list layout
    pub fn extract(&self, html: &str) -> Option<LiveIdentifier> {
        [&self.video_renderer, &self.grid_renderer]
            .into_iter()
            .find_map(|pattern| pattern.captures(html))
            .and_then(|captures| captures.get(1))
            .and_then(|token| LiveIdentifier::parse(token.as_str()).ok())
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    items: Vec<SearchItem>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    #[serde(default)]
    id: Option<SearchItemId>,
    #[serde(default)]
    snippet: Option<SearchSnippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchItemId {
    video_id: Option<String>,
    channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchSnippet {
    channel_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VideosResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoItem {
    live_streaming_details: Option<LiveStreamingDetails>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LiveStreamingDetails {
    active_live_chat_id: Option<String>,
}

fn map_reqwest_error(e: reqwest::Error, timeout: Duration) -> ResolveError {
    if e.is_timeout() {
        ResolveError::Timeout(timeout)
    } else if e.is_connect() {
        ResolveError::Connection(e.to_string())
    } else if let Some(status) = e.status() {
        ResolveError::Status(status.as_u16())
    } else {
        ResolveError::Response(e.to_string())
    }
}

/// Resolver backed by youtube.com and, optionally, the YouTube Data API
pub struct YouTubeResolver {
    client: Client,
    runtime: Handle,
    api_key: Option<String>,
    patterns: LivePagePatterns,
    last_page_request: Mutex<Option<Instant>>,
    quota_used: AtomicU64,
}

impl YouTubeResolver {
    pub fn new(runtime: Handle, api_key: Option<String>) -> anyhow::Result<Self> {
        let client = Client::builder().user_agent(USER_AGENT).build()?;
        Ok(Self {
            client,
            runtime,
            api_key: api_key.filter(|key| !key.is_empty()),
            patterns: LivePagePatterns::new()?,
            last_page_request: Mutex::new(None),
            quota_used: AtomicU64::new(0),
        })
    }

    /// Space page requests out; callers queue on the lock
    fn throttle(&self) {
        let mut last = self
            .last_page_request
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        if let Some(previous) = *last {
            let since = previous.elapsed();
            if since < HTML_MIN_INTERVAL {
                std::thread::sleep(HTML_MIN_INTERVAL - since);
            }
        }
        *last = Some(Instant::now());
    }

    async fn fetch_page(&self, url: &str, timeout: Duration) -> Result<String, ResolveError> {
        let started = Instant::now();
        let response = self
            .client
            .get(url)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.5")
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;

        let status = response.status();
        let response = response
            .error_for_status()
            .map_err(|e| map_reqwest_error(e, timeout))?;
        let body = response
            .text()
            .await
            .map_err(|e| map_reqwest_error(e, timeout))?;
        info!(
            "Streams page response: status={}, elapsed={:.2}s, len={}",
            status,
            started.elapsed().as_secs_f64(),
            body.len()
        );
        Ok(body)
    }

    async fn api_get<T: DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ResolveError> {
        let key = self
            .api_key
            .as_deref()
            .ok_or(ResolveError::FallbackUnavailable)?;
        self.quota_used.fetch_add(QUOTA_PER_CALL, Ordering::Relaxed);

        self.client
            .get(url)
            .query(query)
            .query(&[("key", key)])
            .timeout(API_TIMEOUT)
            .send()
            .await
            .map_err(|e| map_reqwest_error(e, API_TIMEOUT))?
            .error_for_status()
            .map_err(|e| map_reqwest_error(e, API_TIMEOUT))?
            .json::<T>()
            .await
            .map_err(|e| map_reqwest_error(e, API_TIMEOUT))
    }

    async fn channel_id_for_handle(&self, handle: &str) -> Result<String, ResolveError> {
        let response: SearchResponse = self
            .api_get(
                SEARCH_URL,
                &[
                    ("part", "snippet"),
                    ("q", handle),
                    ("type", "channel"),
                    ("maxResults", "1"),
                ],
            )
            .await?;

        response
            .items
            .into_iter()
            .next()
            .and_then(|item| {
                item.snippet
                    .and_then(|snippet| snippet.channel_id)
                    .or_else(|| item.id.and_then(|id| id.channel_id))
            })
            .ok_or_else(|| ResolveError::Response(format!("no channel found for @{handle}")))
    }

    async fn lookup_live(&self, channel: &ChannelRef) -> Result<LiveIdentifier, ResolveError> {
        let channel_id = match channel {
            ChannelRef::ChannelId(id) => id.clone(),
            ChannelRef::Handle(handle) => self.channel_id_for_handle(handle).await?,
        };
        debug!("Searching live videos for channel {}", channel_id);

        let search: SearchResponse = self
            .api_get(
                SEARCH_URL,
                &[
                    ("part", "id"),
                    ("channelId", &channel_id),
                    ("eventType", "live"),
                    ("type", "video"),
                    ("maxResults", "1"),
                ],
            )
            .await?;

        let video_id = search
            .items
            .into_iter()
            .find_map(|item| item.id.and_then(|id| id.video_id))
            .ok_or(ResolveError::NotLive)?;
        let id = LiveIdentifier::parse(&video_id)
            .map_err(|e| ResolveError::Response(format!("bad video id {video_id:?}: {e}")))?;

        let videos: VideosResponse = self
            .api_get(
                VIDEOS_URL,
                &[("part", "liveStreamingDetails"), ("id", id.as_str())],
            )
            .await?;

        let has_chat = videos
            .items
            .into_iter()
            .next()
            .and_then(|item| item.live_streaming_details)
            .and_then(|details| details.active_live_chat_id)
            .is_some_and(|chat| !chat.is_empty());
        if !has_chat {
            return Err(ResolveError::ChatNotReady);
        }
        Ok(id)
    }
}

impl IdentifierResolver for YouTubeResolver {
    fn probe(
        &self,
        channel: &ChannelRef,
        timeout: Duration,
    ) -> Result<LiveIdentifier, ResolveError> {
        let url = channel.streams_url();
        self.throttle();
        info!("Probing streams page {} (timeout={:?})", url, timeout);

        let html = self.runtime.block_on(self.fetch_page(&url, timeout))?;
        match self.patterns.extract(&html) {
            Some(id) => {
                info!("Live video found on streams page: {}", id);
                Ok(id)
            }
            None => {
                info!("No live video on streams page for {}", channel);
                Err(ResolveError::NotLive)
            }
        }
    }

    fn fallback(&self, channel: &ChannelRef) -> Result<LiveIdentifier, ResolveError> {
        if self.api_key.is_none() {
            return Err(ResolveError::FallbackUnavailable);
        }
        let result = self.runtime.block_on(self.lookup_live(channel));
        match &result {
            Ok(id) => info!(
                "API found live video {} (quota used: {})",
                id,
                self.quota_used()
            ),
            Err(e) => warn!("API lookup failed: {} (quota used: {})", e, self.quota_used()),
        }
        result
    }

    fn has_fallback(&self) -> bool {
        self.api_key.is_some()
    }

    fn quota_used(&self) -> u64 {
        self.quota_used.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_prefers_video_renderer() {
        let patterns = LivePagePatterns::new().unwrap();
        let html = r#"{"gridVideoRenderer":{"videoId":"gridgridgri"}},{"videoRenderer":{"videoId":"dQw4w9WgXcQ","title":"live"}}"#;
        assert_eq!(
            patterns.extract(html),
            Some(LiveIdentifier::parse("dQw4w9WgXcQ").unwrap())
        );
    }

    #[test]
    fn test_extract_falls_back_to_grid_layout() {
        let patterns = LivePagePatterns::new().unwrap();
        let html = r#"<script>var data = {"gridVideoRenderer":{"videoId":"gridgridgri"}};</script>"#;
        assert_eq!(
            patterns.extract(html),
            Some(LiveIdentifier::parse("gridgridgri").unwrap())
        );
    }

    #[test]
    fn test_extract_rejects_malformed_ids() {
        let patterns = LivePagePatterns::new().unwrap();
        assert_eq!(patterns.extract("<html>nothing here</html>"), None);
        assert_eq!(
            patterns.extract(r#"{"videoRenderer":{"videoId":"short"}}"#),
            None
        );
    }

    #[test]
    fn test_error_categories() {
        use crate::live::FailureCategory;
        assert_eq!(ResolveError::NotLive.category(), FailureCategory::NotLive);
        assert_eq!(ResolveError::Status(503).category(), FailureCategory::NotLive);
        assert_eq!(
            ResolveError::Timeout(Duration::from_secs(1)).category(),
            FailureCategory::Timeout
        );
        assert_eq!(
            ResolveError::Connection("refused".into()).category(),
            FailureCategory::Connection
        );
    }

    #[test]
    fn test_search_response_parsing() {
        let json = r#"{"items":[{"id":{"kind":"youtube#video","videoId":"dQw4w9WgXcQ"}}]}"#;
        let response: SearchResponse = serde_json::from_str(json).unwrap();
        let id = response.items[0].id.as_ref().unwrap();
        assert_eq!(id.video_id.as_deref(), Some("dQw4w9WgXcQ"));

        let empty: SearchResponse = serde_json::from_str("{}").unwrap();
        assert!(empty.items.is_empty());
    }
}
