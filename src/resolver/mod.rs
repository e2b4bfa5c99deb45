//! Live identifier resolution for a channel

mod channel;
mod youtube;

pub use channel::ChannelRef;
pub use youtube::YouTubeResolver;

use std::time::Duration;
use thiserror::Error;

use crate::live::{FailureCategory, LiveIdentifier};

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("no live video found")]
    NotLive,
    #[error("live chat not active yet")]
    ChatNotReady,
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection failed: {0}")]
    Connection(String),
    #[error("HTTP status {0}")]
    Status(u16),
    #[error("unexpected response: {0}")]
    Response(String),
    #[error("no API fallback configured")]
    FallbackUnavailable,
}

impl ResolveError {
    /// Bucket used for backoff accounting and refresh escalation
    pub fn category(&self) -> FailureCategory {
        match self {
            ResolveError::Timeout(_) => FailureCategory::Timeout,
            ResolveError::Connection(_) => FailureCategory::Connection,
            ResolveError::NotLive
            | ResolveError::ChatNotReady
            | ResolveError::Status(_)
            | ResolveError::Response(_)
            | ResolveError::FallbackUnavailable => FailureCategory::NotLive,
        }
    }
}

/// Finds the live broadcast for a channel.
///
/// Calls block for up to their timeout and must only be made from
/// background workers, never from the host thread.
pub trait IdentifierResolver: Send + Sync {
    /// Cheap page probe, safe to repeat on a timer
    fn probe(&self, channel: &ChannelRef, timeout: Duration)
        -> Result<LiveIdentifier, ResolveError>;

    /// Quota-consuming fallback used only while acquiring
    fn fallback(&self, _channel: &ChannelRef) -> Result<LiveIdentifier, ResolveError> {
        Err(ResolveError::FallbackUnavailable)
    }

    fn has_fallback(&self) -> bool {
        false
    }

    /// Remote API quota units spent so far
    fn quota_used(&self) -> u64 {
        0
    }
}
