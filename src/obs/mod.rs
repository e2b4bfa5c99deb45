//! OBS browser source control and stream lifecycle events

mod browser_source;
mod events;

pub use browser_source::BrowserSource;
pub use events::{connect, streaming_active, subscribe_session_signals};

use thiserror::Error;

/// Boolean browser-source settings used to nudge a stale page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceFlag {
    RefreshCache,
    RestartWhenActive,
    Shutdown,
}

impl SourceFlag {
    /// Settings key understood by the OBS browser source
    pub fn setting_key(self) -> &'static str {
        match self {
            SourceFlag::RefreshCache => "refresh_cache",
            SourceFlag::RestartWhenActive => "restart_when_active",
            SourceFlag::Shutdown => "shutdown",
        }
    }
}

#[derive(Debug, Error)]
pub enum ApplyError {
    #[error("browser source not found: {0}")]
    SourceMissing(String),
    #[error("OBS request failed: {0}")]
    Request(#[from] obws::error::Error),
}

/// The host-owned display resource.
///
/// Not `Sync`: implementations are handed to the dispatcher, which only
/// ever calls them from its tick on the host thread.
pub trait ResourceApplier: Send {
    /// URL the source is currently showing
    fn current_url(&mut self) -> Result<String, ApplyError>;

    fn set_url(&mut self, url: &str) -> Result<(), ApplyError>;

    /// Setting a flag to the value it already has must be harmless
    fn set_flag(&mut self, flag: SourceFlag, value: bool) -> Result<(), ApplyError>;
}
