use tracing::{debug, info, warn};

use crate::live::is_share_link;

/// Destination for peer share links.
///
/// Only validates and dedupes; the link is logged for the operator to post.
#[derive(Debug, Default)]
pub struct ChatRelay {
    last_posted: Option<String>,
}

impl ChatRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `link` unless it is malformed or was the last one posted
    pub fn offer(&mut self, link: &str) -> bool {
        if !is_share_link(link) {
            warn!("Refusing to relay malformed share link: {}", link);
            return false;
        }
        if self.last_posted.as_deref() == Some(link) {
            debug!("Share link already relayed: {}", link);
            return false;
        }
        info!("Relaying share link to chat: {}", link);
        self.last_posted = Some(link.to_string());
        true
    }

    #[cfg(test)]
    pub fn last_posted(&self) -> Option<&str> {
        self.last_posted.as_deref()
    }
}
