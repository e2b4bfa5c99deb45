//! Channel reference parsing

use std::fmt;

/// A YouTube channel, by handle or by channel id
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelRef {
    Handle(String),
    ChannelId(String),
}

const CHANNEL_ID_LEN: usize = 24;

impl ChannelRef {
    /// Accepts `@handle`, a bare handle, a `UC…` channel id, or a channel URL
    /// of either form. Returns `None` for empty input.
    pub fn parse(input: &str) -> Option<Self> {
        let s = input.trim();
        if s.is_empty() {
            return None;
        }

        if s.starts_with("https://") {
            if let Some((_, rest)) = s.split_once("/@") {
                return first_segment(rest).map(|h| ChannelRef::Handle(h.to_string()));
            }
            if let Some((_, rest)) = s.split_once("/channel/") {
                return first_segment(rest).map(|id| ChannelRef::ChannelId(id.to_string()));
            }
        }

        if s.starts_with("UC") && s.len() == CHANNEL_ID_LEN {
            return Some(ChannelRef::ChannelId(s.to_string()));
        }

        let handle = s.strip_prefix('@').unwrap_or(s);
        if handle.is_empty() {
            return None;
        }
        Some(ChannelRef::Handle(handle.to_string()))
    }

    /// The channel's "streams" tab, which lists a live broadcast first
    pub fn streams_url(&self) -> String {
        match self {
            ChannelRef::Handle(handle) => format!("https://www.youtube.com/@{handle}/streams"),
            ChannelRef::ChannelId(id) => format!("https://www.youtube.com/channel/{id}/streams"),
        }
    }
}

impl fmt::Display for ChannelRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelRef::Handle(handle) => write!(f, "@{handle}"),
            ChannelRef::ChannelId(id) => f.write_str(id),
        }
    }
}

fn first_segment(rest: &str) -> Option<&str> {
    rest.split(['/', '?', '#'])
        .next()
        .filter(|segment| !segment.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_handles() {
        assert_eq!(
            ChannelRef::parse("@lofigirl"),
            Some(ChannelRef::Handle("lofigirl".into()))
        );
        assert_eq!(
            ChannelRef::parse("  lofigirl "),
            Some(ChannelRef::Handle("lofigirl".into()))
        );
        assert_eq!(
            ChannelRef::parse("https://www.youtube.com/@lofigirl/streams"),
            Some(ChannelRef::Handle("lofigirl".into()))
        );
    }

    #[test]
    fn test_parse_channel_ids() {
        let id = "UCSJ4gkVC6NrvII8umztf0Ow";
        assert_eq!(ChannelRef::parse(id), Some(ChannelRef::ChannelId(id.into())));
        assert_eq!(
            ChannelRef::parse(&format!("https://www.youtube.com/channel/{id}?view=0")),
            Some(ChannelRef::ChannelId(id.into()))
        );
    }

    #[test]
    fn test_parse_rejects_empty() {
        assert_eq!(ChannelRef::parse(""), None);
        assert_eq!(ChannelRef::parse("   "), None);
        assert_eq!(ChannelRef::parse("@"), None);
    }

    #[test]
    fn test_streams_url() {
        assert_eq!(
            ChannelRef::Handle("lofigirl".into()).streams_url(),
            "https://www.youtube.com/@lofigirl/streams"
        );
        assert_eq!(
            ChannelRef::ChannelId("UCSJ4gkVC6NrvII8umztf0Ow".into()).streams_url(),
            "https://www.youtube.com/channel/UCSJ4gkVC6NrvII8umztf0Ow/streams"
        );
    }
}
