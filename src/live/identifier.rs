//! Live broadcast identifiers and the links derived from them

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Length of a YouTube video id
pub const IDENTIFIER_LEN: usize = 11;

const SHARE_LINK_PREFIX: &str = "https://youtube.com/live/";
const SHARE_LINK_SUFFIX: &str = "?feature=share";
const POPOUT_PREFIX: &str = "https://www.youtube.com/live_chat?is_popout=1&v=";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentifierError {
    #[error("identifier must be {IDENTIFIER_LEN} characters, got {0}")]
    Length(usize),
    #[error("identifier contains invalid character {0:?}")]
    Character(char),
}

/// Opaque token naming one live broadcast.
///
/// Always exactly 11 characters from `[A-Za-z0-9_-]`; anything else is
/// rejected at construction so downstream code never re-validates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LiveIdentifier(String);

impl LiveIdentifier {
    pub fn parse(raw: &str) -> Result<Self, IdentifierError> {
        let len = raw.chars().count();
        if len != IDENTIFIER_LEN {
            return Err(IdentifierError::Length(len));
        }
        if let Some(bad) = raw
            .chars()
            .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
        {
            return Err(IdentifierError::Character(bad));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Canonical share link, the only link format peers accept
    pub fn share_link(&self) -> String {
        format!("{SHARE_LINK_PREFIX}{}{SHARE_LINK_SUFFIX}", self.0)
    }

    /// Popout chat URL applied to the browser source
    pub fn popout_url(&self) -> String {
        format!("{POPOUT_PREFIX}{}", self.0)
    }

    /// Recover the identifier from a canonical share link
    pub fn from_share_link(link: &str) -> Option<Self> {
        let token = link
            .strip_prefix(SHARE_LINK_PREFIX)?
            .strip_suffix(SHARE_LINK_SUFFIX)?;
        Self::parse(token).ok()
    }
}

impl fmt::Display for LiveIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for LiveIdentifier {
    type Err = IdentifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for LiveIdentifier {
    type Error = IdentifierError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<LiveIdentifier> for String {
    fn from(id: LiveIdentifier) -> Self {
        id.0
    }
}

/// True when `link` is exactly a canonical share link
pub fn is_share_link(link: &str) -> bool {
    LiveIdentifier::from_share_link(link).is_some()
}
