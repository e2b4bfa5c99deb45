//! Live identifiers and the shared state that tracks them

mod identifier;
mod state;

pub use identifier::{is_share_link, LiveIdentifier};
pub use state::{FailureCategory, RefreshTier, StateStore};
