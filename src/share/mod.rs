//! Cross-device share log and the chat relay sink

mod log;
mod relay;

pub use log::{PeerLogTail, ShareLog, ShareRecord};
pub use relay::ChatRelay;
