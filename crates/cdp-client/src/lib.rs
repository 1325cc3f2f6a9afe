//! Chrome DevTools Protocol client.
//!
//! One [`CdpClient`] speaks to one browser process over a persistent
//! websocket. Commands are multiplexed on the channel and correlated back to
//! their callers by id; unsolicited events are dropped. Page-scoped commands
//! ride on lazily-created target attachments (`Target.attachToTarget` with
//! `flatten: true`).

pub mod client;
pub mod discovery;
pub mod error;
pub mod protocol;

#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use client::CdpClient;
pub use error::{CdpError, DiscoveryError};
