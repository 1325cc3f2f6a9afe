//! browserhive: multi-tenant headless-browser orchestration.
//!
//! Fronts a fleet of long-running headless browser workers and exposes a
//! session abstraction to remote agents: named, isolated browsing sessions
//! that survive agent disconnects and resume by (agent, name) from a durable
//! index.

pub mod config;
pub mod errors;
pub mod server;
