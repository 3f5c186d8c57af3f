//! Network adapters implementing the reelforge collaborator traits.
//!
//! - [`EngineApi`]: submission and bulk status fetch over HTTP.
//! - [`HttpArtifactProber`]: artifact retrievability via `HEAD`.
//! - [`PushListener`]: WebSocket push channel with reconnect backoff.

pub mod api;
pub mod config;
pub mod error;
pub mod listener;
pub mod messages;
pub mod probe;
pub mod reconnect;

pub use api::EngineApi;
pub use config::ClientConfig;
pub use error::ClientError;
pub use listener::PushListener;
pub use probe::HttpArtifactProber;
pub use reconnect::{Backoff, ReconnectConfig};
