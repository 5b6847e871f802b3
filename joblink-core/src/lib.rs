//! JobLink relay core
//!
//! A relay node pulls jobs from an upstream node over a long-lived gRPC
//! stream, hands them to a pluggable [`Engine`], and serves the engine's
//! output to downstream subscribers over the same protocol. Chaining nodes
//! forms a brokerless distribution tree for work items.
//!
//! The pieces:
//! - [`Backoff`] — bounded exponential wait between receive retries
//! - [`Puller`] — authenticated upstream streaming client with retry
//! - [`Pusher`] — streaming server with per-subscriber sessions and
//!   bounded graceful drain
//! - [`Engine`] — the application-provided processing component
//! - [`Relay`] — wires puller, engine, and pusher into one lifecycle

pub mod backoff;
pub mod config;
pub mod engine;
pub mod error;
pub mod job;
pub mod logging;
pub mod puller;
pub mod pusher;
pub mod relay;

pub use backoff::Backoff;
pub use config::Config;
pub use engine::{Engine, Signal};
pub use error::{Error, Result};
pub use job::Job;
pub use puller::{Pulled, Puller, PullerConfig};
pub use pusher::{CodeValidator, DrainHandle, Pusher, PusherConfig};
pub use relay::{BoundRelay, Relay, RelayHandle};
