//! The processing component contract
//!
//! An [`Engine`] is the application logic a relay node hosts: it consumes
//! the node's inbound job stream and produces jobs for each downstream
//! subscriber. The relay core only ever talks to this trait.

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};

use crate::job::Job;

/// Out-of-band notice sent from a pusher session back to the engine when a
/// subscriber's stream dies, so the engine stops producing for it.
#[derive(Debug, Default)]
pub struct Signal {
    pub error: Option<String>,
}

impl Signal {
    /// A signal carrying the reason the subscriber was lost
    #[must_use]
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            error: Some(reason.into()),
        }
    }
}

/// Pluggable processing component hosted by a relay node.
///
/// Contract:
/// - `register` is called once per accepted subscriber. The engine must
///   produce jobs onto `outbound` until `cancel` fires (or its sender is
///   dropped) or it decides to stop, and must close the channel — drop the
///   sender — when done. The cancel signal is observed by polling; it is
///   never forced.
/// - `start` consumes the node's inbound stream until the channel closes.
/// - `stop` asks the engine to halt any background production/consumption.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Engine: Send + Sync {
    async fn register(
        &self,
        outbound: mpsc::Sender<Job>,
        cancel: oneshot::Receiver<Signal>,
    ) -> anyhow::Result<()>;

    async fn start(&self, inbound: mpsc::Receiver<Job>) -> anyhow::Result<()>;

    async fn stop(&self) -> anyhow::Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_aborted_carries_reason() {
        let sig = Signal::aborted("stream closed");
        assert_eq!(sig.error.as_deref(), Some("stream closed"));
        assert!(Signal::default().error.is_none());
    }
}
