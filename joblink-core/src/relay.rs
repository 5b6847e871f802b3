//! The relay node orchestrator
//!
//! Wires one [`Puller`], one [`Pusher`], and one [`Engine`] into a single
//! process lifecycle: pulled jobs flow onto the inbound channel the engine
//! consumes, and the engine's registrations feed each subscriber's push
//! session. Startup is fail-fast; shutdown is one-way, idempotent, and
//! bounded by the drain grace window plus a fixed margin.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::engine::{Engine, Signal};
use crate::error::{Error, Result};
use crate::job::Job;
use crate::puller::{Pulled, Puller, PullerConfig};
use crate::pusher::{CodeValidator, Pusher, PusherConfig};

/// Extra time granted on top of the drain grace window before the
/// orchestrator stops waiting for sessions and proceeds regardless.
const SHUTDOWN_MARGIN: Duration = Duration::from_secs(5);

/// Cloneable trigger for an externally requested stop
#[derive(Clone)]
pub struct RelayHandle {
    shutdown: CancellationToken,
}

impl RelayHandle {
    /// Request node shutdown. One-way and idempotent: repeated calls and
    /// calls racing an internal trigger are no-ops.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}

/// The engine the pusher sees: the node interposing itself in front of
/// the real processing component. Registrations are refused once shutdown
/// has triggered; everything else delegates.
struct NodeEngine {
    inner: Arc<dyn Engine>,
    shutdown: CancellationToken,
}

#[async_trait]
impl Engine for NodeEngine {
    async fn register(
        &self,
        outbound: mpsc::Sender<Job>,
        cancel: oneshot::Receiver<Signal>,
    ) -> anyhow::Result<()> {
        if self.shutdown.is_cancelled() {
            anyhow::bail!("node is shutting down");
        }
        self.inner.register(outbound, cancel).await
    }

    async fn start(&self, inbound: mpsc::Receiver<Job>) -> anyhow::Result<()> {
        self.inner.start(inbound).await
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.inner.stop().await
    }
}

/// A relay node, ready to be bound and run
pub struct Relay {
    config: Config,
    engine: Arc<dyn Engine>,
    validator: CodeValidator,
    shutdown: CancellationToken,
}

impl Relay {
    #[must_use]
    pub fn new(config: Config, engine: Arc<dyn Engine>) -> Self {
        let validator = CodeValidator::Shared(config.node.code.clone());
        Self {
            config,
            engine,
            validator,
            shutdown: CancellationToken::new(),
        }
    }

    /// Replace the shared-secret check with a custom predicate
    #[must_use]
    pub fn with_validator(mut self, validator: CodeValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Handle for requesting shutdown from outside the node
    #[must_use]
    pub fn handle(&self) -> RelayHandle {
        RelayHandle {
            shutdown: self.shutdown.clone(),
        }
    }

    /// Startup step: connect the upstream (if configured) and bind the
    /// listener. Both failures are fatal; the node never half-starts.
    pub async fn bind(self) -> Result<BoundRelay> {
        let puller = match &self.config.upstream {
            Some(upstream) => {
                let puller_config = PullerConfig {
                    connect_timeout: Duration::from_secs(upstream.connect_timeout_seconds),
                    retry_limit: self.config.retry.limit,
                    backoff_initial: Duration::from_secs(self.config.retry.initial_seconds),
                    backoff_growth: self.config.retry.growth,
                };
                Some(Puller::connect(&upstream.address, &upstream.code, puller_config).await?)
            }
            None => None,
        };

        let listener = Pusher::bind(&self.config.node.listen).await?;
        let local_addr = listener.local_addr().map_err(|e| Error::Bind {
            addr: self.config.node.listen.clone(),
            source: e,
        })?;

        Ok(BoundRelay {
            config: self.config,
            engine: self.engine,
            validator: self.validator,
            shutdown: self.shutdown,
            puller,
            listener,
            local_addr,
        })
    }

    /// Bind and serve until shutdown completes
    pub async fn run(self) -> Result<()> {
        self.bind().await?.serve().await
    }
}

/// A relay node with its upstream connected and its listener bound
pub struct BoundRelay {
    config: Config,
    engine: Arc<dyn Engine>,
    validator: CodeValidator,
    shutdown: CancellationToken,
    puller: Option<Puller>,
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl fmt::Debug for BoundRelay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundRelay")
            .field("local_addr", &self.local_addr)
            .field("upstream", &self.config.upstream.as_ref().map(|u| &u.address))
            .field("puller", &self.puller)
            .finish_non_exhaustive()
    }
}

impl BoundRelay {
    /// The address the pusher actually bound (useful with port 0)
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Run the node: engine consume loop, background pull loop, and the
    /// serving endpoint, then park until shutdown triggers and unwind in
    /// order. Returns the triggering error, or `Ok` on an externally
    /// requested stop.
    pub async fn serve(self) -> Result<()> {
        let Self {
            config,
            engine,
            validator,
            shutdown,
            puller,
            listener,
            local_addr,
        } = self;

        info!(address = %local_addr, upstream = ?config.upstream.as_ref().map(|u| &u.address), "relay node starting");

        let fatal: Arc<Mutex<Option<Error>>> = Arc::new(Mutex::new(None));
        let node_engine = Arc::new(NodeEngine {
            inner: engine.clone(),
            shutdown: shutdown.clone(),
        });

        // Engine consume loop on the inbound channel. The sender half is
        // held here so a node without an upstream still keeps the channel
        // open until shutdown.
        let (inbound_tx, inbound_rx) = mpsc::channel::<Job>(config.node.inbound_buffer);
        {
            let node_engine = node_engine.clone();
            let shutdown = shutdown.clone();
            let fatal = fatal.clone();
            tokio::spawn(async move {
                if let Err(e) = node_engine.start(inbound_rx).await {
                    error!(error = %e, "engine consume loop failed");
                    set_fatal(&fatal, Error::Engine(e));
                    shutdown.cancel();
                }
            });
        }

        // Background pull loop
        if let Some(puller) = puller {
            let inbound = inbound_tx.clone();
            let shutdown = shutdown.clone();
            let fatal = fatal.clone();
            tokio::spawn(async move {
                pull_loop(puller, inbound, shutdown, fatal).await;
            });
        }

        // Serving endpoint
        let pusher = Arc::new(Pusher::new(
            node_engine as Arc<dyn Engine>,
            validator,
            PusherConfig {
                outbound_buffer: config.node.outbound_buffer,
                drain_grace: config.shutdown_grace(),
            },
            shutdown.clone(),
        ));
        {
            let pusher = pusher.clone();
            let shutdown = shutdown.clone();
            let fatal = fatal.clone();
            tokio::spawn(async move {
                if let Err(e) = pusher.serve(listener).await {
                    error!(error = %e, "serving endpoint failed");
                    set_fatal(&fatal, e);
                    shutdown.cancel();
                }
            });
        }

        shutdown.cancelled().await;
        info!("relay node shutting down");

        // Bounded drain: wait for active sessions, proceed regardless
        let drain = pusher.request_close();
        let outer = config.shutdown_grace() + SHUTDOWN_MARGIN;
        if tokio::time::timeout(outer, drain.wait()).await.is_err() {
            warn!(
                waited_seconds = outer.as_secs(),
                "sessions still active past the drain window, proceeding"
            );
        }

        if let Err(e) = engine.stop().await {
            warn!(error = %e, "engine stop failed");
        }

        // Release the inbound channel so the consume loop can finish
        drop(inbound_tx);

        // A registration refusal is recorded inside the pusher; surface
        // it unless an earlier failure already claimed the slot.
        if let Some(e) = pusher.take_fatal_error() {
            set_fatal(&fatal, e);
        }

        let triggering = fatal.lock().take();
        info!("relay node stopped");
        match triggering {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Record the first fatal error; later ones are only logged by their
/// originating task.
fn set_fatal(fatal: &Mutex<Option<Error>>, error: Error) {
    let mut slot = fatal.lock();
    if slot.is_none() {
        *slot = Some(error);
    }
}

/// Forward pulled jobs onto the inbound channel until the upstream closes,
/// the retry budget is spent, or shutdown triggers.
async fn pull_loop(
    mut puller: Puller,
    inbound: mpsc::Sender<Job>,
    shutdown: CancellationToken,
    fatal: Arc<Mutex<Option<Error>>>,
) {
    loop {
        let pulled = tokio::select! {
            () = shutdown.cancelled() => break,
            pulled = puller.receive_next() => pulled,
        };

        match pulled {
            Ok(Pulled::Job(job)) => {
                if inbound.send(job).await.is_err() {
                    warn!("inbound channel closed, stopping pull loop");
                    break;
                }
            }
            Ok(Pulled::EndOfStream) => {
                info!("upstream closed the stream, shutting node down");
                shutdown.cancel();
                break;
            }
            Err(e) => {
                error!(error = %e, "upstream lost, shutting node down");
                set_fatal(&fatal, e);
                shutdown.cancel();
                break;
            }
        }
    }
    puller.close();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::MockEngine;

    #[tokio::test]
    async fn test_node_engine_refuses_registration_after_shutdown() {
        let mut inner = MockEngine::new();
        inner.expect_register().times(0);

        let shutdown = CancellationToken::new();
        let node = NodeEngine {
            inner: Arc::new(inner),
            shutdown: shutdown.clone(),
        };

        shutdown.cancel();
        let (tx, _rx) = mpsc::channel(1);
        let (_cancel_tx, cancel_rx) = oneshot::channel();
        assert!(node.register(tx, cancel_rx).await.is_err());
    }

    #[tokio::test]
    async fn test_node_engine_delegates_start_and_stop() {
        let mut inner = MockEngine::new();
        inner.expect_start().times(1).returning(|_| Ok(()));
        inner.expect_stop().times(1).returning(|| Ok(()));

        let node = NodeEngine {
            inner: Arc::new(inner),
            shutdown: CancellationToken::new(),
        };

        let (_tx, rx) = mpsc::channel(1);
        node.start(rx).await.unwrap();
        node.stop().await.unwrap();
    }

    #[test]
    fn test_handle_is_idempotent() {
        let relay = Relay::new(Config::default(), Arc::new(MockEngine::new()));
        let handle = relay.handle();
        assert!(!handle.is_shutdown());
        handle.shutdown();
        handle.shutdown();
        assert!(handle.is_shutdown());
    }
}
