//! Upstream streaming client
//!
//! Dials an upstream node, authenticates with the shared passphrase, and
//! holds the one live receive stream. Transient receive failures are
//! retried behind a [`Backoff`]; a clean end-of-stream is surfaced as its
//! own signal so the orchestrator can tell graceful upstream shutdown from
//! network flakiness.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use joblink_proto::v1 as proto;
use joblink_proto::JobServiceClient;
use tonic::transport::Endpoint;
use tonic::{Code, Status, Streaming};
use tracing::{info, warn};

use crate::backoff::Backoff;
use crate::error::{Error, Result};
use crate::job::Job;

/// Puller tuning knobs
#[derive(Debug, Clone)]
pub struct PullerConfig {
    /// Timeout for establishing the upstream connection
    pub connect_timeout: Duration,
    /// Read attempts per `receive_next` call before giving up
    pub retry_limit: u32,
    /// First backoff wait between failed reads
    pub backoff_initial: Duration,
    /// Multiplier applied to the wait after each failed read
    pub backoff_growth: u32,
}

impl Default for PullerConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            retry_limit: 5,
            backoff_initial: Duration::from_secs(1),
            backoff_growth: 2,
        }
    }
}

/// Outcome of a successful `receive_next` call
#[derive(Debug)]
pub enum Pulled {
    /// The next job from the upstream stream
    Job(Job),
    /// The upstream intentionally closed the conversation; not an error
    EndOfStream,
}

/// The upstream read side, behind a seam so retry behavior is testable
/// without a live gRPC server.
#[async_trait]
pub trait JobSource: Send {
    async fn next_job(&mut self) -> std::result::Result<Option<proto::Job>, Status>;
}

#[async_trait]
impl JobSource for Streaming<proto::Job> {
    async fn next_job(&mut self) -> std::result::Result<Option<proto::Job>, Status> {
        self.message().await
    }
}

/// Streaming client for one upstream node.
///
/// Holds at most one live stream; reconnecting means constructing a new
/// puller via [`Puller::connect`].
pub struct Puller<S = Streaming<proto::Job>> {
    addr: String,
    stream: S,
    config: PullerConfig,
}

impl<S> fmt::Debug for Puller<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Puller")
            .field("addr", &self.addr)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Puller {
    /// Dial `addr`, then open the receive stream authenticated with
    /// `code`. Both steps are atomic from the caller's perspective: a
    /// failure at either discards the attempt entirely.
    pub async fn connect(addr: &str, code: &str, config: PullerConfig) -> Result<Self> {
        let endpoint = Endpoint::from_shared(format!("http://{addr}"))
            .map_err(|e| Error::Dial {
                addr: addr.to_string(),
                reason: e.to_string(),
            })?
            .connect_timeout(config.connect_timeout);

        let channel = endpoint.connect().await.map_err(|e| Error::Dial {
            addr: addr.to_string(),
            reason: e.to_string(),
        })?;

        let mut client = JobServiceClient::new(channel);
        let stream = client
            .ask(proto::Passphrase {
                code: code.to_string(),
            })
            .await
            .map_err(|status| match status.code() {
                Code::Unauthenticated | Code::PermissionDenied => Error::Auth {
                    addr: addr.to_string(),
                    reason: status.message().to_string(),
                },
                _ => Error::Dial {
                    addr: addr.to_string(),
                    reason: status.to_string(),
                },
            })?
            .into_inner();

        info!(address = %addr, "upstream stream established");
        Ok(Self {
            addr: addr.to_string(),
            stream,
            config,
        })
    }
}

impl<S: JobSource> Puller<S> {
    /// Build a puller over an already-open source. Used by tests; the
    /// production path goes through [`Puller::connect`].
    #[cfg(test)]
    fn from_source(stream: S, config: PullerConfig) -> Self {
        Self {
            addr: "test".to_string(),
            stream,
            config,
        }
    }

    /// Read the next item from the open stream.
    ///
    /// Transient read failures are retried with a fresh backoff sequence:
    /// up to `retry_limit` reads separated by `retry_limit - 1` waits. A
    /// clean end-of-stream returns immediately regardless of remaining
    /// retry budget. Once the budget is spent the upstream is reported
    /// unavailable with the number of attempts made.
    pub async fn receive_next(&mut self) -> Result<Pulled> {
        let mut backoff = Backoff::new(
            self.config.retry_limit.saturating_sub(1),
            self.config.backoff_initial,
            self.config.backoff_growth,
        );
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            match self.stream.next_job().await {
                Ok(Some(job)) => return Ok(Pulled::Job(job.into())),
                Ok(None) => return Ok(Pulled::EndOfStream),
                Err(status) => {
                    warn!(
                        address = %self.addr,
                        attempt = attempts,
                        error = %status,
                        "upstream receive failed"
                    );
                    if backoff.wait().await.is_err() {
                        return Err(Error::Unavailable { attempts });
                    }
                }
            }
        }
    }

    /// Release the stream and the underlying connection. Consumes the
    /// puller, so a double close is unrepresentable.
    pub fn close(self) {
        info!(address = %self.addr, "upstream connection closed");
    }
}
