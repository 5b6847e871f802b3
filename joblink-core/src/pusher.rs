//! Downstream streaming server
//!
//! Serves `JobService/Ask`: each accepted subscriber gets its own
//! registration with the engine, its own bounded outbound channel, and its
//! own session task. A dead subscriber only ever takes down its own
//! session; node shutdown drains buffered jobs for a bounded grace window
//! before abandoning the rest.

use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use joblink_proto::v1 as proto;
use joblink_proto::JobServiceServer;
use parking_lot::Mutex;
use subtle::ConstantTimeEq;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio_stream::wrappers::{ReceiverStream, TcpListenerStream};
use tokio_stream::Stream;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tonic::transport::Server;
use tonic::{Request, Response, Status};
use tracing::{debug, error, info, warn};

use crate::engine::{Engine, Signal};
use crate::error::{Error, Result};
use crate::job::Job;

type AskStream = Pin<Box<dyn Stream<Item = std::result::Result<proto::Job, Status>> + Send>>;

/// Gate for stream establishment: either a shared secret compared in
/// constant time, or a caller-supplied predicate.
#[derive(Clone)]
pub enum CodeValidator {
    Shared(String),
    Predicate(Arc<dyn Fn(&str) -> bool + Send + Sync>),
}

impl CodeValidator {
    #[must_use]
    pub fn accepts(&self, code: &str) -> bool {
        match self {
            Self::Shared(expected) => expected.as_bytes().ct_eq(code.as_bytes()).into(),
            Self::Predicate(check) => check(code),
        }
    }
}

impl fmt::Debug for CodeValidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared(_) => f.write_str("CodeValidator::Shared(..)"),
            Self::Predicate(_) => f.write_str("CodeValidator::Predicate(..)"),
        }
    }
}

/// Pusher tuning knobs
#[derive(Debug, Clone)]
pub struct PusherConfig {
    /// Capacity of each subscriber's outbound channel (backpressure bound)
    pub outbound_buffer: usize,
    /// How long a session keeps delivering buffered jobs after shutdown
    pub drain_grace: Duration,
}

impl Default for PusherConfig {
    fn default() -> Self {
        Self {
            outbound_buffer: 64,
            drain_grace: Duration::from_secs(30),
        }
    }
}

struct Shared {
    engine: Arc<dyn Engine>,
    validator: CodeValidator,
    config: PusherConfig,
    shutdown: CancellationToken,
    sessions: TaskTracker,
    fatal: Mutex<Option<Error>>,
}

/// Resolves once every session that was active at close time has exited
pub struct DrainHandle {
    sessions: TaskTracker,
}

impl DrainHandle {
    pub async fn wait(self) {
        self.sessions.wait().await;
    }
}

/// Streaming server for downstream subscribers
pub struct Pusher {
    shared: Arc<Shared>,
}

impl Pusher {
    /// `shutdown` is the node-wide token; the pusher observes it and
    /// cancels it only when the engine refuses a registration.
    #[must_use]
    pub fn new(
        engine: Arc<dyn Engine>,
        validator: CodeValidator,
        config: PusherConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                engine,
                validator,
                config,
                shutdown,
                sessions: TaskTracker::new(),
                fatal: Mutex::new(None),
            }),
        }
    }

    /// Bind the listen address. Kept separate from [`Pusher::serve`] so
    /// callers can fail fast on startup and learn the bound port.
    pub async fn bind(addr: &str) -> Result<TcpListener> {
        TcpListener::bind(addr).await.map_err(|e| Error::Bind {
            addr: addr.to_string(),
            source: e,
        })
    }

    /// Serve the endpoint until the shutdown token fires or the transport
    /// fails. Blocks the calling task.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let shutdown = self.shared.shutdown.clone();
        info!("job stream endpoint serving");
        Server::builder()
            .add_service(JobServiceServer::new(AskService {
                shared: self.shared.clone(),
            }))
            .serve_with_incoming_shutdown(
                TcpListenerStream::new(listener),
                shutdown.cancelled_owned(),
            )
            .await
            .map_err(Error::Serve)
    }

    /// Bind and serve in one call
    pub async fn listen(&self, addr: &str) -> Result<()> {
        let listener = Self::bind(addr).await?;
        self.serve(listener).await
    }

    /// Flip the shutdown flag (one-way, idempotent) and return a handle
    /// that resolves once every active session has exited. Callers bound
    /// the wait with their own timeout.
    pub fn request_close(&self) -> DrainHandle {
        self.shared.shutdown.cancel();
        self.shared.sessions.close();
        DrainHandle {
            sessions: self.shared.sessions.clone(),
        }
    }

    /// Number of in-flight subscriber sessions
    #[must_use]
    pub fn active_sessions(&self) -> usize {
        self.shared.sessions.len()
    }

    /// The error that made the pusher trigger node shutdown, if any.
    /// Taking it transfers ownership to the caller.
    pub fn take_fatal_error(&self) -> Option<Error> {
        self.shared.fatal.lock().take()
    }
}

#[derive(Clone)]
struct AskService {
    shared: Arc<Shared>,
}

#[tonic::async_trait]
#[allow(clippy::result_large_err)] // tonic::Status is inherently large; required by gRPC trait
impl joblink_proto::JobService for AskService {
    type AskStream = AskStream;

    async fn ask(
        &self,
        request: Request<proto::Passphrase>,
    ) -> std::result::Result<Response<Self::AskStream>, Status> {
        let shared = &self.shared;

        if shared.shutdown.is_cancelled() {
            return Err(Status::unavailable("node is shutting down"));
        }

        let pass = request.into_inner();
        if !shared.validator.accepts(&pass.code) {
            warn!("subscriber rejected: invalid passphrase");
            return Err(Status::unauthenticated("invalid passphrase"));
        }

        let (job_tx, job_rx) = mpsc::channel::<Job>(shared.config.outbound_buffer);
        let (cancel_tx, cancel_rx) = oneshot::channel::<Signal>();

        if let Err(e) = shared.engine.register(job_tx, cancel_rx).await {
            // The processing component itself cannot proceed; that is
            // fatal to the whole node, not just this subscriber.
            error!(error = %e, "engine refused subscription, shutting node down");
            let status = Status::internal(format!("registration failed: {e}"));
            let mut fatal = shared.fatal.lock();
            if fatal.is_none() {
                *fatal = Some(Error::Engine(e));
            }
            drop(fatal);
            shared.shutdown.cancel();
            return Err(status);
        }

        let (out_tx, out_rx) = mpsc::channel(shared.config.outbound_buffer);
        let shutdown = shared.shutdown.clone();
        let grace = shared.config.drain_grace;
        shared.sessions.spawn(async move {
            pump(job_rx, out_tx, cancel_tx, shutdown, grace).await;
        });

        info!(active_sessions = shared.sessions.len(), "subscriber stream opened");
        Ok(Response::new(Box::pin(ReceiverStream::new(out_rx)) as AskStream))
    }
}

/// Per-subscriber session loop: forward jobs from the engine's outbound
/// source onto the wire, observing the shutdown flag after each send and
/// while idle.
async fn pump(
    mut jobs: mpsc::Receiver<Job>,
    out: mpsc::Sender<std::result::Result<proto::Job, Status>>,
    cancel: oneshot::Sender<Signal>,
    shutdown: CancellationToken,
    grace: Duration,
) {
    loop {
        let job = tokio::select! {
            () = shutdown.cancelled() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => {
                    debug!("outbound source closed, session ends cleanly");
                    return;
                }
            },
        };

        if out.send(Ok(job.into())).await.is_err() {
            warn!("subscriber gone mid-stream, cancelling its producer");
            let _ = cancel.send(Signal::aborted("subscriber stream closed"));
            return;
        }

        if shutdown.is_cancelled() {
            break;
        }
    }

    debug!("shutdown requested, draining buffered jobs");
    drain(jobs, out, cancel, grace).await;
}

/// Keep delivering already-buffered jobs until the engine closes the
/// outbound source or the grace window elapses.
async fn drain(
    mut jobs: mpsc::Receiver<Job>,
    out: mpsc::Sender<std::result::Result<proto::Job, Status>>,
    cancel: oneshot::Sender<Signal>,
    grace: Duration,
) {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        match tokio::time::timeout_at(deadline, jobs.recv()).await {
            Ok(Some(job)) => {
                if out.send(Ok(job.into())).await.is_err() {
                    let _ = cancel.send(Signal::aborted("subscriber stream closed during drain"));
                    return;
                }
            }
            // Source closed within the window: clean termination
            Ok(None) => {
                debug!("outbound source drained");
                return;
            }
            Err(_) => {
                warn!("drain window elapsed, abandoning remaining jobs");
                let _ = out
                    .send(Err(Status::unavailable(
                        "node closed before the outbound source drained",
                    )))
                    .await;
                let _ = cancel.send(Signal::aborted("drain window elapsed"));
                return;
            }
        }
    }
}
