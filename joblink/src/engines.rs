//! Built-in processing components
//!
//! Two ready-made engines cover the common node roles: [`DispatchEngine`]
//! hands each pulled job to exactly one downstream subscriber, and
//! [`TickerEngine`] turns a node into a source by generating timestamped
//! jobs on an interval.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use joblink_core::{Engine, Job, Signal};

struct Subscriber {
    sender: mpsc::Sender<Job>,
    cancel: oneshot::Receiver<Signal>,
}

/// Relays each inbound job to exactly one subscriber, rotating through
/// them round-robin. Jobs arriving while nobody is subscribed are dropped.
#[derive(Default)]
pub struct DispatchEngine {
    subscribers: Mutex<Vec<Subscriber>>,
    cursor: AtomicUsize,
}

impl DispatchEngine {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Pick the next live subscriber, pruning any whose session has ended
    /// or whose cancel signal fired.
    fn pick(&self) -> Option<mpsc::Sender<Job>> {
        let mut subscribers = self.subscribers.lock();
        subscribers.retain_mut(|s| match s.cancel.try_recv() {
            Err(oneshot::error::TryRecvError::Empty) => !s.sender.is_closed(),
            Ok(_) | Err(oneshot::error::TryRecvError::Closed) => false,
        });
        if subscribers.is_empty() {
            return None;
        }
        let idx = self.cursor.fetch_add(1, Ordering::Relaxed) % subscribers.len();
        Some(subscribers[idx].sender.clone())
    }

    async fn dispatch(&self, job: Job) {
        loop {
            let Some(sender) = self.pick() else {
                debug!("no subscribers, dropping job");
                return;
            };
            // A send failure means the subscriber died between pick and
            // send; the next pick prunes it.
            if sender.send(job.clone()).await.is_ok() {
                return;
            }
        }
    }
}

#[async_trait]
impl Engine for DispatchEngine {
    async fn register(
        &self,
        outbound: mpsc::Sender<Job>,
        cancel: oneshot::Receiver<Signal>,
    ) -> anyhow::Result<()> {
        let mut subscribers = self.subscribers.lock();
        subscribers.push(Subscriber {
            sender: outbound,
            cancel,
        });
        info!(subscribers = subscribers.len(), "dispatch subscriber added");
        Ok(())
    }

    async fn start(&self, mut inbound: mpsc::Receiver<Job>) -> anyhow::Result<()> {
        while let Some(job) = inbound.recv().await {
            self.dispatch(job).await;
        }
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        // Dropping the senders lets every session end cleanly
        self.subscribers.lock().clear();
        Ok(())
    }
}

/// Generates a timestamped job per tick for every subscriber, making the
/// node a source for a relay chain.
pub struct TickerEngine {
    interval: Duration,
    stopped: Arc<AtomicBool>,
}

impl TickerEngine {
    #[must_use]
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            stopped: Arc::new(AtomicBool::new(false)),
        }
    }
}

#[async_trait]
impl Engine for TickerEngine {
    async fn register(
        &self,
        outbound: mpsc::Sender<Job>,
        mut cancel: oneshot::Receiver<Signal>,
    ) -> anyhow::Result<()> {
        let interval = self.interval;
        let stopped = self.stopped.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = &mut cancel => break,
                    _ = ticker.tick() => {
                        if stopped.load(Ordering::Relaxed) {
                            break;
                        }
                        let job = Job::new(chrono::Utc::now().to_rfc3339())
                            .with_metadata("source", "ticker");
                        if outbound.send(job).await.is_err() {
                            break;
                        }
                    }
                }
            }
        });
        Ok(())
    }

    async fn start(&self, mut inbound: mpsc::Receiver<Job>) -> anyhow::Result<()> {
        // A source node has no upstream; drain anything that shows up
        while inbound.recv().await.is_some() {}
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        self.stopped.store(true, Ordering::Relaxed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> (
        mpsc::Sender<Job>,
        mpsc::Receiver<Job>,
        oneshot::Sender<Signal>,
        oneshot::Receiver<Signal>,
    ) {
        let (tx, rx) = mpsc::channel(16);
        let (cancel_tx, cancel_rx) = oneshot::channel();
        (tx, rx, cancel_tx, cancel_rx)
    }

    #[tokio::test]
    async fn test_dispatch_alternates_between_subscribers() {
        let engine = DispatchEngine::new();
        let (tx_a, mut rx_a, _ca, cancel_a) = session();
        let (tx_b, mut rx_b, _cb, cancel_b) = session();
        engine.register(tx_a, cancel_a).await.unwrap();
        engine.register(tx_b, cancel_b).await.unwrap();

        for seq in 0..4 {
            engine.dispatch(Job::new(format!("job-{seq}"))).await;
        }

        assert_eq!(rx_a.recv().await.unwrap().payload(), "job-0");
        assert_eq!(rx_b.recv().await.unwrap().payload(), "job-1");
        assert_eq!(rx_a.recv().await.unwrap().payload(), "job-2");
        assert_eq!(rx_b.recv().await.unwrap().payload(), "job-3");
    }

    #[tokio::test]
    async fn test_dispatch_prunes_dead_subscriber() {
        let engine = DispatchEngine::new();
        let (tx_a, rx_a, _ca, cancel_a) = session();
        let (tx_b, mut rx_b, _cb, cancel_b) = session();
        engine.register(tx_a, cancel_a).await.unwrap();
        engine.register(tx_b, cancel_b).await.unwrap();

        drop(rx_a);
        for seq in 0..3 {
            engine.dispatch(Job::new(format!("job-{seq}"))).await;
        }

        // Every job lands on the surviving subscriber
        for seq in 0..3 {
            assert_eq!(rx_b.recv().await.unwrap().payload(), format!("job-{seq}"));
        }
    }

    #[tokio::test]
    async fn test_dispatch_prunes_cancelled_subscriber() {
        let engine = DispatchEngine::new();
        let (tx_a, mut rx_a, cancel_a_tx, cancel_a) = session();
        let (tx_b, mut rx_b, _cb, cancel_b) = session();
        engine.register(tx_a, cancel_a).await.unwrap();
        engine.register(tx_b, cancel_b).await.unwrap();

        cancel_a_tx
            .send(Signal::aborted("subscriber stream closed"))
            .unwrap();
        for seq in 0..2 {
            engine.dispatch(Job::new(format!("job-{seq}"))).await;
        }

        assert_eq!(rx_b.recv().await.unwrap().payload(), "job-0");
        assert_eq!(rx_b.recv().await.unwrap().payload(), "job-1");
        assert!(rx_a.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_dispatch_drops_job_without_subscribers() {
        let engine = DispatchEngine::new();
        // Must return rather than block or panic
        engine.dispatch(Job::new("orphan")).await;
    }

    #[tokio::test]
    async fn test_dispatch_stop_closes_sessions() {
        let engine = DispatchEngine::new();
        let (tx, mut rx, _c, cancel) = session();
        engine.register(tx, cancel).await.unwrap();

        engine.stop().await.unwrap();
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_emits_timestamped_jobs() {
        let engine = TickerEngine::new(Duration::from_millis(10));
        let (tx, mut rx, _c, cancel) = session();
        engine.register(tx, cancel).await.unwrap();

        let job = rx.recv().await.unwrap();
        assert_eq!(job.metadata().get("source").map(String::as_str), Some("ticker"));
        assert!(!job.payload().is_empty());
        assert!(rx.recv().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_halts_on_cancel_signal() {
        let engine = TickerEngine::new(Duration::from_millis(10));
        let (tx, mut rx, cancel_tx, cancel) = session();
        engine.register(tx, cancel).await.unwrap();

        cancel_tx
            .send(Signal::aborted("subscriber stream closed"))
            .unwrap();

        // The producer exits and drops its sender; drain until closed
        while rx.recv().await.is_some() {}
    }
}
