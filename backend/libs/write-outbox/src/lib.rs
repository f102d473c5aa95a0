//! # Write Outbox
//!
//! In-process outbox for remote writes that must not block the caller.
//!
//! Mutations that are fire-and-forget from the caller's point of view
//! (utility submissions, status changes, profile patches, root seeding)
//! are enqueued here instead of being spawned as unobserved background
//! calls. A background [`OutboxProcessor`] drains the queue in order,
//! retries failed deliveries with bounded exponential backoff, and
//! resolves a per-event [`DeliveryReceipt`] so callers and tests can
//! observe eventual delivery or abandonment.
//!
//! The queue is in-memory by design: the durable system of record for
//! this application is the local snapshot cache plus the remote store,
//! and an event that is abandoned here is recoverable by re-invoking the
//! operation against either.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use write_outbox::{Outbox, OutboxEvent, OutboxProcessor, OutboxProcessorConfig,
//!                    OutboxResult, OutboxTransport};
//!
//! struct LoggingTransport;
//!
//! #[async_trait::async_trait]
//! impl OutboxTransport for LoggingTransport {
//!     async fn deliver(&self, event: &OutboxEvent) -> OutboxResult<()> {
//!         println!("delivering {}", event.kind);
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let outbox = Outbox::new();
//!     OutboxProcessor::new(
//!         outbox.clone(),
//!         Arc::new(LoggingTransport),
//!         OutboxProcessorConfig::default(),
//!     )
//!     .spawn();
//!
//!     let receipt = outbox
//!         .enqueue("utility.added", serde_json::json!({"id": "util-1"}))
//!         .await;
//!     let outcome = receipt.wait().await;
//!     println!("{outcome:?}");
//! }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{oneshot, Mutex, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};
use uuid::Uuid;

mod error;

pub use error::{OutboxError, OutboxResult};

/// A queued remote write.
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    /// Unique identifier for this event.
    pub id: Uuid,

    /// Dotted event kind, e.g. "utility.added" or "member.seeded".
    pub kind: String,

    /// Event payload as JSON; the transport maps it onto the wire call.
    pub payload: serde_json::Value,

    /// Timestamp when the event was enqueued.
    pub created_at: DateTime<Utc>,

    /// Number of failed delivery attempts so far.
    pub retry_count: u32,

    /// Last delivery error, for diagnostics.
    pub last_error: Option<String>,
}

/// Transport that performs the actual remote call for an event.
///
/// Implementations should be safe to invoke again for the same event; the
/// processor retries on failure and the remote contract has no dedup key.
#[async_trait::async_trait]
pub trait OutboxTransport: Send + Sync {
    async fn deliver(&self, event: &OutboxEvent) -> OutboxResult<()>;
}

/// Final fate of an enqueued event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The transport accepted the event after `attempts` tries.
    Delivered { attempts: u32 },

    /// Retries were exhausted; the event was dropped from the queue.
    Abandoned { attempts: u32, last_error: String },
}

impl DeliveryOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DeliveryOutcome::Delivered { .. })
    }
}

/// Awaitable handle resolving to the event's [`DeliveryOutcome`].
#[derive(Debug)]
pub struct DeliveryReceipt {
    rx: oneshot::Receiver<DeliveryOutcome>,
}

impl DeliveryReceipt {
    /// Wait for the outcome. Returns `None` only if the processor was
    /// dropped before resolving the event.
    pub async fn wait(self) -> Option<DeliveryOutcome> {
        self.rx.await.ok()
    }
}

struct QueuedEvent {
    event: OutboxEvent,
    ack: oneshot::Sender<DeliveryOutcome>,
}

struct OutboxInner {
    queue: Mutex<VecDeque<QueuedEvent>>,
    notify: Notify,
}

/// Shared handle to the pending-write queue.
#[derive(Clone)]
pub struct Outbox {
    inner: Arc<OutboxInner>,
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(OutboxInner {
                queue: Mutex::new(VecDeque::new()),
                notify: Notify::new(),
            }),
        }
    }

    /// Enqueue an event for background delivery and return its receipt.
    pub async fn enqueue(&self, kind: impl Into<String>, payload: serde_json::Value) -> DeliveryReceipt {
        let event = OutboxEvent {
            id: Uuid::new_v4(),
            kind: kind.into(),
            payload,
            created_at: Utc::now(),
            retry_count: 0,
            last_error: None,
        };

        debug!(event_id = %event.id, kind = %event.kind, "Event enqueued for delivery");

        let (tx, rx) = oneshot::channel();
        {
            let mut queue = self.inner.queue.lock().await;
            queue.push_back(QueuedEvent { event, ack: tx });
        }
        self.inner.notify.notify_one();

        DeliveryReceipt { rx }
    }

    /// Number of events still waiting for delivery.
    pub async fn pending(&self) -> usize {
        self.inner.queue.lock().await.len()
    }
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

/// Processor tuning knobs.
#[derive(Debug, Clone)]
pub struct OutboxProcessorConfig {
    /// Delivery attempts before an event is abandoned.
    pub max_retries: u32,

    /// Base backoff; attempt n sleeps `retry_backoff * 2^(n-1)`.
    pub retry_backoff: Duration,

    /// Ceiling for the computed backoff.
    pub max_backoff: Duration,
}

impl Default for OutboxProcessorConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            retry_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(300),
        }
    }
}

/// Background worker draining an [`Outbox`] through a transport.
///
/// Events are processed strictly in enqueue order; a failing event is
/// retried in place (with backoff) before the next one is attempted, which
/// preserves per-member ordering of dependent writes.
pub struct OutboxProcessor<T: OutboxTransport> {
    outbox: Outbox,
    transport: Arc<T>,
    config: OutboxProcessorConfig,
}

impl<T: OutboxTransport + 'static> OutboxProcessor<T> {
    pub fn new(outbox: Outbox, transport: Arc<T>, config: OutboxProcessorConfig) -> Self {
        Self {
            outbox,
            transport,
            config,
        }
    }

    /// Spawn the processing loop on the current runtime.
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(async move { self.run().await })
    }

    async fn run(self) {
        loop {
            let next = {
                let mut queue = self.outbox.inner.queue.lock().await;
                queue.pop_front()
            };

            match next {
                Some(queued) => self.process(queued).await,
                None => self.outbox.inner.notify.notified().await,
            }
        }
    }

    async fn process(&self, mut queued: QueuedEvent) {
        loop {
            match self.transport.deliver(&queued.event).await {
                Ok(()) => {
                    let attempts = queued.event.retry_count + 1;
                    debug!(
                        event_id = %queued.event.id,
                        kind = %queued.event.kind,
                        attempts,
                        "Event delivered"
                    );
                    let _ = queued.ack.send(DeliveryOutcome::Delivered { attempts });
                    return;
                }
                Err(e) => {
                    queued.event.retry_count += 1;
                    queued.event.last_error = Some(e.to_string());

                    if queued.event.retry_count >= self.config.max_retries {
                        error!(
                            event_id = %queued.event.id,
                            kind = %queued.event.kind,
                            retry_count = queued.event.retry_count,
                            error = %e,
                            "Event exceeded max retries, abandoning"
                        );
                        let _ = queued.ack.send(DeliveryOutcome::Abandoned {
                            attempts: queued.event.retry_count,
                            last_error: e.to_string(),
                        });
                        return;
                    }

                    let backoff = self.calculate_backoff(queued.event.retry_count);
                    warn!(
                        event_id = %queued.event.id,
                        kind = %queued.event.kind,
                        retry_count = queued.event.retry_count,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "Delivery failed, retrying after backoff"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    /// Exponential backoff: `retry_backoff * 2^(retry_count - 1)`, capped.
    fn calculate_backoff(&self, retry_count: u32) -> Duration {
        let factor = 2u32.saturating_pow(retry_count.saturating_sub(1));
        self.config
            .retry_backoff
            .saturating_mul(factor)
            .min(self.config.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedTransport {
        /// Number of times `deliver` fails before succeeding; u32::MAX
        /// makes it fail forever.
        failures: u32,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn failing(failures: u32) -> Self {
            Self {
                failures,
                calls: AtomicU32::new(0),
            }
        }
    }

    #[async_trait::async_trait]
    impl OutboxTransport for ScriptedTransport {
        async fn deliver(&self, _event: &OutboxEvent) -> OutboxResult<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                Err(OutboxError::Delivery("remote unreachable".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn fast_config() -> OutboxProcessorConfig {
        OutboxProcessorConfig {
            max_retries: 3,
            retry_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(8),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let processor = OutboxProcessor::new(
            Outbox::new(),
            Arc::new(ScriptedTransport::failing(0)),
            OutboxProcessorConfig {
                max_retries: 10,
                retry_backoff: Duration::from_secs(1),
                max_backoff: Duration::from_secs(300),
            },
        );

        assert_eq!(processor.calculate_backoff(1).as_secs(), 1);
        assert_eq!(processor.calculate_backoff(2).as_secs(), 2);
        assert_eq!(processor.calculate_backoff(3).as_secs(), 4);
        assert_eq!(processor.calculate_backoff(4).as_secs(), 8);
        assert_eq!(processor.calculate_backoff(10).as_secs(), 300); // capped
    }

    #[tokio::test]
    async fn delivers_first_try() {
        let outbox = Outbox::new();
        let transport = Arc::new(ScriptedTransport::failing(0));
        OutboxProcessor::new(outbox.clone(), transport.clone(), fast_config()).spawn();

        let receipt = outbox.enqueue("test.event", serde_json::json!({})).await;
        let outcome = receipt.wait().await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 1 });
        assert_eq!(transport.calls.load(Ordering::SeqCst), 1);
        assert_eq!(outbox.pending().await, 0);
    }

    #[tokio::test]
    async fn retries_then_delivers() {
        let outbox = Outbox::new();
        let transport = Arc::new(ScriptedTransport::failing(2));
        OutboxProcessor::new(outbox.clone(), transport.clone(), fast_config()).spawn();

        let receipt = outbox.enqueue("test.event", serde_json::json!({})).await;
        let outcome = receipt.wait().await.unwrap();

        assert_eq!(outcome, DeliveryOutcome::Delivered { attempts: 3 });
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn abandons_after_max_retries() {
        let outbox = Outbox::new();
        let transport = Arc::new(ScriptedTransport::failing(u32::MAX));
        OutboxProcessor::new(outbox.clone(), transport.clone(), fast_config()).spawn();

        let receipt = outbox.enqueue("test.event", serde_json::json!({})).await;
        let outcome = receipt.wait().await.unwrap();

        match outcome {
            DeliveryOutcome::Abandoned { attempts, last_error } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("remote unreachable"));
            }
            other => panic!("expected abandonment, got {other:?}"),
        }
        assert_eq!(transport.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn preserves_enqueue_order() {
        struct RecordingTransport {
            seen: Mutex<Vec<String>>,
        }

        #[async_trait::async_trait]
        impl OutboxTransport for RecordingTransport {
            async fn deliver(&self, event: &OutboxEvent) -> OutboxResult<()> {
                self.seen.lock().await.push(event.kind.clone());
                Ok(())
            }
        }

        let outbox = Outbox::new();
        let transport = Arc::new(RecordingTransport {
            seen: Mutex::new(Vec::new()),
        });
        OutboxProcessor::new(outbox.clone(), transport.clone(), fast_config()).spawn();

        let first = outbox.enqueue("first", serde_json::json!({})).await;
        let second = outbox.enqueue("second", serde_json::json!({})).await;
        let third = outbox.enqueue("third", serde_json::json!({})).await;

        first.wait().await.unwrap();
        second.wait().await.unwrap();
        third.wait().await.unwrap();

        let seen = transport.seen.lock().await.clone();
        assert_eq!(seen, vec!["first", "second", "third"]);
    }
}
