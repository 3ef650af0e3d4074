//! Non-blocking incident dispatch.
//!
//! [`IncidentReporter::report`] runs on the request path: it consults the
//! [`ContainmentGate`] and performs a `try_send` into a bounded queue. A single
//! worker task drains the queue and calls the [`Notifier`], so a burst of
//! panics never turns into a burst of concurrent outbound calls.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::{ContainmentGate, GateState, Incident};
use crate::metrics;
use crate::sink::Notifier;

/// Result of handing an incident to the reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// Admitted and queued for delivery.
    Queued,
    /// Dropped by the containment gate.
    Suppressed,
    /// Admitted but the delivery queue was full (or closed).
    QueueFull,
}

/// Point-in-time counters for health output.
#[derive(Debug, Clone, Serialize)]
pub struct IncidentStats {
    pub gate: GateState,
    pub admitted: u64,
    pub suppressed: u64,
    pub dropped: u64,
    pub delivered: u64,
    pub failed: u64,
    pub times_tripped: u64,
}

#[derive(Default)]
struct DeliveryCounters {
    delivered: AtomicU64,
    failed: AtomicU64,
}

/// Gate + bounded queue in front of a [`Notifier`].
pub struct IncidentReporter {
    gate: ContainmentGate,
    tx: mpsc::Sender<Incident>,
    dropped: AtomicU64,
    counters: Arc<DeliveryCounters>,
}

impl IncidentReporter {
    /// Start the delivery worker on `tracker` and return the reporter.
    ///
    /// The worker stops when `shutdown` is cancelled or every reporter handle
    /// has been dropped. Incidents still queued at that point are discarded.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero (see [`mpsc::channel`]).
    pub fn spawn(
        notifier: Arc<dyn Notifier>,
        gate: ContainmentGate,
        capacity: usize,
        tracker: &TaskTracker,
        shutdown: CancellationToken,
    ) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        let counters = Arc::new(DeliveryCounters::default());

        tracker.spawn(run_worker(notifier, rx, counters.clone(), shutdown));

        Self {
            gate,
            tx,
            dropped: AtomicU64::new(0),
            counters,
        }
    }

    /// Hand an incident over for delivery. Never waits.
    pub fn report(&self, incident: Incident) -> ReportOutcome {
        if !self.gate.admit() {
            metrics::record_incident_suppressed();
            debug!(incident_id = %incident.id, "Incident suppressed by containment gate");
            return ReportOutcome::Suppressed;
        }

        let id = incident.id;
        match self.tx.try_send(incident) {
            Ok(()) => {
                metrics::record_incident_reported();
                ReportOutcome::Queued
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                metrics::record_incident_dropped();
                warn!(incident_id = %id, "Incident queue unavailable, dropping incident");
                ReportOutcome::QueueFull
            }
        }
    }

    pub fn gate(&self) -> &ContainmentGate {
        &self.gate
    }

    pub fn stats(&self) -> IncidentStats {
        IncidentStats {
            gate: self.gate.state(),
            admitted: self.gate.admitted(),
            suppressed: self.gate.suppressed(),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.counters.delivered.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            times_tripped: self.gate.times_tripped(),
        }
    }
}

async fn run_worker(
    notifier: Arc<dyn Notifier>,
    mut rx: mpsc::Receiver<Incident>,
    counters: Arc<DeliveryCounters>,
    shutdown: CancellationToken,
) {
    info!("Incident worker started");

    loop {
        let incident = tokio::select! {
            () = shutdown.cancelled() => {
                info!(pending = rx.len(), "Incident worker stopping");
                break;
            }
            next = rx.recv() => match next {
                Some(incident) => incident,
                None => break,
            },
        };

        let message = incident.format_message();
        match notifier.notify(message).await {
            Ok(notification_id) => {
                counters.delivered.fetch_add(1, Ordering::Relaxed);
                debug!(incident_id = %incident.id, %notification_id, "Incident notification sent");
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                warn!(incident_id = %incident.id, error = %e, "Incident notification failed");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::incident::{GateConfig, PanicCause};
    use crate::sink::SinkError;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::{Notify, Semaphore};

    #[derive(Default)]
    struct CountingNotifier {
        calls: AtomicU64,
        messages: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for CountingNotifier {
        async fn notify(&self, message: String) -> Result<String, SinkError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.messages.lock().unwrap().push(message);
            Ok("ok".to_string())
        }
    }

    struct FailingNotifier;

    #[async_trait]
    impl Notifier for FailingNotifier {
        async fn notify(&self, _message: String) -> Result<String, SinkError> {
            Err(SinkError::Unavailable("webhook down".to_string()))
        }
    }

    /// Signals entry, then blocks until released.
    struct BlockingNotifier {
        entered: Notify,
        release: Semaphore,
    }

    #[async_trait]
    impl Notifier for BlockingNotifier {
        async fn notify(&self, _message: String) -> Result<String, SinkError> {
            self.entered.notify_one();
            let _permit = self.release.acquire().await;
            Ok("late".to_string())
        }
    }

    fn incident(msg: &str) -> Incident {
        Incident::new(PanicCause::Message(msg.to_string()), vec![])
    }

    async fn wait_for(count: &AtomicU64, expected: u64) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while count.load(Ordering::SeqCst) < expected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("notifier was not called in time");
    }

    #[tokio::test]
    async fn test_gate_limits_notifications_and_resumes() {
        let notifier = Arc::new(CountingNotifier::default());
        let tracker = TaskTracker::new();
        let token = CancellationToken::new();
        let gate = ContainmentGate::new(GateConfig::new(
            2,
            Duration::from_secs(60),
            Duration::from_millis(50),
        ));
        let reporter = IncidentReporter::spawn(notifier.clone(), gate, 8, &tracker, token.clone());

        assert_eq!(reporter.report(incident("one")), ReportOutcome::Queued);
        assert_eq!(reporter.report(incident("two")), ReportOutcome::Queued);
        assert_eq!(reporter.report(incident("three")), ReportOutcome::Suppressed);

        wait_for(&notifier.calls, 2).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(notifier.calls.load(Ordering::SeqCst), 2);

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(reporter.report(incident("four")), ReportOutcome::Queued);
        wait_for(&notifier.calls, 3).await;

        let stats = reporter.stats();
        assert_eq!(stats.admitted, 3);
        assert_eq!(stats.suppressed, 1);
        assert_eq!(stats.delivered, 3);
        assert_eq!(stats.times_tripped, 1);

        token.cancel();
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test]
    async fn test_notifier_receives_formatted_message() {
        let notifier = Arc::new(CountingNotifier::default());
        let tracker = TaskTracker::new();
        let reporter = IncidentReporter::spawn(
            notifier.clone(),
            ContainmentGate::default(),
            4,
            &tracker,
            CancellationToken::new(),
        );

        reporter.report(incident("db_pool exhausted"));
        wait_for(&notifier.calls, 1).await;

        let messages = notifier.messages.lock().unwrap();
        assert!(messages[0].starts_with("*\\["));
        assert!(messages[0].contains("db\\_pool exhausted\r\n"));
    }

    #[tokio::test]
    async fn test_full_queue_drops_incident() {
        let notifier = Arc::new(BlockingNotifier {
            entered: Notify::new(),
            release: Semaphore::new(0),
        });
        let tracker = TaskTracker::new();
        let token = CancellationToken::new();
        let gate = ContainmentGate::new(GateConfig::new(
            100,
            Duration::from_secs(60),
            Duration::from_secs(60),
        ));
        let reporter = IncidentReporter::spawn(notifier.clone(), gate, 1, &tracker, token.clone());

        assert_eq!(reporter.report(incident("in flight")), ReportOutcome::Queued);
        notifier.entered.notified().await;

        assert_eq!(reporter.report(incident("buffered")), ReportOutcome::Queued);
        assert_eq!(reporter.report(incident("overflow")), ReportOutcome::QueueFull);
        assert_eq!(reporter.stats().dropped, 1);

        notifier.release.add_permits(10);
        token.cancel();
        tracker.close();
        tracker.wait().await;
    }

    #[tokio::test]
    async fn test_failed_delivery_is_counted() {
        let tracker = TaskTracker::new();
        let reporter = IncidentReporter::spawn(
            Arc::new(FailingNotifier),
            ContainmentGate::default(),
            4,
            &tracker,
            CancellationToken::new(),
        );

        assert_eq!(reporter.report(incident("boom")), ReportOutcome::Queued);

        tokio::time::timeout(Duration::from_secs(2), async {
            while reporter.stats().failed < 1 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(reporter.stats().delivered, 0);
    }

    #[tokio::test]
    async fn test_worker_stops_on_cancel() {
        let tracker = TaskTracker::new();
        let token = CancellationToken::new();
        let _reporter = IncidentReporter::spawn(
            Arc::new(CountingNotifier::default()),
            ContainmentGate::default(),
            4,
            &tracker,
            token.clone(),
        );

        token.cancel();
        tracker.close();
        tokio::time::timeout(Duration::from_secs(1), tracker.wait())
            .await
            .unwrap();
    }
}
