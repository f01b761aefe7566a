//! Batch delivery
//!
//! The dispatcher posts `{sessionId, userId, events}` through the retrying
//! client. A batch that still fails once retries are exhausted is put back at
//! the head of the live buffer, once, up to the configured requeue limit.

use std::sync::{Arc, Mutex, PoisonError};

use crate::error::Result;
use crate::session::SessionController;
use crate::types::{Event, EventBatch};

use super::buffer::EventBuffer;
use super::client::RetryingClient;

/// Delivery statistics
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryStats {
    /// Batches accepted by the collector
    pub batches_sent: usize,
    /// Events in accepted batches
    pub events_sent: usize,
    /// Batches that failed after retries
    pub batches_failed: usize,
    /// Events put back into the buffer after a failure
    pub events_requeued: usize,
    /// Events lost to the requeue limit or shutdown
    pub events_dropped: usize,
}

/// What happened to one batch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered { events: usize },
    Requeued { requeued: usize, dropped: usize },
}

pub struct Dispatcher {
    client: RetryingClient,
    endpoint: String,
    session: Arc<SessionController>,
    buffer: Arc<Mutex<EventBuffer>>,
    stats: Mutex<DeliveryStats>,
    requeue_limit: usize,
    verbose: bool,
}

impl Dispatcher {
    pub fn new(
        client: RetryingClient,
        endpoint: impl Into<String>,
        session: Arc<SessionController>,
        buffer: Arc<Mutex<EventBuffer>>,
        requeue_limit: usize,
        verbose: bool,
    ) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
            session,
            buffer,
            stats: Mutex::new(DeliveryStats::default()),
            requeue_limit,
            verbose,
        }
    }

    /// Post one batch with the current session identifiers
    pub async fn send(&self, events: &[Event]) -> Result<()> {
        let ids = self.session.current();
        let body = serde_json::to_string(&EventBatch {
            session_id: ids.session_id,
            user_id: ids.user_id,
            events: events.to_vec(),
        })?;

        self.client.post_json(&self.endpoint, &body).await?;
        Ok(())
    }

    /// Send a batch; on failure requeue it at the buffer head
    pub async fn deliver(&self, events: Vec<Event>) -> DeliveryOutcome {
        let count = events.len();

        match self.send(&events).await {
            Ok(()) => {
                let mut stats = self.lock_stats();
                stats.batches_sent += 1;
                stats.events_sent += count;
                pipeline_event!(self.verbose, events = count, "Delivered batch");
                DeliveryOutcome::Delivered { events: count }
            }
            Err(e) => {
                let (requeued, dropped) = self
                    .buffer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .requeue_front(events, self.requeue_limit);

                let mut stats = self.lock_stats();
                stats.batches_failed += 1;
                stats.events_requeued += requeued;
                stats.events_dropped += dropped;

                tracing::warn!(
                    error = %e,
                    events = count,
                    requeued,
                    "Failed to deliver batch, requeued at buffer head"
                );
                if dropped > 0 {
                    tracing::warn!(
                        dropped,
                        limit = self.requeue_limit,
                        "Requeue limit reached, dropping newest failed events"
                    );
                }
                DeliveryOutcome::Requeued { requeued, dropped }
            }
        }
    }

    /// Snapshot and clear the live buffer
    pub fn take_batch(&self) -> Option<Vec<Event>> {
        self.buffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take_batch()
    }

    /// Count events discarded at shutdown
    pub fn record_dropped(&self, dropped: usize) {
        self.lock_stats().events_dropped += dropped;
    }

    pub fn stats(&self) -> DeliveryStats {
        self.lock_stats().clone()
    }

    fn lock_stats(&self) -> std::sync::MutexGuard<'_, DeliveryStats> {
        self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::client::RecordingTransport;
    use crate::config::RetryPolicy;
    use crate::types::PartialEvent;
    use chrono::Utc;
    use std::time::Duration;

    fn event(name: &str) -> Event {
        Event::new(PartialEvent::interaction(name), Utc::now())
    }

    fn dispatcher(
        transport: Arc<RecordingTransport>,
        limit: usize,
    ) -> (Dispatcher, Arc<Mutex<EventBuffer>>, Arc<SessionController>) {
        let buffer = Arc::new(Mutex::new(EventBuffer::new(3)));
        let session = Arc::new(SessionController::new());
        let policy = RetryPolicy {
            timeout: Duration::from_millis(1000),
            retries: 0,
            backoff_base: Duration::from_millis(10),
        };
        let dispatcher = Dispatcher::new(
            RetryingClient::new(transport, policy),
            "http://collector/v1/events",
            Arc::clone(&session),
            Arc::clone(&buffer),
            limit,
            false,
        );
        (dispatcher, buffer, session)
    }

    #[tokio::test]
    async fn test_delivers_with_session_ids() {
        let transport = Arc::new(RecordingTransport::accepting());
        let (dispatcher, buffer, session) = dispatcher(transport.clone(), 3);
        session.set("u-9", "s-9");

        let outcome = dispatcher.deliver(vec![event("a"), event("b")]).await;
        assert_eq!(outcome, DeliveryOutcome::Delivered { events: 2 });

        let body = &transport.bodies()[0];
        assert_eq!(body["sessionId"], "s-9");
        assert_eq!(body["userId"], "u-9");
        assert_eq!(body["events"][0]["type"], "a");
        assert_eq!(body["events"][1]["type"], "b");
        assert!(buffer.lock().unwrap().is_empty());
        assert_eq!(dispatcher.stats().events_sent, 2);
    }

    #[tokio::test]
    async fn test_empty_session_ids_before_set() {
        let transport = Arc::new(RecordingTransport::accepting());
        let (dispatcher, _, _) = dispatcher(transport.clone(), 3);
        dispatcher.deliver(vec![event("a")]).await;
        let body = &transport.bodies()[0];
        assert_eq!(body["sessionId"], "");
        assert_eq!(body["userId"], "");
    }

    #[tokio::test]
    async fn test_failure_requeues_up_to_limit() {
        let transport = Arc::new(RecordingTransport::with_status(503));
        let (dispatcher, buffer, _) = dispatcher(transport, 2);
        buffer.lock().unwrap().push(event("newer"));

        let outcome = dispatcher
            .deliver(vec![event("a"), event("b"), event("c")])
            .await;
        assert_eq!(
            outcome,
            DeliveryOutcome::Requeued {
                requeued: 2,
                dropped: 1
            }
        );

        let names: Vec<_> = buffer
            .lock()
            .unwrap()
            .snapshot()
            .iter()
            .map(|e| e.event_type().to_string())
            .collect();
        assert_eq!(names, vec!["a", "b", "newer"]);

        let stats = dispatcher.stats();
        assert_eq!(stats.batches_failed, 1);
        assert_eq!(stats.events_requeued, 2);
        assert_eq!(stats.events_dropped, 1);
    }
}
