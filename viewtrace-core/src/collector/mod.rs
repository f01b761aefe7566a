//! Telemetry collector
//!
//! The [`Collector`] owns the whole pipeline for one page:
//!
//! ```text
//! host signals → visibility / scroll / performance → filter → buffer → dispatcher
//!                                                        └─→ mirror sink
//! ```
//!
//! ## Scheduling
//!
//! Every inbound call runs to completion without awaiting. Only delivery
//! suspends: every flush spawns the send on the tokio runtime captured at
//! construction, and [`Collector::flush_events`] additionally returns a
//! future that resolves when its batch settles. Failures never surface to
//! the caller; failed batches are requeued at the buffer head.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use viewtrace_core::collector::Collector;
//! use viewtrace_core::types::PartialEvent;
//! use viewtrace_core::Config;
//!
//! # async fn run() -> viewtrace_core::Result<()> {
//! let collector = Collector::builder(Config::load()?).build()?;
//! collector.set_session("user-1", "session-1");
//! collector.track_event(PartialEvent::interaction("cta_click").with_label("signup"));
//! collector.flush_events().await;
//! collector.destroy().await;
//! # Ok(())
//! # }
//! ```

/// Log a per-event pipeline step at debug level when verbose, trace otherwise
macro_rules! pipeline_event {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::debug!($($arg)+);
        } else {
            tracing::trace!($($arg)+);
        }
    };
}

mod buffer;
mod client;
mod dispatcher;

pub use buffer::EventBuffer;
pub use client::{
    HttpTransport, RecordingTransport, RetryingClient, Transport, TransportFuture,
    TransportResponse,
};
pub use dispatcher::{DeliveryOutcome, DeliveryStats, Dispatcher};

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

use chrono::Utc;
use rand::RngCore;
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::config::{CollectorConfig, Config, PrivacyMode};
use crate::error::{Error, Result};
use crate::filter::{Admission, EventFilter};
use crate::scroll::{ScrollMetrics, ScrollSampler};
use crate::session::{SessionController, SessionIds};
use crate::sink::{AnalyticsSink, NoopSink};
use crate::types::{Event, PartialEvent, PerformanceEntry, ScrollSignal};
use crate::visibility::{Entity, IntersectionSignal, ViewportObserver, VisibilityTracker};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Monotonic page clock in milliseconds since the collector was built
#[derive(Debug, Clone, Copy)]
struct PageClock {
    origin: Instant,
}

impl PageClock {
    fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    fn now_ms(&self) -> f64 {
        self.origin.elapsed().as_secs_f64() * 1000.0
    }
}

#[derive(Default)]
struct Tasks {
    timer: Option<JoinHandle<()>>,
    debounce: Option<JoinHandle<()>>,
    in_flight: Vec<JoinHandle<()>>,
}

struct Inner {
    clock: PageClock,
    privacy_mode: PrivacyMode,
    verbose: bool,
    scroll_debounce: Duration,
    filter: Mutex<EventFilter>,
    buffer: Arc<Mutex<EventBuffer>>,
    dispatcher: Arc<Dispatcher>,
    visibility: Mutex<VisibilityTracker>,
    scroll: Mutex<ScrollSampler>,
    session: Arc<SessionController>,
    sink: Arc<dyn AnalyticsSink>,
    runtime: Handle,
    tasks: Mutex<Tasks>,
    closed: AtomicBool,
}

/// Builder for [`Collector`]
pub struct CollectorBuilder {
    config: Config,
    transport: Option<Arc<dyn Transport>>,
    sink: Arc<dyn AnalyticsSink>,
    observer: Option<Box<dyn ViewportObserver>>,
    rng: Option<Box<dyn RngCore + Send>>,
}

impl CollectorBuilder {
    /// Deliver through `transport` instead of HTTP
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Mirror admitted events to `sink`
    pub fn sink(mut self, sink: Arc<dyn AnalyticsSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Host intersection observer; without one visibility tracking is off
    pub fn observer(mut self, observer: Box<dyn ViewportObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// Random source for sampling
    pub fn rng(mut self, rng: Box<dyn RngCore + Send>) -> Self {
        self.rng = Some(rng);
        self
    }

    /// Validate the configuration and start the flush timer.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> Result<Collector> {
        self.config.validate()?;
        let runtime = Handle::try_current()
            .map_err(|e| Error::Runtime(format!("no tokio runtime available: {}", e)))?;

        let collector_config: &CollectorConfig = &self.config.collector;
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(collector_config)?),
        };

        let policy = self.config.policy.to_policy();
        let filter = match self.rng {
            Some(rng) => EventFilter::with_rng(policy, rng),
            None => EventFilter::new(policy),
        };

        let buffer = Arc::new(Mutex::new(EventBuffer::new(collector_config.batch_size)));
        let session = Arc::new(SessionController::new());
        let dispatcher = Arc::new(Dispatcher::new(
            RetryingClient::new(transport, collector_config.retry_policy()),
            collector_config.endpoint.clone(),
            Arc::clone(&session),
            Arc::clone(&buffer),
            collector_config.requeue_limit(),
            collector_config.enable_debug_logging,
        ));

        let inner = Arc::new(Inner {
            clock: PageClock::start(),
            privacy_mode: collector_config.privacy_mode,
            verbose: collector_config.enable_debug_logging,
            scroll_debounce: Duration::from_millis(self.config.scroll.debounce_ms),
            filter: Mutex::new(filter),
            buffer,
            dispatcher,
            visibility: Mutex::new(VisibilityTracker::new(
                self.observer,
                &self.config.visibility,
            )),
            scroll: Mutex::new(ScrollSampler::new(&self.config.scroll)),
            session,
            sink: self.sink,
            runtime,
            tasks: Mutex::new(Tasks::default()),
            closed: AtomicBool::new(false),
        });

        let timer = Inner::spawn_flush_timer(&inner, collector_config.flush_interval());
        lock(&inner.tasks).timer = Some(timer);

        tracing::info!(
            endpoint = %collector_config.endpoint,
            batch_size = collector_config.batch_size,
            flush_interval_ms = collector_config.flush_interval_ms,
            "Collector started"
        );

        Ok(Collector { inner })
    }
}

/// Handle to the telemetry pipeline; cheap to clone
#[derive(Clone)]
pub struct Collector {
    inner: Arc<Inner>,
}

impl Collector {
    pub fn builder(config: Config) -> CollectorBuilder {
        CollectorBuilder {
            config,
            transport: None,
            sink: Arc::new(NoopSink),
            observer: None,
            rng: None,
        }
    }

    /// Register an entity for viewport tracking
    pub fn observe(&self, entity: &Entity) -> bool {
        if self.inner.is_closed() {
            return false;
        }
        lock(&self.inner.visibility).observe(entity)
    }

    /// Feed intersection changes reported by the host observer
    pub fn handle_intersections(&self, signals: &[IntersectionSignal]) {
        if self.inner.is_closed() {
            return;
        }
        let candidates: Vec<PartialEvent> = {
            let mut tracker = lock(&self.inner.visibility);
            signals
                .iter()
                .flat_map(|signal| tracker.on_intersection(signal))
                .collect()
        };
        for candidate in candidates {
            self.inner.admit(candidate);
        }
    }

    /// Submit a caller-built event; returns whether it was admitted
    pub fn track_event(&self, partial: PartialEvent) -> bool {
        self.inner.admit(partial)
    }

    /// Submit a performance timeline entry
    pub fn track_performance(&self, entry: &PerformanceEntry) -> bool {
        self.inner.admit(entry.to_partial())
    }

    /// Record a scroll position; sampled after the debounce window goes quiet
    pub fn track_scroll_behavior(&self, signal: ScrollSignal) {
        if self.inner.is_closed() {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let debounce = self.inner.scroll_debounce;
        let task = self.inner.runtime.spawn(async move {
            tokio::time::sleep(debounce).await;
            if let Some(inner) = weak.upgrade() {
                inner.sample_scroll(signal);
            }
        });

        if let Some(previous) = lock(&self.inner.tasks).debounce.replace(task) {
            previous.abort();
        }
    }

    pub fn set_session(&self, user_id: impl Into<String>, session_id: impl Into<String>) {
        self.inner.session.set(user_id, session_id);
    }

    pub fn session(&self) -> SessionIds {
        self.inner.session.current()
    }

    /// Snapshot the buffer and start its delivery now; the returned future
    /// completes once that batch is delivered or requeued. Dropping the future
    /// does not cancel the delivery.
    pub fn flush_events(&self) -> impl Future<Output = ()> + Send + 'static {
        let done = self.inner.spawn_delivery();
        async move {
            if let Some(done) = done {
                // sender is only dropped without sending if the runtime shuts down
                let _ = done.await;
            }
        }
    }

    /// Stop timers and observers, settle in-flight sends and make one final
    /// flush attempt. Every later call is a no-op.
    pub async fn destroy(&self) {
        let (timer, debounce, in_flight) = {
            let mut tasks = lock(&self.inner.tasks);
            if self.inner.closed.swap(true, Ordering::SeqCst) {
                return;
            }
            (
                tasks.timer.take(),
                tasks.debounce.take(),
                std::mem::take(&mut tasks.in_flight),
            )
        };
        for task in timer.into_iter().chain(debounce) {
            task.abort();
        }
        lock(&self.inner.visibility).disconnect();

        for task in in_flight {
            if let Err(e) = task.await {
                tracing::debug!(error = %e, "In-flight delivery ended abnormally");
            }
        }

        if let Some(events) = self.inner.dispatcher.take_batch() {
            if let DeliveryOutcome::Requeued { .. } = self.inner.dispatcher.deliver(events).await {
                let lost = lock(&self.inner.buffer).discard();
                self.inner.dispatcher.record_dropped(lost);
                tracing::warn!(lost, "Final flush failed, discarding buffered events");
            }
        }

        tracing::info!("Collector destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.is_closed()
    }

    /// Events currently buffered, in delivery order
    pub fn pending_events(&self) -> Vec<Event> {
        lock(&self.inner.buffer).snapshot()
    }

    pub fn pending_count(&self) -> usize {
        lock(&self.inner.buffer).len()
    }

    pub fn stats(&self) -> DeliveryStats {
        self.inner.dispatcher.stats()
    }

    pub fn scroll_metrics(&self) -> ScrollMetrics {
        lock(&self.inner.scroll).metrics().clone()
    }

    /// Total viewing time recorded for an entity
    pub fn viewing_time_ms(&self, id: &str) -> Option<f64> {
        lock(&self.inner.visibility).cumulative_ms(id)
    }
}

impl Inner {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Filter, stamp, mirror and buffer one candidate
    fn admit(&self, partial: PartialEvent) -> bool {
        if self.is_closed() {
            return false;
        }

        let now = self.clock.now_ms();
        let admission = lock(&self.filter).check(&partial.event_type, now);
        if admission != Admission::Admitted {
            pipeline_event!(
                self.verbose,
                event_type = %partial.event_type,
                ?admission,
                "Rejected event"
            );
            return false;
        }

        let event = Event::new(partial, Utc::now());
        if !self.privacy_mode.permits(&event) {
            return false;
        }

        if let Err(e) = self
            .sink
            .capture(event.event_type(), &event.mirror_properties())
        {
            tracing::debug!(error = %e, event_type = %event.event_type(), "Mirror sink failed");
        }

        pipeline_event!(self.verbose, event_type = %event.event_type(), "Admitted event");
        let full = lock(&self.buffer).push(event);
        if full {
            self.flush();
        }
        true
    }

    fn flush(&self) {
        self.spawn_delivery();
    }

    /// Snapshot the buffer and spawn its delivery as an in-flight task.
    ///
    /// `closed` is checked under the tasks lock so `destroy` either sees the
    /// task or this call sees the collector closed.
    fn spawn_delivery(&self) -> Option<oneshot::Receiver<()>> {
        let mut tasks = lock(&self.tasks);
        if self.is_closed() {
            return None;
        }
        let events = self.dispatcher.take_batch()?;
        pipeline_event!(self.verbose, events = events.len(), "Flushing batch");

        let dispatcher = Arc::clone(&self.dispatcher);
        let (done_tx, done_rx) = oneshot::channel();
        let task = self.runtime.spawn(async move {
            dispatcher.deliver(events).await;
            let _ = done_tx.send(());
        });

        tasks.in_flight.retain(|task| !task.is_finished());
        tasks.in_flight.push(task);
        Some(done_rx)
    }

    fn sample_scroll(&self, signal: ScrollSignal) {
        let candidate = lock(&self.scroll).sample(signal.scroll_y, signal.timestamp);
        if let Some(candidate) = candidate {
            self.admit(candidate);
        }
    }

    fn on_timer(&self) {
        let pruned = lock(&self.visibility).prune();
        if pruned > 0 {
            tracing::debug!(pruned, "Pruned detached entities");
        }
        self.flush();
    }

    fn spawn_flush_timer(inner: &Arc<Inner>, interval: Duration) -> JoinHandle<()> {
        let weak: Weak<Inner> = Arc::downgrade(inner);
        inner.runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                inner.on_timer();
            }
        })
    }
}
