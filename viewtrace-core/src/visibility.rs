//! Viewport visibility tracking
//!
//! Entities are registered with the host's intersection observer and the
//! host reports ratio changes back as [`IntersectionSignal`]s. The tracker
//! turns enter/exit transitions into events and keeps per-entity viewing
//! time.
//!
//! Sessions live in a side map keyed by the entity's stable id. The tracker
//! never holds the entity itself; detached entities are dropped by
//! [`VisibilityTracker::prune`].

use std::collections::{HashMap, HashSet};

use serde::Deserialize;
use serde_json::json;

use crate::config::VisibilityConfig;
use crate::types::PartialEvent;

/// Options handed to the host observer when it is created
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverOptions {
    pub thresholds: Vec<f64>,
    pub root_margin_px: u32,
}

impl From<&VisibilityConfig> for ObserverOptions {
    fn from(config: &VisibilityConfig) -> Self {
        Self {
            thresholds: config.thresholds.clone(),
            root_margin_px: config.root_margin_px,
        }
    }
}

/// Host intersection-observer primitive
pub trait ViewportObserver: Send {
    /// Start reporting intersection changes for the entity
    fn observe(&mut self, id: &str, options: &ObserverOptions);

    /// Whether the entity is still attached to the page
    fn is_attached(&self, id: &str) -> bool;

    /// Stop all observation
    fn disconnect(&mut self);
}

/// Something on the page that can be observed
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Entity {
    /// Element attributes as reported by the host
    #[serde(default)]
    pub attributes: HashMap<String, String>,
}

impl Entity {
    pub fn with_attribute(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            attributes: HashMap::from([(name.into(), value.into())]),
        }
    }

    /// Stable identifier under `attribute`, if present and non-empty
    pub fn identity(&self, attribute: &str) -> Option<&str> {
        self.attributes
            .get(attribute)
            .map(String::as_str)
            .filter(|id| !id.trim().is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// One intersection change reported by the host
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntersectionSignal {
    pub id: String,
    pub ratio: f64,
    pub is_intersecting: bool,
    #[serde(default)]
    pub bounding_box: BoundingBox,
    /// Page clock in milliseconds
    pub time_ms: f64,
}

/// Viewing state for one entity
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ViewportSession {
    pub entry_timestamp: Option<f64>,
    pub cumulative_duration_ms: f64,
}

pub struct VisibilityTracker {
    observer: Option<Box<dyn ViewportObserver>>,
    options: ObserverOptions,
    identity_attribute: String,
    observed: HashSet<String>,
    sessions: HashMap<String, ViewportSession>,
}

impl VisibilityTracker {
    /// Create a tracker over the host observer.
    ///
    /// With no observer the tracker is a no-op; this is logged once here.
    pub fn new(observer: Option<Box<dyn ViewportObserver>>, config: &VisibilityConfig) -> Self {
        if observer.is_none() {
            tracing::warn!("Viewport observer unavailable, visibility tracking disabled");
        }
        Self {
            observer,
            options: ObserverOptions::from(config),
            identity_attribute: config.identity_attribute.clone(),
            observed: HashSet::new(),
            sessions: HashMap::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.observer.is_some()
    }

    /// Register an entity. Returns false when nothing was registered.
    pub fn observe(&mut self, entity: &Entity) -> bool {
        let Some(observer) = self.observer.as_mut() else {
            return false;
        };
        let Some(id) = entity.identity(&self.identity_attribute) else {
            tracing::trace!("Ignoring entity without {}", self.identity_attribute);
            return false;
        };
        if !self.observed.insert(id.to_string()) {
            return false;
        }
        observer.observe(id, &self.options);
        true
    }

    /// Apply one intersection change, returning the events it produces
    pub fn on_intersection(&mut self, signal: &IntersectionSignal) -> Vec<PartialEvent> {
        if self.observer.is_none() || !self.observed.contains(&signal.id) {
            return Vec::new();
        }

        if signal.is_intersecting {
            let session = self.sessions.entry(signal.id.clone()).or_default();
            if session.entry_timestamp.is_some() {
                return Vec::new();
            }
            session.entry_timestamp = Some(signal.time_ms);

            let bbox = signal.bounding_box;
            vec![
                PartialEvent::interaction("viewport_enter")
                    .with_value(signal.ratio)
                    .with_label(signal.id.clone())
                    .with_meta("entityId", signal.id.clone())
                    .with_meta("ratio", signal.ratio)
                    .with_meta(
                        "boundingBox",
                        json!({
                            "x": bbox.x,
                            "y": bbox.y,
                            "width": bbox.width,
                            "height": bbox.height,
                        }),
                    ),
                PartialEvent::interaction("read_start")
                    .with_label(signal.id.clone())
                    .with_meta("entityId", signal.id.clone()),
            ]
        } else {
            let Some(session) = self.sessions.get_mut(&signal.id) else {
                return Vec::new();
            };
            let Some(entered) = session.entry_timestamp.take() else {
                return Vec::new();
            };

            let segment_ms = (signal.time_ms - entered).max(0.0);
            session.cumulative_duration_ms += segment_ms;
            let cumulative = session.cumulative_duration_ms;

            vec![
                PartialEvent::interaction("viewport_exit")
                    .with_value(segment_ms)
                    .with_label(signal.id.clone())
                    .with_meta("entityId", signal.id.clone())
                    .with_meta("durationMs", segment_ms),
                PartialEvent::interaction("read_end")
                    .with_value(cumulative)
                    .with_label(signal.id.clone())
                    .with_meta("entityId", signal.id.clone())
                    .with_meta("durationMs", segment_ms)
                    .with_meta("cumulativeDurationMs", cumulative),
            ]
        }
    }

    /// Drop state for entities the host no longer has attached
    pub fn prune(&mut self) -> usize {
        let Some(observer) = self.observer.as_ref() else {
            return 0;
        };
        let before = self.observed.len();
        self.observed.retain(|id| observer.is_attached(id));
        let observed = &self.observed;
        self.sessions.retain(|id, _| observed.contains(id));
        before - self.observed.len()
    }

    pub fn disconnect(&mut self) {
        if let Some(observer) = self.observer.as_mut() {
            observer.disconnect();
        }
        self.observer = None;
    }

    pub fn cumulative_ms(&self, id: &str) -> Option<f64> {
        self.sessions.get(id).map(|s| s.cumulative_duration_ms)
    }

    pub fn is_visible(&self, id: &str) -> bool {
        self.sessions
            .get(id)
            .is_some_and(|s| s.entry_timestamp.is_some())
    }

    pub fn observed_count(&self) -> usize {
        self.observed.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Observer that records calls and lets tests detach entities
    #[derive(Clone, Default)]
    struct FakeObserver {
        observed: Arc<Mutex<Vec<String>>>,
        detached: Arc<Mutex<HashSet<String>>>,
        disconnected: Arc<Mutex<bool>>,
    }

    impl ViewportObserver for FakeObserver {
        fn observe(&mut self, id: &str, _options: &ObserverOptions) {
            self.observed.lock().unwrap().push(id.to_string());
        }

        fn is_attached(&self, id: &str) -> bool {
            !self.detached.lock().unwrap().contains(id)
        }

        fn disconnect(&mut self) {
            *self.disconnected.lock().unwrap() = true;
        }
    }

    fn entity(id: &str) -> Entity {
        Entity::with_attribute("data-entity-id", id)
    }

    fn signal(id: &str, intersecting: bool, time_ms: f64) -> IntersectionSignal {
        IntersectionSignal {
            id: id.to_string(),
            ratio: if intersecting { 0.5 } else { 0.0 },
            is_intersecting: intersecting,
            bounding_box: BoundingBox::default(),
            time_ms,
        }
    }

    fn tracker() -> (VisibilityTracker, FakeObserver) {
        let observer = FakeObserver::default();
        let tracker =
            VisibilityTracker::new(Some(Box::new(observer.clone())), &VisibilityConfig::default());
        (tracker, observer)
    }

    fn types(events: &[PartialEvent]) -> Vec<&str> {
        events.iter().map(|e| e.event_type.as_str()).collect()
    }

    #[test]
    fn test_observe_requires_identity_and_is_idempotent() {
        let (mut tracker, observer) = tracker();
        assert!(tracker.observe(&entity("article-1")));
        assert!(!tracker.observe(&entity("article-1")));
        assert!(!tracker.observe(&Entity::default()));
        assert!(!tracker.observe(&entity("  ")));
        assert_eq!(*observer.observed.lock().unwrap(), vec!["article-1"]);
    }

    #[test]
    fn test_enter_then_exit_events() {
        let (mut tracker, _) = tracker();
        tracker.observe(&entity("a"));

        let enter = tracker.on_intersection(&signal("a", true, 100.0));
        assert_eq!(types(&enter), vec!["viewport_enter", "read_start"]);
        assert_eq!(enter[0].value, Some(0.5));
        assert!(tracker.is_visible("a"));

        // ratio change while already visible
        assert!(tracker.on_intersection(&signal("a", true, 200.0)).is_empty());

        let exit = tracker.on_intersection(&signal("a", false, 1600.0));
        assert_eq!(types(&exit), vec!["viewport_exit", "read_end"]);
        assert_eq!(exit[0].value, Some(1500.0));
        assert_eq!(exit[1].value, Some(1500.0));
        assert!(!tracker.is_visible("a"));
    }

    #[test]
    fn test_exit_without_entry_emits_nothing() {
        let (mut tracker, _) = tracker();
        tracker.observe(&entity("a"));
        assert!(tracker.on_intersection(&signal("a", false, 10.0)).is_empty());

        tracker.on_intersection(&signal("a", true, 20.0));
        tracker.on_intersection(&signal("a", false, 30.0));
        assert!(tracker.on_intersection(&signal("a", false, 40.0)).is_empty());
    }

    #[test]
    fn test_cumulative_duration_over_cycles() {
        let (mut tracker, _) = tracker();
        tracker.observe(&entity("a"));

        let cycles = [(0.0, 250.0), (1000.0, 1333.0), (5000.0, 5001.5), (9000.0, 12000.0)];
        let mut expected = 0.0;
        let mut last_cumulative = 0.0;
        for (enter, exit) in cycles {
            tracker.on_intersection(&signal("a", true, enter));
            let events = tracker.on_intersection(&signal("a", false, exit));
            expected += exit - enter;
            let cumulative = events[1].value.unwrap();
            assert!(cumulative >= last_cumulative);
            last_cumulative = cumulative;
        }
        let total = tracker.cumulative_ms("a").unwrap();
        assert!((total - expected).abs() <= 1.0);
        assert_eq!(last_cumulative, total);
    }

    #[test]
    fn test_unobserved_ids_are_ignored() {
        let (mut tracker, _) = tracker();
        assert!(tracker.on_intersection(&signal("ghost", true, 0.0)).is_empty());
        assert!(tracker.cumulative_ms("ghost").is_none());
    }

    #[test]
    fn test_missing_observer_degrades_to_noop() {
        let mut tracker = VisibilityTracker::new(None, &VisibilityConfig::default());
        assert!(!tracker.is_enabled());
        assert!(!tracker.observe(&entity("a")));
        assert!(tracker.on_intersection(&signal("a", true, 0.0)).is_empty());
        assert_eq!(tracker.prune(), 0);
        tracker.disconnect();
    }

    #[test]
    fn test_prune_detached_entities() {
        let (mut tracker, observer) = tracker();
        tracker.observe(&entity("a"));
        tracker.observe(&entity("b"));
        tracker.on_intersection(&signal("a", true, 0.0));
        tracker.on_intersection(&signal("a", false, 10.0));

        observer.detached.lock().unwrap().insert("a".to_string());
        assert_eq!(tracker.prune(), 1);
        assert!(tracker.cumulative_ms("a").is_none());
        assert_eq!(tracker.observed_count(), 1);
    }

    #[test]
    fn test_disconnect() {
        let (mut tracker, observer) = tracker();
        tracker.observe(&entity("a"));
        tracker.disconnect();
        assert!(*observer.disconnected.lock().unwrap());
        assert!(!tracker.is_enabled());
    }
}
