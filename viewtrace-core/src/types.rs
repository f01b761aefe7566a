//! Core domain types for viewtrace
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Event** | One telemetry record, immutable once created |
//! | **Admission** | The filter's decision to let a candidate event into the buffer |
//! | **Batch** | A snapshot of buffered events sent together |
//! | **Flush** | Snapshot-and-clear of the buffer, handed to the dispatcher |
//! | **Requeue** | Reinserting failed events at the buffer head for a later attempt |
//! | **Viewport session** | The interval during which a tracked entity intersects the viewport |

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

/// Ordered metadata attached to an event
pub type Metadata = Map<String, Value>;

// ============================================
// Event
// ============================================

/// Broad class of an event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum EventCategory {
    #[default]
    Interaction,
    Performance,
}

impl EventCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventCategory::Interaction => "interaction",
            EventCategory::Performance => "performance",
        }
    }
}

/// A telemetry event as shipped to the collector.
///
/// Fields are private so an event cannot change after it is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    #[serde(rename = "type")]
    event_type: String,
    category: EventCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<String>,
    metadata: Metadata,
    #[serde(serialize_with = "serialize_timestamp")]
    client_timestamp: DateTime<Utc>,
}

fn serialize_timestamp<S: Serializer>(ts: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl Event {
    /// Build an event stamped with `client_timestamp`
    pub fn new(partial: PartialEvent, client_timestamp: DateTime<Utc>) -> Self {
        Self {
            event_type: partial.event_type,
            category: partial.category,
            value: partial.value,
            label: partial.label,
            metadata: partial.metadata,
            client_timestamp,
        }
    }

    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn category(&self) -> EventCategory {
        self.category
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn client_timestamp(&self) -> DateTime<Utc> {
        self.client_timestamp
    }

    /// Flatten the event into the property map handed to the mirror sink
    pub fn mirror_properties(&self) -> Metadata {
        let mut props = Map::new();
        props.insert(
            "category".to_string(),
            Value::String(self.category.as_str().to_string()),
        );
        if let Some(value) = self.value {
            props.insert("value".to_string(), Value::from(value));
        }
        if let Some(label) = &self.label {
            props.insert("label".to_string(), Value::String(label.clone()));
        }
        for (key, value) in &self.metadata {
            props.insert(key.clone(), value.clone());
        }
        props
    }
}

/// Caller-supplied part of an event; the collector stamps the timestamp.
#[derive(Debug, Clone, PartialEq, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub category: EventCategory,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl PartialEvent {
    pub fn new(event_type: impl Into<String>, category: EventCategory) -> Self {
        Self {
            event_type: event_type.into(),
            category,
            ..Default::default()
        }
    }

    pub fn interaction(event_type: impl Into<String>) -> Self {
        Self::new(event_type, EventCategory::Interaction)
    }

    pub fn performance(event_type: impl Into<String>) -> Self {
        Self::new(event_type, EventCategory::Performance)
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = Some(value);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// ============================================
// Host signals
// ============================================

/// A performance timeline entry reported by the host
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceEntry {
    pub name: String,
    pub entry_type: String,
    #[serde(default)]
    pub start_time: f64,
    #[serde(default)]
    pub duration: f64,
}

impl PerformanceEntry {
    pub fn to_partial(&self) -> PartialEvent {
        PartialEvent::performance(format!("perf_{}", self.entry_type))
            .with_value(self.duration)
            .with_label(self.name.clone())
            .with_meta("startTime", self.start_time)
            .with_meta("duration", self.duration)
    }
}

/// A scroll position sample from the host
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollSignal {
    pub scroll_y: f64,
    /// Page clock in milliseconds
    pub timestamp: f64,
}

/// Body posted to the remote collector
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EventBatch {
    pub session_id: String,
    pub user_id: String,
    pub events: Vec<Event>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_event_serialization() {
        let event = Event::new(
            PartialEvent::interaction("cta_click")
                .with_label("signup")
                .with_meta("zone", "hero")
                .with_meta("position", 2),
            fixed_time(),
        );

        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "cta_click");
        assert_eq!(json["category"], "interaction");
        assert_eq!(json["label"], "signup");
        assert_eq!(json["clientTimestamp"], "2026-03-01T12:00:00.000Z");
        assert!(json.get("value").is_none());

        let keys: Vec<_> = json["metadata"].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["zone", "position"]);
    }

    #[test]
    fn test_partial_event_from_json() {
        let partial: PartialEvent =
            serde_json::from_str(r#"{"type":"video_play","value":3.5}"#).unwrap();
        assert_eq!(partial.event_type, "video_play");
        assert_eq!(partial.category, EventCategory::Interaction);
        assert_eq!(partial.value, Some(3.5));
        assert!(partial.metadata.is_empty());
    }

    #[test]
    fn test_performance_entry_to_event() {
        let entry = PerformanceEntry {
            name: "https://cdn.example.com/app.js".to_string(),
            entry_type: "resource".to_string(),
            start_time: 12.0,
            duration: 48.5,
        };
        let partial = entry.to_partial();
        assert_eq!(partial.event_type, "perf_resource");
        assert_eq!(partial.category, EventCategory::Performance);
        assert_eq!(partial.value, Some(48.5));
        assert_eq!(partial.label.as_deref(), Some("https://cdn.example.com/app.js"));
    }

    #[test]
    fn test_mirror_properties() {
        let event = Event::new(
            PartialEvent::performance("perf_paint")
                .with_value(120.0)
                .with_meta("route", "/home"),
            fixed_time(),
        );
        let props = event.mirror_properties();
        assert_eq!(props["category"], "performance");
        assert_eq!(props["value"], 120.0);
        assert_eq!(props["route"], "/home");
    }

    #[test]
    fn test_batch_body_shape() {
        let batch = EventBatch {
            session_id: "s-1".to_string(),
            user_id: "u-1".to_string(),
            events: vec![Event::new(PartialEvent::interaction("tap"), fixed_time())],
        };
        let json = serde_json::to_value(&batch).unwrap();
        assert_eq!(json["sessionId"], "s-1");
        assert_eq!(json["userId"], "u-1");
        assert_eq!(json["events"].as_array().unwrap().len(), 1);
    }
}
