//! Replay of recorded host signals
//!
//! A replay file holds one JSON object per line, tagged by `kind`:
//!
//! ```text
//! {"kind":"session","userId":"u-1","sessionId":"s-1"}
//! {"kind":"observe","attributes":{"data-entity-id":"article-1"}}
//! {"kind":"intersection","id":"article-1","ratio":0.5,"isIntersecting":true,"timeMs":120}
//! {"kind":"scroll","scrollY":400,"timestamp":950}
//! {"kind":"track","type":"cta_click","label":"signup"}
//! {"kind":"performance","name":"first-contentful-paint","entryType":"paint","duration":0}
//! {"kind":"wait","ms":250}
//! {"kind":"flush"}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use viewtrace_core::visibility::{Entity, IntersectionSignal, ObserverOptions, ViewportObserver};
use viewtrace_core::{Collector, PartialEvent, PerformanceEntry, ScrollSignal};

/// One recorded host signal
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Signal {
    Session {
        #[serde(rename = "userId")]
        user_id: String,
        #[serde(rename = "sessionId")]
        session_id: String,
    },
    Observe(Entity),
    Intersection(IntersectionSignal),
    Scroll(ScrollSignal),
    Track(PartialEvent),
    Performance(PerformanceEntry),
    Wait {
        ms: u64,
    },
    Flush,
}

/// Observer for replays: every observed entity stays attached
#[derive(Debug, Default)]
pub struct ReplayObserver {
    observed: usize,
}

impl ViewportObserver for ReplayObserver {
    fn observe(&mut self, id: &str, options: &ObserverOptions) {
        self.observed += 1;
        tracing::debug!(
            id,
            thresholds = ?options.thresholds,
            root_margin_px = options.root_margin_px,
            "Observing entity"
        );
    }

    fn is_attached(&self, _id: &str) -> bool {
        true
    }

    fn disconnect(&mut self) {
        tracing::debug!(observed = self.observed, "Replay observer disconnected");
    }
}

/// Parse a replay file, reporting the first malformed line
pub fn load(path: &Path) -> Result<Vec<Signal>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read replay file {}", path.display()))?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<Vec<Signal>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(idx, line)| {
            serde_json::from_str(line).with_context(|| format!("invalid signal on line {}", idx + 1))
        })
        .collect()
}

/// Counters for what the replay fed into the collector
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplaySummary {
    pub signals: usize,
    pub admitted: usize,
    pub rejected: usize,
}

/// Feed every signal into the collector in order
pub async fn run(collector: &Collector, signals: Vec<Signal>) -> ReplaySummary {
    let mut summary = ReplaySummary::default();

    for signal in signals {
        summary.signals += 1;
        match signal {
            Signal::Session {
                user_id,
                session_id,
            } => collector.set_session(user_id, session_id),
            Signal::Observe(entity) => {
                collector.observe(&entity);
            }
            Signal::Intersection(signal) => {
                collector.handle_intersections(std::slice::from_ref(&signal));
            }
            Signal::Scroll(signal) => collector.track_scroll_behavior(signal),
            Signal::Track(partial) => {
                if collector.track_event(partial) {
                    summary.admitted += 1;
                } else {
                    summary.rejected += 1;
                }
            }
            Signal::Performance(entry) => {
                if collector.track_performance(&entry) {
                    summary.admitted += 1;
                } else {
                    summary.rejected += 1;
                }
            }
            Signal::Wait { ms } => tokio::time::sleep(Duration::from_millis(ms)).await,
            Signal::Flush => collector.flush_events().await,
        }
    }

    summary
}
