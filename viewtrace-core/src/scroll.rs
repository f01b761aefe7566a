//! Scroll behavior sampling
//!
//! The collector debounces raw scroll callbacks and hands the last position
//! of each burst to [`ScrollSampler::sample`]. The sampler keeps a rolling
//! window of speeds (pixels per millisecond) and, once enough positions have
//! been seen, produces a `scroll_behavior` candidate on every sample.

use std::collections::VecDeque;

use serde::Serialize;

use crate::config::ScrollConfig;
use crate::types::PartialEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ScrollDirection {
    Up,
    #[default]
    Down,
}

impl ScrollDirection {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScrollDirection::Up => "up",
            ScrollDirection::Down => "down",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScrollMetrics {
    pub total_distance: f64,
    pub primary_direction: ScrollDirection,
    pub average_speed: f64,
}

pub struct ScrollSampler {
    metrics: ScrollMetrics,
    last: Option<(f64, f64)>,
    speeds: VecDeque<f64>,
    samples: usize,
    window: usize,
    min_samples: usize,
}

impl ScrollSampler {
    pub fn new(config: &ScrollConfig) -> Self {
        let window = config.window.max(1);
        Self {
            metrics: ScrollMetrics::default(),
            last: None,
            speeds: VecDeque::with_capacity(window),
            samples: 0,
            window,
            min_samples: config.min_samples,
        }
    }

    /// Feed one debounced position; returns a `scroll_behavior` candidate
    /// once the minimum sample count is reached.
    pub fn sample(&mut self, y: f64, timestamp: f64) -> Option<PartialEvent> {
        if let Some((last_y, last_ts)) = self.last {
            let dt = timestamp - last_ts;
            if dt == 0.0 {
                return None;
            }
            let dy = y - last_y;
            let speed = dy.abs() / dt.abs();

            if self.speeds.len() == self.window {
                self.speeds.pop_front();
            }
            self.speeds.push_back(speed);
            self.metrics.total_distance += dy.abs();

            if dy > 0.0 {
                self.metrics.primary_direction = ScrollDirection::Down;
            } else if dy < 0.0 {
                self.metrics.primary_direction = ScrollDirection::Up;
            }
        }

        self.last = Some((y, timestamp));
        self.samples += 1;

        if self.samples < self.min_samples || self.speeds.is_empty() {
            return None;
        }

        self.metrics.average_speed = self.speeds.iter().sum::<f64>() / self.speeds.len() as f64;

        Some(
            PartialEvent::interaction("scroll_behavior")
                .with_value(self.metrics.average_speed)
                .with_meta("averageSpeed", self.metrics.average_speed)
                .with_meta("totalDistance", self.metrics.total_distance)
                .with_meta("direction", self.metrics.primary_direction.as_str())
                .with_meta("samples", self.samples as u64),
        )
    }

    pub fn metrics(&self) -> &ScrollMetrics {
        &self.metrics
    }

    pub fn sample_count(&self) -> usize {
        self.samples
    }
}
