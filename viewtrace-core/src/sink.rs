//! Secondary analytics sink
//!
//! Every admitted event is mirrored to the sink as `(event name, properties)`.
//! Mirroring is fire-and-forget: the collector logs and discards sink errors.

use std::sync::{Mutex, PoisonError};

use crate::error::Result;
use crate::types::Metadata;

pub trait AnalyticsSink: Send + Sync {
    fn capture(&self, event_name: &str, properties: &Metadata) -> Result<()>;
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl AnalyticsSink for NoopSink {
    fn capture(&self, _event_name: &str, _properties: &Metadata) -> Result<()> {
        Ok(())
    }
}

/// Sink that keeps every captured call in memory
#[derive(Debug, Default)]
pub struct MemorySink {
    captured: Mutex<Vec<(String, Metadata)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn captured(&self) -> Vec<(String, Metadata)> {
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn names(&self) -> Vec<String> {
        self.captured().into_iter().map(|(name, _)| name).collect()
    }
}

impl AnalyticsSink for MemorySink {
    fn capture(&self, event_name: &str, properties: &Metadata) -> Result<()> {
        self.captured
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((event_name.to_string(), properties.clone()));
        Ok(())
    }
}
