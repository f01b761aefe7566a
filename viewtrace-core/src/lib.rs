//! # viewtrace-core
//!
//! Core library for viewtrace - a page engagement telemetry pipeline.
//!
//! This library provides:
//! - Viewport visibility tracking with per-entity reading time
//! - Debounced scroll behavior sampling
//! - An admission filter (skip list, throttling, sampling)
//! - Batched, retrying delivery to a remote collector
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Signals flow through three stages:
//! - **Observation:** intersection, scroll and performance signals from the host
//! - **Admission:** the filter decides which candidate events enter the buffer
//! - **Delivery:** size- or timer-triggered batches are posted; failures are
//!   requeued at the buffer head
//!
//! ## Example
//!
//! ```rust,no_run
//! use viewtrace_core::{Collector, Config, PartialEvent};
//!
//! # async fn run() -> viewtrace_core::Result<()> {
//! let config = Config::load()?;
//! let collector = Collector::builder(config).build()?;
//! collector.track_event(PartialEvent::interaction("share_click"));
//! collector.destroy().await;
//! # Ok(())
//! # }
//! ```

// Re-export commonly used items at the crate root
pub use collector::{Collector, DeliveryStats};
pub use config::Config;
pub use error::{Error, Result};
pub use types::*;

// Public modules
pub mod collector;
pub mod config;
pub mod error;
pub mod filter;
pub mod logging;
pub mod scroll;
pub mod session;
pub mod sink;
pub mod types;
pub mod visibility;
