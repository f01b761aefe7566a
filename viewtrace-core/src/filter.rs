//! Admission policy for candidate events
//!
//! Every candidate passes three checks in a fixed order, stopping at the
//! first rejection:
//!
//! 1. **Skip list** - the type is never admitted
//! 2. **Throttle** - at most one pass per interval per type
//! 3. **Sampling** - a uniform draw must fall below the configured rate
//!
//! The throttle window is consumed as soon as a candidate passes it, even if
//! sampling then rejects that candidate. The throttle therefore limits
//! attempts, not admissions.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};

/// Immutable policy tables, supplied at construction
#[derive(Debug, Clone, Default)]
pub struct FilterPolicy {
    skip: HashSet<String>,
    throttle_ms: HashMap<String, f64>,
    sampling: HashMap<String, f64>,
}

impl FilterPolicy {
    pub fn new(
        skip: HashSet<String>,
        throttle_ms: HashMap<String, f64>,
        sampling: HashMap<String, f64>,
    ) -> Self {
        Self {
            skip,
            throttle_ms,
            sampling,
        }
    }

    pub fn skips(&self, event_type: &str) -> bool {
        self.skip.contains(event_type)
    }

    pub fn throttle_interval(&self, event_type: &str) -> Option<f64> {
        self.throttle_ms.get(event_type).copied()
    }

    pub fn sampling_rate(&self, event_type: &str) -> Option<f64> {
        self.sampling.get(event_type).copied()
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Skipped,
    Throttled,
    SampledOut,
}

impl Admission {
    pub fn is_admitted(&self) -> bool {
        matches!(self, Admission::Admitted)
    }
}

/// Stateful filter: the policy plus the last-pass time per type
pub struct EventFilter {
    policy: FilterPolicy,
    last_admitted: HashMap<String, f64>,
    rng: Box<dyn RngCore + Send>,
}

impl EventFilter {
    pub fn new(policy: FilterPolicy) -> Self {
        Self::with_rng(policy, Box::new(StdRng::from_entropy()))
    }

    /// Create a filter with a specific random source (seeded in tests)
    pub fn with_rng(policy: FilterPolicy, rng: Box<dyn RngCore + Send>) -> Self {
        Self {
            policy,
            last_admitted: HashMap::new(),
            rng,
        }
    }

    /// Decide whether a candidate of `event_type` seen at `now_ms` is admitted
    pub fn check(&mut self, event_type: &str, now_ms: f64) -> Admission {
        if self.policy.skips(event_type) {
            return Admission::Skipped;
        }

        if let Some(interval) = self.policy.throttle_interval(event_type) {
            if let Some(last) = self.last_admitted.get(event_type) {
                if now_ms - last < interval {
                    return Admission::Throttled;
                }
            }
            self.last_admitted.insert(event_type.to_string(), now_ms);
        }

        if let Some(rate) = self.policy.sampling_rate(event_type) {
            let draw: f64 = self.rng.gen();
            if draw >= rate {
                return Admission::SampledOut;
            }
        }

        Admission::Admitted
    }

    pub fn admit(&mut self, event_type: &str, now_ms: f64) -> bool {
        self.check(event_type, now_ms).is_admitted()
    }
}
