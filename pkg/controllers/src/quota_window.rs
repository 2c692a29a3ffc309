//! Rolling record of quota consumption for one project.

use chrono::{DateTime, TimeDelta, Utc};
use std::collections::VecDeque;
use std::time::Duration;

/// Consumption over `[start, end)` at a constant rate of `units`
/// entitlements.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub units: f64,
}

impl Sample {
    /// Quota-seconds: `units` times the sample's length in seconds.
    pub fn quota_seconds(&self) -> f64 {
        (self.end - self.start).num_milliseconds() as f64 / 1000.0 * self.units
    }
}

#[derive(Debug, Clone)]
pub struct QuotaWindow {
    period: TimeDelta,
    samples: VecDeque<Sample>,
}

impl QuotaWindow {
    pub fn new(period: Duration) -> Self {
        Self {
            period: TimeDelta::from_std(period).unwrap_or(TimeDelta::MAX),
            samples: VecDeque::new(),
        }
    }

    /// Append a sample. Empty or zero-rate samples are dropped.
    pub fn record(&mut self, start: DateTime<Utc>, end: DateTime<Utc>, units: f64) {
        if end <= start || units <= 0.0 || !units.is_finite() {
            return;
        }
        self.samples.push_back(Sample { start, end, units });
    }

    /// Drop consumption older than `now - period`. A sample straddling the
    /// cutoff keeps only its part inside the period.
    pub fn evict(&mut self, now: DateTime<Utc>) {
        let Some(cutoff) = now.checked_sub_signed(self.period) else {
            return;
        };
        self.samples.retain(|s| s.end > cutoff);
        for sample in self.samples.iter_mut() {
            if sample.start < cutoff {
                sample.start = cutoff;
            }
        }
    }

    /// Quota-seconds held by the retained samples.
    pub fn total_seconds(&self) -> f64 {
        self.samples.iter().map(Sample::quota_seconds).sum()
    }

    pub fn total_hours(&self) -> f64 {
        self.total_seconds() / 3600.0
    }

    pub fn clear(&mut self) {
        self.samples.clear();
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn samples(&self) -> impl Iterator<Item = &Sample> {
        self.samples.iter()
    }
}
