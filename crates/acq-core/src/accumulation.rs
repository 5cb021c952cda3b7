//! Accumulation of 0D samples.
//!
//! A 0D channel is read repeatedly while an acquisition runs; its reported
//! value is an accumulation of all samples taken since the acquisition
//! started.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How successive 0D samples are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AccumulationKind {
    /// Arithmetic mean of the samples.
    #[default]
    Average,
    /// Plain sum of the samples.
    Sum,
    /// Time integral (trapezoidal, seconds).
    Integral,
}

/// Running accumulation state.
#[derive(Debug, Clone, Default)]
pub struct Accumulation {
    kind: AccumulationKind,
    count: u64,
    sum: f64,
    integral: f64,
    last: Option<(DateTime<Utc>, f64)>,
}

impl Accumulation {
    /// Empty accumulator of `kind`.
    pub fn new(kind: AccumulationKind) -> Self {
        Self {
            kind,
            ..Default::default()
        }
    }

    /// Category.
    pub fn kind(&self) -> AccumulationKind {
        self.kind
    }

    /// Switch kind; accumulated samples are kept.
    pub fn set_kind(&mut self, kind: AccumulationKind) {
        self.kind = kind;
    }

    /// Drop every sample.
    pub fn clear(&mut self) {
        *self = Self::new(self.kind);
    }

    /// Add a sample taken at `timestamp`. NaN samples are ignored.
    pub fn push(&mut self, value: f64, timestamp: DateTime<Utc>) {
        if value.is_nan() {
            return;
        }
        if let Some((prev_ts, prev_value)) = self.last {
            let dt = (timestamp - prev_ts).num_microseconds().unwrap_or(0) as f64 * 1e-6;
            if dt > 0.0 {
                self.integral += 0.5 * (prev_value + value) * dt;
            }
        }
        self.count += 1;
        self.sum += value;
        self.last = Some((timestamp, value));
    }

    /// Samples accumulated so far.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Current accumulated value, `None` before the first sample.
    pub fn value(&self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        Some(match self.kind {
            AccumulationKind::Average => self.sum / self.count as f64,
            AccumulationKind::Sum => self.sum,
            AccumulationKind::Integral => self.integral,
        })
    }
}
