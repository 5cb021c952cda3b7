//! Channel values and the ordered value buffer.
//!
//! Drivers hand back a [`Payload`]: a scalar for single-shot reads, a chunk of
//! new samples for hardware-paced reads (possibly empty between trigger edges)
//! or explicitly indexed samples. The engine wraps it into a
//! [`ValueReading`], which doubles as the "value with exception" carrier when
//! the read failed.
//!
//! Every channel keeps a [`ValueBuffer`] of `(index, value)` pairs. The buffer
//! is append-only with strictly increasing indices, which is what guarantees
//! consumers never observe repetitions out of order.

use crate::error::{AcqError, AcqResult, DriverError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One sample tagged with its repetition index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndexedValue {
    /// Repetition index.
    pub index: u64,
    /// Sample value.
    pub value: f64,
}

impl IndexedValue {
    /// Value at `index`.
    pub fn new(index: u64, value: f64) -> Self {
        Self { index, value }
    }
}

/// Raw data returned by a driver read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Payload {
    /// A single value for the current integration.
    Scalar(f64),
    /// Samples acquired since the previous read, indexed by arrival.
    Chunk(Vec<f64>),
    /// Samples carrying their own repetition index.
    Indexed(Vec<IndexedValue>),
    /// Nothing available.
    Empty,
}

impl Payload {
    /// Number of samples in the payload.
    pub fn len(&self) -> usize {
        match self {
            Payload::Scalar(_) => 1,
            Payload::Chunk(values) => values.len(),
            Payload::Indexed(values) => values.len(),
            Payload::Empty => 0,
        }
    }

    /// Whether there is no sample.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The most recent sample of the payload, if any.
    pub fn last(&self) -> Option<f64> {
        match self {
            Payload::Scalar(v) => Some(*v),
            Payload::Chunk(values) => values.last().copied(),
            Payload::Indexed(values) => values.last().map(|v| v.value),
            Payload::Empty => None,
        }
    }

    /// Reshape into indexed samples starting at `first_index`.
    pub fn into_indexed(self, first_index: u64) -> Vec<IndexedValue> {
        match self {
            Payload::Scalar(v) => vec![IndexedValue::new(first_index, v)],
            Payload::Chunk(values) => values
                .into_iter()
                .enumerate()
                .map(|(i, v)| IndexedValue::new(first_index + i as u64, v))
                .collect(),
            Payload::Indexed(values) => values,
            Payload::Empty => Vec::new(),
        }
    }
}

/// A value read from a channel, or the error that prevented reading it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValueReading {
    /// Data read.
    pub payload: Payload,
    /// Read time.
    pub timestamp: DateTime<Utc>,
    /// Error of a failed read.
    #[serde(skip)]
    pub error: Option<DriverError>,
}

impl ValueReading {
    /// Successful read of `payload`.
    pub fn new(payload: Payload) -> Self {
        Self {
            payload,
            timestamp: Utc::now(),
            error: None,
        }
    }

    /// Value carrying the driver error of a failed read.
    pub fn failed(error: &DriverError) -> Self {
        Self {
            payload: Payload::Empty,
            timestamp: Utc::now(),
            error: Some(error.clone()),
        }
    }

    /// Whether the read failed.
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }

    /// True when there is neither data nor an error to report.
    pub fn is_empty(&self) -> bool {
        self.error.is_none() && self.payload.is_empty()
    }

    /// Last sample, or NaN for failed and empty reads.
    pub fn value_or_nan(&self) -> f64 {
        if self.error.is_some() {
            return f64::NAN;
        }
        self.payload.last().unwrap_or(f64::NAN)
    }
}

/// Append-only buffer of indexed samples.
#[derive(Debug, Clone, Default)]
pub struct ValueBuffer {
    values: Vec<IndexedValue>,
}

impl ValueBuffer {
    /// Empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Index the next implicitly-indexed sample will receive.
    pub fn next_index(&self) -> u64 {
        self.values.last().map(|v| v.index + 1).unwrap_or(0)
    }

    /// Index of the newest value.
    pub fn last_index(&self) -> Option<u64> {
        self.values.last().map(|v| v.index)
    }

    /// Append samples, rejecting the whole batch if any index would break the
    /// strictly increasing order.
    pub fn append(&mut self, channel: &str, samples: &[IndexedValue]) -> AcqResult<()> {
        let mut last = self.last_index();
        for sample in samples {
            if let Some(prev) = last {
                if sample.index <= prev {
                    return Err(AcqError::OutOfOrder {
                        channel: channel.to_string(),
                        index: sample.index,
                        last: prev,
                    });
                }
            }
            last = Some(sample.index);
        }
        self.values.extend_from_slice(samples);
        Ok(())
    }

    /// Remove everything.
    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether it holds nothing.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Values in index order.
    pub fn as_slice(&self) -> &[IndexedValue] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DriverErrorKind;

    #[test]
    fn test_payload_into_indexed() {
        let indexed = Payload::Chunk(vec![1.0, 2.0]).into_indexed(5);
        assert_eq!(
            indexed,
            vec![IndexedValue::new(5, 1.0), IndexedValue::new(6, 2.0)]
        );
        assert_eq!(Payload::Scalar(3.0).into_indexed(7), vec![IndexedValue::new(7, 3.0)]);
        assert!(Payload::Empty.into_indexed(0).is_empty());
    }

    #[test]
    fn test_reading_emptiness() {
        assert!(ValueReading::new(Payload::Chunk(vec![])).is_empty());
        assert!(!ValueReading::new(Payload::Scalar(0.0)).is_empty());
        let err = DriverError::new("sim", DriverErrorKind::Timeout, "late");
        let failed = ValueReading::failed(&err);
        assert!(!failed.is_empty());
        assert!(failed.value_or_nan().is_nan());
    }

    #[test]
    fn test_buffer_rejects_out_of_order() {
        let mut buffer = ValueBuffer::new();
        buffer
            .append("ct01", &[IndexedValue::new(0, 1.0), IndexedValue::new(1, 2.0)])
            .unwrap();
        assert_eq!(buffer.next_index(), 2);

        let err = buffer
            .append("ct01", &[IndexedValue::new(3, 4.0), IndexedValue::new(1, 9.0)])
            .unwrap_err();
        assert!(matches!(err, AcqError::OutOfOrder { index: 1, last: 3, .. }));
        // rejected batch leaves the buffer untouched
        assert_eq!(buffer.len(), 2);
    }

    #[test]
    fn test_buffer_allows_gaps() {
        let mut buffer = ValueBuffer::new();
        buffer.append("ct01", &[IndexedValue::new(2, 1.0)]).unwrap();
        buffer.append("ct01", &[IndexedValue::new(4, 1.0)]).unwrap();
        assert_eq!(buffer.last_index(), Some(4));
    }
}
