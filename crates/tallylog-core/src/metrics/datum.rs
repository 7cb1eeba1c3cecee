//! A single numeric sample and its last-write timestamp

use std::fmt;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Integer-or-float metric value
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    #[must_use]
    pub fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Integer addition wraps; anything involving a float is float addition.
    #[must_use]
    pub fn add(self, other: Number) -> Number {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => Number::Int(a.wrapping_add(b)),
            (a, b) => Number::Float(a.as_f64() + b.as_f64()),
        }
    }
}

impl Default for Number {
    fn default() -> Self {
        Number::Int(0)
    }
}

impl From<i64> for Number {
    fn from(value: i64) -> Self {
        Number::Int(value)
    }
}

impl From<f64> for Number {
    fn from(value: f64) -> Self {
        Number::Float(value)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(i) => write!(f, "{i}"),
            Number::Float(x) => write!(f, "{x}"),
        }
    }
}

/// A consistent read of a [`Datum`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    pub value: Number,
    pub timestamp: DateTime<Utc>,
}

/// A mutable sample shared between VM instances.
///
/// Value and timestamp are updated together under one lock, and the
/// timestamp never moves backwards.
#[derive(Debug)]
pub struct Datum {
    inner: Mutex<Sample>,
}

impl Datum {
    #[must_use]
    pub fn new(value: Number, timestamp: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(Sample { value, timestamp }),
        }
    }

    #[must_use]
    pub fn sample(&self) -> Sample {
        *self.inner.lock()
    }

    #[must_use]
    pub fn value(&self) -> Number {
        self.inner.lock().value
    }

    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.inner.lock().timestamp
    }

    pub fn increment_by(&self, delta: Number, timestamp: DateTime<Utc>) {
        let mut sample = self.inner.lock();
        sample.value = sample.value.add(delta);
        stamp(&mut sample, timestamp);
    }

    pub fn set(&self, value: Number, timestamp: DateTime<Utc>) {
        let mut sample = self.inner.lock();
        sample.value = value;
        stamp(&mut sample, timestamp);
    }
}

fn stamp(sample: &mut Sample, timestamp: DateTime<Utc>) {
    if timestamp > sample.timestamp {
        sample.timestamp = timestamp;
    }
}
