//! Values on the VM operand stack

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::metrics::{Metric, Number};

/// A metric plus one label tuple, produced by `dload`
#[derive(Debug, Clone)]
pub struct DatumHandle {
    pub metric: Arc<Metric>,
    pub labels: Vec<String>,
}

#[derive(Debug, Clone)]
pub enum Value {
    Int(i64),
    Float(f64),
    Str(String),
    Time(DateTime<Utc>),
    Metric(Arc<Metric>),
    Datum(DatumHandle),
}

impl Value {
    #[must_use]
    pub const fn type_name(&self) -> &'static str {
        match self {
            Value::Int(_) => "integer",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::Time(_) => "time",
            Value::Metric(_) => "metric",
            Value::Datum(_) => "datum",
        }
    }

    #[must_use]
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Value::Int(i) => Some(Number::Int(*i)),
            Value::Float(f) => Some(Number::Float(*f)),
            _ => None,
        }
    }

    /// Total order used by `cmp`. Mixed integer/float compares as float and
    /// NaN compares equal to everything. `None` for incomparable kinds.
    #[must_use]
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            (Value::Time(a), Value::Time(b)) => Some(a.cmp(b)),
            _ => {
                let a = self.as_number()?.as_f64();
                let b = other.as_number()?.as_f64();
                Some(a.partial_cmp(&b).unwrap_or(Ordering::Equal))
            }
        }
    }
}
