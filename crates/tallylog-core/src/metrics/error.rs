//! Metric and store errors

use thiserror::Error;

use super::Kind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricError {
    #[error("metric {name} in {program} is a {existing}, cannot register it as a {requested}")]
    KindMismatch {
        name: String,
        program: String,
        existing: Kind,
        requested: Kind,
    },

    #[error("metric {name} has no value for labels {labels:?}")]
    NotFound { name: String, labels: Vec<String> },

    #[error("metric {name} takes {expected} labels, got {got}")]
    LabelArity {
        name: String,
        expected: usize,
        got: usize,
    },

    #[error("cannot serialize metrics: {0}")]
    Serialize(String),

    #[error("cannot write metrics: {0}")]
    Io(String),
}

pub type MetricResult<T> = Result<T, MetricError>;
