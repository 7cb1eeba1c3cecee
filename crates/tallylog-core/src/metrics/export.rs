//! Serializable point-in-time view of the store
//!
//! Field names are part of the external dump format and must not change.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::datum::Number;
use super::metric::{Kind, LabelValue, Metric};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MetricSnapshot {
    pub name: String,
    pub program: String,
    pub kind: Kind,
    pub keys: Vec<String>,
    pub label_values: Vec<LabelValueSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LabelValueSnapshot {
    pub labels: Vec<String>,
    pub value: SampleSnapshot,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "expiry_nanos"
    )]
    pub expiry: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SampleSnapshot {
    pub value: Number,
    #[serde(with = "chrono::serde::ts_nanoseconds")]
    pub time: DateTime<Utc>,
}

impl From<&Metric> for MetricSnapshot {
    fn from(metric: &Metric) -> Self {
        Self {
            name: metric.name().to_string(),
            program: metric.program().to_string(),
            kind: metric.kind(),
            keys: metric.keys().to_vec(),
            label_values: metric
                .label_values()
                .iter()
                .map(LabelValueSnapshot::from)
                .collect(),
        }
    }
}

impl From<&LabelValue> for LabelValueSnapshot {
    fn from(lv: &LabelValue) -> Self {
        let sample = lv.value.sample();
        Self {
            labels: lv.labels.clone(),
            value: SampleSnapshot {
                value: sample.value,
                time: sample.timestamp,
            },
            expiry: lv.expiry,
        }
    }
}

mod expiry_nanos {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_u64(u64::try_from(d.as_nanos()).unwrap_or(u64::MAX)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_nanos))
    }
}
