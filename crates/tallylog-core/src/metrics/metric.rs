//! Metrics and their label tuples

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::datum::{Datum, Number};
use super::error::{MetricError, MetricResult};

/// The kind of a metric. Fixed when the metric is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Kind {
    Counter,
    Gauge,
    Timer,
    Histogram,
}

impl Kind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Kind::Counter => "counter",
            Kind::Gauge => "gauge",
            Kind::Timer => "timer",
            Kind::Histogram => "histogram",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One label tuple of a metric and its datum
#[derive(Debug, Clone)]
pub struct LabelValue {
    pub labels: Vec<String>,
    pub value: Arc<Datum>,
    /// `None` or zero means the tuple never expires
    pub expiry: Option<Duration>,
}

impl LabelValue {
    /// Whether the sweep at `now` should remove this tuple: strictly more
    /// than `expiry` since the last write.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        let Some(expiry) = self.expiry.filter(|d| !d.is_zero()) else {
            return false;
        };
        let Ok(expiry) = TimeDelta::from_std(expiry) else {
            return false;
        };
        now.signed_duration_since(self.value.timestamp()) > expiry
    }
}

/// A named metric owned by one program.
///
/// Label tuples live in a sharded map so writers on different tuples do not
/// contend; each tuple's [`Datum`] serialises its own updates.
#[derive(Debug)]
pub struct Metric {
    name: String,
    program: String,
    kind: Kind,
    keys: Vec<String>,
    expiry: Option<Duration>,
    label_values: DashMap<Vec<String>, LabelValue>,
}

impl Metric {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        program: impl Into<String>,
        kind: Kind,
        keys: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            program: program.into(),
            kind,
            keys,
            expiry: None,
            label_values: DashMap::new(),
        }
    }

    /// Expiry inherited by every label tuple created from now on
    #[must_use]
    pub fn with_expiry(mut self, expiry: Option<Duration>) -> Self {
        self.expiry = expiry;
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn kind(&self) -> Kind {
        self.kind
    }

    #[must_use]
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    #[must_use]
    pub fn expiry(&self) -> Option<Duration> {
        self.expiry
    }

    /// Number of label tuples
    #[must_use]
    pub fn len(&self) -> usize {
        self.label_values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.label_values.is_empty()
    }

    /// Fail unless `labels` has one value per key
    pub fn check_arity(&self, labels: &[String]) -> MetricResult<()> {
        if labels.len() == self.keys.len() {
            Ok(())
        } else {
            Err(MetricError::LabelArity {
                name: self.name.clone(),
                expected: self.keys.len(),
                got: labels.len(),
            })
        }
    }

    fn new_label_value(&self, labels: &[String]) -> LabelValue {
        LabelValue {
            labels: labels.to_vec(),
            value: Arc::new(Datum::new(Number::default(), DateTime::UNIX_EPOCH)),
            expiry: self.expiry,
        }
    }

    /// The datum for `labels`, created if absent
    pub fn get_datum(&self, labels: &[String]) -> MetricResult<Arc<Datum>> {
        self.check_arity(labels)?;
        if let Some(value) = self.label_values.get(labels).map(|lv| Arc::clone(&lv.value)) {
            return Ok(value);
        }
        let lv = self
            .label_values
            .entry(labels.to_vec())
            .or_insert_with(|| self.new_label_value(labels));
        Ok(Arc::clone(&lv.value))
    }

    /// Run `f` on the datum for `labels`, creating it if absent.
    ///
    /// The tuple's shard stays locked while `f` runs, so an expiry sweep
    /// either sees the write or removes the tuple before it happens.
    pub fn update<R>(&self, labels: &[String], f: impl FnOnce(&Datum) -> R) -> MetricResult<R> {
        self.check_arity(labels)?;
        if let Some(lv) = self.label_values.get(labels) {
            return Ok(f(&lv.value));
        }
        let lv = self
            .label_values
            .entry(labels.to_vec())
            .or_insert_with(|| self.new_label_value(labels));
        Ok(f(&lv.value))
    }

    pub fn remove_datum(&self, labels: &[String]) -> MetricResult<()> {
        self.check_arity(labels)?;
        self.label_values
            .remove(labels)
            .map(|_| ())
            .ok_or_else(|| self.not_found(labels))
    }

    fn not_found(&self, labels: &[String]) -> MetricError {
        MetricError::NotFound {
            name: self.name.clone(),
            labels: labels.to_vec(),
        }
    }

    /// All label tuples, ordered by labels
    #[must_use]
    pub fn label_values(&self) -> Vec<LabelValue> {
        let mut values: Vec<LabelValue> = self
            .label_values
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        values.sort_by(|a, b| a.labels.cmp(&b.labels));
        values
    }

    /// Remove expired label tuples, returning how many were removed
    pub fn expire(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        self.label_values.retain(|_, lv| {
            let keep = !lv.is_expired(now);
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    /// Take over every label tuple of `old`; used when a metric is
    /// re-registered with unchanged keys. Tuples adopt this metric's expiry.
    pub(crate) fn absorb(&self, old: &Metric) {
        for entry in &old.label_values {
            let mut lv = entry.value().clone();
            lv.expiry = self.expiry;
            self.label_values.entry(entry.key().clone()).or_insert(lv);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn labels(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    #[test]
    fn get_datum_upserts() {
        let m = Metric::new("hits", "web.tl", Kind::Counter, labels(&["code"]));
        let a = m.get_datum(&labels(&["200"])).unwrap();
        a.increment_by(Number::Int(1), at(0));
        let b = m.get_datum(&labels(&["200"])).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(m.len(), 1);
    }

    #[test]
    fn label_arity_is_checked() {
        let m = Metric::new("hits", "web.tl", Kind::Counter, labels(&["code"]));
        let err = m.get_datum(&labels(&["200", "GET"])).unwrap_err();
        assert_eq!(
            err,
            MetricError::LabelArity {
                name: "hits".into(),
                expected: 1,
                got: 2
            }
        );
    }

    #[test]
    fn remove_missing_datum_fails() {
        let m = Metric::new("hits", "web.tl", Kind::Counter, labels(&["code"]));
        assert!(matches!(
            m.remove_datum(&labels(&["404"])),
            Err(MetricError::NotFound { .. })
        ));
        m.get_datum(&labels(&["404"])).unwrap();
        m.remove_datum(&labels(&["404"])).unwrap();
        assert!(m.is_empty());
    }

    #[test]
    fn label_values_are_sorted() {
        let m = Metric::new("hits", "web.tl", Kind::Counter, labels(&["code"]));
        for code in ["500", "200", "404"] {
            m.get_datum(&labels(&[code])).unwrap();
        }
        let order: Vec<_> = m
            .label_values()
            .into_iter()
            .map(|lv| lv.labels[0].clone())
            .collect();
        assert_eq!(order, vec!["200", "404", "500"]);
    }

    #[test]
    fn expiry_boundary_is_exclusive() {
        let lv = LabelValue {
            labels: vec![],
            value: Arc::new(Datum::new(Number::Int(1), at(100))),
            expiry: Some(Duration::from_secs(10)),
        };
        assert!(!lv.is_expired(at(110)));
        assert!(lv.is_expired(at(111)));

        let forever = LabelValue {
            expiry: Some(Duration::ZERO),
            ..lv.clone()
        };
        assert!(!forever.is_expired(at(1_000_000)));
    }

    #[test]
    fn expire_removes_only_stale_tuples() {
        let m = Metric::new("hits", "web.tl", Kind::Counter, labels(&["code"]))
            .with_expiry(Some(Duration::from_secs(60)));
        m.update(&labels(&["old"]), |d| d.set(Number::Int(1), at(0)))
            .unwrap();
        let now = at(1_000);
        m.update(&labels(&["new"]), |d| d.set(Number::Int(1), now))
            .unwrap();
        assert_eq!(m.expire(now + TimeDelta::seconds(30)), 1);
        assert_eq!(m.label_values()[0].labels, labels(&["new"]));
        assert_eq!(m.expire(now + TimeDelta::seconds(120)), 1);
        assert!(m.is_empty());
    }

    #[test]
    fn fresh_tuple_takes_first_write_time() {
        let m = Metric::new("last", "web.tl", Kind::Gauge, vec![]);
        assert_eq!(m.get_datum(&[]).unwrap().timestamp(), DateTime::UNIX_EPOCH);
        m.update(&[], |d| d.set(Number::Int(3), at(50))).unwrap();
        assert_eq!(m.get_datum(&[]).unwrap().timestamp(), at(50));
    }

    #[test]
    fn absorb_keeps_data_and_adopts_expiry() {
        let old = Metric::new("hits", "web.tl", Kind::Counter, labels(&["code"]));
        old.update(&labels(&["200"]), |d| d.increment_by(Number::Int(7), at(0)))
            .unwrap();
        let new = Metric::new("hits", "web.tl", Kind::Counter, labels(&["code"]))
            .with_expiry(Some(Duration::from_secs(5)));
        new.absorb(&old);
        let lv = &new.label_values()[0];
        assert_eq!(lv.value.value(), Number::Int(7));
        assert_eq!(lv.expiry, Some(Duration::from_secs(5)));
    }
}
