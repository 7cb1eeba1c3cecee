//! The process-wide metric registry

use std::collections::hash_map::RandomState;
use std::hash::BuildHasher;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::error::{MetricError, MetricResult};
use super::export::MetricSnapshot;
use super::metric::Metric;

/// Registry of metrics keyed by `(name, program)`.
///
/// Keys are a seeded hash of the pair; collisions are not handled and are
/// assumed not to occur within one process.
#[derive(Debug, Default)]
pub struct Store {
    metrics: DashMap<u64, Arc<Metric>>,
    hasher: RandomState,
}

impl Store {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(&self, name: &str, program: &str) -> u64 {
        self.hasher.hash_one((name, program))
    }

    /// Register `metric`, returning the registered instance.
    ///
    /// * absent: inserted
    /// * present with another kind: error, the existing metric is untouched
    /// * present with equal keys: label tuples move into `metric`, which
    ///   replaces the existing one
    /// * present with different keys: replaced, old data is dropped
    ///
    /// A VM that resolved the old instance before the swap may still write to
    /// it for the rest of that line. Migrated tuples share their datums, so
    /// those writes land; a tuple it creates on the old instance is lost.
    pub fn add(&self, metric: Metric) -> MetricResult<Arc<Metric>> {
        let key = self.key(metric.name(), metric.program());
        let metric = Arc::new(metric);
        match self.metrics.entry(key) {
            Entry::Vacant(slot) => {
                debug!(name = %metric.name(), program = %metric.program(), "metric registered");
                slot.insert(Arc::clone(&metric));
            }
            Entry::Occupied(mut slot) => {
                let existing = slot.get();
                if existing.kind() != metric.kind() {
                    let err = MetricError::KindMismatch {
                        name: metric.name().to_string(),
                        program: metric.program().to_string(),
                        existing: existing.kind(),
                        requested: metric.kind(),
                    };
                    warn!(%err, "metric registration rejected");
                    return Err(err);
                }
                if existing.keys() == metric.keys() {
                    metric.absorb(existing);
                    debug!(
                        name = %metric.name(),
                        program = %metric.program(),
                        label_values = metric.len(),
                        "metric re-registered, data migrated"
                    );
                } else {
                    info!(
                        name = %metric.name(),
                        program = %metric.program(),
                        "metric keys changed, previous data dropped"
                    );
                }
                slot.insert(Arc::clone(&metric));
            }
        }
        Ok(metric)
    }

    /// The metric registered as `(name, program)`, if any
    #[must_use]
    pub fn find_metric_or_nil(&self, name: &str, program: &str) -> Option<Arc<Metric>> {
        self.metrics
            .get(&self.key(name, program))
            .map(|m| Arc::clone(m.value()))
    }

    /// Look up `(name, program)`, registering `init()` if it is absent
    pub fn find_or_insert_with(
        &self,
        name: &str,
        program: &str,
        init: impl FnOnce() -> Metric,
    ) -> Arc<Metric> {
        let key = self.key(name, program);
        if let Some(metric) = self.metrics.get(&key).map(|m| Arc::clone(m.value())) {
            return metric;
        }
        let entry = self.metrics.entry(key).or_insert_with(|| {
            debug!(name, program, "metric registered on first use");
            Arc::new(init())
        });
        Arc::clone(entry.value())
    }

    /// Remove every metric
    pub fn clear_metrics(&self) {
        self.metrics.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Call `f` for every metric, stopping at the first error.
    ///
    /// The registry is snapshotted first; `f` runs with no lock held and may
    /// itself call back into the store.
    pub fn range<F, E>(&self, mut f: F) -> Result<(), E>
    where
        F: FnMut(&Arc<Metric>) -> Result<(), E>,
    {
        for metric in &self.metrics() {
            f(metric)?;
        }
        Ok(())
    }

    fn metrics(&self) -> Vec<Arc<Metric>> {
        self.metrics
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    /// Sweep expired label tuples as of now
    pub fn gc(&self) -> usize {
        self.gc_at(Utc::now())
    }

    /// Sweep label tuples expired as of `now`, returning how many were
    /// removed. Metrics themselves are never removed.
    pub fn gc_at(&self, now: DateTime<Utc>) -> usize {
        let mut removed = 0;
        for metric in self.metrics() {
            let n = metric.expire(now);
            if n > 0 {
                debug!(name = %metric.name(), program = %metric.program(), removed = n, "expired label values");
            }
            removed += n;
        }
        if removed > 0 {
            info!(removed, "expiry sweep finished");
        }
        removed
    }

    /// Spawn a task sweeping expired label tuples every `period` until
    /// `cancel` fires. A zero period disables the loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_gc_loop(
        self: &Arc<Self>,
        cancel: CancellationToken,
        period: Duration,
    ) -> Option<JoinHandle<()>> {
        if period.is_zero() {
            info!("metric expiry disabled");
            return None;
        }
        info!(?period, "starting metric expiry loop");
        let store = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => {
                        debug!("metric expiry loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        store.gc();
                    }
                }
            }
        }))
    }

    /// Point-in-time view of every metric, ordered by name then program
    #[must_use]
    pub fn snapshot(&self) -> Vec<MetricSnapshot> {
        let mut snapshot: Vec<MetricSnapshot> = self
            .metrics()
            .iter()
            .map(|metric| MetricSnapshot::from(metric.as_ref()))
            .collect();
        snapshot.sort_by(|a, b| (&a.name, &a.program).cmp(&(&b.name, &b.program)));
        snapshot
    }

    /// Write every metric as a pretty-printed JSON array
    pub fn write_metrics<W: io::Write>(&self, writer: W) -> MetricResult<()> {
        serde_json::to_writer_pretty(writer, &self.snapshot()).map_err(|e| {
            let err = if e.is_io() {
                MetricError::Io(e.to_string())
            } else {
                MetricError::Serialize(e.to_string())
            };
            warn!(%err, "metric dump failed");
            err
        })
    }
}
