//! Metric model and the concurrent metric store
//!
//! A [`Store`] maps `(name, program)` to a [`Metric`]; each metric holds one
//! [`Datum`] per label tuple. Any number of VM instances may update the store
//! at once, and a background task can sweep label tuples that have not been
//! written within their expiry.

mod datum;
mod error;
mod export;
mod metric;
mod store;

pub use datum::{Datum, Number, Sample};
pub use error::{MetricError, MetricResult};
pub use export::{LabelValueSnapshot, MetricSnapshot, SampleSnapshot};
pub use metric::{Kind, LabelValue, Metric};
pub use store::Store;
