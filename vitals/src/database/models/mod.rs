//! Database models.

pub mod sample;

pub use sample::{HostMetricsFactory, MetricsFactory, MetricsSampleDbModel, NewMetricsSample};
