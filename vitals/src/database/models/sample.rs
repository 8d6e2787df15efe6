//! Resource sample models and the sample factory.
//!
//! Timestamps are stored as `INTEGER` Unix epoch milliseconds (UTC) in
//! SQLite. Metric columns are `Option`al: `None` means the reading failed
//! for that tick and was degraded rather than aborting the whole sample.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Current time as Unix epoch milliseconds (UTC).
#[inline]
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// Convert Unix epoch milliseconds to `DateTime<Utc>`.
///
/// Values outside chrono's supported range clamp to the nearest
/// representable timestamp.
pub fn ms_to_datetime(ms: i64) -> DateTime<Utc> {
    match Utc.timestamp_millis_opt(ms) {
        chrono::LocalResult::Single(dt) => dt,
        chrono::LocalResult::Ambiguous(dt, _) => dt,
        chrono::LocalResult::None => {
            if ms.is_negative() {
                Utc.timestamp_millis_opt(i64::MIN)
                    .earliest()
                    .unwrap_or_else(Utc::now)
            } else {
                Utc.timestamp_millis_opt(i64::MAX)
                    .latest()
                    .unwrap_or_else(Utc::now)
            }
        }
    }
}

/// A resource sample that has not been persisted yet.
///
/// The id is assigned by the store on successful insertion; every other
/// field is set by the producer before the record is handed over. Rows are
/// never updated in place — each sample is an independent append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMetricsSample {
    pub host: String,
    /// Sampling time as Unix epoch milliseconds (UTC).
    pub sampled_at: i64,
    /// True exactly for the first sample emitted by this process instance.
    pub restarted: bool,
    pub heap_used_bytes: Option<i64>,
    pub heap_free_bytes: Option<i64>,
    pub memory_used_bytes: Option<i64>,
    pub memory_free_bytes: Option<i64>,
    pub temp_used_bytes: Option<i64>,
    pub temp_free_bytes: Option<i64>,
}

impl NewMetricsSample {
    /// Whether at least one metric was read this tick.
    ///
    /// A sample with no readings at all is dropped by the sampler, never
    /// persisted as an empty record.
    pub fn has_readings(&self) -> bool {
        self.heap_used_bytes.is_some()
            || self.heap_free_bytes.is_some()
            || self.memory_used_bytes.is_some()
            || self.memory_free_bytes.is_some()
            || self.temp_used_bytes.is_some()
            || self.temp_free_bytes.is_some()
    }
}

/// A persisted resource sample row.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MetricsSampleDbModel {
    /// Store-assigned identifier, never reused.
    pub id: i64,
    pub host: String,
    pub sampled_at: i64,
    pub restarted: bool,
    pub heap_used_bytes: Option<i64>,
    pub heap_free_bytes: Option<i64>,
    pub memory_used_bytes: Option<i64>,
    pub memory_free_bytes: Option<i64>,
    pub temp_used_bytes: Option<i64>,
    pub temp_free_bytes: Option<i64>,
}

impl MetricsSampleDbModel {
    /// Sampling time as a UTC datetime.
    pub fn sampled_at_utc(&self) -> DateTime<Utc> {
        ms_to_datetime(self.sampled_at)
    }
}

/// Produces fresh, empty samples stamped with host identity and time.
///
/// The sampler populates the readings and the restart flag afterwards; the
/// factory is the only place that decides what "empty" looks like for a
/// sample type.
pub trait MetricsFactory: Send + Sync {
    fn empty_sample(&self) -> NewMetricsSample;
}

/// Factory for samples attributed to a fixed host identifier.
pub struct HostMetricsFactory {
    host: String,
}

impl HostMetricsFactory {
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// The host identifier stamped on produced samples.
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl MetricsFactory for HostMetricsFactory {
    fn empty_sample(&self) -> NewMetricsSample {
        NewMetricsSample {
            host: self.host.clone(),
            sampled_at: now_ms(),
            restarted: false,
            heap_used_bytes: None,
            heap_free_bytes: None,
            memory_used_bytes: None,
            memory_free_bytes: None,
            temp_used_bytes: None,
            temp_free_bytes: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_sample_has_no_readings() {
        let factory = HostMetricsFactory::new("node-1");
        let sample = factory.empty_sample();
        assert_eq!(sample.host, "node-1");
        assert!(!sample.restarted);
        assert!(!sample.has_readings());
    }

    #[test]
    fn empty_sample_is_stamped_with_current_time() {
        let factory = HostMetricsFactory::new("node-1");
        let before = now_ms();
        let sample = factory.empty_sample();
        let after = now_ms();
        assert!(sample.sampled_at >= before);
        assert!(sample.sampled_at <= after);
    }

    #[test]
    fn single_reading_counts_as_readings() {
        let factory = HostMetricsFactory::new("node-1");
        let mut sample = factory.empty_sample();
        sample.temp_free_bytes = Some(1024);
        assert!(sample.has_readings());
    }

    #[test]
    fn ms_roundtrip() {
        let now = Utc::now();
        let ms = now.timestamp_millis();
        assert_eq!(ms_to_datetime(ms).timestamp_millis(), ms);
    }

    #[test]
    fn ms_to_datetime_clamps_out_of_range() {
        // Should not panic for extreme values.
        let _ = ms_to_datetime(i64::MAX);
        let _ = ms_to_datetime(i64::MIN);
    }
}
