//! Metrics sample repository.

use async_trait::async_trait;
use sqlx::SqlitePool;

use crate::Result;
use crate::database::models::{MetricsSampleDbModel, NewMetricsSample};

/// Store for resource samples.
///
/// Documents are only ever inserted; retention, if any, is an external
/// concern. Writes from the sampler pass through the retry executor at the
/// call site, so implementations surface raw storage errors and let the
/// caller classify them.
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Insert a sample and return the store-assigned id.
    async fn insert_sample(&self, sample: &NewMetricsSample) -> Result<i64>;

    /// The most recent sample for `host`, if any has been persisted.
    async fn latest_sample(&self, host: &str) -> Result<Option<MetricsSampleDbModel>>;

    /// The most recent `limit` samples for `host`, newest first.
    ///
    /// Ordered by sampling timestamp, not insertion order — under retries a
    /// later sample may have been inserted before an earlier one.
    async fn recent_samples(&self, host: &str, limit: i32) -> Result<Vec<MetricsSampleDbModel>>;
}

/// SQLx implementation of MetricsStore.
pub struct SqlxMetricsStore {
    pool: SqlitePool,
}

impl SqlxMetricsStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MetricsStore for SqlxMetricsStore {
    async fn insert_sample(&self, sample: &NewMetricsSample) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO metrics_samples (
                host, sampled_at, restarted,
                heap_used_bytes, heap_free_bytes,
                memory_used_bytes, memory_free_bytes,
                temp_used_bytes, temp_free_bytes
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&sample.host)
        .bind(sample.sampled_at)
        .bind(sample.restarted)
        .bind(sample.heap_used_bytes)
        .bind(sample.heap_free_bytes)
        .bind(sample.memory_used_bytes)
        .bind(sample.memory_free_bytes)
        .bind(sample.temp_used_bytes)
        .bind(sample.temp_free_bytes)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    async fn latest_sample(&self, host: &str) -> Result<Option<MetricsSampleDbModel>> {
        let sample = sqlx::query_as::<_, MetricsSampleDbModel>(
            "SELECT * FROM metrics_samples WHERE host = ? ORDER BY sampled_at DESC, id DESC LIMIT 1",
        )
        .bind(host)
        .fetch_optional(&self.pool)
        .await?;
        Ok(sample)
    }

    async fn recent_samples(&self, host: &str, limit: i32) -> Result<Vec<MetricsSampleDbModel>> {
        let samples = sqlx::query_as::<_, MetricsSampleDbModel>(
            "SELECT * FROM metrics_samples WHERE host = ? ORDER BY sampled_at DESC, id DESC LIMIT ?",
        )
        .bind(host)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(samples)
    }
}
