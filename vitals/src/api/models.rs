//! API response models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::models::MetricsSampleDbModel;

/// One resource sample as exposed by the API.
///
/// Mirrors the persisted record; `null` metric fields mean the reading was
/// unavailable for that tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleResponse {
    pub host: String,
    pub sampled_at: DateTime<Utc>,
    pub restarted: bool,
    pub heap_used_bytes: Option<i64>,
    pub heap_free_bytes: Option<i64>,
    pub memory_used_bytes: Option<i64>,
    pub memory_free_bytes: Option<i64>,
    pub temp_used_bytes: Option<i64>,
    pub temp_free_bytes: Option<i64>,
}

impl From<MetricsSampleDbModel> for SampleResponse {
    fn from(sample: MetricsSampleDbModel) -> Self {
        Self {
            sampled_at: sample.sampled_at_utc(),
            host: sample.host,
            restarted: sample.restarted,
            heap_used_bytes: sample.heap_used_bytes,
            heap_free_bytes: sample.heap_free_bytes,
            memory_used_bytes: sample.memory_used_bytes,
            memory_free_bytes: sample.memory_free_bytes,
            temp_used_bytes: sample.temp_used_bytes,
            temp_free_bytes: sample.temp_free_bytes,
        }
    }
}

/// Recent sample history, newest first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SampleHistoryResponse {
    pub host: String,
    pub count: usize,
    pub samples: Vec<SampleResponse>,
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}
