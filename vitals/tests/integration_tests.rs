//! Integration tests for the vitals sampling and persistence core.
//!
//! These tests exercise the real SQLite store (in-memory), the sampler loop
//! against fake probes and stores, the retry executor's timing behavior,
//! and the HTTP read surface.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

use vitals::api::AppState;
use vitals::api::routes::create_router;
use vitals::config::MonitorConfig;
use vitals::database::models::{
    HostMetricsFactory, MetricsFactory, MetricsSampleDbModel, NewMetricsSample,
};
use vitals::database::repositories::{MetricsStore, SqlxMetricsStore};
use vitals::database::{DbPool, init_pool_with_size, run_migrations};
use vitals::retry::{BackoffPolicy, BackoffRetryExecutor};
use vitals::sampler::{ResourceProbe, ResourceReadings, ResourceSampler, RestartDetector};
use vitals::{Error, Result};

/// Helper to create a test database pool with migrations applied.
///
/// A single connection keeps the whole test on one in-memory database.
async fn setup_test_db() -> DbPool {
    let pool = init_pool_with_size("sqlite::memory:", 1)
        .await
        .expect("Failed to create test pool");

    run_migrations(&pool).await.expect("Failed to run migrations");

    pool
}

/// In-memory store that records inserted samples and can be told to fail
/// transiently for the first N inserts.
#[derive(Default)]
struct RecordingStore {
    samples: Mutex<Vec<NewMetricsSample>>,
    transient_failures: AtomicU32,
    insert_calls: AtomicU32,
}

impl RecordingStore {
    fn failing_transiently(times: u32) -> Self {
        Self {
            transient_failures: AtomicU32::new(times),
            ..Default::default()
        }
    }

    fn recorded(&self) -> Vec<NewMetricsSample> {
        self.samples.lock().clone()
    }

    fn to_db_model(sample: &NewMetricsSample, id: i64) -> MetricsSampleDbModel {
        MetricsSampleDbModel {
            id,
            host: sample.host.clone(),
            sampled_at: sample.sampled_at,
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

#[async_trait]
impl MetricsStore for RecordingStore {
    async fn insert_sample(&self, sample: &NewMetricsSample) -> Result<i64> {
        self.insert_calls.fetch_add(1, Ordering::SeqCst);

        let remaining = self.transient_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.transient_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(Error::TransientStorage("backend overloaded".into()));
        }

        let mut samples = self.samples.lock();
        samples.push(sample.clone());
        Ok(samples.len() as i64)
    }

    async fn latest_sample(&self, host: &str) -> Result<Option<MetricsSampleDbModel>> {
        let samples = self.samples.lock();
        let latest = samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.host == host)
            .max_by_key(|(_, s)| s.sampled_at)
            .map(|(i, s)| Self::to_db_model(s, (i + 1) as i64));
        Ok(latest)
    }

    async fn recent_samples(&self, host: &str, limit: i32) -> Result<Vec<MetricsSampleDbModel>> {
        let samples = self.samples.lock();
        let mut matching: Vec<MetricsSampleDbModel> = samples
            .iter()
            .enumerate()
            .filter(|(_, s)| s.host == host)
            .map(|(i, s)| Self::to_db_model(s, (i + 1) as i64))
            .collect();
        matching.sort_by(|a, b| b.sampled_at.cmp(&a.sampled_at));
        matching.truncate(limit as usize);
        Ok(matching)
    }
}

/// Probe that returns the same readings on every tick.
struct StaticProbe(ResourceReadings);

impl ResourceProbe for StaticProbe {
    fn read(&mut self) -> ResourceReadings {
        self.0
    }
}

fn memory_only_readings() -> ResourceReadings {
    ResourceReadings {
        memory_used_bytes: Some(2048),
        memory_free_bytes: Some(4096),
        ..Default::default()
    }
}

fn fast_config() -> MonitorConfig {
    MonitorConfig {
        interval: Duration::from_millis(10),
        max_retry_attempts: 3,
        backoff_base: Duration::from_millis(5),
        backoff_max: Duration::from_millis(50),
        attempt_timeout: Duration::from_secs(1),
        host: "test-node".to_string(),
        ..Default::default()
    }
}

fn sampler_with(config: MonitorConfig, store: Arc<RecordingStore>) -> ResourceSampler {
    ResourceSampler::new(
        config,
        Arc::new(HostMetricsFactory::new("test-node")),
        Arc::new(RestartDetector::new()),
        store,
    )
}

mod store_tests {
    use super::*;

    #[tokio::test]
    async fn insert_and_query_through_real_store() {
        let store = SqlxMetricsStore::new(setup_test_db().await);
        let factory = HostMetricsFactory::new("node-a");

        // Insert out of timestamp order, as happens when an earlier sample
        // is delayed by retries.
        for ts in [3000i64, 1000, 2000] {
            let mut sample = factory.empty_sample();
            sample.sampled_at = ts;
            sample.memory_used_bytes = Some(ts);
            let id = store.insert_sample(&sample).await.unwrap();
            assert!(id > 0);
        }

        let latest = store.latest_sample("node-a").await.unwrap().unwrap();
        assert_eq!(latest.sampled_at, 3000);

        let recent = store.recent_samples("node-a", 10).await.unwrap();
        let timestamps: Vec<i64> = recent.iter().map(|s| s.sampled_at).collect();
        assert_eq!(timestamps, vec![3000, 2000, 1000]);
    }

    #[tokio::test]
    async fn migrations_create_sample_table() {
        let pool = setup_test_db().await;

        let tables: Vec<(String,)> =
            sqlx::query_as("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .fetch_all(&pool)
                .await
                .expect("Failed to query tables");

        let table_names: Vec<&str> = tables.iter().map(|t| t.0.as_str()).collect();
        assert!(
            table_names.contains(&"metrics_samples"),
            "metrics_samples table missing"
        );
    }
}

mod sampler_tests {
    use super::*;

    #[tokio::test]
    async fn exactly_one_restarted_sample_per_run() {
        let store = Arc::new(RecordingStore::default());
        let sampler = sampler_with(fast_config(), store.clone());

        sampler
            .start_with_probe(Box::new(StaticProbe(memory_only_readings())))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        sampler.stop();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let samples = store.recorded();
        assert!(samples.len() >= 2, "expected several ticks, got {}", samples.len());
        let restarted = samples.iter().filter(|s| s.restarted).count();
        assert_eq!(restarted, 1);
    }

    #[tokio::test]
    async fn fresh_run_reports_restart_again() {
        let store = Arc::new(RecordingStore::default());

        for _ in 0..2 {
            // A new sampler with a fresh detector models a new process
            // instance, independent of previously persisted history.
            let sampler = sampler_with(fast_config(), store.clone());
            sampler
                .start_with_probe(Box::new(StaticProbe(memory_only_readings())))
                .unwrap();
            tokio::time::sleep(Duration::from_millis(40)).await;
            sampler.stop();
            tokio::time::sleep(Duration::from_millis(30)).await;
        }

        let restarted = store.recorded().iter().filter(|s| s.restarted).count();
        assert_eq!(restarted, 2);
    }

    #[tokio::test]
    async fn starting_twice_is_a_noop() {
        let store = Arc::new(RecordingStore::default());
        let sampler = sampler_with(fast_config(), store.clone());

        sampler
            .start_with_probe(Box::new(StaticProbe(memory_only_readings())))
            .unwrap();
        // Second start must not spawn a second schedule.
        sampler
            .start_with_probe(Box::new(StaticProbe(memory_only_readings())))
            .unwrap();
        assert!(sampler.is_running());

        tokio::time::sleep(Duration::from_millis(60)).await;
        sampler.stop();
        sampler.stop();
        assert!(!sampler.is_running());
        tokio::time::sleep(Duration::from_millis(30)).await;

        let restarted = store.recorded().iter().filter(|s| s.restarted).count();
        assert_eq!(restarted, 1);
    }

    #[tokio::test]
    async fn degraded_sample_is_still_persisted() {
        let store = Arc::new(RecordingStore::default());
        let sampler = sampler_with(fast_config(), store.clone());

        let readings = ResourceReadings {
            temp_free_bytes: Some(10_000_000),
            ..Default::default()
        };
        sampler.start_with_probe(Box::new(StaticProbe(readings))).unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        sampler.stop();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let samples = store.recorded();
        assert!(!samples.is_empty());
        let sample = &samples[0];
        assert_eq!(sample.temp_free_bytes, Some(10_000_000));
        assert_eq!(sample.heap_used_bytes, None);
        assert_eq!(sample.memory_used_bytes, None);
        assert_eq!(sample.memory_free_bytes, None);
    }

    #[tokio::test]
    async fn fully_failed_probe_persists_nothing() {
        let store = Arc::new(RecordingStore::default());
        let sampler = sampler_with(fast_config(), store.clone());

        sampler
            .start_with_probe(Box::new(StaticProbe(ResourceReadings::default())))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        sampler.stop();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(store.recorded().is_empty());
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stopping_does_not_cancel_inflight_retries() {
        let store = Arc::new(RecordingStore::failing_transiently(2));
        let mut config = fast_config();
        config.interval = Duration::from_secs(60);
        config.backoff_base = Duration::from_millis(30);
        let sampler = sampler_with(config, store.clone());

        sampler
            .start_with_probe(Box::new(StaticProbe(memory_only_readings())))
            .unwrap();
        // The first tick fires immediately; stop while its write is mid-retry.
        tokio::time::sleep(Duration::from_millis(10)).await;
        sampler.stop();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let samples = store.recorded();
        assert_eq!(samples.len(), 1, "dispatched write must run to completion");
        assert_eq!(store.insert_calls.load(Ordering::SeqCst), 3);
    }
}

mod retry_tests {
    use super::*;

    fn executor(max_attempts: u32, base_ms: u64) -> BackoffRetryExecutor {
        BackoffRetryExecutor::new(
            BackoffPolicy {
                max_attempts,
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_secs(10),
                jitter: false,
            },
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn two_transient_failures_then_success_takes_backoff_time() {
        // interval scenario: base backoff = 100ms; storage returns transient
        // on attempts 1 and 2, succeeds on attempt 3. Expected elapsed time
        // before success is at least 100ms + 200ms.
        let attempts = AtomicU32::new(0);
        let start = Instant::now();

        let result = executor(3, 100)
            .run("scenario", |_| {
                let n = attempts.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(Error::TransientStorage("busy".into()))
                    } else {
                        Ok("persisted")
                    }
                }
            })
            .await;

        let elapsed = start.elapsed();
        assert_eq!(result.unwrap(), "persisted");
        assert_eq!(attempts.load(Ordering::SeqCst), 3);
        assert!(
            elapsed >= Duration::from_millis(295),
            "elapsed {elapsed:?} shorter than the configured backoff"
        );
    }

    #[tokio::test]
    async fn executor_is_generic_over_the_operation() {
        // Not a storage write: any fallible async operation fits.
        let result = executor(2, 1)
            .run("greeting", |attempt| async move {
                if attempt == 0 {
                    Err(Error::TransientStorage("warming up".into()))
                } else {
                    Ok(format!("hello after {attempt} retries"))
                }
            })
            .await;
        assert_eq!(result.unwrap(), "hello after 1 retries");
    }

    #[tokio::test]
    async fn real_store_write_through_executor() {
        let store = SqlxMetricsStore::new(setup_test_db().await);
        let mut sample = HostMetricsFactory::new("node-a").empty_sample();
        sample.memory_used_bytes = Some(1);

        let id = executor(3, 1)
            .run("insert metrics sample", |_| store.insert_sample(&sample))
            .await
            .unwrap();
        assert!(id > 0);
    }
}

mod api_tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use tower::ServiceExt;

    async fn state_with_samples(samples: Vec<(i64, bool)>) -> AppState {
        let pool = setup_test_db().await;
        let store = SqlxMetricsStore::new(pool.clone());
        let factory = HostMetricsFactory::new("api-node");

        for (ts, restarted) in samples {
            let mut sample = factory.empty_sample();
            sample.sampled_at = ts;
            sample.restarted = restarted;
            sample.memory_used_bytes = Some(512);
            store.insert_sample(&sample).await.unwrap();
        }

        AppState::new(Arc::new(store), pool, "api-node")
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 64 * 1024)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn latest_is_404_before_any_sample() {
        let state = state_with_samples(vec![]).await;
        let router = create_router(state);

        let response = router
            .oneshot(Request::builder().uri("/api/monitor").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = body_json(response).await;
        assert_eq!(json["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn latest_returns_newest_sample() {
        let state = state_with_samples(vec![(1000, true), (2000, false)]).await;
        let router = create_router(state);

        let response = router
            .oneshot(Request::builder().uri("/api/monitor").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["host"], "api-node");
        assert_eq!(json["restarted"], false);
        assert_eq!(json["memory_used_bytes"], 512);
        assert!(json["heap_used_bytes"].is_null());
    }

    #[tokio::test]
    async fn history_is_newest_first_and_respects_limit() {
        let state = state_with_samples(vec![(1000, true), (3000, false), (2000, false)]).await;
        let router = create_router(state);

        let response = router
            .oneshot(
                Request::builder()
                    .uri("/api/monitor/samples?limit=2")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["count"], 2);
        let samples = json["samples"].as_array().unwrap();
        assert_eq!(samples.len(), 2);
        // Newest first regardless of insertion order.
        assert!(samples[0]["sampled_at"].as_str().unwrap() > samples[1]["sampled_at"].as_str().unwrap());
    }

    #[tokio::test]
    async fn liveness_endpoint_responds() {
        let state = state_with_samples(vec![]).await;
        let router = create_router(state);

        let response = router
            .oneshot(Request::builder().uri("/health/live").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = body_json(response).await;
        assert_eq!(json["status"], "alive");
    }

    #[tokio::test]
    async fn readiness_endpoint_reports_ready() {
        let state = state_with_samples(vec![]).await;
        let router = create_router(state);

        let response = router
            .oneshot(Request::builder().uri("/health/ready").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }
}
