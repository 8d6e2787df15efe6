//! Resource sampler service.
//!
//! One background task per sampler instance captures a resource observation
//! on every tick and dispatches it for persistence. Persistence (which may
//! block on retries) runs in detached tasks so a slow write never delays
//! the next tick, and stopping the sampler never cancels a write already in
//! flight.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::MonitorConfig;
use crate::database::models::{MetricsFactory, NewMetricsSample};
use crate::database::repositories::MetricsStore;
use crate::retry::{BackoffPolicy, BackoffRetryExecutor};
use crate::{Error, Result};

use super::probe::{ResourceProbe, ResourceReadings, SysinfoProbe};
use super::restart::RestartDetector;

/// Periodic sampler for process and host resource usage.
pub struct ResourceSampler {
    config: MonitorConfig,
    factory: Arc<dyn MetricsFactory>,
    detector: Arc<RestartDetector>,
    store: Arc<dyn MetricsStore>,
    running: AtomicBool,
    cancel: Mutex<CancellationToken>,
}

impl ResourceSampler {
    pub fn new(
        config: MonitorConfig,
        factory: Arc<dyn MetricsFactory>,
        detector: Arc<RestartDetector>,
        store: Arc<dyn MetricsStore>,
    ) -> Self {
        Self {
            config,
            factory,
            detector,
            store,
            running: AtomicBool::new(false),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Whether the sampling schedule is currently enabled.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Enable the sampling schedule with the default sysinfo-backed probe.
    ///
    /// Validates the configuration first; invalid values are a
    /// configuration error, not a runtime crash. Starting an already
    /// running sampler is a no-op.
    pub fn start(&self) -> Result<()> {
        self.start_with_probe(Box::new(SysinfoProbe::new(self.config.temp_dir.clone())))
    }

    /// Enable the sampling schedule with a caller-supplied probe.
    pub fn start_with_probe(&self, probe: Box<dyn ResourceProbe>) -> Result<()> {
        self.config.validate()?;

        let executor = BackoffRetryExecutor::new(
            BackoffPolicy {
                max_attempts: self.config.max_retry_attempts,
                base_delay: self.config.backoff_base,
                max_delay: self.config.backoff_max,
                jitter: true,
            },
            self.config.attempt_timeout,
        )?;

        if self
            .running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Resource sampler already running; start is a no-op");
            return Ok(());
        }

        let token = CancellationToken::new();
        *self.cancel.lock() = token.clone();

        tokio::spawn(run_loop(
            self.config.clone(),
            self.factory.clone(),
            self.detector.clone(),
            self.store.clone(),
            executor,
            probe,
            token,
        ));

        info!(
            interval_ms = self.config.interval.as_millis() as u64,
            host = %self.config.host,
            "Resource sampler started"
        );
        Ok(())
    }

    /// Disable the sampling schedule.
    ///
    /// Idempotent. Cancels future ticks only: persistence tasks already
    /// dispatched run to completion in the background.
    pub fn stop(&self) {
        if self
            .running
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            info!("Stopping resource sampler");
        }
        self.cancel.lock().cancel();
    }
}

async fn run_loop(
    config: MonitorConfig,
    factory: Arc<dyn MetricsFactory>,
    detector: Arc<RestartDetector>,
    store: Arc<dyn MetricsStore>,
    executor: BackoffRetryExecutor,
    mut probe: Box<dyn ResourceProbe>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                debug!("Sampler loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                let readings = probe.read();
                let Some(sample) = build_sample(factory.as_ref(), &detector, readings) else {
                    continue;
                };

                let store = store.clone();
                let executor = executor.clone();
                tokio::spawn(async move {
                    persist_sample(store.as_ref(), &executor, sample).await;
                });
            }
        }
    }
}

/// Assemble one sample from the tick's readings.
///
/// Returns `None` when not a single metric was readable: an empty record is
/// dropped and logged, never persisted. The restart flag is consulted only
/// for samples that are actually emitted.
fn build_sample(
    factory: &dyn MetricsFactory,
    detector: &RestartDetector,
    readings: ResourceReadings,
) -> Option<NewMetricsSample> {
    if readings.is_empty() {
        warn!("No resource metric readable this tick; dropping sample");
        return None;
    }

    let mut sample = factory.empty_sample();
    sample.restarted = detector.is_first_sample_of_run();
    sample.heap_used_bytes = readings.heap_used_bytes.map(clamp_to_i64);
    sample.heap_free_bytes = readings.heap_free_bytes.map(clamp_to_i64);
    sample.memory_used_bytes = readings.memory_used_bytes.map(clamp_to_i64);
    sample.memory_free_bytes = readings.memory_free_bytes.map(clamp_to_i64);
    sample.temp_used_bytes = readings.temp_used_bytes.map(clamp_to_i64);
    sample.temp_free_bytes = readings.temp_free_bytes.map(clamp_to_i64);
    Some(sample)
}

fn clamp_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

/// Persist one sample through the retry executor.
///
/// Failures end here: a sample that exhausts its retries or hits a
/// permanent error is logged and discarded, never resurrected, and never
/// crashes the scheduler.
async fn persist_sample(
    store: &dyn MetricsStore,
    executor: &BackoffRetryExecutor,
    sample: NewMetricsSample,
) {
    match executor
        .run("insert metrics sample", |_| store.insert_sample(&sample))
        .await
    {
        Ok(id) => {
            debug!(id, restarted = sample.restarted, "Sample persisted");
        }
        Err(err) if matches!(err, Error::RetryExhausted { .. }) => {
            warn!(error = %err, "Dropping sample after exhausting storage retries");
        }
        Err(err) => {
            warn!(error = %err, "Dropping sample after permanent storage error");
        }
    }
}
