//! Restart detection.

use std::sync::atomic::{AtomicBool, Ordering};

/// Answers whether the current observation is the first one emitted by this
/// process instance.
///
/// Holds no persisted state: "restarted" means "this running instance has
/// not reported before", not "the host rebooted". The flag flips exactly
/// once per detector lifetime, under a compare-and-set so a racing start
/// cannot produce two first samples.
#[derive(Debug, Default)]
pub struct RestartDetector {
    reported: AtomicBool,
}

impl RestartDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// True exactly once: on the first call after the detector is created,
    /// false on every subsequent call within the same run.
    pub fn is_first_sample_of_run(&self) -> bool {
        self.reported
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
