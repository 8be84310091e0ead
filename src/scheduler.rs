//! Background loops: periodic screen capture and retention sweeps.
//!
//! Both loops are spawned once at start-up and run for the life of the
//! process. Every per-tick failure is logged and absorbed; nothing in here
//! may take the daemon down.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::capture::CaptureStore;
use crate::config::CaptureConfig;
use crate::memory::{
    bool_setting, u64_setting, SETTING_AUTO_CAPTURE, SETTING_CAPTURE_INTERVAL_SECS,
    SETTING_MAX_MEMORY_ENTRIES,
};
use crate::traits::MemoryStore;

/// Bounds on the user-tunable capture interval.
const MIN_CAPTURE_INTERVAL_SECS: u64 = 5;
const MAX_CAPTURE_INTERVAL_SECS: u64 = 60;
const DEFAULT_CAPTURE_INTERVAL_SECS: u64 = 15;

const DEFAULT_MEMORY_ENTRY_CAP: u64 = 1000;

/// After this many consecutive capture failures the log level escalates.
const FAILURE_ESCALATION_THRESHOLD: u32 = 5;

pub struct Scheduler {
    store: Arc<dyn MemoryStore>,
    captures: Arc<CaptureStore>,
    config: CaptureConfig,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn MemoryStore>,
        captures: Arc<CaptureStore>,
        config: CaptureConfig,
    ) -> Self {
        Self {
            store,
            captures,
            config,
        }
    }

    /// Spawn the capture and sweep loops as background tasks.
    pub fn spawn(self: Arc<Self>) {
        let capture_loop = self.clone();
        tokio::spawn(async move {
            capture_loop.run_capture_loop().await;
        });

        let sweep_loop = self;
        tokio::spawn(async move {
            sweep_loop.run_sweep_loop().await;
        });

        info!("Scheduler spawned");
    }

    /// Take a screenshot on the user-configured cadence. The interval
    /// setting is re-read every tick so settings changes apply without a
    /// restart.
    async fn run_capture_loop(&self) {
        let mut consecutive_failures = 0u32;

        loop {
            tokio::time::sleep(self.capture_interval().await).await;

            if !bool_setting(self.store.as_ref(), SETTING_AUTO_CAPTURE, true).await {
                continue;
            }

            match self.captures.capture().await {
                Ok(record) => {
                    consecutive_failures = 0;
                    debug!(path = %record.path.display(), "scheduled capture stored");
                }
                Err(e) => {
                    consecutive_failures += 1;
                    if consecutive_failures == FAILURE_ESCALATION_THRESHOLD {
                        error!(
                            failures = consecutive_failures,
                            "scheduled capture keeps failing: {}", e
                        );
                    } else {
                        warn!("scheduled capture failed: {}", e);
                    }
                }
            }
        }
    }

    async fn capture_interval(&self) -> Duration {
        let secs = u64_setting(
            self.store.as_ref(),
            SETTING_CAPTURE_INTERVAL_SECS,
            DEFAULT_CAPTURE_INTERVAL_SECS,
        )
        .await;
        Duration::from_secs(secs.clamp(MIN_CAPTURE_INTERVAL_SECS, MAX_CAPTURE_INTERVAL_SECS))
    }

    async fn run_sweep_loop(&self) {
        let interval = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let max_age = Duration::from_secs(self.config.max_age_hours * 3600);

        loop {
            tokio::time::sleep(interval).await;
            self.run_sweep(max_age).await;
        }
    }

    /// One retention pass: drop stale captures, prune memory entries down
    /// to the configured cap.
    pub async fn run_sweep(&self, max_age: Duration) {
        match self.captures.evict_older_than(max_age).await {
            Ok(0) => {}
            Ok(deleted) => info!(deleted, "capture sweep complete"),
            Err(e) => warn!("capture sweep failed: {}", e),
        }

        let cap = u64_setting(
            self.store.as_ref(),
            SETTING_MAX_MEMORY_ENTRIES,
            DEFAULT_MEMORY_ENTRY_CAP,
        )
        .await;
        match self.store.prune_memory_entries(cap).await {
            Ok(0) => {}
            Ok(deleted) => info!(deleted, cap, "memory entries pruned"),
            Err(e) => warn!("memory prune failed: {}", e),
        }
    }
}
