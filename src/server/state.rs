//! Shared HTTP server state.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::logbus::LogBus;
use crate::queue::JobQueue;
use crate::store::DeploymentStore;
use crate::vault::CredentialVault;

/// Queue parameters applied to every intake
#[derive(Debug, Clone)]
pub struct JobDefaults {
    pub max_attempts: u32,
    pub timeout: Duration,
}

/// Fixed-window intake throttle.
pub struct RateLimiter {
    limit_per_minute: u32,
    window: Mutex<(Instant, u32)>,
}

impl RateLimiter {
    pub fn new(limit_per_minute: u32) -> Self {
        Self {
            limit_per_minute,
            window: Mutex::new((Instant::now(), 0)),
        }
    }

    /// Count one request; false when the current window is exhausted.
    pub fn try_acquire(&self) -> bool {
        let mut window = self.window.lock().expect("rate limiter poisoned");
        let (started, count) = *window;
        if started.elapsed() >= Duration::from_secs(60) {
            *window = (Instant::now(), 1);
            return true;
        }
        if count >= self.limit_per_minute {
            return false;
        }
        window.1 = count + 1;
        true
    }
}

/// Backlog depth above which intake logs a warning (work is still accepted).
pub const BACKLOG_HIGH_WATER: usize = 100;

pub struct ServerState {
    pub store: Arc<DeploymentStore>,
    pub queue: Arc<JobQueue>,
    pub bus: Arc<LogBus>,
    pub vault: Arc<CredentialVault>,
    pub job_defaults: JobDefaults,
    pub rate_limiter: RateLimiter,
}
