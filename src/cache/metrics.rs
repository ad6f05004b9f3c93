//! Atomic counters for cache hits/misses and refresh health (spec §4.1,
//! §4.2). Counters are plain atomics; the handful of non-atomic fields
//! (last refresh timestamp, computed error rate) sit behind their own
//! mutex rather than sharing the entity cache's lock (spec §5).

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Health classification derived from the last refresh's error rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    Degraded,
    Unhealthy,
}

impl Health {
    /// healthy if error rate = 0, degraded if 0 < rate < 10%, unhealthy
    /// otherwise (spec §4.2 refresh protocol step 3).
    pub fn from_error_rate(errors: u32, attempts: u32) -> Self {
        if attempts == 0 || errors == 0 {
            return Health::Healthy;
        }
        let rate = errors as f64 / attempts as f64;
        if rate < 0.10 {
            Health::Degraded
        } else {
            Health::Unhealthy
        }
    }
}

#[derive(Debug, Default)]
struct RefreshState {
    last_refresh_started: Option<Instant>,
    last_refresh_duration: Option<Duration>,
    last_error_count: u32,
    last_attempt_count: u32,
}

/// Hit/miss counters plus refresh timing for one [`EntityCache`]
/// (or the manager as a whole).
///
/// [`EntityCache`]: crate::cache::entity::EntityCache
#[derive(Default)]
pub struct CacheMetrics {
    hits: AtomicU64,
    misses: AtomicU64,
    refresh_errors: AtomicU64,
    refresh_state: Mutex<RefreshState>,
}

impl CacheMetrics {
    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refresh_error(&self) {
        self.refresh_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    pub fn refresh_errors(&self) -> u64 {
        self.refresh_errors.load(Ordering::Relaxed)
    }

    /// Record that a refresh pass has begun.
    pub fn begin_refresh(&self) {
        self.refresh_state.lock().last_refresh_started = Some(Instant::now());
    }

    /// Record that a refresh pass has finished with `errors` out of
    /// `attempts` entity kinds failing.
    pub fn end_refresh(&self, errors: u32, attempts: u32) {
        let mut state = self.refresh_state.lock();
        if let Some(started) = state.last_refresh_started {
            state.last_refresh_duration = Some(started.elapsed());
        }
        state.last_error_count = errors;
        state.last_attempt_count = attempts;
    }

    pub fn last_refresh_duration(&self) -> Option<Duration> {
        self.refresh_state.lock().last_refresh_duration
    }

    /// Errors and attempts from the most recently completed refresh pass
    /// only, not accumulated over the manager's lifetime (spec §4.2 step
    /// 3: health reflects the current pass, not history).
    pub fn last_refresh_error_rate(&self) -> (u32, u32) {
        let state = self.refresh_state.lock();
        (state.last_error_count, state.last_attempt_count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_classification_thresholds() {
        assert_eq!(Health::from_error_rate(0, 3), Health::Healthy);
        assert_eq!(Health::from_error_rate(1, 30), Health::Degraded);
        assert_eq!(Health::from_error_rate(1, 3), Health::Unhealthy);
        assert_eq!(Health::from_error_rate(0, 0), Health::Healthy);
    }

    #[test]
    fn hit_miss_counters_are_independent() {
        let metrics = CacheMetrics::default();
        metrics.record_hit();
        metrics.record_hit();
        metrics.record_miss();
        assert_eq!(metrics.hits(), 2);
        assert_eq!(metrics.misses(), 1);
    }
}
