//! Per-IP login rate limiting (spec §4.4 "Rate limiting").
//!
//! A sliding window of consecutive failures per IP; once the threshold is
//! crossed the IP is blocked for a cool-down window. A successful login
//! resets the counter. Grounded on the corpus's atomic sliding-window
//! counter, simplified here to the consecutive-failure semantics the
//! spec asks for rather than a generic request-rate limiter.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

struct IpState {
    consecutive_failures: u32,
    blocked_until: Option<Instant>,
}

/// Login attempt rate limiter.
pub struct LoginRateLimiter {
    threshold: u32,
    cooldown: Duration,
    state: DashMap<IpAddr, Mutex<IpState>>,
}

impl LoginRateLimiter {
    pub fn new(threshold: u32, cooldown: Duration) -> Self {
        Self {
            threshold,
            cooldown,
            state: DashMap::new(),
        }
    }

    /// `true` if `ip` may attempt a login right now.
    pub fn check(&self, ip: IpAddr) -> bool {
        let entry = self
            .state
            .entry(ip)
            .or_insert_with(|| Mutex::new(IpState {
                consecutive_failures: 0,
                blocked_until: None,
            }));
        let state = entry.lock();
        match state.blocked_until {
            Some(until) if Instant::now() < until => false,
            _ => true,
        }
    }

    /// Record a failed login attempt; blocks the IP once `threshold`
    /// consecutive failures have been recorded.
    pub fn record_failure(&self, ip: IpAddr) {
        let entry = self
            .state
            .entry(ip)
            .or_insert_with(|| Mutex::new(IpState {
                consecutive_failures: 0,
                blocked_until: None,
            }));
        let mut state = entry.lock();
        state.consecutive_failures += 1;
        if state.consecutive_failures >= self.threshold {
            state.blocked_until = Some(Instant::now() + self.cooldown);
        }
    }

    /// Reset the counter for `ip` after a successful login.
    pub fn record_success(&self, ip: IpAddr) {
        if let Some(entry) = self.state.get(&ip) {
            let mut state = entry.lock();
            state.consecutive_failures = 0;
            state.blocked_until = None;
        }
    }

    /// Drop entries that are neither blocked nor recently failed, so the
    /// map doesn't grow unboundedly. Intended to be driven periodically
    /// by a background task.
    pub fn cleanup(&self) {
        let now = Instant::now();
        self.state.retain(|_, state| {
            let state = state.lock();
            state.consecutive_failures > 0 || state.blocked_until.map(|u| u > now).unwrap_or(false)
        });
    }

    pub fn spawn_cleanup(self: std::sync::Arc<Self>, interval: Duration) -> tokio::sync::watch::Sender<bool> {
        let (tx, rx) = tokio::sync::watch::channel(false);
        crate::shutdown::spawn_supervised("ratelimit-cleanup", move || {
            let limiter = self.clone();
            let mut rx = rx.clone();
            async move {
                let mut ticker = tokio::time::interval(interval);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => limiter.cleanup(),
                        _ = rx.changed() => {
                            if *rx.borrow() {
                                break;
                            }
                        }
                    }
                }
            }
        });
        tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn ip() -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1))
    }

    #[test]
    fn nth_consecutive_failure_blocks_the_ip() {
        let limiter = LoginRateLimiter::new(5, Duration::from_secs(60));
        for _ in 0..4 {
            limiter.record_failure(ip());
            assert!(limiter.check(ip()));
        }
        limiter.record_failure(ip());
        assert!(!limiter.check(ip()));
    }

    #[test]
    fn successful_login_resets_the_counter() {
        let limiter = LoginRateLimiter::new(3, Duration::from_secs(60));
        limiter.record_failure(ip());
        limiter.record_failure(ip());
        limiter.record_success(ip());
        limiter.record_failure(ip());
        limiter.record_failure(ip());
        assert!(limiter.check(ip()), "counter should have reset after success");
    }

    #[test]
    fn different_ips_are_independent() {
        let limiter = LoginRateLimiter::new(2, Duration::from_secs(60));
        let a = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1));
        let b = IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2));
        limiter.record_failure(a);
        limiter.record_failure(a);
        assert!(!limiter.check(a));
        assert!(limiter.check(b));
    }
}
