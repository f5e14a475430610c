//! Fixed-window rate limiting for login attempts.
//!
//! Windows are keyed by username and client address; a successful login
//! clears every window for that username. Lapsed windows are swept on the
//! next attempt, whichever key it lands on.

use std::net::IpAddr;
use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::config::LoginRateLimitSettings;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AttemptKey {
    username: String,
    client: IpAddr,
}

pub struct LoginRateLimiter {
    window: Duration,
    max_attempts: u32,
    attempts: DashMap<AttemptKey, WindowState>,
}

#[derive(Clone, Copy)]
struct WindowState {
    started: Instant,
    count: u32,
}

impl LoginRateLimiter {
    pub fn new(settings: &LoginRateLimitSettings) -> Self {
        Self {
            window: Duration::from_secs(u64::from(settings.window_seconds.get())),
            max_attempts: settings.max_attempts.get(),
            attempts: DashMap::new(),
        }
    }

    /// Record an attempt for `username` from `client` and report whether it
    /// is still allowed.
    pub fn allow(&self, username: &str, client: IpAddr) -> bool {
        self.allow_at(username, client, Instant::now())
    }

    pub fn allow_at(&self, username: &str, client: IpAddr, now: Instant) -> bool {
        self.sweep_expired(now);
        let key = AttemptKey {
            username: username.to_string(),
            client,
        };
        let mut entry = self.attempts.entry(key).or_insert(WindowState {
            started: now,
            count: 0,
        });
        if now.duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }
        entry.count += 1;
        entry.count <= self.max_attempts
    }

    /// Forget every window for `username`, e.g. after a successful login.
    pub fn reset(&self, username: &str) {
        self.attempts.retain(|key, _| key.username != username);
    }

    /// Drop windows whose period has lapsed so the map does not accumulate
    /// one entry per attempted username forever.
    fn sweep_expired(&self, now: Instant) {
        self.attempts
            .retain(|_, state| now.duration_since(state.started) < self.window);
    }

    #[cfg(test)]
    fn tracked_windows(&self) -> usize {
        self.attempts.len()
    }
}
