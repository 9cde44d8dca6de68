//! Per-address connection rate limiter.
//!
//! Counts connection attempts per source IP in a fixed window. Once the
//! ceiling is hit, further attempts are refused until the window resets.
//! Independent of session state.

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    attempts: u32,
}

#[derive(Debug)]
pub struct ConnectionRateLimiter {
    /// Attempts allowed per window.
    max_attempts: u32,
    window: Duration,
    entries: HashMap<IpAddr, Window>,
}

impl ConnectionRateLimiter {
    pub fn new(max_attempts: u32, window: Duration) -> Self {
        Self {
            max_attempts,
            window,
            entries: HashMap::new(),
        }
    }

    /// Record an attempt from `addr` and report whether it is allowed.
    pub fn check_and_record(&mut self, addr: IpAddr, now: Instant) -> bool {
        let window = self.window;
        let entry = self.entries.entry(addr).or_insert(Window {
            started: now,
            attempts: 0,
        });

        if now.duration_since(entry.started) >= window {
            entry.started = now;
            entry.attempts = 0;
        }

        if entry.attempts >= self.max_attempts {
            return false;
        }
        entry.attempts += 1;
        true
    }

    /// Drop windows that have already reset, to bound memory.
    pub fn gc(&mut self, now: Instant) {
        let window = self.window;
        self.entries
            .retain(|_, w| now.duration_since(w.started) < window);
    }

    /// Number of addresses currently tracked.
    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.entries.len()
    }
}
