//! Per-session gates for `play` commands and ready notifications.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

#[derive(Debug)]
pub struct CommandDebouncer {
    play_interval: Duration,
    ready_window: Duration,
    last_play: HashMap<String, Instant>,
    last_all_ready: HashMap<String, Instant>,
}

impl CommandDebouncer {
    pub fn new(play_interval: Duration, ready_window: Duration) -> Self {
        Self {
            play_interval,
            ready_window,
            last_play: HashMap::new(),
            last_all_ready: HashMap::new(),
        }
    }

    /// Accept a `play` unless the last accepted one was less than the
    /// minimum interval ago.
    pub fn allow_play(&mut self, session: &str, now: Instant) -> bool {
        gate(&mut self.last_play, session, now, self.play_interval)
    }

    /// Accept an `all-clients-ready` notification unless one was sent within
    /// the de-duplication window.
    pub fn allow_all_ready(&mut self, session: &str, now: Instant) -> bool {
        gate(&mut self.last_all_ready, session, now, self.ready_window)
    }

    /// Note an `all-clients-ready` that went out without passing the gate.
    pub fn record_all_ready(&mut self, session: &str, now: Instant) {
        self.last_all_ready.insert(session.to_string(), now);
    }

    /// Forget everything about a session.
    pub fn forget(&mut self, session: &str) {
        self.last_play.remove(session);
        self.last_all_ready.remove(session);
    }

    pub fn clear(&mut self) {
        self.last_play.clear();
        self.last_all_ready.clear();
    }
}

fn gate(last: &mut HashMap<String, Instant>, session: &str, now: Instant, min: Duration) -> bool {
    if let Some(prev) = last.get(session) {
        if now.duration_since(*prev) < min {
            return false;
        }
    }
    last.insert(session.to_string(), now);
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn debouncer() -> CommandDebouncer {
        CommandDebouncer::new(Duration::from_millis(50), Duration::from_secs(1))
    }

    #[test]
    fn burst_of_plays_lets_one_through() {
        let mut d = debouncer();
        let t0 = Instant::now();
        let accepted = (0..5)
            .filter(|i| d.allow_play("ABC1", t0 + Duration::from_millis(*i * 5)))
            .count();
        assert_eq!(accepted, 1);
    }

    #[test]
    fn spaced_plays_all_pass() {
        let mut d = debouncer();
        let t0 = Instant::now();
        for i in 0..4 {
            assert!(d.allow_play("ABC1", t0 + Duration::from_millis(i * 60)));
        }
    }

    #[test]
    fn rejected_play_does_not_extend_window() {
        let mut d = debouncer();
        let t0 = Instant::now();
        assert!(d.allow_play("ABC1", t0));
        assert!(!d.allow_play("ABC1", t0 + Duration::from_millis(40)));
        assert!(d.allow_play("ABC1", t0 + Duration::from_millis(50)));
    }

    #[test]
    fn sessions_are_independent() {
        let mut d = debouncer();
        let t0 = Instant::now();
        assert!(d.allow_play("ABC1", t0));
        assert!(d.allow_play("XYZ9", t0));
    }

    #[test]
    fn forget_resets_gates() {
        let mut d = debouncer();
        let t0 = Instant::now();
        assert!(d.allow_all_ready("ABC1", t0));
        assert!(!d.allow_all_ready("ABC1", t0 + Duration::from_millis(500)));
        d.forget("ABC1");
        assert!(d.allow_all_ready("ABC1", t0 + Duration::from_millis(500)));
    }

    #[test]
    fn recorded_ready_opens_a_new_window() {
        let mut d = debouncer();
        let t0 = Instant::now();
        d.record_all_ready("ABC1", t0);
        assert!(!d.allow_all_ready("ABC1", t0 + Duration::from_millis(999)));
        assert!(d.allow_all_ready("ABC1", t0 + Duration::from_secs(1)));
    }
}
