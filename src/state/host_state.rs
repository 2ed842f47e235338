use std::time::{Duration, Instant};

/// Tracks request spacing for one destination host
///
/// The scheduler keeps one of these per host and only dispatches a task once
/// the configured delay has elapsed since the previous request to that host,
/// regardless of how many workers are idle.
#[derive(Debug, Clone, Default)]
pub struct HostState {
    /// Number of requests dispatched to this host in the current run
    pub request_count: u64,

    /// When the last request to this host was dispatched
    pub last_request_time: Option<Instant>,
}

impl HostState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Checks if a request can be dispatched to this host now
    pub fn can_request(&self, delay: Duration, now: Instant) -> bool {
        self.time_until_next_request(delay, now).is_none()
    }

    /// Records that a request was dispatched to this host
    pub fn record_request(&mut self, now: Instant) {
        self.request_count += 1;
        self.last_request_time = Some(now);
    }

    /// Calculates the time until the next request can be dispatched
    ///
    /// Returns None if a request can be dispatched now.
    pub fn time_until_next_request(&self, delay: Duration, now: Instant) -> Option<Duration> {
        let last = self.last_request_time?;
        let elapsed = now.saturating_duration_since(last);
        if elapsed < delay {
            Some(delay - elapsed)
        } else {
            None
        }
    }
}
