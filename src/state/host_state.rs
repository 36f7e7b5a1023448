use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// Tracks the politeness state of one host during crawling
///
/// The scheduler keeps one of these per host behind a mutex. Request slots are
/// handed out in order: each reservation pushes the next allowed request time
/// forward by the requested spacing, so concurrent callers never share a slot.
#[derive(Debug)]
pub struct HostState {
    /// Caps the number of in-flight requests to this host
    permits: Arc<Semaphore>,

    /// Earliest time the next request may be sent
    next_request_at: Option<Instant>,

    /// Number of requests reserved against this host
    pub request_count: u64,

    /// Number of times the host asked us to back off (Retry-After)
    pub deferrals: u64,
}

impl HostState {
    /// Creates a HostState allowing `max_in_flight` concurrent requests
    pub fn new(max_in_flight: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(max_in_flight.max(1))),
            next_request_at: None,
            request_count: 0,
            deferrals: 0,
        }
    }

    /// Semaphore capping in-flight requests to this host
    pub fn permits(&self) -> Arc<Semaphore> {
        Arc::clone(&self.permits)
    }

    /// Reserves the next request slot
    ///
    /// Returns the instant at which the caller may send its request (never earlier
    /// than `now`). The slot after it opens `spacing` later.
    pub fn reserve(&mut self, now: Instant, spacing: Duration) -> Instant {
        let at = match self.next_request_at {
            Some(next) if next > now => next,
            _ => now,
        };
        self.next_request_at = Some(at + spacing);
        self.request_count += 1;
        at
    }

    /// Holds every request to this host until `until`
    ///
    /// Used when the server answers with Retry-After. An earlier deadline never
    /// shortens a later one.
    pub fn defer_until(&mut self, until: Instant) {
        if self.next_request_at.map_or(true, |next| next < until) {
            self.next_request_at = Some(until);
        }
        self.deferrals += 1;
    }
}
