use std::sync::atomic::{AtomicU64, Ordering};

use tracing::debug;

/// Latest-request-wins guard for overlapping fetches.
///
/// Every fetch takes a ticket before it starts. When results arrive, only the
/// most recently issued ticket is accepted; older results are dropped. The
/// requests themselves are not cancelled.
#[derive(Debug, Default)]
pub struct RequestGate {
    latest: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RequestTicket(u64);

impl RequestTicket {
    pub fn generation(self) -> u64 {
        self.0
    }
}

impl RequestGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin(&self) -> RequestTicket {
        let generation = self.latest.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(generation, "issued request ticket");
        RequestTicket(generation)
    }

    /// Makes every outstanding ticket stale without issuing a new one.
    pub fn invalidate(&self) {
        self.latest.fetch_add(1, Ordering::AcqRel);
    }

    pub fn is_current(&self, ticket: RequestTicket) -> bool {
        self.latest.load(Ordering::Acquire) == ticket.0
    }

    /// Passes `value` through only for the current ticket.
    pub fn accept<T>(&self, ticket: RequestTicket, value: T) -> Option<T> {
        if self.is_current(ticket) {
            Some(value)
        } else {
            debug!(
                generation = ticket.0,
                latest = self.latest.load(Ordering::Acquire),
                "discarding stale response"
            );
            None
        }
    }
}
