use std::time::Duration;

use tokio::time::Instant;

/// At most one flush per interval.
///
/// The first mutation after a flush schedules the next one `interval` later;
/// further mutations before it fires ride along instead of pushing it back.
/// Pending state is flushed unconditionally on shutdown.
#[derive(Debug)]
pub(crate) struct WriteCoalescer {
    interval: Duration,
    scheduled: Option<Instant>,
}

impl WriteCoalescer {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            interval,
            scheduled: None,
        }
    }

    pub(crate) fn set_interval(&mut self, interval: Duration) {
        self.interval = interval;
    }

    /// Note a mutation. Returns the deadline when a new flush must be armed.
    pub(crate) fn mark_dirty(&mut self, now: Instant) -> Option<Instant> {
        if self.scheduled.is_some() {
            return None;
        }
        let at = now + self.interval;
        self.scheduled = Some(at);
        Some(at)
    }

    #[cfg(test)]
    pub(crate) fn is_pending(&self) -> bool {
        self.scheduled.is_some()
    }

    #[cfg(test)]
    pub(crate) fn is_due(&self, now: Instant) -> bool {
        self.scheduled.is_some_and(|at| now >= at)
    }

    pub(crate) fn flushed(&mut self) {
        self.scheduled = None;
    }
}
