// ── Update batcher / throttler ──
//
// Collects the ids of devices changed since the last notification and
// decides when the next notification is due. Holds no timers of its own:
// the engine loop sleeps until `due_at()` and then calls `take()`.
//
// Due time for a pending batch:
//
//   floor    = last_flush + throttle           (no floor before the first flush)
//   max_wait = floor                if the batch started before the floor
//              batch_start + throttle  otherwise
//   due      = max(floor, min(debounce_at, max_wait))
//
// So a quiet burst flushes one debounce window after its last update, a
// continuous stream still flushes once per throttle interval, and no
// two notifications are closer than the throttle.

use std::collections::BTreeSet;

use tokio::time::Instant;

use crate::config::BatchPolicy;

#[derive(Debug)]
pub(crate) struct UpdateBatcher {
    policy: BatchPolicy,
    pending: BTreeSet<String>,
    batch_started: Option<Instant>,
    debounce_at: Option<Instant>,
    last_flush: Option<Instant>,
}

impl UpdateBatcher {
    pub(crate) fn new(policy: BatchPolicy) -> Self {
        Self {
            policy,
            pending: BTreeSet::new(),
            batch_started: None,
            debounce_at: None,
            last_flush: None,
        }
    }

    /// Record a novel change to `device_id` and restart the debounce window.
    pub(crate) fn mark(&mut self, device_id: impl Into<String>, now: Instant) {
        self.pending.insert(device_id.into());
        self.batch_started.get_or_insert(now);
        self.debounce_at = Some(now + self.policy.debounce);
    }

    /// Restart the debounce window for a repeated update that changed
    /// nothing. No-op when nothing is pending.
    pub(crate) fn touch(&mut self, now: Instant) {
        if self.has_pending() {
            self.debounce_at = Some(now + self.policy.debounce);
        }
    }

    pub(crate) fn mark_all<I>(&mut self, device_ids: I, now: Instant)
    where
        I: IntoIterator<Item = String>,
    {
        for id in device_ids {
            self.mark(id, now);
        }
    }

    pub(crate) fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// When the pending batch should be flushed, or `None` if nothing is pending.
    pub(crate) fn due_at(&self) -> Option<Instant> {
        if self.pending.is_empty() {
            return None;
        }
        let debounce_at = self.debounce_at?;
        let started = self.batch_started.unwrap_or(debounce_at);
        let floor = self.last_flush.map(|t| t + self.policy.throttle);

        let max_wait = match floor {
            Some(floor) if started < floor => floor,
            _ => started + self.policy.throttle,
        };
        let due = debounce_at.min(max_wait);
        Some(floor.map_or(due, |floor| due.max(floor)))
    }

    /// Drain the pending ids if the batch is due at `now`.
    pub(crate) fn take(&mut self, now: Instant) -> Option<Vec<String>> {
        if self.due_at()? > now {
            return None;
        }
        Some(self.drain(now))
    }

    /// Drain the pending ids regardless of the throttle floor. Used for
    /// teardown evictions, which must reach observers right away.
    pub(crate) fn take_now(&mut self, now: Instant) -> Option<Vec<String>> {
        self.has_pending().then(|| self.drain(now))
    }

    /// Forget pending ids and timers. The throttle floor is kept.
    pub(crate) fn cancel(&mut self) {
        self.pending.clear();
        self.batch_started = None;
        self.debounce_at = None;
    }

    fn drain(&mut self, now: Instant) -> Vec<String> {
        self.batch_started = None;
        self.debounce_at = None;
        self.last_flush = Some(now);
        std::mem::take(&mut self.pending).into_iter().collect()
    }
}
