use throttle_timing::{Duration, Nanos};

use crate::storage::Storage;

/// The grace window between marking an entry expired and physically
/// erasing it — lets a reader observe "expired" rather than a dangling key.
pub const GRACE: Duration = Duration::from_secs(10);

/// Single-timer coalescing garbage collector. Holds only the next wake-up
/// instant; the reactor (or a test) is responsible for actually waiting
/// and calling `sweep` when it fires.
#[derive(Default)]
pub struct ExpirationScheduler {
    armed_at: Option<Nanos>,
}

pub struct SweepReport {
    pub marked: usize,
    pub erased: usize,
    pub next_wakeup: Option<Nanos>,
}

impl ExpirationScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn armed_at(&self) -> Option<Nanos> {
        self.armed_at
    }

    /// Idempotent under repeated posts: only tightens the timer to an
    /// earlier instant, never pushes it later or compounds duplicate posts.
    pub fn schedule(&mut self, at: Nanos) {
        self.armed_at = Some(match self.armed_at {
            Some(current) if current <= at => current,
            _ => at,
        });
    }

    pub fn clear(&mut self) {
        self.armed_at = None;
    }

    pub fn due(&self, now: Nanos) -> bool {
        matches!(self.armed_at, Some(at) if at <= now)
    }

    /// Runs one mark-then-sweep pass and re-arms at the result's
    /// `next_wakeup`, if any.
    pub fn sweep(&mut self, storage: &mut Storage, now: Nanos) -> SweepReport {
        let mut to_mark = Vec::new();
        let mut to_erase = Vec::new();

        for entry in storage.iter() {
            if !entry.is_expired() {
                if entry.expires_at() <= now {
                    to_mark.push(entry.key.clone());
                }
            } else if now.saturating_sub(entry.expires_at()) > GRACE.into() {
                to_erase.push(entry.key.clone());
            }
        }

        for key in &to_mark {
            if let Some(entry) = storage.find_by_key(key) {
                entry.mark_expired();
            }
        }

        for key in &to_erase {
            storage.erase(key);
        }

        let next_wakeup = next_wakeup(storage);
        self.armed_at = next_wakeup;

        SweepReport { marked: to_mark.len(), erased: to_erase.len(), next_wakeup }
    }

    /// Recomputes `armed_at` from scratch rather than just tightening it.
    /// Needed when a handler changes the `expires_at` of the entry that was
    /// the scheduler's own current target — `schedule` alone can only make
    /// the timer fire earlier, never later.
    pub fn recompute_from(&mut self, storage: &Storage) {
        self.armed_at = next_wakeup(storage);
    }
}

fn next_wakeup(storage: &Storage) -> Option<Nanos> {
    storage
        .iter()
        .map(|e| if e.is_expired() { e.expires_at() + GRACE.into() } else { e.expires_at() })
        .min()
}

#[cfg(test)]
mod tests {
    use throttle_timing::TtlUnit;

    use super::*;
    use crate::entry::Entry;

    #[test]
    fn marks_then_erases_after_grace() {
        let mut storage = Storage::new();
        storage.insert(Entry::new_counter(b"k".to_vec(), 0, TtlUnit::Seconds, Nanos(100)));
        let mut sched = ExpirationScheduler::new();

        let report = sched.sweep(&mut storage, Nanos(100));
        assert_eq!(report.marked, 1);
        assert_eq!(report.erased, 0);
        assert!(storage.find_by_key(b"k").unwrap().is_expired());

        let past_grace = Nanos(100) + GRACE.into() + Duration::from_secs(1).into();
        let report = sched.sweep(&mut storage, past_grace);
        assert_eq!(report.erased, 1);
        assert!(storage.find_by_key(b"k").is_none());
    }

    #[test]
    fn schedule_only_tightens_never_loosens() {
        let mut sched = ExpirationScheduler::new();
        sched.schedule(Nanos(100));
        sched.schedule(Nanos(200));
        assert_eq!(sched.armed_at(), Some(Nanos(100)));
        sched.schedule(Nanos(50));
        assert_eq!(sched.armed_at(), Some(Nanos(50)));
    }
}
