use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use throttle_timing::{Nanos, TtlUnit};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum EntryKind {
    Counter,
    Raw,
}

impl EntryKind {
    pub const fn as_u8(self) -> u8 {
        match self {
            EntryKind::Counter => 0,
            EntryKind::Raw => 1,
        }
    }
}

/// Windowed and lifetime read/write counters for one entry. "Windowed"
/// counters accumulate since the last roll-up; `roll_minute` folds them
/// into the per-minute fields the `stat`/`stats`/`list` handlers report.
#[derive(Default)]
pub struct EntryMetrics {
    pub reads: AtomicU64,
    pub writes: AtomicU64,
    pub reads_accumulator: AtomicU64,
    pub writes_accumulator: AtomicU64,
    pub reads_per_minute: AtomicU64,
    pub writes_per_minute: AtomicU64,
}

impl EntryMetrics {
    pub fn record_read(&self) {
        self.reads.fetch_add(1, Ordering::Relaxed);
        self.reads_accumulator.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
        self.writes_accumulator.fetch_add(1, Ordering::Relaxed);
    }

    /// Moves the windowed counters into `*_per_minute` and resets the window.
    pub fn roll_minute(&self) {
        let reads = self.reads.swap(0, Ordering::Relaxed);
        let writes = self.writes.swap(0, Ordering::Relaxed);
        self.reads_per_minute.store(reads, Ordering::Relaxed);
        self.writes_per_minute.store(writes, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> (u64, u64, u64, u64) {
        (
            self.reads_per_minute.load(Ordering::Relaxed),
            self.writes_per_minute.load(Ordering::Relaxed),
            self.reads_accumulator.load(Ordering::Relaxed),
            self.writes_accumulator.load(Ordering::Relaxed),
        )
    }
}

/// One stored record. Counter entries keep their value in `counter`
/// (widened to 64 bits internally regardless of the wire's `V` width,
/// truncated back to `V` bytes on response encoding); raw entries keep
/// theirs behind a rebindable, reference-counted buffer so buffer-pool
/// recycling and in-flight reads don't race.
pub struct Entry {
    pub key: Vec<u8>,
    pub kind: EntryKind,
    pub counter: AtomicU64,
    pub value: std::sync::RwLock<Arc<Vec<u8>>>,
    pub ttl_unit: TtlUnit,
    pub expires_at: AtomicU64,
    pub expired: AtomicBool,
    pub metrics: EntryMetrics,
}

impl Entry {
    pub fn new_counter(key: Vec<u8>, quota: u64, ttl_unit: TtlUnit, expires_at: Nanos) -> Self {
        Entry {
            key,
            kind: EntryKind::Counter,
            counter: AtomicU64::new(quota),
            value: std::sync::RwLock::new(Arc::new(Vec::new())),
            ttl_unit,
            expires_at: AtomicU64::new(expires_at.0),
            expired: AtomicBool::new(false),
            metrics: EntryMetrics::default(),
        }
    }

    pub fn new_raw(key: Vec<u8>, value: Vec<u8>, ttl_unit: TtlUnit, expires_at: Nanos) -> Self {
        Entry {
            key,
            kind: EntryKind::Raw,
            counter: AtomicU64::new(0),
            value: std::sync::RwLock::new(Arc::new(value)),
            ttl_unit,
            expires_at: AtomicU64::new(expires_at.0),
            expired: AtomicBool::new(false),
            metrics: EntryMetrics::default(),
        }
    }

    pub fn expires_at(&self) -> Nanos {
        Nanos(self.expires_at.load(Ordering::Relaxed))
    }

    pub fn set_expires_at(&self, at: Nanos) {
        self.expires_at.store(at.0, Ordering::Relaxed);
    }

    pub fn is_expired(&self) -> bool {
        self.expired.load(Ordering::Relaxed)
    }

    pub fn mark_expired(&self) {
        self.expired.store(true, Ordering::Relaxed);
    }

    pub fn value_bytes(&self) -> Arc<Vec<u8>> {
        self.value.read().expect("entry value lock poisoned").clone()
    }

    pub fn set_value_bytes(&self, bytes: Vec<u8>) {
        *self.value.write().expect("entry value lock poisoned") = Arc::new(bytes);
    }
}
