use std::sync::atomic::{AtomicU64, Ordering};

use throttle_protocol::Opcode;

/// A windowed counter rolled into a per-minute snapshot, the same shape
/// `EntryMetrics` uses for per-entry reads/writes, reused here for the
/// server-wide request count and the four network byte accumulators.
#[derive(Default)]
pub struct RolledCounter {
    window: AtomicU64,
    per_minute: AtomicU64,
    total: AtomicU64,
}

impl RolledCounter {
    pub fn add(&self, n: u64) {
        self.window.fetch_add(n, Ordering::Relaxed);
        self.total.fetch_add(n, Ordering::Relaxed);
    }

    pub fn roll_minute(&self) {
        let window = self.window.swap(0, Ordering::Relaxed);
        self.per_minute.store(window, Ordering::Relaxed);
    }

    pub fn pair(&self) -> (u64, u64) {
        (self.total.load(Ordering::Relaxed), self.per_minute.load(Ordering::Relaxed))
    }
}

#[derive(Default)]
pub struct ServerMetrics {
    pub requests: RolledCounter,
    pub read_bytes: RolledCounter,
    pub write_bytes: RolledCounter,
    pub published_bytes: RolledCounter,
    pub received_bytes: RolledCounter,
}

impl ServerMetrics {
    pub fn roll_minute(&self) {
        self.requests.roll_minute();
        self.read_bytes.roll_minute();
        self.write_bytes.roll_minute();
        self.published_bytes.roll_minute();
        self.received_bytes.roll_minute();
    }

    pub fn network_pairs(&self) -> [(u64, u64); 4] {
        [self.read_bytes.pair(), self.write_bytes.pair(), self.published_bytes.pair(), self.received_bytes.pair()]
    }
}

/// Server-wide per-opcode `(total, per_minute)` counters for the `info`
/// snapshot, one `RolledCounter` per entry of `Opcode::METERED`.
pub struct RolledOpcodeCounters {
    counters: [RolledCounter; 18],
}

impl Default for RolledOpcodeCounters {
    fn default() -> Self {
        RolledOpcodeCounters { counters: std::array::from_fn(|_| RolledCounter::default()) }
    }
}

impl RolledOpcodeCounters {
    pub fn record(&self, opcode: Opcode) {
        if let Some(idx) = opcode.metered_index() {
            self.counters[idx].add(1);
        }
    }

    pub fn roll_minute(&self) {
        for counter in &self.counters {
            counter.roll_minute();
        }
    }

    pub fn pairs(&self) -> [(u64, u64); 18] {
        std::array::from_fn(|i| self.counters[i].pair())
    }
}
