use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use throttle_protocol::Opcode;
use throttle_timing::Nanos;

use crate::subscriptions::ConnectionId;

/// A connection-agnostic fan-out target. `throttle-server` implements this
/// for its socket-owning connection object; `throttle-store` never touches
/// a socket directly, keeping the pub/sub and registry logic transport-free.
pub trait Peer: Send + Sync {
    fn enqueue(&self, payload: Arc<Vec<u8>>);
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TransportKind {
    Tcp,
    Local,
}

/// Five accumulators tracked per connection: bytes read, written,
/// published, received (via subscriptions), and allocated for response
/// buffers — sized to land `ConnectionMeta`'s record at exactly 227 bytes.
#[derive(Default)]
pub struct ConnectionAccumulators {
    pub read_bytes: AtomicU64,
    pub write_bytes: AtomicU64,
    pub published_bytes: AtomicU64,
    pub received_bytes: AtomicU64,
    pub allocated_bytes: AtomicU64,
}

impl ConnectionAccumulators {
    pub fn snapshot(&self) -> [u64; 5] {
        [
            self.read_bytes.load(Ordering::Relaxed),
            self.write_bytes.load(Ordering::Relaxed),
            self.published_bytes.load(Ordering::Relaxed),
            self.received_bytes.load(Ordering::Relaxed),
            self.allocated_bytes.load(Ordering::Relaxed),
        ]
    }
}

#[derive(Default)]
pub struct OpcodeCounters {
    counts: [AtomicU64; 18],
}

impl OpcodeCounters {
    pub fn record(&self, opcode: Opcode) {
        if let Some(idx) = opcode.metered_index() {
            self.counts[idx].fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn snapshot(&self) -> [u64; 18] {
        std::array::from_fn(|i| self.counts[i].load(Ordering::Relaxed))
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| c.load(Ordering::Relaxed)).sum()
    }
}

pub struct ConnectionRecord {
    pub id: ConnectionId,
    pub kind: TransportKind,
    pub remote_ip: Option<IpAddr>,
    pub remote_port: u16,
    pub connected_at: Nanos,
    pub accumulators: ConnectionAccumulators,
    pub opcode_counters: OpcodeCounters,
    pub peer: Arc<dyn Peer>,
}

/// Map of connection id to live connection, with teardown semantics:
/// removal is the caller's cue to also call `Subscriptions::drop_all_for`.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Arc<ConnectionRecord>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: ConnectionRecord) -> Arc<ConnectionRecord> {
        let handle = Arc::new(record);
        self.connections.insert(handle.id, handle.clone());
        handle
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Arc<ConnectionRecord>> {
        self.connections.remove(&id)
    }

    pub fn get(&self, id: ConnectionId) -> Option<&Arc<ConnectionRecord>> {
        self.connections.get(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ConnectionRecord>> + '_ {
        self.connections.values()
    }
}
