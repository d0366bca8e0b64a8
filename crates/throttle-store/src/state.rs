use std::path::Path;
use std::sync::Mutex;

use rand::RngCore;
use throttle_protocol::{InfoSnapshot, Opcode};
use throttle_timing::{Nanos, Repeater};

use crate::connection_registry::ConnectionRegistry;
use crate::persistence::{self, PersistenceError};
use crate::scheduler::ExpirationScheduler;
use crate::server_metrics::{RolledOpcodeCounters, ServerMetrics};
use crate::storage::Storage;
use crate::subscriptions::Subscriptions;

/// Storage and the expiration scheduler are mutated together under one
/// lock: this is the "single serialization strand" the concurrency model
/// calls for, modeled here as a coarse-grained mutex rather than an actual
/// executor strand.
#[derive(Default)]
pub struct StorageState {
    pub storage: Storage,
    pub scheduler: ExpirationScheduler,
}

/// The root object: owns storage, the two registries, and the shared
/// dispatch-adjacent counters the `info` snapshot reports. Lock order when
/// both are needed is `connections` before `subscriptions`, per the
/// concurrency model.
pub struct State {
    pub storage: Mutex<StorageState>,
    pub connections: Mutex<ConnectionRegistry>,
    pub subscriptions: Mutex<Subscriptions>,
    pub metrics: ServerMetrics,
    pub opcode_counters: RolledOpcodeCounters,
    pub rollup: Mutex<Repeater>,
    pub started_at: Nanos,
    pub version: [u8; 16],
}

impl Default for State {
    fn default() -> Self {
        Self::new()
    }
}

impl State {
    pub fn new() -> Self {
        State {
            storage: Mutex::new(StorageState::default()),
            connections: Mutex::new(ConnectionRegistry::new()),
            subscriptions: Mutex::new(Subscriptions::new()),
            metrics: ServerMetrics::default(),
            opcode_counters: RolledOpcodeCounters::default(),
            rollup: Mutex::new(Repeater::every(throttle_timing::Duration::from_secs(60))),
            started_at: Nanos::now(),
            version: version_bytes(),
        }
    }

    pub fn generate_connection_id(&self) -> [u8; 16] {
        let mut id = [0u8; 16];
        rand::rng().fill_bytes(&mut id);
        id
    }

    pub fn record_request(&self, opcode: Opcode) {
        self.metrics.requests.add(1);
        self.opcode_counters.record(opcode);
    }

    /// Called from the reactor's idle tick; rolls metrics into their
    /// per-minute fields at most once a minute.
    pub fn roll_metrics_if_due(&self) {
        let mut repeater = self.rollup.lock().expect("rollup mutex poisoned");
        if repeater.fired() {
            self.metrics.roll_minute();
            self.opcode_counters.roll_minute();
            let storage = self.storage.lock().expect("storage mutex poisoned");
            for entry in storage.storage.iter() {
                entry.metrics.roll_minute();
            }
        }
    }

    pub fn info_snapshot(&self) -> InfoSnapshot {
        let (requests_total, requests_per_minute) = self.metrics.requests.pair();
        let opcode_pairs = self.opcode_counters.pairs();

        let storage = self.storage.lock().expect("storage mutex poisoned");
        let entries_total = storage.storage.len() as u64;
        let entries_counters =
            storage.storage.iter().filter(|e| e.kind == crate::entry::EntryKind::Counter).count() as u64;
        let entries_raw = entries_total - entries_counters;
        let bytes_used: u64 = storage
            .storage
            .iter()
            .filter(|e| e.kind == crate::entry::EntryKind::Raw)
            .map(|e| e.value_bytes().len() as u64)
            .sum();
        let expired_pending_erase = storage.storage.iter().filter(|e| e.is_expired()).count() as u64;
        drop(storage);

        let subscriptions = self.subscriptions.lock().expect("subscriptions mutex poisoned");
        let pubsub_totals =
            [subscriptions.total_channels() as u64, subscriptions.total_subscriptions() as u64];
        drop(subscriptions);

        let connection_count = self.connections.lock().expect("connections mutex poisoned").len() as u64;

        InfoSnapshot {
            now_nanos: Nanos::now().0,
            requests_total,
            requests_per_minute,
            opcode_pairs,
            network_pairs: self.metrics.network_pairs(),
            storage_totals: [entries_total, entries_counters, entries_raw, bytes_used, expired_pending_erase],
            pubsub_totals,
            started_at_nanos: self.started_at.0,
            connection_count,
            version: self.version,
        }
    }

    pub fn dump(&self, path: &Path) -> Result<(), PersistenceError> {
        let storage = self.storage.lock().expect("storage mutex poisoned");
        persistence::dump(&storage.storage, path)
    }

    pub fn restore(&self, path: &Path) -> Result<(), PersistenceError> {
        let restored = persistence::restore(path)?;
        let mut storage = self.storage.lock().expect("storage mutex poisoned");
        storage.storage = restored;
        Ok(())
    }
}

fn version_bytes() -> [u8; 16] {
    let mut out = [0u8; 16];
    let v = env!("CARGO_PKG_VERSION").as_bytes();
    let n = v.len().min(out.len());
    out[..n].copy_from_slice(&v[..n]);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_state_has_no_connections_or_entries() {
        let state = State::new();
        let snapshot = state.info_snapshot();
        assert_eq!(snapshot.connection_count, 0);
        assert_eq!(snapshot.storage_totals[0], 0);
    }

    #[test]
    fn generated_connection_ids_differ() {
        let state = State::new();
        assert_ne!(state.generate_connection_id(), state.generate_connection_id());
    }
}
