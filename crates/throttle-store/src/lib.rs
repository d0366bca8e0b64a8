mod connection_registry;
mod entry;
mod persistence;
mod scheduler;
mod server_metrics;
mod state;
mod storage;
mod subscriptions;

pub use connection_registry::{
    ConnectionAccumulators, ConnectionRecord, ConnectionRegistry, OpcodeCounters, Peer, TransportKind,
};
pub use entry::{Entry, EntryKind, EntryMetrics};
pub use persistence::{PersistenceError, dump, restore};
pub use scheduler::{ExpirationScheduler, GRACE, SweepReport};
pub use server_metrics::{RolledCounter, RolledOpcodeCounters, ServerMetrics};
pub use state::{State, StorageState};
pub use storage::Storage;
pub use subscriptions::{ConnectionId, Subscription, SubscriptionMetrics, Subscriptions};
