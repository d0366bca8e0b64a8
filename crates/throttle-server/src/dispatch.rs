use std::net::IpAddr;
use std::sync::Arc;
use std::sync::atomic::Ordering::Relaxed;

use throttle_protocol::{
    Attribute, ChannelMeta, Change, ConnectionMeta, ListEntryMeta, Opcode, STATUS_FAIL, STATUS_OK, StatsEntryMeta, V,
    fragment_channels, fragment_connections, fragment_list, fragment_stats, write_connection_record,
    write_info_snapshot, write_v,
};
use throttle_store::{ConnectionId, ConnectionRecord, Entry, EntryKind, State};
use throttle_timing::{Duration, Nanos, TtlUnit};

/// Runs one request against shared state and returns the bytes to write
/// back to the requesting connection. Side effects on other connections
/// (publish fan-out) go through `ConnectionRecord::peer`, not the return
/// value.
pub fn dispatch(state: &State, conn_id: ConnectionId, request: throttle_protocol::Request) -> Vec<u8> {
    use throttle_protocol::Request as R;
    match request {
        R::Insert { quota, ttl_unit, ttl, key } => handle_insert(state, quota, ttl_unit, ttl, key),
        R::Query { key } => handle_query(state, key),
        R::Update { attribute, change, value, ttl_unit, key } => {
            handle_update(state, attribute, change, value, ttl_unit, key)
        }
        R::Purge { key } => handle_purge(state, key),
        R::Set { ttl_unit, ttl, key, value } => handle_set(state, ttl_unit, ttl, key, value),
        R::Get { key } => handle_get(state, key),
        R::List => handle_list(state),
        R::Info => handle_info(state),
        R::Stat { key } => handle_stat(state, key),
        R::Stats => handle_stats(state),
        R::Subscribe { channel } => handle_subscribe(state, conn_id, channel),
        R::Unsubscribe { channel } => handle_unsubscribe(state, conn_id, channel),
        R::Publish { channel, value } => handle_publish(state, conn_id, channel, value),
        R::Channel { channel } => handle_channel(state, channel),
        R::Channels => handle_channels(state),
        R::Whoami => handle_whoami(conn_id),
        R::Connection { id } => handle_connection(state, id),
        R::Connections => handle_connections(state),
        R::Event { .. } => vec![STATUS_FAIL],
    }
}

fn remaining_ttl(expires_at: Nanos, now: Nanos, unit: TtlUnit) -> V {
    let remaining = expires_at.saturating_sub(now);
    let unit_nanos = Duration::from_ttl_units(1, unit).as_nanos().max(1);
    (remaining.0 / unit_nanos) as V
}

fn handle_insert(state: &State, quota: V, ttl_unit: TtlUnit, ttl: V, key: &[u8]) -> Vec<u8> {
    let now = Nanos::now();
    let expires_at = now + Nanos::from(Duration::from_ttl_units(ttl as u64, ttl_unit));
    let entry = Entry::new_counter(key.to_vec(), quota as u64, ttl_unit, expires_at);

    let mut guard = state.storage.lock().expect("storage mutex poisoned");
    match guard.storage.insert(entry) {
        Some(_) => {
            guard.scheduler.schedule(expires_at);
            vec![STATUS_OK]
        }
        None => vec![STATUS_FAIL],
    }
}

fn handle_set(state: &State, ttl_unit: TtlUnit, ttl: V, key: &[u8], value: &[u8]) -> Vec<u8> {
    let now = Nanos::now();
    let expires_at = now + Nanos::from(Duration::from_ttl_units(ttl as u64, ttl_unit));
    let entry = Entry::new_raw(key.to_vec(), value.to_vec(), ttl_unit, expires_at);

    let mut guard = state.storage.lock().expect("storage mutex poisoned");
    match guard.storage.insert(entry) {
        Some(_) => {
            guard.scheduler.schedule(expires_at);
            vec![STATUS_OK]
        }
        None => vec![STATUS_FAIL],
    }
}

fn handle_query(state: &State, key: &[u8]) -> Vec<u8> {
    let now = Nanos::now();
    let guard = state.storage.lock().expect("storage mutex poisoned");
    match guard.storage.find_by_key(key) {
        Some(entry) if !entry.is_expired() && entry.kind == EntryKind::Counter => {
            entry.metrics.record_read();
            let mut out = vec![STATUS_OK];
            write_v(entry.counter.load(Relaxed) as V, &mut out);
            out.push(entry.ttl_unit.as_u8());
            write_v(remaining_ttl(entry.expires_at(), now, entry.ttl_unit), &mut out);
            out
        }
        _ => vec![STATUS_FAIL],
    }
}

fn handle_get(state: &State, key: &[u8]) -> Vec<u8> {
    let now = Nanos::now();
    let guard = state.storage.lock().expect("storage mutex poisoned");
    match guard.storage.find_by_key(key) {
        Some(entry) if !entry.is_expired() && entry.kind == EntryKind::Raw => {
            entry.metrics.record_read();
            let mut out = vec![STATUS_OK];
            out.push(entry.ttl_unit.as_u8());
            write_v(remaining_ttl(entry.expires_at(), now, entry.ttl_unit), &mut out);
            let bytes = entry.value_bytes();
            write_v(bytes.len() as V, &mut out);
            out.extend_from_slice(&bytes);
            out
        }
        _ => vec![STATUS_FAIL],
    }
}

fn handle_update(
    state: &State,
    attribute: Attribute,
    change: Change,
    value: V,
    ttl_unit: TtlUnit,
    key: &[u8],
) -> Vec<u8> {
    let now = Nanos::now();
    let mut guard = state.storage.lock().expect("storage mutex poisoned");
    let Some(entry) = guard.storage.find_by_key(key).cloned() else {
        return vec![STATUS_FAIL];
    };
    if entry.is_expired() {
        return vec![STATUS_FAIL];
    }

    match attribute {
        Attribute::Quota => {
            if entry.kind != EntryKind::Counter {
                return vec![STATUS_FAIL];
            }
            match change {
                Change::Patch => entry.counter.store(value as u64, Relaxed),
                Change::Increase => {
                    entry.counter.fetch_add(value as u64, Relaxed);
                }
                Change::Decrease => {
                    let current = entry.counter.load(Relaxed);
                    if current < value as u64 {
                        return vec![STATUS_FAIL];
                    }
                    entry.counter.fetch_sub(value as u64, Relaxed);
                }
            }
            entry.metrics.record_write();
            vec![STATUS_OK]
        }
        Attribute::Ttl => {
            let delta = Nanos::from(Duration::from_ttl_units(value as u64, ttl_unit));
            let old_at = entry.expires_at();
            let new_at = match change {
                Change::Patch => now + delta,
                Change::Increase => old_at + delta,
                Change::Decrease => old_at.saturating_sub(delta),
            };
            entry.set_expires_at(new_at);
            guard.storage.reschedule(key, old_at, new_at);
            let retarget = guard.scheduler.armed_at() == Some(old_at);
            let throttle_store::StorageState { storage, scheduler } = &mut *guard;
            if retarget {
                scheduler.recompute_from(storage);
            } else {
                scheduler.schedule(new_at);
            }
            entry.metrics.record_write();
            vec![STATUS_OK]
        }
    }
}

fn handle_purge(state: &State, key: &[u8]) -> Vec<u8> {
    let mut guard = state.storage.lock().expect("storage mutex poisoned");
    match guard.storage.find_by_key(key) {
        Some(entry) if !entry.is_expired() => {
            guard.storage.erase(key);
            vec![STATUS_OK]
        }
        _ => vec![STATUS_FAIL],
    }
}

fn handle_list(state: &State) -> Vec<u8> {
    let guard = state.storage.lock().expect("storage mutex poisoned");
    let live: Vec<_> = guard.storage.iter().filter(|e| !e.is_expired()).collect();
    let metas: Vec<ListEntryMeta> = live
        .iter()
        .map(|e| {
            e.metrics.record_read();
            let bytes_used = match e.kind {
                EntryKind::Counter => std::mem::size_of::<V>() as V,
                EntryKind::Raw => e.value_bytes().len() as V,
            };
            ListEntryMeta { key: &e.key, kind: e.kind.as_u8(), ttl_unit: e.ttl_unit, expires_at_nanos: e.expires_at().0, bytes_used }
        })
        .collect();

    let mut out = vec![STATUS_OK];
    out.extend_from_slice(&fragment_list(&metas));
    out
}

fn handle_stat(state: &State, key: &[u8]) -> Vec<u8> {
    let guard = state.storage.lock().expect("storage mutex poisoned");
    match guard.storage.find_by_key(key) {
        Some(entry) if !entry.is_expired() => {
            let (reads_pm, writes_pm, reads_total, writes_total) = entry.metrics.snapshot();
            let mut out = vec![STATUS_OK];
            out.extend_from_slice(&reads_pm.to_le_bytes());
            out.extend_from_slice(&writes_pm.to_le_bytes());
            out.extend_from_slice(&reads_total.to_le_bytes());
            out.extend_from_slice(&writes_total.to_le_bytes());
            out
        }
        _ => vec![STATUS_FAIL],
    }
}

fn handle_stats(state: &State) -> Vec<u8> {
    let guard = state.storage.lock().expect("storage mutex poisoned");
    let live: Vec<_> = guard.storage.iter().filter(|e| !e.is_expired()).collect();
    let snapshots: Vec<_> = live.iter().map(|e| e.metrics.snapshot()).collect();
    let metas: Vec<StatsEntryMeta> = live
        .iter()
        .zip(&snapshots)
        .map(|(e, (reads_pm, writes_pm, reads_total, writes_total))| StatsEntryMeta {
            key: &e.key,
            reads_per_minute: *reads_pm,
            writes_per_minute: *writes_pm,
            reads_total: *reads_total,
            writes_total: *writes_total,
        })
        .collect();

    let mut out = vec![STATUS_OK];
    out.extend_from_slice(&fragment_stats(&metas));
    out
}

fn handle_subscribe(state: &State, conn_id: ConnectionId, channel: &[u8]) -> Vec<u8> {
    state.subscriptions.lock().expect("subscriptions mutex poisoned").subscribe(conn_id, channel, Nanos::now());
    vec![STATUS_OK]
}

fn handle_unsubscribe(state: &State, conn_id: ConnectionId, channel: &[u8]) -> Vec<u8> {
    state.subscriptions.lock().expect("subscriptions mutex poisoned").unsubscribe(conn_id, channel);
    vec![STATUS_OK]
}

fn build_event(channel: &[u8], value: &[u8]) -> Vec<u8> {
    let mut out = vec![Opcode::Event.as_u8()];
    out.push(channel.len() as u8);
    write_v(value.len() as V, &mut out);
    out.extend_from_slice(channel);
    out.extend_from_slice(value);
    out
}

fn handle_publish(state: &State, publisher_id: ConnectionId, channel: &[u8], value: &[u8]) -> Vec<u8> {
    let event = Arc::new(build_event(channel, value));
    let event_len = event.len() as u64;
    let mut published_bytes = 0u64;

    {
        let targets = state.subscriptions.lock().expect("subscriptions mutex poisoned").subscribers_of(channel).to_vec();
        let connections = state.connections.lock().expect("connections mutex poisoned");
        for sub in &targets {
            if sub.connection_id == publisher_id {
                sub.metrics.record_publish(event_len);
                continue;
            }
            if let Some(record) = connections.get(sub.connection_id) {
                record.peer.enqueue(event.clone());
                record.accumulators.received_bytes.fetch_add(event_len, Relaxed);
                sub.metrics.record_receive(event_len);
                published_bytes += event_len;
            }
        }
    }

    if let Some(record) = state.connections.lock().expect("connections mutex poisoned").get(publisher_id) {
        record.accumulators.published_bytes.fetch_add(published_bytes, Relaxed);
    }

    vec![STATUS_OK]
}

fn handle_channel(state: &State, channel: &[u8]) -> Vec<u8> {
    let subs = state.subscriptions.lock().expect("subscriptions mutex poisoned");
    let list = subs.subscribers_of(channel);
    let mut out = vec![STATUS_OK];
    out.extend_from_slice(&(list.len() as u64).to_le_bytes());
    for sub in list {
        out.extend_from_slice(&sub.connection_id);
        out.extend_from_slice(&sub.subscribed_at.0.to_le_bytes());
        out.extend_from_slice(&sub.metrics.read_bytes.load(Relaxed).to_le_bytes());
        out.extend_from_slice(&sub.metrics.write_bytes.load(Relaxed).to_le_bytes());
    }
    out
}

fn handle_channels(state: &State) -> Vec<u8> {
    let subs = state.subscriptions.lock().expect("subscriptions mutex poisoned");
    let rows: Vec<(Vec<u8>, u64, u64, u64)> = subs
        .channels()
        .map(|(name, list)| {
            let read_bytes: u64 = list.iter().map(|s| s.metrics.read_bytes.load(Relaxed)).sum();
            let write_bytes: u64 = list.iter().map(|s| s.metrics.write_bytes.load(Relaxed)).sum();
            (name.to_vec(), read_bytes, write_bytes, list.len() as u64)
        })
        .collect();
    drop(subs);

    let metas: Vec<ChannelMeta> = rows
        .iter()
        .map(|(name, read_bytes, write_bytes, subscriber_count)| ChannelMeta {
            name,
            read_bytes: *read_bytes,
            write_bytes: *write_bytes,
            subscriber_count: *subscriber_count,
        })
        .collect();

    let mut out = vec![STATUS_OK];
    out.extend_from_slice(&fragment_channels(&metas));
    out
}

fn handle_whoami(conn_id: ConnectionId) -> Vec<u8> {
    let mut out = vec![STATUS_OK];
    out.extend_from_slice(&conn_id);
    out
}

fn connection_meta(record: &ConnectionRecord) -> ConnectionMeta {
    let (ip_version, ip) = match record.remote_ip {
        Some(IpAddr::V4(v4)) => {
            let mut buf = [0u8; 16];
            buf[..4].copy_from_slice(&v4.octets());
            (4u8, buf)
        }
        Some(IpAddr::V6(v6)) => (6u8, v6.octets()),
        None => (0u8, [0u8; 16]),
    };

    ConnectionMeta {
        id: record.id,
        ip_version,
        ip,
        port: record.remote_port,
        connected_at_nanos: record.connected_at.0,
        accumulators: record.accumulators.snapshot(),
        opcode_counts: record.opcode_counters.snapshot(),
    }
}

fn handle_connection(state: &State, id: ConnectionId) -> Vec<u8> {
    let connections = state.connections.lock().expect("connections mutex poisoned");
    match connections.get(id) {
        Some(record) => {
            let mut out = vec![STATUS_OK];
            write_connection_record(&connection_meta(record), &mut out);
            out
        }
        None => vec![STATUS_FAIL],
    }
}

fn handle_connections(state: &State) -> Vec<u8> {
    let connections = state.connections.lock().expect("connections mutex poisoned");
    let metas: Vec<ConnectionMeta> = connections.iter().map(|r| connection_meta(r)).collect();
    let mut out = vec![STATUS_OK];
    out.extend_from_slice(&fragment_connections(&metas));
    out
}

fn handle_info(state: &State) -> Vec<u8> {
    let snapshot = state.info_snapshot();
    let mut out = vec![STATUS_OK];
    write_info_snapshot(&snapshot, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use throttle_protocol::{CONNECTION_RECORD_LEN, read_v};
    use throttle_store::TransportKind;

    fn conn_id(byte: u8) -> ConnectionId {
        [byte; 16]
    }

    fn insert(state: &State, key: &str, quota: V, ttl: V, ttl_unit: TtlUnit) -> Vec<u8> {
        dispatch(state, conn_id(1), throttle_protocol::Request::Insert { quota, ttl_unit, ttl, key: key.as_bytes() })
    }

    fn query(state: &State, key: &str) -> Vec<u8> {
        dispatch(state, conn_id(1), throttle_protocol::Request::Query { key: key.as_bytes() })
    }

    fn quota_of(resp: &[u8]) -> V {
        read_v(&resp[1..]).unwrap()
    }

    fn expires_at_of(state: &State, key: &[u8]) -> Nanos {
        state.storage.lock().expect("storage mutex poisoned").storage.find_by_key(key).unwrap().expires_at()
    }

    #[test]
    fn quota_patch_overwrites_the_counter() {
        let state = State::new();
        assert_eq!(insert(&state, "q1", 10, 60, TtlUnit::Seconds), vec![STATUS_OK]);

        let resp = dispatch(
            &state,
            conn_id(1),
            throttle_protocol::Request::Update {
                attribute: Attribute::Quota,
                change: Change::Patch,
                value: 5,
                ttl_unit: TtlUnit::Seconds,
                key: b"q1",
            },
        );
        assert_eq!(resp, vec![STATUS_OK]);
        assert_eq!(quota_of(&query(&state, "q1")), 5);
    }

    #[test]
    fn quota_increase_adds_to_the_counter() {
        let state = State::new();
        insert(&state, "q2", 10, 60, TtlUnit::Seconds);

        let resp = dispatch(
            &state,
            conn_id(1),
            throttle_protocol::Request::Update {
                attribute: Attribute::Quota,
                change: Change::Increase,
                value: 3,
                ttl_unit: TtlUnit::Seconds,
                key: b"q2",
            },
        );
        assert_eq!(resp, vec![STATUS_OK]);
        assert_eq!(quota_of(&query(&state, "q2")), 13);
    }

    #[test]
    fn quota_decrease_below_floor_fails_and_leaves_counter_untouched() {
        let state = State::new();
        insert(&state, "q3", 5, 60, TtlUnit::Seconds);

        let resp = dispatch(
            &state,
            conn_id(1),
            throttle_protocol::Request::Update {
                attribute: Attribute::Quota,
                change: Change::Decrease,
                value: 10,
                ttl_unit: TtlUnit::Seconds,
                key: b"q3",
            },
        );
        assert_eq!(resp, vec![STATUS_FAIL]);
        assert_eq!(quota_of(&query(&state, "q3")), 5);
    }

    #[test]
    fn ttl_patch_moves_expiry_to_now_plus_delta() {
        let state = State::new();
        insert(&state, "t1", 1, 5, TtlUnit::Seconds);
        let before = expires_at_of(&state, b"t1");

        let resp = dispatch(
            &state,
            conn_id(1),
            throttle_protocol::Request::Update {
                attribute: Attribute::Ttl,
                change: Change::Patch,
                value: 1000,
                ttl_unit: TtlUnit::Seconds,
                key: b"t1",
            },
        );
        assert_eq!(resp, vec![STATUS_OK]);
        assert!(expires_at_of(&state, b"t1") > before);
    }

    #[test]
    fn ttl_decrease_moves_expiry_earlier() {
        let state = State::new();
        insert(&state, "t2", 1, 100, TtlUnit::Seconds);
        let before = expires_at_of(&state, b"t2");

        let resp = dispatch(
            &state,
            conn_id(1),
            throttle_protocol::Request::Update {
                attribute: Attribute::Ttl,
                change: Change::Decrease,
                value: 50,
                ttl_unit: TtlUnit::Seconds,
                key: b"t2",
            },
        );
        assert_eq!(resp, vec![STATUS_OK]);
        assert!(expires_at_of(&state, b"t2") < before);
    }

    #[test]
    fn ttl_increase_on_the_armed_entry_retargets_the_scheduler() {
        let state = State::new();
        insert(&state, "early", 1, 1, TtlUnit::Seconds);
        insert(&state, "late", 1, 10, TtlUnit::Seconds);

        let early_at = expires_at_of(&state, b"early");
        assert_eq!(state.storage.lock().expect("storage mutex poisoned").scheduler.armed_at(), Some(early_at));

        // "early" is the armed target; increasing its ttl past "late"'s expiry
        // must force the scheduler to rescan rather than just keep the stale instant.
        let resp = dispatch(
            &state,
            conn_id(1),
            throttle_protocol::Request::Update {
                attribute: Attribute::Ttl,
                change: Change::Increase,
                value: 100,
                ttl_unit: TtlUnit::Seconds,
                key: b"early",
            },
        );
        assert_eq!(resp, vec![STATUS_OK]);

        let late_at = expires_at_of(&state, b"late");
        assert_eq!(state.storage.lock().expect("storage mutex poisoned").scheduler.armed_at(), Some(late_at));
    }

    #[test]
    fn purge_removes_the_key_and_is_not_idempotent() {
        let state = State::new();
        insert(&state, "p1", 1, 60, TtlUnit::Seconds);

        assert_eq!(dispatch(&state, conn_id(1), throttle_protocol::Request::Purge { key: b"p1" }), vec![STATUS_OK]);
        assert_eq!(query(&state, "p1"), vec![STATUS_FAIL]);
        assert_eq!(dispatch(&state, conn_id(1), throttle_protocol::Request::Purge { key: b"p1" }), vec![STATUS_FAIL]);
    }

    #[test]
    fn whoami_echoes_the_caller_connection_id() {
        let state = State::new();
        let id = conn_id(7);
        let resp = dispatch(&state, id, throttle_protocol::Request::Whoami);
        assert_eq!(resp[0], STATUS_OK);
        assert_eq!(&resp[1..], &id);
    }

    #[test]
    fn stat_and_stats_report_read_write_counts() {
        let state = State::new();
        insert(&state, "s1", 1, 60, TtlUnit::Seconds);
        query(&state, "s1");

        let resp = dispatch(&state, conn_id(1), throttle_protocol::Request::Stat { key: b"s1" });
        assert_eq!(resp[0], STATUS_OK);
        assert_eq!(resp.len(), 1 + 8 * 4);

        let resp = dispatch(&state, conn_id(1), throttle_protocol::Request::Stats);
        assert_eq!(resp[0], STATUS_OK);
    }

    #[test]
    fn channel_and_channels_report_subscriptions() {
        let state = State::new();
        let id = conn_id(3);
        assert_eq!(
            dispatch(&state, id, throttle_protocol::Request::Subscribe { channel: b"room" }),
            vec![STATUS_OK]
        );

        let resp = dispatch(&state, id, throttle_protocol::Request::Channel { channel: b"room" });
        assert_eq!(resp[0], STATUS_OK);
        let count = u64::from_le_bytes(resp[1..9].try_into().unwrap());
        assert_eq!(count, 1);

        let resp = dispatch(&state, id, throttle_protocol::Request::Channels);
        assert_eq!(resp[0], STATUS_OK);
    }

    #[test]
    fn connection_and_connections_report_registered_peers() {
        struct NoopPeer;
        impl throttle_store::Peer for NoopPeer {
            fn enqueue(&self, _payload: Arc<Vec<u8>>) {}
        }

        let state = State::new();
        let id = conn_id(9);
        state.connections.lock().expect("connections mutex poisoned").insert(ConnectionRecord {
            id,
            kind: TransportKind::Tcp,
            remote_ip: None,
            remote_port: 0,
            connected_at: Nanos::now(),
            accumulators: Default::default(),
            opcode_counters: Default::default(),
            peer: Arc::new(NoopPeer),
        });

        let resp = dispatch(&state, id, throttle_protocol::Request::Connection { id });
        assert_eq!(resp[0], STATUS_OK);
        assert_eq!(resp.len(), 1 + CONNECTION_RECORD_LEN);

        let resp = dispatch(&state, id, throttle_protocol::Request::Connections);
        assert_eq!(resp[0], STATUS_OK);
    }

    #[test]
    fn info_reports_without_panicking() {
        let state = State::new();
        let resp = dispatch(&state, conn_id(1), throttle_protocol::Request::Info);
        assert_eq!(resp[0], STATUS_OK);
    }
}
