use throttle_timing::TtlUnit;

use crate::value::{V, write_v};

pub const STATUS_OK: u8 = 0x01;
pub const STATUS_FAIL: u8 = 0x00;

/// Maximum serialized size of a single `list`/`stats`/`channels`/
/// `connections` fragment, fixed records and trailing variable bytes
/// combined.
pub const FRAGMENT_MAX_BYTES: usize = 2048;

/// One directory record for `list`.
pub struct ListEntryMeta<'a> {
    pub key: &'a [u8],
    pub kind: u8,
    pub ttl_unit: TtlUnit,
    pub expires_at_nanos: u64,
    pub bytes_used: V,
}

/// One metrics record for `stats`.
pub struct StatsEntryMeta<'a> {
    pub key: &'a [u8],
    pub reads_per_minute: u64,
    pub writes_per_minute: u64,
    pub reads_total: u64,
    pub writes_total: u64,
}

/// One channel record for `channels`.
pub struct ChannelMeta<'a> {
    pub name: &'a [u8],
    pub read_bytes: u64,
    pub write_bytes: u64,
    pub subscriber_count: u64,
}

/// Per-connection accumulators: read/write/published/received bytes plus
/// allocated bytes, in that order.
pub type ConnectionAccumulators = [u64; 5];
/// One counter per entry of `Opcode::METERED`, in that table's order.
pub type OpcodeCounts = [u64; 18];

pub struct ConnectionMeta {
    pub id: [u8; 16],
    pub ip_version: u8,
    pub ip: [u8; 16],
    pub port: u16,
    pub connected_at_nanos: u64,
    pub accumulators: ConnectionAccumulators,
    pub opcode_counts: OpcodeCounts,
}

/// Fixed width of one `ConnectionMeta` record once serialized: 16 + 1 + 16
/// + 2 + 8 + 5*8 + 18*8 = 227 bytes.
pub const CONNECTION_RECORD_LEN: usize = 16 + 1 + 16 + 2 + 8 + 5 * 8 + 18 * 8;

pub fn write_connection_record(meta: &ConnectionMeta, out: &mut Vec<u8>) {
    out.extend_from_slice(&meta.id);
    out.push(meta.ip_version);
    out.extend_from_slice(&meta.ip);
    out.extend_from_slice(&meta.port.to_le_bytes());
    out.extend_from_slice(&meta.connected_at_nanos.to_le_bytes());
    for acc in meta.accumulators {
        out.extend_from_slice(&acc.to_le_bytes());
    }
    for count in meta.opcode_counts {
        out.extend_from_slice(&count.to_le_bytes());
    }
}

fn write_u64_le(out: &mut Vec<u8>, value: u64) {
    out.extend_from_slice(&value.to_le_bytes());
}

/// Builds the `fragment_count (u64 LE)` + per-fragment
/// `{fragment_index, key_count, [fixed records], [variable bytes]}`
/// envelope shared by `list`, `stats`, `channels` and `connections`.
///
/// Fixed records for all items of a fragment are written first, then all
/// variable-length trailing bytes are appended after — matching the
/// reference layout rather than interleaving per item.
fn build_fragments<T>(
    items: &[T],
    fixed_len: usize,
    write_fixed: impl Fn(&T, &mut Vec<u8>),
    var_bytes: impl Fn(&T) -> &[u8],
) -> Vec<u8> {
    let mut fragments: Vec<Vec<usize>> = Vec::new();
    let mut current: Vec<usize> = Vec::new();
    let mut current_len = 0usize;

    for (idx, item) in items.iter().enumerate() {
        let item_len = fixed_len + var_bytes(item).len();
        if !current.is_empty() && current_len + item_len > FRAGMENT_MAX_BYTES {
            fragments.push(std::mem::take(&mut current));
            current_len = 0;
        }
        current.push(idx);
        current_len += item_len;
    }
    if !current.is_empty() || items.is_empty() {
        fragments.push(current);
    }

    let mut out = Vec::new();
    write_u64_le(&mut out, fragments.len() as u64);

    for (frag_idx, indices) in fragments.iter().enumerate() {
        write_u64_le(&mut out, frag_idx as u64 + 1);
        write_u64_le(&mut out, indices.len() as u64);
        for &i in indices {
            write_fixed(&items[i], &mut out);
        }
        for &i in indices {
            out.extend_from_slice(var_bytes(&items[i]));
        }
    }

    out
}

pub fn fragment_list(entries: &[ListEntryMeta]) -> Vec<u8> {
    let fixed_len = 1 + 1 + 1 + 8 + std::mem::size_of::<V>();
    build_fragments(
        entries,
        fixed_len,
        |e, out| {
            out.push(e.key.len() as u8);
            out.push(e.kind);
            out.push(e.ttl_unit.as_u8());
            write_u64_le(out, e.expires_at_nanos);
            write_v(e.bytes_used, out);
        },
        |e| e.key,
    )
}

pub fn fragment_stats(entries: &[StatsEntryMeta]) -> Vec<u8> {
    let fixed_len = 1 + 8 * 4;
    build_fragments(
        entries,
        fixed_len,
        |e, out| {
            out.push(e.key.len() as u8);
            write_u64_le(out, e.reads_per_minute);
            write_u64_le(out, e.writes_per_minute);
            write_u64_le(out, e.reads_total);
            write_u64_le(out, e.writes_total);
        },
        |e| e.key,
    )
}

pub fn fragment_channels(channels: &[ChannelMeta]) -> Vec<u8> {
    let fixed_len = 1 + 8 * 3;
    build_fragments(
        channels,
        fixed_len,
        |c, out| {
            out.push(c.name.len() as u8);
            write_u64_le(out, c.read_bytes);
            write_u64_le(out, c.write_bytes);
            write_u64_le(out, c.subscriber_count);
        },
        |c| c.name,
    )
}

pub fn fragment_connections(conns: &[ConnectionMeta]) -> Vec<u8> {
    build_fragments(conns, CONNECTION_RECORD_LEN, write_connection_record, |_| &[])
}

/// Per-opcode `(total, per_minute)` counter pair, in `Opcode::METERED` order.
pub type OpcodePairs = [(u64, u64); 18];

pub struct InfoSnapshot {
    pub now_nanos: u64,
    pub requests_total: u64,
    pub requests_per_minute: u64,
    pub opcode_pairs: OpcodePairs,
    /// `(total, per_minute)` for each of read/write/published/received bytes.
    pub network_pairs: [(u64, u64); 4],
    /// entries_total, entries_counters, entries_raw, bytes_used, expired_pending_erase.
    pub storage_totals: [u64; 5],
    /// channels_total, subscriptions_total.
    pub pubsub_totals: [u64; 2],
    pub started_at_nanos: u64,
    pub connection_count: u64,
    pub version: [u8; 16],
}

pub fn write_info_snapshot(snapshot: &InfoSnapshot, out: &mut Vec<u8>) {
    write_u64_le(out, snapshot.now_nanos);
    write_u64_le(out, snapshot.requests_total);
    write_u64_le(out, snapshot.requests_per_minute);
    for (total, per_minute) in snapshot.opcode_pairs {
        write_u64_le(out, total);
        write_u64_le(out, per_minute);
    }
    for (total, per_minute) in snapshot.network_pairs {
        write_u64_le(out, total);
        write_u64_le(out, per_minute);
    }
    for total in snapshot.storage_totals {
        write_u64_le(out, total);
    }
    for total in snapshot.pubsub_totals {
        write_u64_le(out, total);
    }
    write_u64_le(out, snapshot.started_at_nanos);
    write_u64_le(out, snapshot.connection_count);
    out.extend_from_slice(&snapshot.version);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_record_is_227_bytes() {
        let meta = ConnectionMeta {
            id: [0; 16],
            ip_version: 4,
            ip: [0; 16],
            port: 9000,
            connected_at_nanos: 0,
            accumulators: [0; 5],
            opcode_counts: [0; 18],
        };
        let mut out = Vec::new();
        write_connection_record(&meta, &mut out);
        assert_eq!(out.len(), 227);
        assert_eq!(CONNECTION_RECORD_LEN, 227);
    }

    #[test]
    fn single_fragment_when_small() {
        let entries = vec![ListEntryMeta {
            key: b"k1",
            kind: 0,
            ttl_unit: TtlUnit::Seconds,
            expires_at_nanos: 0,
            bytes_used: 0,
        }];
        let payload = fragment_list(&entries);
        let fragment_count = u64::from_le_bytes(payload[0..8].try_into().unwrap());
        assert_eq!(fragment_count, 1);
    }

    #[test]
    fn splits_into_multiple_fragments_when_large() {
        let key = vec![b'x'; 250];
        let entries: Vec<ListEntryMeta> = (0..40)
            .map(|_| ListEntryMeta { key: &key, kind: 0, ttl_unit: TtlUnit::Seconds, expires_at_nanos: 0, bytes_used: 0 })
            .collect();
        let payload = fragment_list(&entries);
        let fragment_count = u64::from_le_bytes(payload[0..8].try_into().unwrap());
        assert!(fragment_count > 1);
    }

    #[test]
    fn empty_item_list_still_emits_one_empty_fragment() {
        let entries: Vec<ListEntryMeta> = Vec::new();
        let payload = fragment_list(&entries);
        let fragment_count = u64::from_le_bytes(payload[0..8].try_into().unwrap());
        assert_eq!(fragment_count, 1);
        let key_count = u64::from_le_bytes(payload[16..24].try_into().unwrap());
        assert_eq!(key_count, 0);
    }
}
