use crate::opcode::Opcode;
use crate::value::V_SIZE;

/// Fixed header width (bytes after the opcode byte, before any trailer)
/// for opcodes whose header carries no variable part.
const fn fixed_header_len(op: Opcode) -> Option<usize> {
    match op {
        Opcode::List
        | Opcode::Info
        | Opcode::Stats
        | Opcode::Channels
        | Opcode::Whoami
        | Opcode::Connections => Some(0),
        Opcode::Connection => Some(16),
        _ => None,
    }
}

/// Derives the full frame length (opcode byte included) from the opcode and
/// the bytes received so far. Returns `None` when not enough of the header
/// has arrived to know the length yet — equivalent to the `0` sentinel.
pub fn size_of(opcode: Opcode, tail: &[u8]) -> Option<usize> {
    if let Some(h) = fixed_header_len(opcode) {
        return Some(1 + h);
    }

    match opcode {
        Opcode::Query | Opcode::Purge | Opcode::Get | Opcode::Stat => {
            let key_size = *tail.first()? as usize;
            Some(1 + 1 + key_size)
        }
        Opcode::Subscribe | Opcode::Unsubscribe | Opcode::Channel => {
            let channel_size = *tail.first()? as usize;
            Some(1 + 1 + channel_size)
        }
        Opcode::Insert => {
            // quota: V, ttl_unit: u8, ttl: V, key_size: u8
            let key_size_off = V_SIZE + 1 + V_SIZE;
            let key_size = *tail.get(key_size_off)? as usize;
            Some(1 + key_size_off + 1 + key_size)
        }
        Opcode::Update => {
            // attribute: u8, change: u8, value: V, ttl_unit: u8, key_size: u8
            let key_size_off = 1 + 1 + V_SIZE + 1;
            let key_size = *tail.get(key_size_off)? as usize;
            Some(1 + key_size_off + 1 + key_size)
        }
        Opcode::Set => {
            // ttl_unit: u8, ttl: V, key_size: u8, value_size: V
            let key_size_off = 1 + V_SIZE;
            let key_size = *tail.get(key_size_off)? as usize;
            let value_size_off = key_size_off + 1;
            let value_size = crate::value::read_v(tail.get(value_size_off..)?)? as usize;
            Some(1 + value_size_off + V_SIZE + key_size + value_size)
        }
        Opcode::Publish | Opcode::Event => {
            // channel_size: u8, value_size: V
            let channel_size = *tail.first()? as usize;
            let value_size = crate::value::read_v(tail.get(1..)?)? as usize;
            Some(1 + 1 + V_SIZE + channel_size + value_size)
        }
        _ => unreachable!("fixed_header_len already covers every other opcode"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_opcodes_need_no_tail() {
        assert_eq!(size_of(Opcode::List, &[]), Some(1));
        assert_eq!(size_of(Opcode::Whoami, &[]), Some(1));
    }

    #[test]
    fn query_waits_for_key_size_byte() {
        assert_eq!(size_of(Opcode::Query, &[]), None);
        assert_eq!(size_of(Opcode::Query, &[5]), Some(1 + 1 + 5));
    }

    #[test]
    fn connection_is_fixed_sixteen_bytes() {
        assert_eq!(size_of(Opcode::Connection, &[]), Some(1 + 16));
    }
}
