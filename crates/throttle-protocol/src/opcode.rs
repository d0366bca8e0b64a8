use thiserror::Error;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    Insert = 0x01,
    Query = 0x02,
    Update = 0x03,
    Purge = 0x04,
    Set = 0x05,
    Get = 0x06,
    List = 0x07,
    Info = 0x08,
    Stat = 0x09,
    Stats = 0x0A,
    Subscribe = 0x0B,
    Unsubscribe = 0x0C,
    Publish = 0x0D,
    Channel = 0x0E,
    Channels = 0x0F,
    Whoami = 0x10,
    Connection = 0x11,
    Connections = 0x12,
    Event = 0x13,
}

#[derive(Debug, Error)]
#[error("unknown opcode byte {0:#04x}")]
pub struct UnknownOpcode(pub u8);

impl Opcode {
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    pub const fn from_u8(byte: u8) -> Result<Self, UnknownOpcode> {
        Ok(match byte {
            0x01 => Opcode::Insert,
            0x02 => Opcode::Query,
            0x03 => Opcode::Update,
            0x04 => Opcode::Purge,
            0x05 => Opcode::Set,
            0x06 => Opcode::Get,
            0x07 => Opcode::List,
            0x08 => Opcode::Info,
            0x09 => Opcode::Stat,
            0x0A => Opcode::Stats,
            0x0B => Opcode::Subscribe,
            0x0C => Opcode::Unsubscribe,
            0x0D => Opcode::Publish,
            0x0E => Opcode::Channel,
            0x0F => Opcode::Channels,
            0x10 => Opcode::Whoami,
            0x11 => Opcode::Connection,
            0x12 => Opcode::Connections,
            0x13 => Opcode::Event,
            other => return Err(UnknownOpcode(other)),
        })
    }

    /// The fixed set of opcodes tracked individually in per-connection and
    /// server-wide accumulators (18 entries, `whoami` through `channel`
    /// inclusive of the introspection/pubsub surface).
    pub const METERED: [Opcode; 18] = [
        Opcode::Insert,
        Opcode::Set,
        Opcode::Query,
        Opcode::Get,
        Opcode::Update,
        Opcode::Purge,
        Opcode::List,
        Opcode::Info,
        Opcode::Stat,
        Opcode::Stats,
        Opcode::Publish,
        Opcode::Subscribe,
        Opcode::Unsubscribe,
        Opcode::Connections,
        Opcode::Connection,
        Opcode::Channels,
        Opcode::Channel,
        Opcode::Whoami,
    ];

    pub const fn metered_index(self) -> Option<usize> {
        let mut i = 0;
        while i < Self::METERED.len() {
            if Self::METERED[i] as u8 == self as u8 {
                return Some(i);
            }
            i += 1;
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_defined_byte() {
        for b in 1..=0x13u8 {
            let op = Opcode::from_u8(b).unwrap();
            assert_eq!(op.as_u8(), b);
        }
    }

    #[test]
    fn rejects_zero_and_overflow() {
        assert!(Opcode::from_u8(0x00).is_err());
        assert!(Opcode::from_u8(0x14).is_err());
    }

    #[test]
    fn metered_table_has_eighteen_entries() {
        assert_eq!(Opcode::METERED.len(), 18);
        assert!(Opcode::Insert.metered_index().is_some());
        assert!(Opcode::Event.metered_index().is_none());
    }
}
