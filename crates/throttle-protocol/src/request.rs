use thiserror::Error;
use throttle_timing::{TtlUnit, UnknownTtlUnit};

use crate::attribute::{Attribute, Change, UnknownField};
use crate::opcode::{Opcode, UnknownOpcode};
use crate::value::{V, read_v};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("frame shorter than its own derived length")]
    Truncated,
    #[error(transparent)]
    Opcode(#[from] UnknownOpcode),
    #[error(transparent)]
    TtlUnit(#[from] UnknownTtlUnit),
    #[error(transparent)]
    Field(#[from] UnknownField),
}

#[derive(Debug, PartialEq, Eq)]
pub enum Request<'a> {
    Insert { quota: V, ttl_unit: TtlUnit, ttl: V, key: &'a [u8] },
    Query { key: &'a [u8] },
    Update { attribute: Attribute, change: Change, value: V, ttl_unit: TtlUnit, key: &'a [u8] },
    Purge { key: &'a [u8] },
    Set { ttl_unit: TtlUnit, ttl: V, key: &'a [u8], value: &'a [u8] },
    Get { key: &'a [u8] },
    List,
    Info,
    Stat { key: &'a [u8] },
    Stats,
    Subscribe { channel: &'a [u8] },
    Unsubscribe { channel: &'a [u8] },
    Publish { channel: &'a [u8], value: &'a [u8] },
    Channel { channel: &'a [u8] },
    Channels,
    Whoami,
    Connection { id: [u8; 16] },
    Connections,
    Event { channel: &'a [u8], value: &'a [u8] },
}

impl<'a> Request<'a> {
    pub fn opcode(&self) -> Opcode {
        match self {
            Request::Insert { .. } => Opcode::Insert,
            Request::Query { .. } => Opcode::Query,
            Request::Update { .. } => Opcode::Update,
            Request::Purge { .. } => Opcode::Purge,
            Request::Set { .. } => Opcode::Set,
            Request::Get { .. } => Opcode::Get,
            Request::List => Opcode::List,
            Request::Info => Opcode::Info,
            Request::Stat { .. } => Opcode::Stat,
            Request::Stats => Opcode::Stats,
            Request::Subscribe { .. } => Opcode::Subscribe,
            Request::Unsubscribe { .. } => Opcode::Unsubscribe,
            Request::Publish { .. } => Opcode::Publish,
            Request::Channel { .. } => Opcode::Channel,
            Request::Channels => Opcode::Channels,
            Request::Whoami => Opcode::Whoami,
            Request::Connection { .. } => Opcode::Connection,
            Request::Connections => Opcode::Connections,
            Request::Event { .. } => Opcode::Event,
        }
    }

    /// Parses a complete frame (opcode byte included, exactly
    /// `size_of(opcode, ..)` bytes long) into a typed request.
    pub fn parse(frame: &'a [u8]) -> Result<Self, ParseError> {
        let (&op_byte, rest) = frame.split_first().ok_or(ParseError::Truncated)?;
        let opcode = Opcode::from_u8(op_byte)?;
        let vs = std::mem::size_of::<V>();

        Ok(match opcode {
            Opcode::Insert => {
                let quota = read_v(rest).ok_or(ParseError::Truncated)?;
                let ttl_unit_off = vs;
                let ttl_unit = TtlUnit::from_u8(*rest.get(ttl_unit_off).ok_or(ParseError::Truncated)?)?;
                let ttl = read_v(rest.get(ttl_unit_off + 1..).ok_or(ParseError::Truncated)?)
                    .ok_or(ParseError::Truncated)?;
                let key_size_off = ttl_unit_off + 1 + vs;
                let key_size = *rest.get(key_size_off).ok_or(ParseError::Truncated)? as usize;
                let key = rest.get(key_size_off + 1..key_size_off + 1 + key_size).ok_or(ParseError::Truncated)?;
                Request::Insert { quota, ttl_unit, ttl, key }
            }
            Opcode::Query => {
                let key_size = *rest.first().ok_or(ParseError::Truncated)? as usize;
                let key = rest.get(1..1 + key_size).ok_or(ParseError::Truncated)?;
                Request::Query { key }
            }
            Opcode::Update => {
                let attribute = Attribute::from_u8(*rest.first().ok_or(ParseError::Truncated)?)?;
                let change = Change::from_u8(*rest.get(1).ok_or(ParseError::Truncated)?)?;
                let value = read_v(rest.get(2..).ok_or(ParseError::Truncated)?).ok_or(ParseError::Truncated)?;
                let ttl_unit_off = 2 + vs;
                let ttl_unit = TtlUnit::from_u8(*rest.get(ttl_unit_off).ok_or(ParseError::Truncated)?)?;
                let key_size_off = ttl_unit_off + 1;
                let key_size = *rest.get(key_size_off).ok_or(ParseError::Truncated)? as usize;
                let key = rest.get(key_size_off + 1..key_size_off + 1 + key_size).ok_or(ParseError::Truncated)?;
                Request::Update { attribute, change, value, ttl_unit, key }
            }
            Opcode::Purge => {
                let key_size = *rest.first().ok_or(ParseError::Truncated)? as usize;
                let key = rest.get(1..1 + key_size).ok_or(ParseError::Truncated)?;
                Request::Purge { key }
            }
            Opcode::Set => {
                let ttl_unit = TtlUnit::from_u8(*rest.first().ok_or(ParseError::Truncated)?)?;
                let ttl = read_v(rest.get(1..).ok_or(ParseError::Truncated)?).ok_or(ParseError::Truncated)?;
                let key_size_off = 1 + vs;
                let key_size = *rest.get(key_size_off).ok_or(ParseError::Truncated)? as usize;
                let value_size_off = key_size_off + 1;
                let value_size =
                    read_v(rest.get(value_size_off..).ok_or(ParseError::Truncated)?).ok_or(ParseError::Truncated)?
                        as usize;
                let key_off = value_size_off + vs;
                let key = rest.get(key_off..key_off + key_size).ok_or(ParseError::Truncated)?;
                let value =
                    rest.get(key_off + key_size..key_off + key_size + value_size).ok_or(ParseError::Truncated)?;
                Request::Set { ttl_unit, ttl, key, value }
            }
            Opcode::Get => {
                let key_size = *rest.first().ok_or(ParseError::Truncated)? as usize;
                let key = rest.get(1..1 + key_size).ok_or(ParseError::Truncated)?;
                Request::Get { key }
            }
            Opcode::List => Request::List,
            Opcode::Info => Request::Info,
            Opcode::Stat => {
                let key_size = *rest.first().ok_or(ParseError::Truncated)? as usize;
                let key = rest.get(1..1 + key_size).ok_or(ParseError::Truncated)?;
                Request::Stat { key }
            }
            Opcode::Stats => Request::Stats,
            Opcode::Subscribe => {
                let channel_size = *rest.first().ok_or(ParseError::Truncated)? as usize;
                let channel = rest.get(1..1 + channel_size).ok_or(ParseError::Truncated)?;
                Request::Subscribe { channel }
            }
            Opcode::Unsubscribe => {
                let channel_size = *rest.first().ok_or(ParseError::Truncated)? as usize;
                let channel = rest.get(1..1 + channel_size).ok_or(ParseError::Truncated)?;
                Request::Unsubscribe { channel }
            }
            Opcode::Publish => {
                let channel_size = *rest.first().ok_or(ParseError::Truncated)? as usize;
                let value_size =
                    read_v(rest.get(1..).ok_or(ParseError::Truncated)?).ok_or(ParseError::Truncated)? as usize;
                let channel_off = 1 + vs;
                let channel =
                    rest.get(channel_off..channel_off + channel_size).ok_or(ParseError::Truncated)?;
                let value = rest
                    .get(channel_off + channel_size..channel_off + channel_size + value_size)
                    .ok_or(ParseError::Truncated)?;
                Request::Publish { channel, value }
            }
            Opcode::Channel => {
                let channel_size = *rest.first().ok_or(ParseError::Truncated)? as usize;
                let channel = rest.get(1..1 + channel_size).ok_or(ParseError::Truncated)?;
                Request::Channel { channel }
            }
            Opcode::Channels => Request::Channels,
            Opcode::Whoami => Request::Whoami,
            Opcode::Connection => {
                let id: [u8; 16] = rest.get(0..16).ok_or(ParseError::Truncated)?.try_into().unwrap();
                Request::Connection { id }
            }
            Opcode::Connections => Request::Connections,
            Opcode::Event => {
                let channel_size = *rest.first().ok_or(ParseError::Truncated)? as usize;
                let value_size =
                    read_v(rest.get(1..).ok_or(ParseError::Truncated)?).ok_or(ParseError::Truncated)? as usize;
                let channel_off = 1 + vs;
                let channel =
                    rest.get(channel_off..channel_off + channel_size).ok_or(ParseError::Truncated)?;
                let value = rest
                    .get(channel_off + channel_size..channel_off + channel_size + value_size)
                    .ok_or(ParseError::Truncated)?;
                Request::Event { channel, value }
            }
        })
    }
}
