mod attribute;
mod opcode;
mod request;
mod response;
mod size;
mod value;

pub use attribute::{Attribute, Change, UnknownField};
pub use opcode::{Opcode, UnknownOpcode};
pub use request::{ParseError, Request};
pub use response::{
    CONNECTION_RECORD_LEN, ChannelMeta, ConnectionAccumulators, ConnectionMeta, FRAGMENT_MAX_BYTES, InfoSnapshot,
    ListEntryMeta, OpcodeCounts, OpcodePairs, STATUS_FAIL, STATUS_OK, StatsEntryMeta, fragment_channels,
    fragment_connections, fragment_list, fragment_stats, write_connection_record, write_info_snapshot,
};
pub use size::size_of;
pub use value::{V, V_SIZE, read_v, write_v};
