mod duration;
mod instant;
mod nanos;
mod repeater;
mod ttl_unit;

pub use duration::Duration;
pub use instant::Instant;
pub use nanos::{Nanos, nanos_or_warn};
pub use repeater::Repeater;
pub use ttl_unit::{TtlUnit, UnknownTtlUnit};
