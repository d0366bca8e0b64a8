//! The wire's counter/TTL/length integer width is a compile-time choice,
//! selected by exactly one `value-u*` feature (see Cargo.toml). Defaults to
//! 16 bits, matching the header-width examples used throughout the rest of
//! this crate's docs.

#[cfg(feature = "value-u8")]
pub type V = u8;
#[cfg(feature = "value-u16")]
pub type V = u16;
#[cfg(feature = "value-u32")]
pub type V = u32;
#[cfg(feature = "value-u64")]
pub type V = u64;

pub const V_SIZE: usize = std::mem::size_of::<V>();

#[inline]
pub fn read_v(bytes: &[u8]) -> Option<V> {
    let arr: [u8; V_SIZE] = bytes.get(..V_SIZE)?.try_into().ok()?;
    Some(V::from_le_bytes(arr))
}

#[inline]
pub fn write_v(value: V, out: &mut Vec<u8>) {
    out.extend_from_slice(&value.to_le_bytes());
}
