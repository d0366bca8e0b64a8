use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use std::sync::atomic::Ordering;

use thiserror::Error;
use throttle_protocol::{V, V_SIZE, read_v, write_v};
use throttle_timing::{Nanos, TtlUnit};

use crate::entry::{Entry, EntryKind};
use crate::storage::Storage;

const MAGIC: &[u8; 4] = b"THRT";
const FORMAT_VERSION: u8 = 1;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("not a throttle dump (bad magic)")]
    BadMagic,
    #[error("dump was written with value width {0} bytes, this build uses {V_SIZE}")]
    ValueWidthMismatch(u8),
    #[error("unsupported dump format version {0}")]
    UnsupportedVersion(u8),
    #[error("corrupt dump: {0}")]
    Corrupt(&'static str),
}

fn value_size_code() -> u8 {
    V_SIZE as u8
}

pub fn dump(storage: &Storage, path: &Path) -> Result<(), PersistenceError> {
    let mut out = Vec::new();
    out.extend_from_slice(MAGIC);
    out.push(FORMAT_VERSION);
    out.push(value_size_code());
    out.extend_from_slice(&(storage.len() as u32).to_le_bytes());

    for entry in storage.iter() {
        out.extend_from_slice(&(entry.key.len() as u16).to_le_bytes());
        out.extend_from_slice(&entry.key);
        out.extend_from_slice(&entry.expires_at().0.to_le_bytes());
        out.push(entry.kind.as_u8());
        out.push(entry.ttl_unit.as_u8());

        let (reads_pm, writes_pm, reads_acc, writes_acc) = entry.metrics.snapshot();
        out.extend_from_slice(&entry.metrics.reads.load(Ordering::Relaxed).to_le_bytes());
        out.extend_from_slice(&entry.metrics.writes.load(Ordering::Relaxed).to_le_bytes());
        out.extend_from_slice(&reads_acc.to_le_bytes());
        out.extend_from_slice(&writes_acc.to_le_bytes());
        out.extend_from_slice(&reads_pm.to_le_bytes());
        out.extend_from_slice(&writes_pm.to_le_bytes());

        match entry.kind {
            EntryKind::Counter => {
                write_v(entry.counter.load(Ordering::Relaxed) as V, &mut out);
            }
            EntryKind::Raw => {
                let bytes = entry.value_bytes();
                write_v(bytes.len() as V, &mut out);
                out.extend_from_slice(&bytes);
            }
        }
    }

    let mut file = File::create(path)?;
    file.write_all(&out)?;
    Ok(())
}

pub fn restore(path: &Path) -> Result<Storage, PersistenceError> {
    let mut bytes = Vec::new();
    File::open(path)?.read_to_end(&mut bytes)?;

    let mut cur = 0usize;
    let mut take = |n: usize| -> Result<&[u8], PersistenceError> {
        let slice = bytes.get(cur..cur + n).ok_or(PersistenceError::Corrupt("truncated"))?;
        cur += n;
        Ok(slice)
    };

    if take(4)? != MAGIC {
        return Err(PersistenceError::BadMagic);
    }
    let version = take(1)?[0];
    if version != FORMAT_VERSION {
        return Err(PersistenceError::UnsupportedVersion(version));
    }
    let value_size = take(1)?[0];
    if value_size != value_size_code() {
        return Err(PersistenceError::ValueWidthMismatch(value_size));
    }
    let entry_count = u32::from_le_bytes(take(4)?.try_into().unwrap());

    let mut storage = Storage::new();
    for _ in 0..entry_count {
        let key_size = u16::from_le_bytes(take(2)?.try_into().unwrap()) as usize;
        let key = take(key_size)?.to_vec();
        let expires_at = Nanos(u64::from_le_bytes(take(8)?.try_into().unwrap()));
        let kind = take(1)?[0];
        let ttl_unit =
            TtlUnit::from_u8(take(1)?[0]).map_err(|_| PersistenceError::Corrupt("unknown ttl unit"))?;

        let reads = u64::from_le_bytes(take(8)?.try_into().unwrap());
        let writes = u64::from_le_bytes(take(8)?.try_into().unwrap());
        let reads_acc = u64::from_le_bytes(take(8)?.try_into().unwrap());
        let writes_acc = u64::from_le_bytes(take(8)?.try_into().unwrap());
        let reads_pm = u64::from_le_bytes(take(8)?.try_into().unwrap());
        let writes_pm = u64::from_le_bytes(take(8)?.try_into().unwrap());

        let entry = match kind {
            0 => {
                let counter = read_v(take(V_SIZE)?).ok_or(PersistenceError::Corrupt("counter"))? as u64;
                Entry::new_counter(key, counter, ttl_unit, expires_at)
            }
            1 => {
                let value_size = read_v(take(V_SIZE)?).ok_or(PersistenceError::Corrupt("value size"))? as usize;
                let value = take(value_size)?.to_vec();
                Entry::new_raw(key, value, ttl_unit, expires_at)
            }
            _ => return Err(PersistenceError::Corrupt("unknown entry kind")),
        };

        entry.metrics.reads.store(reads, Ordering::Relaxed);
        entry.metrics.writes.store(writes, Ordering::Relaxed);
        entry.metrics.reads_accumulator.store(reads_acc, Ordering::Relaxed);
        entry.metrics.writes_accumulator.store(writes_acc, Ordering::Relaxed);
        entry.metrics.reads_per_minute.store(reads_pm, Ordering::Relaxed);
        entry.metrics.writes_per_minute.store(writes_pm, Ordering::Relaxed);

        storage.insert(entry);
    }

    Ok(storage)
}
