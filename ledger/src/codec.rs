//! Binary layout of the state file.
//!
//! Big-endian throughout: magic, version, then the current, history and cleared
//! sections, each a u64 count followed by `(key, value)` pairs of eight bytes each.
//! Entry order inside a section is unspecified.

use std::{
    collections::HashMap,
    io::{self, Read, Write},
};

use time::OffsetDateTime;

use crate::{
    error::CodecError,
    hash::IdentifierKey,
    ledger::{CashLedger, LedgerState},
};

pub const MAGIC: &[u8; 8] = b"#opicdb#";
pub const FORMAT_VERSION: u64 = 1;

/// Size of the magic plus the version field.
pub const HEADER_LEN: usize = 16;
const ENTRY_LEN: usize = 16;

type CodecResult<T> = std::result::Result<T, CodecError>;

/// Writes `state` to `writer`, returning the number of bytes written.
pub(crate) fn encode<W: Write>(state: &LedgerState, writer: &mut W) -> io::Result<u64> {
    writer.write_all(MAGIC)?;
    writer.write_all(&FORMAT_VERSION.to_be_bytes())?;
    let mut written = HEADER_LEN as u64;

    written += write_section(writer, &state.current, |v| v.to_be_bytes())?;
    written += write_section(writer, &state.history, |v| v.to_be_bytes())?;
    written += write_section(writer, &state.cleared, |v| v.unix_timestamp().to_be_bytes())?;
    Ok(written)
}

/// Reads a full state from `reader` into a fresh [`LedgerState`].
pub(crate) fn decode<R: Read>(reader: &mut R) -> CodecResult<LedgerState> {
    let mut magic = [0u8; 8];
    reader
        .read_exact(&mut magic)
        .map_err(|err| CodecError::from_read(err, "magic"))?;
    if &magic != MAGIC {
        return Err(CodecError::BadMagic { found: magic });
    }

    let version = read_u64(reader, "version")?;
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion { found: version });
    }

    let current = read_section(reader, "current", |_, raw| Ok(f64::from_be_bytes(raw)))?;
    let history = read_section(reader, "history", |_, raw| Ok(f64::from_be_bytes(raw)))?;
    let cleared = read_section(reader, "cleared", |key, raw| {
        let seconds = i64::from_be_bytes(raw);
        OffsetDateTime::from_unix_timestamp(seconds)
            .map_err(|_| CodecError::InvalidTimestamp { key, seconds })
    })?;

    Ok(LedgerState {
        current,
        history,
        cleared,
    })
}

pub(crate) fn encode_to_vec(state: &LedgerState) -> io::Result<Vec<u8>> {
    let entries = state.current.len() + state.history.len() + state.cleared.len();
    let mut buf = Vec::with_capacity(HEADER_LEN + 3 * 8 + entries * ENTRY_LEN);
    encode(state, &mut buf)?;
    Ok(buf)
}

pub(crate) fn decode_from_slice(mut bytes: &[u8]) -> CodecResult<LedgerState> {
    decode(&mut bytes)
}

fn write_section<W, V, F>(
    writer: &mut W,
    entries: &HashMap<IdentifierKey, V>,
    value_bytes: F,
) -> io::Result<u64>
where
    W: Write,
    F: Fn(&V) -> [u8; 8],
{
    writer.write_all(&(entries.len() as u64).to_be_bytes())?;
    for (key, value) in entries {
        writer.write_all(&key.to_be_bytes())?;
        writer.write_all(&value_bytes(value))?;
    }
    Ok(8 + (entries.len() * ENTRY_LEN) as u64)
}

fn read_section<R, V, F>(
    reader: &mut R,
    section: &'static str,
    parse_value: F,
) -> CodecResult<HashMap<IdentifierKey, V>>
where
    R: Read,
    F: Fn(IdentifierKey, [u8; 8]) -> CodecResult<V>,
{
    let count = read_u64(reader, section)?;
    // The count is untrusted; let the map grow as entries actually arrive.
    let mut entries = HashMap::with_capacity(count.min(1 << 16) as usize);
    let mut buf = [0u8; ENTRY_LEN];
    for _ in 0..count {
        reader
            .read_exact(&mut buf)
            .map_err(|err| CodecError::from_read(err, section))?;
        let (key, value) = buf.split_at(8);
        let key = IdentifierKey::from_be_bytes(to_array(key));
        entries.insert(key, parse_value(key, to_array(value))?);
    }
    Ok(entries)
}

fn read_u64<R: Read>(reader: &mut R, section: &'static str) -> CodecResult<u64> {
    let mut buf = [0u8; 8];
    reader
        .read_exact(&mut buf)
        .map_err(|err| CodecError::from_read(err, section))?;
    Ok(u64::from_be_bytes(buf))
}

impl CashLedger {
    /// Streams the ledger to `writer` under the shared lock.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> io::Result<u64> {
        self.with_state(|state| encode(state, writer))
    }

    /// Like [`Self::write_to`], also returning the generation that was encoded.
    pub(crate) fn write_versioned<W: Write>(&self, writer: &mut W) -> io::Result<(u64, u64)> {
        let (written, generation) = self.with_state_at(|state| encode(state, writer));
        Ok((written?, generation))
    }

    /// Decodes a full state from `reader` and swaps it in only if decoding succeeds.
    /// A successful read leaves the ledger clean.
    pub fn read_from<R: Read>(&self, reader: &mut R) -> Result<(), CodecError> {
        let state = decode(reader)?;
        self.replace_state(state);
        Ok(())
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        self.with_state(encode_to_vec)
    }

    pub fn load_bytes(&self, bytes: &[u8]) -> Result<(), CodecError> {
        let state = decode_from_slice(bytes)?;
        self.replace_state(state);
        Ok(())
    }
}

fn to_array(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    fn sample_state() -> LedgerState {
        let mut state = LedgerState::default();
        state.current.insert(0, 0.4);
        state.current.insert(7, 0.1);
        state.current.insert(u64::MAX, 1.5);
        state.history.insert(7, 1.0);
        state
            .cleared
            .insert(7, datetime!(2024-03-01 12:00:00 UTC));
        state
            .cleared
            .insert(9, datetime!(1969-07-20 20:17:40 UTC));
        state
    }

    #[test]
    fn empty_state_layout_is_exact() {
        let bytes = encode_to_vec(&LedgerState::default()).unwrap();
        let mut expected = Vec::new();
        expected.extend_from_slice(b"#opicdb#");
        expected.extend_from_slice(&[0, 0, 0, 0, 0, 0, 0, 1]);
        expected.extend_from_slice(&[0u8; 24]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn single_entry_layout_is_big_endian() {
        let mut state = LedgerState::default();
        state.current.insert(0x0102_0304_0506_0708, 1.0);
        state.cleared.insert(
            0x0102_0304_0506_0708,
            OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(256),
        );
        let bytes = encode_to_vec(&state).unwrap();

        assert_eq!(&bytes[16..24], &1u64.to_be_bytes());
        assert_eq!(&bytes[24..32], &[1, 2, 3, 4, 5, 6, 7, 8]);
        assert_eq!(&bytes[32..40], &[0x3f, 0xf0, 0, 0, 0, 0, 0, 0]);
        assert_eq!(&bytes[40..48], &0u64.to_be_bytes());
        assert_eq!(&bytes[48..56], &1u64.to_be_bytes());
        assert_eq!(&bytes[64..72], &[0, 0, 0, 0, 0, 0, 1, 0]);
        assert_eq!(bytes.len(), 72);
    }

    #[test]
    fn decode_restores_every_entry() {
        let state = sample_state();
        let bytes = encode_to_vec(&state).unwrap();
        let mut written = Vec::new();
        assert_eq!(encode(&state, &mut written).unwrap(), bytes.len() as u64);
        assert_eq!(decode_from_slice(&bytes).unwrap(), state);
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = encode_to_vec(&sample_state()).unwrap();
        bytes[0] = b'!';
        let err = decode_from_slice(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::BadMagic { found } if &found[1..] == b"opicdb#"));
    }

    #[test]
    fn unknown_version_is_rejected() {
        let mut bytes = encode_to_vec(&sample_state()).unwrap();
        bytes[15] = 2;
        let err = decode_from_slice(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::UnsupportedVersion { found: 2 }));
    }

    #[test]
    fn truncation_reports_section() {
        let bytes = encode_to_vec(&sample_state()).unwrap();
        // header + current count + half of the first current entry
        let err = decode_from_slice(&bytes[..HEADER_LEN + 8 + 4]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { section: "current" }));

        let err = decode_from_slice(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { section: "cleared" }));

        let err = decode_from_slice(&bytes[..4]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { section: "magic" }));
    }

    #[test]
    fn out_of_range_timestamp_is_rejected() {
        let mut bytes = encode_to_vec(&LedgerState::default()).unwrap();
        bytes.truncate(bytes.len() - 8);
        bytes.extend_from_slice(&1u64.to_be_bytes());
        bytes.extend_from_slice(&42u64.to_be_bytes());
        bytes.extend_from_slice(&i64::MAX.to_be_bytes());
        let err = decode_from_slice(&bytes).unwrap_err();
        assert!(matches!(
            err,
            CodecError::InvalidTimestamp { key: 42, seconds: i64::MAX }
        ));
    }

    #[test]
    fn failed_decode_leaves_ledger_untouched() {
        let ledger = CashLedger::new();
        ledger.initialise(2.0, &["a", "b"]).unwrap();
        let before = ledger.to_bytes().unwrap();

        let other = CashLedger::new();
        other.initialise(9.0, &["x"]).unwrap();
        let bytes = other.to_bytes().unwrap();
        let err = ledger.load_bytes(&bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { .. }));
        assert_eq!(ledger.to_bytes().unwrap(), before);

        ledger.read_from(&mut bytes.as_slice()).unwrap();
        assert_eq!(ledger.get("x").current, 9.0);
        assert_eq!(ledger.get("a").current, 0.0);
    }

    #[test]
    fn huge_count_without_entries_is_truncation() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_be_bytes());
        bytes.extend_from_slice(&u64::MAX.to_be_bytes());
        let err = decode_from_slice(&bytes).unwrap_err();
        assert!(matches!(err, CodecError::Truncated { section: "current" }));
    }
}
