/// 64-bit key every identifier is folded into.
pub type IdentifierKey = u64;

/// Reserved key of the virtual reserve. Never produced for a real identifier in practice.
pub const VIRTUAL_KEY: IdentifierKey = 0;

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1 (multiply, then xor) over the raw bytes.
///
/// Collisions merge two identifiers' cash; that is accepted.
pub fn fnv1_64(bytes: &[u8]) -> IdentifierKey {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| {
        hash.wrapping_mul(FNV_PRIME) ^ u64::from(*byte)
    })
}

pub fn key_for(identifier: impl AsRef<[u8]>) -> IdentifierKey {
    fnv1_64(identifier.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_is_offset_basis() {
        assert_eq!(fnv1_64(b""), FNV_OFFSET_BASIS);
    }

    #[test]
    fn matches_fnv1_reference_vectors() {
        assert_eq!(fnv1_64(b"a"), 0xaf63_bd4c_8601_b7be);
        assert_eq!(fnv1_64(b"foobar"), 0x340d_8765_a4dd_a9c2);
    }

    #[test]
    fn str_and_bytes_agree() {
        assert_eq!(key_for("http://example.com/"), key_for(b"http://example.com/"));
        assert_ne!(key_for("http://example.com/a"), VIRTUAL_KEY);
    }
}
