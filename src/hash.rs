//! Hashing and numeric primitives: double-SHA-256, scrypt proof-of-work,
//! compact-bits expansion and the big/little-endian conversions the rest of
//! the crate builds on.

use {
    super::*,
    bitcoin::hashes::{sha256d, Hash},
    scrypt::Params,
};

/// Double SHA-256, used for merkle nodes, coinbase txids and header
/// midstate checks. Distinct from the scrypt hash used for the PoW check
/// itself.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    sha256d::Hash::hash(data).to_byte_array()
}

/// Reverses the byte order of every 4-byte word in `bytes`, leaving word
/// boundaries in place. Used both to prepare an 80-byte block header for
/// scrypt hashing and to produce the `prevhash` field broadcast to clients,
/// which historically differs from the header's own little-endian encoding
/// by this word-level swap rather than a full byte reversal.
pub fn reverse_u32_words(bytes: &[u8]) -> Vec<u8> {
    assert!(bytes.len() % 4 == 0, "input must be a whole number of u32 words");

    bytes
        .chunks_exact(4)
        .flat_map(|word| word.iter().rev().copied())
        .collect()
}

/// scrypt(1024, 1, 1) proof-of-work hash of an 80-byte block header.
///
/// The header is first byte-swapped in 4-byte words (see
/// [`reverse_u32_words`]) to match the convention the reference scrypt
/// coins use before feeding the header to the KDF as both password and
/// salt.
pub fn scrypt_pow_hash(header: &[u8; 80]) -> Result<[u8; 32]> {
    let swapped = reverse_u32_words(header);

    let params = Params::new(10, 1, 1, 32).map_err(|source| {
        error::InvalidTemplateSnafu {
            reason: format!("invalid scrypt parameters: {source}"),
        }
        .build()
    })?;

    let mut out = [0u8; 32];
    scrypt::scrypt(&swapped, &swapped, &params, &mut out).map_err(|source| {
        error::InvalidTemplateSnafu {
            reason: format!("scrypt failed: {source}"),
        }
        .build()
    })?;

    Ok(out)
}

/// Expands nBits into a full 256-bit target, the way `Target::from_compact`
/// does for Bitcoin-family consensus rules.
pub fn expand_compact(bits: bitcoin::CompactTarget) -> bitcoin::Target {
    bitcoin::Target::from_compact(bits)
}

/// Interprets a 32-byte hash (internal byte order, as produced by
/// [`double_sha256`] or [`scrypt_pow_hash`]) as a 256-bit value for target
/// comparison.
pub fn hash_to_u256(hash: &[u8; 32]) -> primitive_types::U256 {
    let mut be = *hash;
    be.reverse();
    primitive_types::U256::from_big_endian(&be)
}

pub fn target_to_u256(target: bitcoin::Target) -> primitive_types::U256 {
    primitive_types::U256::from_big_endian(&target.to_be_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn double_sha256_is_stable() {
        let digest = double_sha256(b"hello");
        assert_eq!(
            hex::encode(digest),
            "9595c9df90075148eb06860365df33584b75bff782a510c6cd4883a419833d5"
        );
    }

    #[test]
    fn word_reversal_is_involutive() {
        let data: Vec<u8> = (0u8..80).collect();
        let once = reverse_u32_words(&data);
        let twice = reverse_u32_words(&once);
        assert_eq!(twice, data);
        assert_ne!(once, data);
    }

    #[test]
    fn word_reversal_preserves_word_boundaries() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        assert_eq!(
            reverse_u32_words(&data),
            vec![0x04, 0x03, 0x02, 0x01, 0x08, 0x07, 0x06, 0x05]
        );
    }

    #[test]
    fn scrypt_pow_hash_is_deterministic() {
        let header = [0u8; 80];
        let a = scrypt_pow_hash(&header).unwrap();
        let b = scrypt_pow_hash(&header).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn hash_to_u256_matches_target_ordering() {
        let low = hash_to_u256(&[0u8; 32]);
        let mut one = [0u8; 32];
        one[0] = 1;
        let high = hash_to_u256(&one);
        assert!(low < high);
    }
}
