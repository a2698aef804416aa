//! Small, strongly-typed wire values shared by the template registry and
//! its callers: job identifiers, header fields, extranonces and the
//! derived difficulty/target types built on top of them.

use {
    super::*,
    bitcoin::{BlockHash, CompactTarget, Target, TxMerkleNode},
    serde_with::{DeserializeFromStr, SerializeDisplay},
    std::{
        fmt,
        ops::{BitAnd, BitOr, BitXor, Not},
        str::FromStr,
        sync::LazyLock,
    },
};

/// A monotonically increasing job identifier, handed out by the registry
/// and echoed back on share submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr)]
pub struct JobId(u64);

impl JobId {
    pub fn first() -> Self {
        JobId(0)
    }

    pub fn next(self) -> Self {
        JobId(self.0.wrapping_add(1))
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

impl FromStr for JobId {
    type Err = error::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(JobId(u64::from_str_radix(s, 16).map_err(|_| {
            error::MalformedShareSnafu {
                reason: format!("invalid job id {s}"),
            }
            .build()
        })?))
    }
}

/// Compact-bits target, as sent in `mining.notify` and compared against on
/// share validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
pub struct Nbits(CompactTarget);

impl Nbits {
    pub fn target(self) -> Target {
        hash::expand_compact(self.0)
    }
}

impl From<CompactTarget> for Nbits {
    fn from(compact: CompactTarget) -> Self {
        Nbits(compact)
    }
}

impl From<Nbits> for CompactTarget {
    fn from(nbits: Nbits) -> Self {
        nbits.0
    }
}

impl fmt::Display for Nbits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0.to_consensus())
    }
}

impl FromStr for Nbits {
    type Err = error::Error;

    fn from_str(s: &str) -> Result<Self> {
        let bits = u32::from_str_radix(s, 16).map_err(|_| {
            error::MalformedShareSnafu {
                reason: format!("invalid nbits {s}"),
            }
            .build()
        })?;
        Ok(Nbits(CompactTarget::from_consensus(bits)))
    }
}

/// Header `nTime` field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, SerializeDisplay, DeserializeFromStr)]
pub struct Ntime(u32);

impl Ntime {
    pub fn now() -> Self {
        Ntime(
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("system clock before unix epoch")
                .as_secs() as u32,
        )
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for Ntime {
    fn from(value: u32) -> Self {
        Ntime(value)
    }
}

impl fmt::Display for Ntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl FromStr for Ntime {
    type Err = error::Error;

    fn from_str(s: &str) -> Result<Self> {
        let value = u32::from_str_radix(s, 16).map_err(|_| {
            error::MalformedShareSnafu {
                reason: format!("invalid ntime {s}"),
            }
            .build()
        })?;
        Ok(Ntime(value))
    }
}

/// Header `nonce` field, as submitted by a miner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct Nonce(u32);

impl Nonce {
    pub fn as_u32(self) -> u32 {
        self.0
    }
}

impl From<u32> for Nonce {
    fn from(value: u32) -> Self {
        Nonce(value)
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

impl FromStr for Nonce {
    type Err = error::Error;

    fn from_str(s: &str) -> Result<Self> {
        let value = u32::from_str_radix(s, 16).map_err(|_| {
            error::MalformedShareSnafu {
                reason: format!("invalid nonce {s}"),
            }
            .build()
        })?;
        Ok(Nonce(value))
    }
}

/// Header `nVersion`, with the bitwise operators version-rolling needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, SerializeDisplay, DeserializeFromStr)]
pub struct Version(i32);

impl Version {
    pub fn as_i32(self) -> i32 {
        self.0
    }
}

impl From<i32> for Version {
    fn from(value: i32) -> Self {
        Version(value)
    }
}

impl BitAnd for Version {
    type Output = Version;
    fn bitand(self, rhs: Self) -> Self::Output {
        Version(self.0 & rhs.0)
    }
}

impl BitOr for Version {
    type Output = Version;
    fn bitor(self, rhs: Self) -> Self::Output {
        Version(self.0 | rhs.0)
    }
}

impl BitXor for Version {
    type Output = Version;
    fn bitxor(self, rhs: Self) -> Self::Output {
        Version(self.0 ^ rhs.0)
    }
}

impl Not for Version {
    type Output = Version;
    fn not(self) -> Self::Output {
        Version(!self.0)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0 as u32)
    }
}

impl FromStr for Version {
    type Err = error::Error;

    fn from_str(s: &str) -> Result<Self> {
        let value = u32::from_str_radix(s, 16).map_err(|_| {
            error::MalformedShareSnafu {
                reason: format!("invalid version {s}"),
            }
            .build()
        })?;
        Ok(Version(value as i32))
    }
}

/// The previous block hash as it appears in the header: internal byte
/// order, ready for direct consensus encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PrevHash(BlockHash);

impl PrevHash {
    pub fn as_byte_array(&self) -> [u8; 32] {
        *bitcoin::hashes::Hash::as_byte_array(&self.0)
    }

    /// The form historically broadcast to clients in `mining.notify`: the
    /// header's internal bytes with each 4-byte word reversed, distinct
    /// from both the raw internal order and the reversed-hex display
    /// convention used for block explorers.
    pub fn wire_hex(&self) -> String {
        hex::encode(hash::reverse_u32_words(&self.as_byte_array()))
    }
}

impl From<BlockHash> for PrevHash {
    fn from(hash: BlockHash) -> Self {
        PrevHash(hash)
    }
}

impl From<PrevHash> for BlockHash {
    fn from(prev: PrevHash) -> Self {
        prev.0
    }
}

impl fmt::Display for PrevHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for PrevHash {
    type Err = error::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(PrevHash(s.parse().map_err(|_| {
            error::MalformedShareSnafu {
                reason: format!("invalid previous block hash {s}"),
            }
            .build()
        })?))
    }
}

/// A merkle tree node: either a branch hash or the coinbase txid.
pub type MerkleNode = TxMerkleNode;

/// An allocated extranonce range, spliced into the coinbase scriptSig
/// between `coinb1` and `coinb2`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, SerializeDisplay, DeserializeFromStr)]
pub struct Extranonce(Vec<u8>);

impl Extranonce {
    pub fn new(bytes: Vec<u8>) -> Self {
        Extranonce(bytes)
    }

    pub fn generate(len: usize) -> Self {
        use rand::RngCore;
        let mut bytes = vec![0u8; len];
        rand::rng().fill_bytes(&mut bytes);
        Extranonce(bytes)
    }

    pub fn zeroed(len: usize) -> Self {
        Extranonce(vec![0u8; len])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Wrapping increment of the extranonce treated as a big-endian
    /// counter, used by session-level extranonce2 rolling.
    pub fn increment_wrapping(&mut self) {
        for byte in self.0.iter_mut().rev() {
            let (next, overflow) = byte.overflowing_add(1);
            *byte = next;
            if !overflow {
                break;
            }
        }
    }
}

impl fmt::Display for Extranonce {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0))
    }
}

impl FromStr for Extranonce {
    type Err = error::Error;

    fn from_str(s: &str) -> Result<Self> {
        Ok(Extranonce(hex::decode(s).context(error::HexSnafu)?))
    }
}

/// nBits target expressed as a mining-pool "difficulty 1" multiple, the
/// form used for vardiff and the per-session share target.
pub static DIFFICULTY_1_TARGET: LazyLock<primitive_types::U256> =
    LazyLock::new(|| hash::target_to_u256(Target::MAX));

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Difficulty(f64);

impl Difficulty {
    pub fn new(value: f64) -> Self {
        assert!(value.is_finite() && value > 0.0, "difficulty must be finite and > 0");
        Difficulty(value)
    }

    pub fn as_f64(self) -> f64 {
        self.0
    }

    /// The integer target a share at this difficulty must not exceed,
    /// `floor(difficulty_1_target / difficulty)`.
    pub fn to_target(self) -> primitive_types::U256 {
        const SCALE: u64 = 1_000_000_000;
        let numerator = DIFFICULTY_1_TARGET.saturating_mul(primitive_types::U256::from(SCALE));
        let denominator = (self.0 * SCALE as f64).round() as u64;
        if denominator == 0 {
            primitive_types::U256::MAX
        } else {
            numerator / primitive_types::U256::from(denominator)
        }
    }
}

impl From<Nbits> for Difficulty {
    fn from(nbits: Nbits) -> Self {
        Difficulty(nbits.target().difficulty_float())
    }
}
