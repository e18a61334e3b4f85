//! Fixed-width values as they appear on the EVM stack, in memory and in
//! storage.
//!
//! A [`Word`] is kept in a canonical form so that the same numeric value is
//! always the same map key, no matter where it was read from: anything up to
//! 32 bytes is left-padded to exactly 32 bytes. Longer byte strings (hash
//! preimages sliced out of memory) are kept verbatim and are split back into
//! 32-byte chunks when rendered.

use std::{fmt, str::FromStr};

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use smallvec::SmallVec;
use thiserror::Error;

/// Width of one stack slot, in bytes.
pub const WORD_BYTES: usize = 32;

/// Width of an account address, in bytes.
pub const ADDRESS_BYTES: usize = 20;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WordError {
    #[error("invalid hex value `{0}`")]
    InvalidHex(String),

    #[error("expected {expected} bytes, got {actual}")]
    BadLength { expected: usize, actual: usize },
}

/// A big-endian value of at least one stack slot.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Word(SmallVec<[u8; WORD_BYTES]>);

impl Word {
    /// The all-zero stack word.
    pub fn zero() -> Self {
        Self(SmallVec::from_elem(0, WORD_BYTES))
    }

    /// Builds a word from raw big-endian bytes, applying the canonical
    /// left-padding for values that fit in one slot.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        if bytes.len() >= WORD_BYTES {
            return Self(SmallVec::from_slice(bytes));
        }
        let mut padded = SmallVec::from_elem(0, WORD_BYTES);
        padded[WORD_BYTES - bytes.len()..].copy_from_slice(bytes);
        Self(padded)
    }

    pub fn from_u64(value: u64) -> Self {
        Self::from_bytes(&value.to_be_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Whether this word spans more than one stack slot.
    pub fn is_wide(&self) -> bool {
        self.0.len() > WORD_BYTES
    }

    /// Splits a wide word into slot-sized words, left to right. The last
    /// chunk may be shorter than a slot and is padded like any short value.
    pub fn chunks(&self) -> impl Iterator<Item = Word> + '_ {
        self.0.chunks(WORD_BYTES).map(Word::from_bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }

    /// The numeric value, if it fits in a `u64`.
    pub fn to_u64(&self) -> Option<u64> {
        let (high, low) = self.0.split_at(self.0.len().saturating_sub(8));
        if high.iter().any(|b| *b != 0) {
            return None;
        }
        Some(low.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
    }

    /// Whether the value is numerically below `threshold`.
    pub fn is_below(&self, threshold: u64) -> bool {
        self.to_u64().is_some_and(|v| v < threshold)
    }

    /// The account address held in the low 20 bytes of the word.
    pub fn to_address(&self) -> Address {
        let mut out = [0u8; ADDRESS_BYTES];
        let bytes = self.as_bytes();
        let take = bytes.len().min(ADDRESS_BYTES);
        out[ADDRESS_BYTES - take..].copy_from_slice(&bytes[bytes.len() - take..]);
        Address(out)
    }

    /// Hex digits with leading zeros trimmed, without prefix.
    fn trimmed_hex(&self) -> String {
        let full = hex::encode(&self.0);
        let trimmed = full.trim_start_matches('0');
        if trimmed.is_empty() {
            "0".to_string()
        } else {
            trimmed.to_string()
        }
    }
}

impl Default for Word {
    fn default() -> Self {
        Self::zero()
    }
}

impl From<u64> for Word {
    fn from(value: u64) -> Self {
        Self::from_u64(value)
    }
}

impl From<Address> for Word {
    fn from(address: Address) -> Self {
        Self::from_bytes(&address.0)
    }
}

fn decode_hex(s: &str) -> Result<Vec<u8>, WordError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    let result = if digits.len() % 2 == 1 {
        hex::decode(format!("0{digits}"))
    } else {
        hex::decode(digits)
    };
    result.map_err(|_| WordError::InvalidHex(s.to_string()))
}

impl FromStr for Word {
    type Err = WordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        decode_hex(s).map(|bytes| Word::from_bytes(&bytes))
    }
}

impl fmt::Display for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", self.trimmed_hex())
    }
}

impl fmt::Debug for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Word({self})")
    }
}

impl fmt::LowerHex for Word {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(&self.0))
    }
}

impl Serialize for Word {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format!("0x{self:x}"))
    }
}

impl<'de> Deserialize<'de> for Word {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A 20-byte account address.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address(pub [u8; ADDRESS_BYTES]);

impl FromStr for Address {
    type Err = WordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex(s)?;
        let array = <[u8; ADDRESS_BYTES]>::try_from(bytes.as_slice()).map_err(|_| {
            WordError::BadLength {
                expected: ADDRESS_BYTES,
                actual: bytes.len(),
            }
        })?;
        Ok(Address(array))
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}

/// A 32-byte transaction hash.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TxHash(pub [u8; WORD_BYTES]);

impl FromStr for TxHash {
    type Err = WordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = decode_hex(s)?;
        let array = <[u8; WORD_BYTES]>::try_from(bytes.as_slice()).map_err(|_| {
            WordError::BadLength {
                expected: WORD_BYTES,
                actual: bytes.len(),
            }
        })?;
        Ok(TxHash(array))
    }
}

impl fmt::Display for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}

impl fmt::Debug for TxHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxHash({self})")
    }
}

impl Serialize for TxHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TxHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(de::Error::custom)
    }
}
