//! Probabilistic membership summary for inventory exchange.
//!
//! Each replica summarises the ids it holds into a fixed-size bloom
//! filter and ships it inside the `INV` message. The receiving side asks
//! "might the remote have this id?" — a `false` answer is definitive
//! (no false negatives), so the send-list computed from it can over-send
//! on hash collisions but never under-send.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

use crate::hash::rolling_hash;

/// Number of bits in the filter. Fixed so two replicas always agree on
/// the wire size without negotiation.
pub const FILTER_BITS: usize = 1024;

/// Number of seeded hash functions applied per item.
pub const HASH_COUNT: u32 = 3;

const FILTER_BYTES: usize = FILTER_BITS / 8;

/// A fixed-size bloom filter over string items.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    bits: [u8; FILTER_BYTES],
    items: usize,
}

// Equality is over the bit array alone: the item count is bookkeeping
// that does not survive the wire and has no bearing on membership.
impl PartialEq for BloomFilter {
    fn eq(&self, other: &Self) -> bool {
        self.bits == other.bits
    }
}

impl Eq for BloomFilter {}

impl Default for BloomFilter {
    fn default() -> Self {
        Self::new()
    }
}

impl BloomFilter {
    /// Create an empty filter.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bits: [0; FILTER_BYTES],
            items: 0,
        }
    }

    /// Add an item to the filter.
    pub fn add(&mut self, item: &str) {
        for seed in 0..HASH_COUNT {
            let bit = Self::bit_index(seed, item);
            self.bits[bit / 8] |= 1 << (bit % 8);
        }
        self.items += 1;
    }

    /// Probabilistic membership test.
    ///
    /// `false` means the item was definitely never added; `true` means
    /// it probably was, with a false-positive rate governed by the
    /// filter size, hash count, and number of items added.
    #[must_use]
    pub fn might_contain(&self, item: &str) -> bool {
        (0..HASH_COUNT).all(|seed| {
            let bit = Self::bit_index(seed, item);
            self.bits[bit / 8] & (1 << (bit % 8)) != 0
        })
    }

    /// Number of items added so far.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.items
    }

    /// Returns `true` if nothing was ever added.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.items == 0
    }

    /// Compact wire form of the bit array.
    #[must_use]
    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.bits)
    }

    /// Reconstruct a filter from its wire form.
    ///
    /// The item count is not carried on the wire; membership queries do
    /// not need it, and the `INV` message carries its own total.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is not valid base64 or decodes to
    /// the wrong length.
    pub fn from_base64(encoded: &str) -> Result<Self, BloomDecodeError> {
        let raw = STANDARD
            .decode(encoded)
            .map_err(|e| BloomDecodeError::Base64(e.to_string()))?;
        let bits: [u8; FILTER_BYTES] = raw
            .try_into()
            .map_err(|v: Vec<u8>| BloomDecodeError::WrongLength(v.len()))?;
        Ok(Self { bits, items: 0 })
    }

    fn bit_index(seed: u32, item: &str) -> usize {
        rolling_hash(seed, item.as_bytes()) as usize % FILTER_BITS
    }
}

/// Error decoding a bloom filter from its base64 wire form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BloomDecodeError {
    /// The input was not valid base64.
    #[error("invalid base64: {0}")]
    Base64(String),
    /// The decoded payload was not exactly [`FILTER_BITS`] / 8 bytes.
    #[error("expected {FILTER_BYTES} bytes, got {0}")]
    WrongLength(usize),
}

// Serde: the wire form is the base64 string, never the raw bit array.
impl Serialize for BloomFilter {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_base64())
    }
}

impl<'de> Deserialize<'de> for BloomFilter {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_base64(&s).map_err(serde::de::Error::custom)
    }
}
