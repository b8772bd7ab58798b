//! Deterministic 32-bit rolling hash.
//!
//! The single digest primitive shared by event-id minting and the bloom
//! filter. A seeded polynomial rolling hash is deliberately cheap and
//! stable across platforms: the same bytes with the same seed always
//! produce the same 32-bit value, which is what inventory exchange
//! relies on when two replicas hash the same id independently.

/// Multiplier for the polynomial rolling hash (a small odd prime).
const ROLL: u32 = 31;

/// Hash `bytes` with the given `seed`.
///
/// Different seeds yield independent hash families, which is how the
/// bloom filter derives its `k` functions from one primitive.
#[must_use]
pub fn rolling_hash(seed: u32, bytes: &[u8]) -> u32 {
    let mut h = seed ^ 0x811c_9dc5;
    for &b in bytes {
        h = h.wrapping_mul(ROLL).wrapping_add(u32::from(b));
    }
    // Final avalanche so short inputs spread across the full range.
    h ^= h >> 16;
    h = h.wrapping_mul(0x45d9_f3b5);
    h ^ (h >> 13)
}

/// Hex digest of [`rolling_hash`] with seed 0.
#[must_use]
pub fn digest_hex(bytes: &[u8]) -> String {
    format!("{:08x}", rolling_hash(0, bytes))
}

/// Mint a fresh event id from its creation context.
///
/// The id combines two independently seeded digests over the actor,
/// timestamp, a caller-supplied sequence number, and the payload text,
/// giving 64 bits of spread in an `ev-` prefixed short id. Ids are
/// assigned once at creation and never reused; uniqueness within a
/// process is the caller's sequence counter, uniqueness across actors
/// comes from the actor/timestamp material.
#[must_use]
pub fn mint_event_id(actor: &str, timestamp_us: i64, seq: u64, payload: &str) -> String {
    let material = format!("{actor}\u{1f}{timestamp_us}\u{1f}{seq}\u{1f}{payload}");
    let lo = rolling_hash(0, material.as_bytes());
    let hi = rolling_hash(1, material.as_bytes());
    format!("ev-{hi:08x}{lo:08x}")
}
