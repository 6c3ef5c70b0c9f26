//! 64-bit content fingerprints
//!
//! A simhash over word tokens: every token votes on every bit position of the
//! fingerprint with its own 64-bit hash, so documents sharing most tokens end
//! up with fingerprints a small Hamming distance apart.

const FNV_OFFSET_BASIS: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// FNV-1a, 64-bit variant
///
/// Stable across processes and platforms, which also makes it suitable for
/// partition routing.
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Splits text into lowercase alphanumeric word tokens
///
/// Punctuation separates tokens and is otherwise ignored, so `systems.` and
/// `systems!` yield the same token.
fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Computes the simhash fingerprint of a text
///
/// Returns None when the text has no tokens.
pub fn simhash(text: &str) -> Option<u64> {
    let mut votes = [0i64; 64];
    let mut seen_any = false;

    for token in tokens(text) {
        seen_any = true;
        let hash = fnv1a_64(token.as_bytes());
        for (bit, vote) in votes.iter_mut().enumerate() {
            if hash & (1u64 << bit) != 0 {
                *vote += 1;
            } else {
                *vote -= 1;
            }
        }
    }

    if !seen_any {
        return None;
    }

    let fingerprint = votes
        .iter()
        .enumerate()
        .filter(|(_, vote)| **vote > 0)
        .fold(0u64, |acc, (bit, _)| acc | (1u64 << bit));

    Some(fingerprint)
}

/// Number of differing bits between two fingerprints
pub fn hamming_distance(a: u64, b: u64) -> u32 {
    (a ^ b).count_ones()
}
