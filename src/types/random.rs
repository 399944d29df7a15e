//! Request identifier generation.
//!
//! Identifiers are drawn from a pluggable byte source and mapped onto a fixed
//! alphabet that omits visually ambiguous characters (`0`, `1`, `i`, `l`, `o`).
//! Collision avoidance is the only requirement; there is no cryptographic
//! strength requirement.

use rand::RngCore;

use super::ids::RequestId;

/// Alphabet used for generated identifiers.
pub const SAFE_ALPHABET: &[u8] = b"23456789abcdefghjkmnpqrstuvwxyz";

/// Length of generated request identifiers.
pub const REQUEST_ID_LEN: usize = 12;

/// A source of random bytes.
///
/// Any `rand` generator is a source; tests plug in a seeded `StdRng` or a
/// fixed byte sequence.
pub trait RandomSource {
    fn fill(&mut self, buf: &mut [u8]);
}

impl<R: RngCore> RandomSource for R {
    fn fill(&mut self, buf: &mut [u8]) {
        self.fill_bytes(buf);
    }
}

/// Maps raw bytes onto [`SAFE_ALPHABET`], one character per byte.
pub fn map_to_alphabet(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| SAFE_ALPHABET[*b as usize % SAFE_ALPHABET.len()] as char)
        .collect()
}

/// Generates a new request identifier from the given source.
pub fn generate_request_id(source: &mut (impl RandomSource + ?Sized)) -> RequestId {
    let mut buf = [0u8; REQUEST_ID_LEN];
    source.fill(&mut buf);
    RequestId::new(map_to_alphabet(&buf))
}
