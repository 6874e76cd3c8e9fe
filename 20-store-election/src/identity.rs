//! Random tokens: per-election candidate ids and leader payloads.

use std::fmt;

use rand::Rng;

/// Symbols used for both candidate ids and synthesized payloads.
pub const ALPHABET: [char; 62] = [
    '1', '2', '3', '4', '5', '6', '7', '8', '9', '0', 'a', 'b', 'c', 'd', 'e', 'f', 'g', 'h', 'i',
    'j', 'k', 'l', 'm', 'n', 'o', 'p', 'q', 'r', 's', 't', 'u', 'v', 'w', 'x', 'y', 'z', 'A', 'B',
    'C', 'D', 'E', 'F', 'G', 'H', 'I', 'J', 'K', 'L', 'M', 'N', 'O', 'P', 'Q', 'R', 'S', 'T', 'U',
    'V', 'W', 'X', 'Y', 'Z',
];

/// Length of a candidate id.
pub const CANDIDATE_ID_LEN: usize = 16;

/// Token a node pushes onto the candidate list for one election attempt.
///
/// Ids are not persisted and carry no meaning beyond "is the list head me?".
/// Uniqueness is probabilistic: 62^16 possibilities per draw.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CandidateId(String);

impl CandidateId {
    pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self(token(rng, CANDIDATE_ID_LEN))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CandidateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Synthesizes a leader message of random length in `1..max_len`.
pub fn random_payload<R: Rng + ?Sized>(rng: &mut R, max_len: usize) -> String {
    let len = rng.gen_range(1..max_len.max(2));
    token(rng, len)
}

fn token<R: Rng + ?Sized>(rng: &mut R, len: usize) -> String {
    (0..len)
        .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())])
        .collect()
}
