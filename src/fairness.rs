//! Commit/reveal fairness generator.
//!
//! A round's crash point is fixed before any bet is accepted: the server
//! seed is generated, its SHA-256 hash is published, and the crash point is
//! derived from `HMAC-SHA256(key = serverSeed, msg = clientSeed ":" nonce)`.
//! After the round ends the seed is revealed so anyone can recompute both
//! the hash and the crash point.

use crate::errors::GameError;
use hmac::{Hmac, Mac};
use rand_core::{OsRng, RngCore};
use sha2::{Digest, Sha256};

type HmacSha256 = Hmac<Sha256>;

const TWO_POW_52: f64 = 4_503_599_627_370_496.0;

/// Holds one round's secret server seed and its published commitment.
pub struct FairnessGenerator {
    server_seed: [u8; 32],
    server_seed_hash: String,
}

impl FairnessGenerator {
    /// Generate a fresh server seed and compute its commitment hash.
    ///
    /// Entropy failure is fatal to round creation; there is no fallback
    /// randomness and a seed is never reused.
    pub fn commit() -> Result<Self, GameError> {
        let mut server_seed = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut server_seed)
            .map_err(|e| GameError::EntropyFailure(e.to_string()))?;
        Ok(Self::from_seed(server_seed))
    }

    /// Construct from a known seed. Used for round replay and verification
    /// tooling; production rounds go through [`FairnessGenerator::commit`].
    pub fn from_seed(server_seed: [u8; 32]) -> Self {
        let server_seed_hash = hex::encode(Sha256::digest(server_seed));
        Self {
            server_seed,
            server_seed_hash,
        }
    }

    /// The published commitment: hex SHA-256 of the server seed.
    pub fn seed_hash(&self) -> &str {
        &self.server_seed_hash
    }

    /// Derive this round's crash point. Pure in the seed, client seed,
    /// nonce and house edge; identical inputs always yield the same output.
    pub fn crash_point(&self, client_seed: &str, nonce: u64, house_edge: f64) -> f64 {
        derive_crash_point(&self.server_seed, client_seed, nonce, house_edge)
    }

    /// The hex server seed. The engine keeps this private until the round
    /// reaches its terminal phase, then publishes it in the `crashed` event.
    pub fn reveal(&self) -> String {
        hex::encode(self.server_seed)
    }
}

/// Source of per-round fairness generators. The engine pulls one fresh
/// generator per round; a failing source aborts round creation.
pub trait SeedSource: Send {
    fn next(&mut self) -> Result<FairnessGenerator, GameError>;
}

/// Production source: a cryptographically random seed per round.
pub struct OsSeedSource;

impl SeedSource for OsSeedSource {
    fn next(&mut self) -> Result<FairnessGenerator, GameError> {
        FairnessGenerator::commit()
    }
}

/// Replay source with a fixed seed schedule, for deterministic round
/// reconstruction and tests. Once the schedule is exhausted the final seed
/// repeats (the advancing nonce still varies the crash points).
pub struct FixedSeedSource {
    seeds: Vec<[u8; 32]>,
    next: usize,
}

impl FixedSeedSource {
    pub fn new(seeds: Vec<[u8; 32]>) -> Self {
        assert!(!seeds.is_empty(), "FixedSeedSource needs at least one seed");
        Self { seeds, next: 0 }
    }
}

impl SeedSource for FixedSeedSource {
    fn next(&mut self) -> Result<FairnessGenerator, GameError> {
        let index = self.next.min(self.seeds.len() - 1);
        self.next += 1;
        Ok(FairnessGenerator::from_seed(self.seeds[index]))
    }
}

/// The crash-point transform: 52 bits of HMAC-SHA256 output mapped through
/// a house-edge-adjusted inverse exponential, truncated to cents and
/// clamped to 1.00.
pub fn derive_crash_point(server_seed: &[u8], client_seed: &str, nonce: u64, house_edge: f64) -> f64 {
    let mut mac =
        HmacSha256::new_from_slice(server_seed).expect("HMAC-SHA256 accepts any key length");
    mac.update(client_seed.as_bytes());
    mac.update(b":");
    mac.update(nonce.to_string().as_bytes());
    let digest = mac.finalize().into_bytes();

    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    // Top 52 bits of the digest, uniform in [0, 2^52).
    let r = u64::from_be_bytes(prefix) >> 12;

    let raw = (TWO_POW_52 / (r as f64 + 1.0)) * (1.0 - house_edge);
    let point = (raw * 100.0).floor() / 100.0;
    point.max(1.0)
}

/// Check a revealed seed against its published commitment hash.
pub fn verify_seed(seed_hex: &str, published_hash: &str) -> bool {
    match hex::decode(seed_hex) {
        Ok(bytes) => hex::encode(Sha256::digest(&bytes)) == published_hash,
        Err(_) => false,
    }
}

/// Recompute a crash point from a revealed seed, for third-party
/// verification of a published round.
pub fn recompute_crash_point(
    seed_hex: &str,
    client_seed: &str,
    nonce: u64,
    house_edge: f64,
) -> Option<f64> {
    let seed = hex::decode(seed_hex).ok()?;
    Some(derive_crash_point(&seed, client_seed, nonce, house_edge))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commitment_matches_reveal() {
        let generator = FairnessGenerator::commit().expect("entropy available");
        let revealed = generator.reveal();
        assert!(verify_seed(&revealed, generator.seed_hash()));
        assert!(!verify_seed(&revealed, "00"));
    }

    #[test]
    fn derivation_is_deterministic() {
        let seed = [7u8; 32];
        let a = derive_crash_point(&seed, "client", 42, 0.03);
        let b = derive_crash_point(&seed, "client", 42, 0.03);
        assert_eq!(a, b);

        // Different nonce, different round.
        let c = derive_crash_point(&seed, "client", 43, 0.03);
        assert_ne!(a, c);
    }

    #[test]
    fn crash_point_never_below_one() {
        let seed = [0xffu8; 32];
        for nonce in 0..500 {
            let point = derive_crash_point(&seed, "client", nonce, 0.03);
            assert!(point >= 1.0, "nonce {} produced {}", nonce, point);
            // Truncated to cents.
            assert_eq!(point, (point * 100.0).floor() / 100.0);
        }
    }

    #[test]
    fn recompute_round_trip() {
        let generator = FairnessGenerator::from_seed([9u8; 32]);
        let published = generator.crash_point("house-seed", 17, 0.03);
        let recomputed =
            recompute_crash_point(&generator.reveal(), "house-seed", 17, 0.03).unwrap();
        assert_eq!(published, recomputed);
    }

    #[test]
    fn invalid_hex_fails_verification() {
        assert!(!verify_seed("not-hex", "whatever"));
        assert!(recompute_crash_point("not-hex", "c", 1, 0.03).is_none());
    }
}
