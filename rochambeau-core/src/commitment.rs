use crate::error::ValidationError;
use crate::types::{Address, Choice, Commitment, GameContext, Secret};
use rand::RngCore;
use sha2::{Digest, Sha256};

const DOMAIN_TAG: &[u8] = b"rochambeau/commit/v1";

/// Trait for commitment schemes
///
/// Implementations must be deterministic and collision resistant, and must
/// mix in both the game context and the caller so a commitment can't be
/// replayed against another engine or by another account.
pub trait CommitmentHasher: Send + Sync {
    fn digest(
        &self,
        choice: Choice,
        secret: &Secret,
        context: &GameContext,
        caller: &Address,
    ) -> Commitment;

    /// Same as [`digest`](Self::digest) but takes the raw choice code
    fn commit(
        &self,
        choice_code: u8,
        secret: &Secret,
        context: &GameContext,
        caller: &Address,
    ) -> Result<Commitment, ValidationError> {
        let choice = Choice::try_from(choice_code)?;
        Ok(self.digest(choice, secret, context, caller))
    }
}

/// SHA-256 over fixed-width fields
#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

impl CommitmentHasher for Sha256Hasher {
    fn digest(
        &self,
        choice: Choice,
        secret: &Secret,
        context: &GameContext,
        caller: &Address,
    ) -> Commitment {
        let mut hasher = Sha256::new();
        hasher.update(DOMAIN_TAG);
        hasher.update([choice.code()]);
        hasher.update(secret.as_bytes());
        hasher.update(context.as_bytes());
        hasher.update(caller.as_bytes());
        Commitment::new(hasher.finalize().into())
    }
}

/// Rnd secret for commitment
pub fn generate_secret() -> Secret {
    let mut secret = [0u8; 32];
    rand::rng().fill_bytes(&mut secret);
    Secret::new(secret)
}
