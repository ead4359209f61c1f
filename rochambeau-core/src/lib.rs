//! Rochambeau - escrow-backed commit-reveal rock/paper/scissors
//!
//! An initiator commits to a hidden choice and escrows a wager against a
//! pinned responder. The responder matches the wager with a visible choice,
//! and the initiator reveals to settle the pot. Timeouts on either side let
//! the honest party recover funds, and balances leave the engine only through
//! a pull-payment withdrawal.

pub mod clock;
pub mod commitment;
pub mod engine;
pub mod error;
pub mod escrow;
pub mod events;
pub mod registry;
pub mod storage;
pub mod types;
pub mod withdrawal;

#[cfg(test)]
mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use commitment::{generate_secret, CommitmentHasher, Sha256Hasher};
pub use engine::{Conservation, EngineConfig, GameEngine};
pub use error::{
    AuthorizationError, ErrorKind, GameError, ResourceError, Result, StateError, TemporalError,
    ValidationError,
};
pub use escrow::{EscrowLedger, Totals};
pub use events::{EventBus, GameEvent, RecordedEvent};
pub use registry::{Play, PlayRegistry, PlayState};
pub use types::{Address, Amount, Choice, Commitment, GameContext, Outcome, Secret};
pub use withdrawal::{FundsTransfer, RecordingTransfer, WithdrawalGateway};
