use crate::types::{Address, Amount, Commitment};
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GameError>;

/// Malformed or out-of-range input
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Invalid choice code: {0} (expected 1 = rock, 2 = paper, 3 = scissors)")]
    InvalidChoice(u8),

    #[error("Wager must be at least 1, got {0}")]
    MinimumWagerNotMet(Amount),

    #[error("Deadline offset {requested:?} exceeds the maximum play window of {max:?}")]
    DeadlineTooFar { requested: Duration, max: Duration },

    #[error("Zero can't be withdrawn")]
    ZeroWithdrawal,

    #[error("Amount overflow")]
    AmountOverflow,

    #[error("Secret longer than 32 bytes ({0} bytes)")]
    SecretTooLong(usize),

    #[error("Invalid {kind}: {reason}")]
    Malformed { kind: &'static str, reason: String },
}

/// Operation not valid for the play's current state
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Commitment {0} was already used for a play")]
    PlayCommitmentReused(Commitment),

    #[error("No open play matches commitment {0}")]
    UnknownPlay(Commitment),

    #[error("Responder has not joined play {0}")]
    ResponderNotJoined(Commitment),

    #[error("Responder already joined play {0}")]
    ResponderAlreadyJoined(Commitment),

    #[error("Play {0} is already resolved")]
    AlreadyResolved(Commitment),

    #[error("Engine is paused")]
    Paused,

    #[error("Engine is already paused")]
    AlreadyPaused,

    #[error("Engine is not paused")]
    NotPaused,
}

/// Wrong caller for a pinned role
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationError {
    #[error("Only {expected} can respond to this play, not {caller}")]
    WrongResponder { expected: Address, caller: Address },

    #[error("Only the owner can do this, not {0}")]
    NotOwner(Address),
}

/// Deadline or window condition unmet
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TemporalError {
    #[error("Play deadline {deadline} has passed")]
    DeadlineExpired { deadline: DateTime<Utc> },

    #[error("Deadline {deadline} is not over yet")]
    DeadlineNotReached { deadline: DateTime<Utc> },

    #[error("Result window is open until {available_at}")]
    ResultWindowNotElapsed { available_at: DateTime<Utc> },
}

/// Insufficient balance or deposit
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    #[error("Insufficient deposit: need {need}, got {available}")]
    InsufficientDeposit { need: Amount, available: Amount },

    #[error("Insufficient balance: need {need}, have {available}")]
    InsufficientBalance { need: Amount, available: Amount },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    State,
    Authorization,
    Temporal,
    Resource,
    Infrastructure,
}

#[derive(Error, Debug)]
pub enum GameError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Authorization error: {0}")]
    Authorization(#[from] AuthorizationError),

    #[error("Temporal error: {0}")]
    Temporal(#[from] TemporalError),

    #[error("Resource error: {0}")]
    Resource(#[from] ResourceError),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Transfer failed: {0}")]
    Transfer(String),

    #[error("Corrupt record: {0}")]
    Corrupt(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GameError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn transfer(msg: impl Into<String>) -> Self {
        Self::Transfer(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::Corrupt(msg.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::State(_) => ErrorKind::State,
            Self::Authorization(_) => ErrorKind::Authorization,
            Self::Temporal(_) => ErrorKind::Temporal,
            Self::Resource(_) => ErrorKind::Resource,
            _ => ErrorKind::Infrastructure,
        }
    }
}
