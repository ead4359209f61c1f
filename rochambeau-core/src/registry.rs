use crate::error::{StateError, ValidationError};
use crate::types::{Address, Amount, Choice, Commitment, Outcome};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Lifecycle of a play
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayState {
    Open,
    Joined,
    Resolved,
}

/// One wager between an initiator and a pinned responder
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Play {
    pub commitment: Commitment,
    pub initiator: Address,
    pub responder: Address,
    pub wager: Amount,
    pub opened_at: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
    pub responder_choice: Option<Choice>,
    pub responder_joined_at: Option<DateTime<Utc>>,
    pub resolved: bool,
    pub outcome: Option<Outcome>,
}

impl Play {
    pub fn new(
        commitment: Commitment,
        initiator: Address,
        responder: Address,
        wager: Amount,
        opened_at: DateTime<Utc>,
        deadline: DateTime<Utc>,
    ) -> Self {
        Self {
            commitment,
            initiator,
            responder,
            wager,
            opened_at,
            deadline,
            responder_choice: None,
            responder_joined_at: None,
            resolved: false,
            outcome: None,
        }
    }

    pub fn state(&self) -> PlayState {
        if self.resolved {
            PlayState::Resolved
        } else if self.responder_choice.is_some() {
            PlayState::Joined
        } else {
            PlayState::Open
        }
    }

    /// Wagers escrowed by this play and not yet paid out
    pub fn held(&self) -> Result<Amount, ValidationError> {
        match self.state() {
            PlayState::Open => Ok(self.wager),
            PlayState::Joined => self
                .wager
                .checked_mul(2)
                .ok_or(ValidationError::AmountOverflow),
            PlayState::Resolved => Ok(0),
        }
    }

    /// Copy of this play with the responder's move recorded
    pub fn with_responder(&self, choice: Choice, joined_at: DateTime<Utc>) -> Self {
        Self {
            responder_choice: Some(choice),
            responder_joined_at: Some(joined_at),
            ..self.clone()
        }
    }

    /// Copy of this play in its terminal state
    pub fn with_outcome(&self, outcome: Outcome) -> Self {
        Self {
            resolved: true,
            outcome: Some(outcome),
            ..self.clone()
        }
    }
}

/// Every play ever opened, keyed by commitment.
///
/// Plays are never removed: resolved ones stay as an audit record, which is
/// also what stops a commitment from being used twice.
#[derive(Debug, Clone, Default)]
pub struct PlayRegistry {
    plays: HashMap<Commitment, Play>,
}

impl PlayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_plays(plays: impl IntoIterator<Item = Play>) -> Self {
        Self {
            plays: plays.into_iter().map(|p| (p.commitment, p)).collect(),
        }
    }

    pub fn get(&self, commitment: &Commitment) -> Option<&Play> {
        self.plays.get(commitment)
    }

    pub fn contains(&self, commitment: &Commitment) -> bool {
        self.plays.contains_key(commitment)
    }

    pub fn len(&self) -> usize {
        self.plays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plays.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Play> {
        self.plays.values()
    }

    /// Checks that `updated` is an allowed successor of what is stored
    pub fn check_transition(&self, updated: &Play) -> Result<(), StateError> {
        let commitment = updated.commitment;
        match self.plays.get(&commitment) {
            None if updated.state() == PlayState::Open => Ok(()),
            None => Err(StateError::UnknownPlay(commitment)),
            Some(current) => {
                let allowed = matches!(
                    (current.state(), updated.state()),
                    (PlayState::Open, PlayState::Joined)
                        | (PlayState::Open, PlayState::Resolved)
                        | (PlayState::Joined, PlayState::Resolved)
                );
                if allowed {
                    Ok(())
                } else if current.resolved {
                    Err(StateError::AlreadyResolved(commitment))
                } else if current.state() == PlayState::Joined {
                    Err(StateError::ResponderAlreadyJoined(commitment))
                } else {
                    Err(StateError::PlayCommitmentReused(commitment))
                }
            }
        }
    }

    pub fn record(&mut self, play: Play) -> Result<(), StateError> {
        self.check_transition(&play)?;
        self.plays.insert(play.commitment, play);
        Ok(())
    }

    /// Wagers still escrowed by unresolved plays
    pub fn outstanding_wagers(&self) -> Result<Amount, ValidationError> {
        self.plays.values().try_fold(0u128, |acc, play| {
            acc.checked_add(play.held()?)
                .ok_or(ValidationError::AmountOverflow)
        })
    }
}
