use crate::error::{GameError, Result};
use crate::registry::Play;
use crate::storage::{from_millis, parse_amount, to_millis};
use crate::types::{Choice, Commitment, Outcome};
use rusqlite::{params, Connection, OptionalExtension, Row};

/// Raw column values, converted outside the rusqlite closure
struct PlayRow {
    commitment: String,
    initiator: String,
    responder: String,
    wager: String,
    opened_at: i64,
    deadline: i64,
    responder_choice: Option<u8>,
    responder_joined_at: Option<i64>,
    resolved: bool,
    outcome: Option<String>,
}

impl PlayRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            commitment: row.get(0)?,
            initiator: row.get(1)?,
            responder: row.get(2)?,
            wager: row.get(3)?,
            opened_at: row.get(4)?,
            deadline: row.get(5)?,
            responder_choice: row.get(6)?,
            responder_joined_at: row.get(7)?,
            resolved: row.get(8)?,
            outcome: row.get(9)?,
        })
    }

    fn into_play(self) -> Result<Play> {
        let corrupt = |e: crate::error::ValidationError| GameError::corrupt(e.to_string());

        let outcome: Option<Outcome> = match self.outcome {
            Some(json) => Some(serde_json::from_str(&json)?),
            None => None,
        };

        Ok(Play {
            commitment: self.commitment.parse().map_err(corrupt)?,
            initiator: self.initiator.parse().map_err(corrupt)?,
            responder: self.responder.parse().map_err(corrupt)?,
            wager: parse_amount(&self.wager)?,
            opened_at: from_millis(self.opened_at)?,
            deadline: from_millis(self.deadline)?,
            responder_choice: self
                .responder_choice
                .map(Choice::try_from)
                .transpose()
                .map_err(corrupt)?,
            responder_joined_at: self.responder_joined_at.map(from_millis).transpose()?,
            resolved: self.resolved,
            outcome,
        })
    }
}

const SELECT_PLAY: &str = "SELECT commitment, initiator, responder, wager, opened_at, deadline,
        responder_choice, responder_joined_at, resolved, outcome
     FROM plays";

pub struct PlayStore<'a> {
    conn: &'a Connection,
}

impl<'a> PlayStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn save_play(&self, play: &Play) -> Result<()> {
        let outcome = match &play.outcome {
            Some(outcome) => Some(serde_json::to_string(outcome)?),
            None => None,
        };

        self.conn.execute(
            "INSERT OR REPLACE INTO plays
             (commitment, initiator, responder, wager, opened_at, deadline,
              responder_choice, responder_joined_at, resolved, outcome)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                play.commitment.to_string(),
                play.initiator.to_string(),
                play.responder.to_string(),
                play.wager.to_string(),
                to_millis(play.opened_at),
                to_millis(play.deadline),
                play.responder_choice.map(Choice::code),
                play.responder_joined_at.map(to_millis),
                play.resolved,
                outcome,
            ],
        )?;

        Ok(())
    }

    pub fn load_play(&self, commitment: &Commitment) -> Result<Option<Play>> {
        let row = self
            .conn
            .query_row(
                &format!("{} WHERE commitment = ?1", SELECT_PLAY),
                params![commitment.to_string()],
                PlayRow::from_row,
            )
            .optional()?;

        row.map(PlayRow::into_play).transpose()
    }

    pub fn load_plays(&self) -> Result<Vec<Play>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY opened_at ASC", SELECT_PLAY))?;

        let rows = stmt.query_map([], PlayRow::from_row)?;

        let mut plays = Vec::new();
        for row in rows {
            plays.push(row?.into_play()?);
        }

        Ok(plays)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Storage;
    use crate::types::Address;
    use chrono::{DateTime, Duration};

    #[test]
    fn test_save_and_load_play() {
        let storage = Storage::in_memory().unwrap();
        let opened_at = DateTime::from_timestamp(1_700_000_000, 0).unwrap();
        let play = Play::new(
            Commitment::new([4; 32]),
            Address::new([1; 20]),
            Address::new([2; 20]),
            u128::MAX,
            opened_at,
            opened_at + Duration::seconds(3600),
        );

        storage.plays().save_play(&play).unwrap();
        assert_eq!(storage.plays().load_play(&play.commitment).unwrap(), Some(play.clone()));

        let settled = play
            .with_responder(Choice::Scissors, opened_at + Duration::seconds(5))
            .with_outcome(Outcome::Forfeited);
        storage.plays().save_play(&settled).unwrap();

        let loaded = storage.plays().load_plays().unwrap();
        assert_eq!(loaded, vec![settled]);
    }

    #[test]
    fn test_missing_play() {
        let storage = Storage::in_memory().unwrap();
        assert_eq!(
            storage.plays().load_play(&Commitment::new([0; 32])).unwrap(),
            None
        );
    }
}
