use crate::error::Result;
use crate::events::{GameEvent, RecordedEvent};
use crate::storage::{from_millis, to_millis};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};

/// Append-only journal of published events
pub struct EventStore<'a> {
    conn: &'a Connection,
}

impl<'a> EventStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn append(&self, event: &GameEvent, recorded_at: DateTime<Utc>) -> Result<i64> {
        let payload = serde_json::to_string(event)?;

        self.conn.execute(
            "INSERT INTO events (recorded_at, name, commitment, payload) VALUES (?1, ?2, ?3, ?4)",
            params![
                to_millis(recorded_at),
                event.name(),
                event.commitment().map(|c| c.to_string()),
                payload,
            ],
        )?;

        Ok(self.conn.last_insert_rowid())
    }

    pub fn load_events(&self) -> Result<Vec<RecordedEvent>> {
        self.load_events_after(0)
    }

    /// Events with a sequence number greater than `seq`, oldest first
    pub fn load_events_after(&self, seq: i64) -> Result<Vec<RecordedEvent>> {
        let mut stmt = self.conn.prepare(
            "SELECT seq, recorded_at, payload FROM events WHERE seq > ?1 ORDER BY seq ASC",
        )?;

        let rows = stmt.query_map(params![seq], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut events = Vec::new();
        for row in rows {
            let (seq, recorded_at, payload) = row?;
            events.push(RecordedEvent {
                seq,
                recorded_at: from_millis(recorded_at)?,
                event: serde_json::from_str(&payload)?,
            });
        }

        Ok(events)
    }
}
