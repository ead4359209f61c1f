pub mod balance_store;
pub mod event_store;
pub mod play_store;

pub use balance_store::BalanceStore;
pub use event_store::EventStore;
pub use play_store::PlayStore;

use crate::error::{GameError, Result};
use crate::escrow::{LedgerChanges, Totals};
use crate::events::GameEvent;
use crate::registry::Play;
use crate::types::Amount;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

pub(crate) const META_CONTEXT: &str = "context";
pub(crate) const META_CONFIG: &str = "config";
pub(crate) const META_OWNER: &str = "owner";
pub(crate) const META_PAUSED: &str = "paused";
const META_TOTAL_DEPOSITS: &str = "total_deposits";
const META_TOTAL_WITHDRAWALS: &str = "total_withdrawals";

/// Everything one operation writes, committed in a single transaction
#[derive(Debug, Default)]
pub struct Batch<'a> {
    pub play: Option<&'a Play>,
    pub balances: Option<&'a LedgerChanges>,
    pub totals: Option<Totals>,
    pub paused: Option<bool>,
    pub events: &'a [GameEvent],
}

/// sqlite file backing a durable engine
pub struct Storage {
    conn: Connection,
}

impl Storage {
    pub async fn open(db_path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let conn = Connection::open(db_path)?;
        let storage = Self { conn };
        storage.init_schema()?;
        Ok(storage)
    }

    pub fn in_memory() -> Result<Self> {
        let storage = Self {
            conn: Connection::open_in_memory()?,
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<()> {
        // Engine identity, config, running flag and lifetime totals
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            )",
            [],
        )?;

        // Plays are never deleted
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS plays (
                commitment TEXT PRIMARY KEY,
                initiator TEXT NOT NULL,
                responder TEXT NOT NULL,
                wager TEXT NOT NULL,
                opened_at INTEGER NOT NULL,
                deadline INTEGER NOT NULL,
                responder_choice INTEGER,
                responder_joined_at INTEGER,
                resolved INTEGER NOT NULL,
                outcome TEXT
            )",
            [],
        )?;

        // Escrow balances, amounts as decimal text
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS balances (
                address TEXT PRIMARY KEY,
                amount TEXT NOT NULL
            )",
            [],
        )?;

        // Event journal
        self.conn.execute(
            "CREATE TABLE IF NOT EXISTS events (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                recorded_at INTEGER NOT NULL,
                name TEXT NOT NULL,
                commitment TEXT,
                payload TEXT NOT NULL
            )",
            [],
        )?;

        Ok(())
    }

    pub fn plays(&self) -> PlayStore<'_> {
        PlayStore::new(&self.conn)
    }

    pub fn balances(&self) -> BalanceStore<'_> {
        BalanceStore::new(&self.conn)
    }

    pub fn events(&self) -> EventStore<'_> {
        EventStore::new(&self.conn)
    }

    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row("SELECT value FROM meta WHERE key = ?1", params![key], |row| {
                row.get(0)
            })
            .optional()?;
        Ok(value)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        set_meta(&self.conn, key, value)
    }

    pub fn load_totals(&self) -> Result<Totals> {
        Ok(Totals {
            deposits: self.meta_amount(META_TOTAL_DEPOSITS)?,
            withdrawals: self.meta_amount(META_TOTAL_WITHDRAWALS)?,
        })
    }

    fn meta_amount(&self, key: &str) -> Result<Amount> {
        match self.get_meta(key)? {
            Some(value) => parse_amount(&value),
            None => Ok(0),
        }
    }

    /// Writes a batch atomically: either all of it lands or none of it does
    pub fn commit_batch(&mut self, batch: &Batch<'_>, recorded_at: DateTime<Utc>) -> Result<()> {
        let tx = self.conn.transaction()?;

        if let Some(play) = batch.play {
            PlayStore::new(&tx).save_play(play)?;
        }

        if let Some(changes) = batch.balances {
            let store = BalanceStore::new(&tx);
            for (address, amount) in changes.iter() {
                store.save_balance(address, *amount)?;
            }
        }

        if let Some(totals) = batch.totals {
            set_meta(&tx, META_TOTAL_DEPOSITS, &totals.deposits.to_string())?;
            set_meta(&tx, META_TOTAL_WITHDRAWALS, &totals.withdrawals.to_string())?;
        }

        if let Some(paused) = batch.paused {
            set_meta(&tx, META_PAUSED, if paused { "1" } else { "0" })?;
        }

        let events = EventStore::new(&tx);
        for event in batch.events {
            events.append(event, recorded_at)?;
        }

        tx.commit()?;
        Ok(())
    }
}

fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
        params![key, value],
    )?;
    Ok(())
}

pub(crate) fn parse_amount(value: &str) -> Result<Amount> {
    value
        .parse::<Amount>()
        .map_err(|e| GameError::corrupt(format!("Bad amount '{}': {}", value, e)))
}

pub(crate) fn to_millis(instant: DateTime<Utc>) -> i64 {
    instant.timestamp_millis()
}

pub(crate) fn from_millis(millis: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| GameError::corrupt(format!("Bad timestamp {}", millis)))
}
