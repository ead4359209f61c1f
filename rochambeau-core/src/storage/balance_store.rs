use crate::error::{GameError, Result};
use crate::storage::parse_amount;
use crate::types::{Address, Amount};
use rusqlite::{params, Connection, OptionalExtension};

pub struct BalanceStore<'a> {
    conn: &'a Connection,
}

impl<'a> BalanceStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    pub fn save_balance(&self, address: &Address, amount: Amount) -> Result<()> {
        self.conn.execute(
            "INSERT OR REPLACE INTO balances (address, amount) VALUES (?1, ?2)",
            params![address.to_string(), amount.to_string()],
        )?;
        Ok(())
    }

    pub fn load_balance(&self, address: &Address) -> Result<Amount> {
        let amount: Option<String> = self
            .conn
            .query_row(
                "SELECT amount FROM balances WHERE address = ?1",
                params![address.to_string()],
                |row| row.get(0),
            )
            .optional()?;

        match amount {
            Some(amount) => parse_amount(&amount),
            None => Ok(0),
        }
    }

    pub fn load_balances(&self) -> Result<Vec<(Address, Amount)>> {
        let mut stmt = self
            .conn
            .prepare("SELECT address, amount FROM balances ORDER BY address ASC")?;

        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut balances = Vec::new();
        for row in rows {
            let (address, amount) = row?;
            let address: Address = address
                .parse()
                .map_err(|e: crate::error::ValidationError| GameError::corrupt(e.to_string()))?;
            balances.push((address, parse_amount(&amount)?));
        }

        Ok(balances)
    }
}
