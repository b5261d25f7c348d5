//! SQLite storage for fungible balances and NFT ownership
//!
//! Balances are decimal strings combined with arbitrary precision arithmetic.
//! Ownership keeps one row per (class, token id): the current holder.

use anyhow::{Context, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};
use ticket_common::{
    add_amounts, is_negative, is_positive, is_zero_address, parse_amount, sub_amounts,
    OwnershipIndex, TokenClass,
};

/// Storage for token balances and ownership
pub struct TokenStorage {
    conn: Arc<Mutex<Connection>>,
}

/// Current owner of one token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HoldingData {
    pub token_class: TokenClass,
    pub token_id: String,
    pub owner: String,
}

impl TokenStorage {
    /// Create or open the database
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open token database at {db_path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA cache_size=-16000;
             PRAGMA temp_store=MEMORY;
             PRAGMA busy_timeout=5000;",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS fungible_balances (
                address TEXT PRIMARY KEY,
                balance TEXT NOT NULL,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
            )",
            [],
        )?;

        // Current ownership - one owner per token per class
        conn.execute(
            "CREATE TABLE IF NOT EXISTS nft_holdings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token_class TEXT NOT NULL CHECK(token_class IN ('ERC404', 'ERC721')),
                token_id TEXT NOT NULL,
                owner TEXT NOT NULL,
                tx_hash TEXT,
                updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
                UNIQUE(token_class, token_id)
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_nft_holdings_owner ON nft_holdings(owner)",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_nft_holdings_class_owner ON nft_holdings(token_class, owner)",
            [],
        )?;

        tracing::info!(target: "ticket_tokens::storage", db_path = %db_path, "Token database initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("token storage connection lock poisoned"))
    }

    /// Move `token_id` of `class` to `to`.
    ///
    /// A non-mint transfer first drops the previous owner row. Runs in a single
    /// transaction so the one-owner-per-token invariant holds under concurrent
    /// deliveries.
    pub fn apply_token_transfer(
        &self,
        class: TokenClass,
        token_id: &str,
        from: &str,
        to: &str,
        tx_hash: &str,
    ) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if !is_zero_address(from) {
            let removed = tx.execute(
                "DELETE FROM nft_holdings WHERE token_class = ?1 AND token_id = ?2",
                params![class.as_str(), token_id],
            )?;
            if removed == 0 {
                tracing::debug!(
                    target: "ticket_tokens::storage",
                    class = %class,
                    token_id = %token_id,
                    from = %from,
                    "No prior ownership record for transferred token"
                );
            }
        }

        tx.execute(
            "INSERT OR REPLACE INTO nft_holdings (token_class, token_id, owner, tx_hash, updated_at)
             VALUES (?1, ?2, ?3, ?4, strftime('%s', 'now'))",
            params![class.as_str(), token_id, to, tx_hash],
        )?;

        tx.commit()?;
        Ok(())
    }

    /// Debit `from` (unless it is the zero address) and credit `to`.
    ///
    /// Missing balance rows start from zero. The read and the write of each
    /// side happen inside one transaction.
    pub fn apply_fungible_transfer(&self, from: &str, to: &str, amount: &str) -> Result<()> {
        parse_amount(amount)?;

        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        if !is_zero_address(from) {
            let balance = Self::read_balance(&tx, from)?.unwrap_or_else(|| "0".to_string());
            let updated = sub_amounts(&balance, amount)?;
            if is_negative(&updated) {
                tracing::warn!(
                    target: "ticket_tokens::storage",
                    address = %from,
                    balance = %updated,
                    "Fungible balance went negative"
                );
            }
            Self::write_balance(&tx, from, &updated)?;
        }

        let balance = Self::read_balance(&tx, to)?.unwrap_or_else(|| "0".to_string());
        let updated = add_amounts(&balance, amount)?;
        Self::write_balance(&tx, to, &updated)?;

        tx.commit()?;
        Ok(())
    }

    fn read_balance(conn: &Connection, address: &str) -> Result<Option<String>> {
        let balance = conn
            .query_row(
                "SELECT balance FROM fungible_balances WHERE address = ?1",
                params![address],
                |row| row.get(0),
            )
            .optional()?;
        Ok(balance)
    }

    fn write_balance(conn: &Connection, address: &str, balance: &str) -> Result<()> {
        conn.execute(
            "INSERT INTO fungible_balances (address, balance, updated_at)
             VALUES (?1, ?2, strftime('%s', 'now'))
             ON CONFLICT(address) DO UPDATE SET balance = excluded.balance, updated_at = excluded.updated_at",
            params![address, balance],
        )?;
        Ok(())
    }

    /// Get the fungible balance of an address, if a record exists
    pub fn get_balance(&self, address: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        Self::read_balance(&conn, address)
    }

    /// Get the current owner of a token
    pub fn get_owner(&self, class: TokenClass, token_id: &str) -> Result<Option<String>> {
        let conn = self.lock()?;
        let owner = conn
            .query_row(
                "SELECT owner FROM nft_holdings WHERE token_class = ?1 AND token_id = ?2",
                params![class.as_str(), token_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(owner)
    }

    /// Token ids of `class` currently held by `owner`, oldest first
    pub fn get_owned_token_ids(&self, class: TokenClass, owner: &str) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT token_id FROM nft_holdings WHERE token_class = ?1 AND owner = ?2 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![class.as_str(), owner], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }

    /// Every ownership row held by `owner`, across both classes
    pub fn get_holdings_by_owner(&self, owner: &str) -> Result<Vec<HoldingData>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT token_class, token_id, owner FROM nft_holdings WHERE owner = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![owner], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;

        let mut holdings = Vec::new();
        for row in rows {
            let (class, token_id, owner) = row?;
            holdings.push(HoldingData {
                token_class: class.parse()?,
                token_id,
                owner,
            });
        }
        Ok(holdings)
    }

    /// Addresses whose fungible balance is strictly positive
    pub fn get_positive_balance_holders(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt =
            conn.prepare_cached("SELECT address, balance FROM fungible_balances ORDER BY address")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut holders = Vec::new();
        for row in rows {
            let (address, balance) = row?;
            if is_positive(&balance) {
                holders.push(address);
            }
        }
        Ok(holders)
    }

    /// Distinct owners of any token of `class`
    pub fn get_distinct_owners(&self, class: TokenClass) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT owner FROM nft_holdings WHERE token_class = ?1 ORDER BY owner",
        )?;
        let rows = stmt.query_map(params![class.as_str()], |row| row.get(0))?;
        Ok(rows.collect::<rusqlite::Result<Vec<String>>>()?)
    }
}

impl OwnershipIndex for TokenStorage {
    fn owned_tokens(&self, owner: &str) -> Result<Vec<(TokenClass, String)>> {
        Ok(self
            .get_holdings_by_owner(owner)?
            .into_iter()
            .map(|h| (h.token_class, h.token_id))
            .collect())
    }
}
