//! SQLite storage for ticket openings and minting outcomes

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, types::Type, Connection, OptionalExtension, Row};
use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};
use ticket_common::{serialize_timestamp, timestamp_from_millis, TokenClass};

use crate::decoder::TicketLevel;

/// Storage for the mint → open → resolve lifecycle of tickets
pub struct TicketStorage {
    conn: Arc<Mutex<Connection>>,
}

/// One opening request, append-only
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpeningRecord {
    pub token_id: String,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub transaction_hash: String,
    pub token_class: TokenClass,
    pub opener_address: String,
}

/// Accumulated outcome of a ticket, one per token id
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MintingDetails {
    pub token_id: String,
    pub levels: Vec<TicketLevel>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub roll_result: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payout: Option<String>,
    #[serde(serialize_with = "serialize_timestamp")]
    pub timestamp: DateTime<Utc>,
    pub transaction_hash: String,
}

const MINTING_COLUMNS: &str =
    "token_id, levels, roll_result, payout, timestamp, transaction_hash";

impl TicketStorage {
    /// Create or open the database
    pub fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)
            .with_context(|| format!("Failed to open ticket database at {db_path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=NORMAL;
             PRAGMA temp_store=MEMORY;
             PRAGMA busy_timeout=5000;",
        )?;

        conn.execute(
            "CREATE TABLE IF NOT EXISTS openings (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                token_id TEXT NOT NULL,
                token_class TEXT NOT NULL CHECK(token_class IN ('ERC404', 'ERC721')),
                opener_address TEXT NOT NULL,
                transaction_hash TEXT NOT NULL,
                timestamp INTEGER NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_openings_token ON openings(token_class, token_id)",
            [],
        )?;

        // levels is a JSON array, appended on every mint
        conn.execute(
            "CREATE TABLE IF NOT EXISTS minting_details (
                token_id TEXT PRIMARY KEY,
                levels TEXT NOT NULL DEFAULT '[]',
                roll_result INTEGER,
                payout TEXT,
                timestamp INTEGER NOT NULL,
                transaction_hash TEXT NOT NULL
            )",
            [],
        )?;

        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_minting_details_timestamp ON minting_details(timestamp)",
            [],
        )?;

        tracing::info!(target: "ticket_lifecycle::storage", db_path = %db_path, "Ticket database initialized");

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("ticket storage connection lock poisoned"))
    }

    /// Append an opening record. Repeated openings of one token are all kept.
    pub fn record_opening(
        &self,
        token_id: &str,
        opener: &str,
        tx_hash: &str,
        class: TokenClass,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO openings (token_id, token_class, opener_address, transaction_hash, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                token_id,
                class.as_str(),
                opener,
                tx_hash,
                timestamp.timestamp_millis()
            ],
        )?;
        Ok(())
    }

    /// Append `levels` to the ticket's record, creating it on first sight.
    ///
    /// Creation fixes `timestamp` and `transaction_hash`; later calls only
    /// extend the level list.
    pub fn upsert_minting_levels(
        &self,
        token_id: &str,
        tx_hash: &str,
        levels: &[TicketLevel],
        timestamp: DateTime<Utc>,
    ) -> Result<MintingDetails> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut details = Self::load_or_new(&tx, token_id, tx_hash, timestamp)?;
        details.levels.extend_from_slice(levels);
        Self::save(&tx, &details)?;

        tx.commit()?;
        Ok(details)
    }

    /// Overwrite the roll result and payout, creating the record on first sight.
    pub fn record_resolution(
        &self,
        token_id: &str,
        tx_hash: &str,
        roll_result: i64,
        win_amount: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<MintingDetails> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let mut details = Self::load_or_new(&tx, token_id, tx_hash, timestamp)?;
        details.roll_result = Some(roll_result);
        details.payout = Some(win_amount.to_string());
        Self::save(&tx, &details)?;

        tx.commit()?;
        Ok(details)
    }

    fn load_or_new(
        conn: &Connection,
        token_id: &str,
        tx_hash: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<MintingDetails> {
        let existing = conn
            .query_row(
                &format!("SELECT {MINTING_COLUMNS} FROM minting_details WHERE token_id = ?1"),
                params![token_id],
                minting_from_row,
            )
            .optional()?;

        Ok(existing.unwrap_or_else(|| MintingDetails {
            token_id: token_id.to_string(),
            levels: Vec::new(),
            roll_result: None,
            payout: None,
            timestamp,
            transaction_hash: tx_hash.to_string(),
        }))
    }

    fn save(conn: &Connection, details: &MintingDetails) -> Result<()> {
        let levels = serde_json::to_string(&details.levels)?;
        conn.execute(
            "INSERT INTO minting_details (token_id, levels, roll_result, payout, timestamp, transaction_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(token_id) DO UPDATE SET
                levels = excluded.levels,
                roll_result = excluded.roll_result,
                payout = excluded.payout",
            params![
                details.token_id,
                levels,
                details.roll_result,
                details.payout,
                details.timestamp.timestamp_millis(),
                details.transaction_hash
            ],
        )?;
        Ok(())
    }

    /// Openings of one token across both classes, newest first
    pub fn get_openings_by_token(&self, token_id: &str) -> Result<Vec<OpeningRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT token_id, timestamp, transaction_hash, token_class, opener_address
             FROM openings WHERE token_id = ?1
             ORDER BY timestamp DESC, id DESC",
        )?;
        let rows = stmt.query_map(params![token_id], opening_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }

    /// Openings of the given (class, token id) pairs, newest first
    pub fn get_openings_for_tokens(
        &self,
        tokens: &[(TokenClass, String)],
    ) -> Result<Vec<OpeningRecord>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(
            "SELECT token_id, timestamp, transaction_hash, token_class, opener_address
             FROM openings WHERE token_class = ?1 AND token_id = ?2",
        )?;

        let mut openings = Vec::new();
        let mut seen = HashSet::new();
        for (class, token_id) in tokens {
            if !seen.insert((*class, token_id.as_str())) {
                continue;
            }
            let rows = stmt.query_map(params![class.as_str(), token_id], opening_from_row)?;
            for row in rows {
                openings.push(row?);
            }
        }

        openings.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(openings)
    }

    /// Minting details of one token
    pub fn get_minting_details(&self, token_id: &str) -> Result<Option<MintingDetails>> {
        let conn = self.lock()?;
        let details = conn
            .query_row(
                &format!("SELECT {MINTING_COLUMNS} FROM minting_details WHERE token_id = ?1"),
                params![token_id],
                minting_from_row,
            )
            .optional()?;
        Ok(details)
    }

    /// Minting details for a set of token ids, newest first
    pub fn get_minting_details_for_tokens(&self, token_ids: &[String]) -> Result<Vec<MintingDetails>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {MINTING_COLUMNS} FROM minting_details WHERE token_id = ?1"
        ))?;

        let mut details = Vec::new();
        let mut seen = HashSet::new();
        for token_id in token_ids {
            if !seen.insert(token_id.as_str()) {
                continue;
            }
            if let Some(row) = stmt
                .query_row(params![token_id], minting_from_row)
                .optional()?
            {
                details.push(row);
            }
        }

        details.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(details)
    }

    /// Every minting record, newest first
    pub fn get_all_minting_details(&self) -> Result<Vec<MintingDetails>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare_cached(&format!(
            "SELECT {MINTING_COLUMNS} FROM minting_details ORDER BY timestamp DESC, token_id"
        ))?;
        let rows = stmt.query_map([], minting_from_row)?;
        Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
    }
}

fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
    timestamp_from_millis(millis).unwrap_or_default()
}

fn opening_from_row(row: &Row<'_>) -> rusqlite::Result<OpeningRecord> {
    let class: String = row.get(3)?;
    let token_class = class.parse::<TokenClass>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, Type::Text, e.into())
    })?;

    Ok(OpeningRecord {
        token_id: row.get(0)?,
        timestamp: millis_to_timestamp(row.get(1)?),
        transaction_hash: row.get(2)?,
        token_class,
        opener_address: row.get(4)?,
    })
}

fn minting_from_row(row: &Row<'_>) -> rusqlite::Result<MintingDetails> {
    let levels: String = row.get(1)?;
    let levels = serde_json::from_str(&levels)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(1, Type::Text, Box::new(e)))?;

    Ok(MintingDetails {
        token_id: row.get(0)?,
        levels,
        roll_result: row.get(2)?,
        payout: row.get(3)?,
        timestamp: millis_to_timestamp(row.get(4)?),
        transaction_hash: row.get(5)?,
    })
}
