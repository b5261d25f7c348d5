//! Engine database.
//!
//! Keeps the delivery bookkeeping of the service: which transactions have
//! already been applied, plus a few free-form stats.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

/// Embedded SQL schema
const SQLITE_SCHEMA_SQL: &str = include_str!("../sql/engine_schema.sql");

/// Engine database configuration
#[derive(Debug, Clone)]
pub struct EngineDbConfig {
    pub path: String,
}

/// Result of [`EngineDb::mark_processed`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkOutcome {
    Marked,
    /// Another delivery recorded the hash first
    AlreadyProcessed,
}

/// Engine database for tracking state
pub struct EngineDb {
    pool: SqlitePool,
}

impl EngineDb {
    /// Create a new engine database
    pub async fn new(config: EngineDbConfig) -> Result<Self> {
        let is_memory = config.path == ":memory:" || config.path == "sqlite::memory:";

        let database_url = if is_memory {
            "sqlite::memory:".to_string()
        } else if config.path.starts_with("sqlite:") {
            config.path.clone()
        } else {
            if let Some(parent) = Path::new(&config.path).parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .context(format!("Failed to create directory: {}", parent.display()))?;
            }
            format!("sqlite://{}", config.path)
        };

        tracing::debug!(
            target: "ticket_indexer::engine_db",
            "Connecting to database: {}",
            database_url
        );

        let options = SqliteConnectOptions::from_str(&database_url)
            .context("Invalid engine database path")?
            .create_if_missing(true);

        // An in-memory database lives as long as its single connection
        let pool = if is_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
        } else {
            SqlitePoolOptions::new()
                .max_connections(5)
                .connect_with(options)
                .await
        }
        .context("Failed to connect to engine database")?;

        let db = Self { pool };
        db.init_schema().await?;

        Ok(db)
    }

    /// Initialize database with tuning and schema
    async fn init_schema(&self) -> Result<()> {
        self.apply_pragmas().await?;
        self.load_schema_from_sql().await?;

        if self.get_stat("start_time").await?.is_none() {
            self.set_stat("start_time", &chrono::Utc::now().to_rfc3339())
                .await?;
        }

        tracing::info!(target: "ticket_indexer::engine_db", "Engine database schema initialized");

        Ok(())
    }

    /// Apply SQLite PRAGMAs for performance
    async fn apply_pragmas(&self) -> Result<()> {
        sqlx::query("PRAGMA journal_mode=WAL")
            .execute(&self.pool)
            .await?;

        sqlx::query("PRAGMA synchronous=NORMAL")
            .execute(&self.pool)
            .await?;

        tracing::debug!(target: "ticket_indexer::engine_db", "Applied SQLite PRAGMAs");

        Ok(())
    }

    /// Load schema from SQL file
    async fn load_schema_from_sql(&self) -> Result<()> {
        for statement in SQLITE_SCHEMA_SQL.split(';') {
            let sql_lines: Vec<&str> = statement
                .lines()
                .filter(|line| {
                    let trimmed = line.trim();
                    !trimmed.is_empty() && !trimmed.starts_with("--")
                })
                .collect();

            if sql_lines.is_empty() {
                continue;
            }

            let clean_sql = sql_lines.join("\n");
            let first_line = clean_sql.lines().next().unwrap_or("");

            tracing::debug!(
                target: "ticket_indexer::engine_db",
                "Executing SQL: {}",
                first_line
            );

            sqlx::query(&clean_sql)
                .execute(&self.pool)
                .await
                .context(format!("Failed to execute SQL: {first_line}"))?;
        }

        Ok(())
    }

    /// Whether the transaction's effects have already been applied
    pub async fn already_processed(&self, tx_hash: &str) -> Result<bool> {
        let row = sqlx::query("SELECT 1 FROM processed_transactions WHERE transaction_hash = ?")
            .bind(tx_hash)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.is_some())
    }

    /// Record the transaction as applied.
    ///
    /// A concurrent delivery that got there first is reported as
    /// [`MarkOutcome::AlreadyProcessed`] rather than an error.
    pub async fn mark_processed(&self, tx_hash: &str) -> Result<MarkOutcome> {
        let result = sqlx::query(
            "INSERT INTO processed_transactions (transaction_hash, processed_at) VALUES (?, ?)",
        )
        .bind(tx_hash)
        .bind(chrono::Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(MarkOutcome::Marked),
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Ok(MarkOutcome::AlreadyProcessed)
            }
            Err(e) => Err(e).context("Failed to mark transaction as processed"),
        }
    }

    /// Number of transactions applied so far
    pub async fn processed_count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) FROM processed_transactions")
            .fetch_one(&self.pool)
            .await?;
        let count: i64 = row.get(0);
        Ok(count as u64)
    }

    /// Round-trip a trivial query
    pub async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    /// Get a stat value
    pub async fn get_stat(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM stats WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|r| r.get(0)))
    }

    /// Set a stat value
    pub async fn set_stat(&self, key: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT OR REPLACE INTO stats (key, value) VALUES (?, ?)")
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Get engine statistics as a JSON-friendly struct
    pub async fn get_stats(&self) -> Result<EngineStats> {
        Ok(EngineStats {
            processed_transactions: self.processed_count().await?,
            last_block: self
                .get_stat("last_block")
                .await?
                .and_then(|v| v.parse().ok()),
            start_time: self.get_stat("start_time").await?.unwrap_or_default(),
        })
    }
}

/// Engine statistics
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct EngineStats {
    pub processed_transactions: u64,
    pub last_block: Option<u64>,
    pub start_time: String,
}
