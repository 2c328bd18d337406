//! Durable persistence for decoded events and per-contract sync progress.
//!
//! One SQLite database holds a unified `events` table (deduplicated on
//! `(transaction_hash, log_index)`) and a `sync_state` table with one row
//! per contract. Progress and events are committed in a single transaction
//! so a crash can never leave a `last_block` that disagrees with the
//! persisted events.

use std::{
    path::Path,
    time::{SystemTime, UNIX_EPOCH},
};

use serde_json::{Map, Value};
use sqlx::{
    QueryBuilder, Row, Sqlite, SqlitePool, Transaction,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
};
use tracing::debug;

use crate::{
    error::IndexerError,
    types::{DecodedEvent, MAX_SAFE_INTEGER, SyncState},
};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS events (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        contract_address TEXT NOT NULL,
        block_number INTEGER NOT NULL,
        block_timestamp INTEGER NOT NULL,
        transaction_hash TEXT NOT NULL,
        log_index INTEGER NOT NULL,
        event_name TEXT NOT NULL,
        event_data TEXT NOT NULL,
        indexed_at INTEGER NOT NULL,
        UNIQUE (transaction_hash, log_index)
    )",
    "CREATE INDEX IF NOT EXISTS idx_events_contract_block
        ON events (contract_address, block_number)",
    "CREATE INDEX IF NOT EXISTS idx_events_contract_name
        ON events (contract_address, event_name)",
    "CREATE INDEX IF NOT EXISTS idx_events_block ON events (block_number)",
    "CREATE TABLE IF NOT EXISTS sync_state (
        contract_address TEXT PRIMARY KEY,
        chain_id INTEGER NOT NULL,
        last_block INTEGER NOT NULL,
        last_sync INTEGER NOT NULL,
        status TEXT NOT NULL DEFAULT 'active'
    )",
];

/// Filter for [`EventStore::query`]. Every field is optional; omitted
/// fields do not constrain the result.
#[derive(Clone, Debug, Default)]
pub struct EventQuery {
    pub contract_address: Option<String>,
    pub event_name: Option<String>,
    pub from_block: Option<u64>,
    pub to_block: Option<u64>,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
}

/// One persisted event, as read back from the store.
#[derive(Clone, Debug, PartialEq)]
pub struct StoredEvent {
    pub id: i64,
    pub contract_address: String,
    pub block_number: u64,
    pub block_timestamp: u64,
    pub transaction_hash: String,
    pub log_index: u64,
    pub event_name: String,
    pub payload: Map<String, Value>,
    pub indexed_at: u64,
}

#[derive(Clone)]
pub struct EventStore {
    pool: SqlitePool,
}

impl EventStore {
    /// Open (creating if missing) the database file in WAL mode.
    pub async fn connect(path: &Path) -> Result<Self, IndexerError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// An in-memory store, for tests and dry runs.
    ///
    /// Capped at a single connection: each SQLite in-memory connection is
    /// its own database.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        let options = SqliteConnectOptions::new().in_memory(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Create tables and indexes. Safe to call on every start.
    pub async fn init(&self) -> Result<(), IndexerError> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(&self.pool).await?;
        }
        Ok(())
    }

    /// Insert a batch of events in one transaction, silently discarding
    /// duplicates on `(transaction_hash, log_index)`. Returns the number of
    /// rows actually inserted.
    pub async fn insert_batch(&self, events: &[DecodedEvent]) -> Result<u64, IndexerError> {
        let mut tx = self.pool.begin().await?;
        let inserted = insert_events(&mut tx, events, unix_now()).await?;
        tx.commit().await?;
        Ok(inserted)
    }

    /// Highest fully-persisted block for a contract, if any.
    pub async fn last_synced_block(
        &self,
        contract_address: &str,
    ) -> Result<Option<u64>, IndexerError> {
        let row = sqlx::query("SELECT last_block FROM sync_state WHERE contract_address = ?1")
            .bind(contract_address.to_lowercase())
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(row.try_get::<i64, _>("last_block")? as u64)),
            None => Ok(None),
        }
    }

    /// Atomically persist an event batch and advance the contract's sync
    /// progress. Either both writes land or neither does. `last_block`
    /// never retreats. Returns the number of events actually inserted.
    pub async fn commit(
        &self,
        contract_address: &str,
        chain_id: u64,
        last_block: u64,
        events: &[DecodedEvent],
    ) -> Result<u64, IndexerError> {
        let contract_address = contract_address.to_lowercase();
        let now = unix_now();

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO sync_state (contract_address, chain_id, last_block, last_sync, status)
             VALUES (?1, ?2, ?3, ?4, 'active')
             ON CONFLICT(contract_address) DO UPDATE SET
                 last_block = MAX(sync_state.last_block, excluded.last_block),
                 last_sync = excluded.last_sync",
        )
        .bind(&contract_address)
        .bind(chain_id as i64)
        .bind(last_block as i64)
        .bind(now as i64)
        .execute(&mut *tx)
        .await?;

        let inserted = insert_events(&mut tx, events, now).await?;
        tx.commit().await?;

        debug!(
            contract = %contract_address,
            last_block,
            batch = events.len(),
            inserted,
            "committed sync progress"
        );
        Ok(inserted)
    }

    /// Query persisted events, ordered by `(block_number, log_index)`.
    ///
    /// An offset without a limit implies a maximum-safe-integer limit,
    /// since SQLite requires `LIMIT` before `OFFSET`.
    pub async fn query(&self, query: &EventQuery) -> Result<Vec<StoredEvent>, IndexerError> {
        let mut builder = QueryBuilder::<Sqlite>::new(
            "SELECT id, contract_address, block_number, block_timestamp, transaction_hash, \
             log_index, event_name, event_data, indexed_at FROM events",
        );

        let mut prefix = " WHERE ";
        if let Some(address) = &query.contract_address {
            builder.push(prefix).push("contract_address = ").push_bind(address.to_lowercase());
            prefix = " AND ";
        }
        if let Some(name) = &query.event_name {
            builder.push(prefix).push("event_name = ").push_bind(name.clone());
            prefix = " AND ";
        }
        if let Some(from) = query.from_block {
            builder.push(prefix).push("block_number >= ").push_bind(from as i64);
            prefix = " AND ";
        }
        if let Some(to) = query.to_block {
            builder.push(prefix).push("block_number <= ").push_bind(to as i64);
        }

        builder.push(" ORDER BY block_number ASC, log_index ASC");

        if query.limit.is_some() || query.offset.is_some() {
            let limit = query.limit.unwrap_or(MAX_SAFE_INTEGER) as i64;
            builder.push(" LIMIT ").push_bind(limit);
            if let Some(offset) = query.offset {
                builder.push(" OFFSET ").push_bind(offset as i64);
            }
        }

        let rows = builder.build().fetch_all(&self.pool).await?;
        rows.iter().map(stored_event_from_row).collect()
    }

    /// All per-contract sync rows, ordered by address.
    pub async fn sync_states(&self) -> Result<Vec<SyncState>, IndexerError> {
        let rows = sqlx::query(
            "SELECT contract_address, chain_id, last_block, last_sync, status
             FROM sync_state ORDER BY contract_address",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| {
                Ok(SyncState {
                    contract_address: row.try_get("contract_address")?,
                    chain_id: row.try_get::<i64, _>("chain_id")? as u64,
                    last_block: row.try_get::<i64, _>("last_block")? as u64,
                    last_sync: row.try_get::<i64, _>("last_sync")? as u64,
                    status: row.try_get("status")?,
                })
            })
            .collect()
    }

    /// Number of persisted events for a contract.
    pub async fn count_events(&self, contract_address: &str) -> Result<u64, IndexerError> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM events WHERE contract_address = ?1")
            .bind(contract_address.to_lowercase())
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get::<i64, _>("n")? as u64)
    }

    /// Release database handles. Subsequent operations fail with a
    /// `Storage` error.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

async fn insert_events(
    tx: &mut Transaction<'_, Sqlite>,
    events: &[DecodedEvent],
    indexed_at: u64,
) -> Result<u64, IndexerError> {
    let mut inserted = 0;
    for event in events {
        let payload = serde_json::to_string(&event.payload)
            .map_err(|e| IndexerError::storage(format!("failed to serialize payload: {e}")))?;
        let result = sqlx::query(
            "INSERT INTO events (contract_address, block_number, block_timestamp, \
             transaction_hash, log_index, event_name, event_data, indexed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(transaction_hash, log_index) DO NOTHING",
        )
        .bind(event.contract_address.to_lowercase())
        .bind(event.block_number as i64)
        .bind(event.block_timestamp as i64)
        .bind(&event.transaction_hash)
        .bind(event.log_index as i64)
        .bind(&event.event_name)
        .bind(payload)
        .bind(indexed_at as i64)
        .execute(&mut **tx)
        .await?;
        inserted += result.rows_affected();
    }
    Ok(inserted)
}

fn stored_event_from_row(row: &SqliteRow) -> Result<StoredEvent, IndexerError> {
    let raw_payload: String = row.try_get("event_data")?;
    let payload: Map<String, Value> = serde_json::from_str(&raw_payload)
        .map_err(|e| IndexerError::storage(format!("corrupt event payload: {e}")))?;
    Ok(StoredEvent {
        id: row.try_get("id")?,
        contract_address: row.try_get("contract_address")?,
        block_number: row.try_get::<i64, _>("block_number")? as u64,
        block_timestamp: row.try_get::<i64, _>("block_timestamp")? as u64,
        transaction_hash: row.try_get("transaction_hash")?,
        log_index: row.try_get::<i64, _>("log_index")? as u64,
        event_name: row.try_get("event_name")?,
        payload,
        indexed_at: row.try_get::<i64, _>("indexed_at")? as u64,
    })
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}
