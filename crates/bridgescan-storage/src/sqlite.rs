//! SQLite storage backend for bridgescan.
//!
//! Persists extracted records and scanner block progress to a single SQLite
//! file. Every mutating call runs inside one `sqlx` transaction; any error
//! drops the transaction, which rolls it back.
//!
//! # Usage
//! ```rust,no_run
//! use bridgescan_storage::sqlite::SqliteStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteStorage::open("./bridgescan.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteStorage::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, HashSet};

use async_trait::async_trait;
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row, Sqlite, SqliteConnection, SqlitePool};
use tracing::debug;

use bridgescan_core::block_store::{BlockStatus, BlockStore, StoredBlock};
use bridgescan_core::error::ScannerError;
use bridgescan_core::record::{RecordStore, ID_CHUNK_SIZE, WARM_START_BLOCK};
use bridgescan_core::types::{
    BatchSummary, Block, ExtractedRecord, SpendInfo, StoredRecord, UndoSummary,
};

const RECORD_COLUMNS: &str = "record_id, extractor_id, payload, creation_block_hash, \
     creation_height, spend_block_hash, spend_height, spend_tx_id";

const BLOCK_COLUMNS: &str = "scanner, hash, parent_hash, height, timestamp, status, updated_at";

fn storage_err(e: sqlx::Error) -> ScannerError {
    ScannerError::Storage(e.to_string())
}

fn payload_err(e: serde_json::Error) -> ScannerError {
    ScannerError::Storage(format!("record payload: {e}"))
}

/// SQLite-backed storage for records and scanner blocks.
#[derive(Clone)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./bridgescan.db"`) or a full
    /// SQLite URL (`"sqlite:./bridgescan.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, ScannerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url).await.map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Open an in-memory SQLite database.
    ///
    /// Each connection to `sqlite::memory:` is its own database, so the pool
    /// is pinned to a single connection that never expires. All data is lost
    /// when the pool is dropped.
    pub async fn in_memory() -> Result<Self, ScannerError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .map_err(storage_err)?;

        let storage = Self { pool };
        storage.init_schema().await?;
        Ok(storage)
    }

    /// Close the pool, waiting for in-flight queries.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), ScannerError> {
        // WAL mode: readers don't block the lane's writes
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS records (
                record_id           TEXT    NOT NULL,
                extractor_id        TEXT    NOT NULL,
                payload             TEXT    NOT NULL,
                creation_block_hash TEXT    NOT NULL,
                creation_height     INTEGER NOT NULL,
                spend_block_hash    TEXT,
                spend_height        INTEGER,
                spend_tx_id         TEXT,
                UNIQUE (record_id, extractor_id)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS blocks (
                scanner     TEXT    NOT NULL,
                hash        TEXT    NOT NULL,
                parent_hash TEXT    NOT NULL,
                height      INTEGER NOT NULL,
                timestamp   INTEGER NOT NULL,
                status      TEXT    NOT NULL,
                updated_at  INTEGER NOT NULL,
                PRIMARY KEY (scanner, hash)
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        // Fork undo looks rows up by the block that created or spent them
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_creation
             ON records (extractor_id, creation_block_hash);",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_records_spend
             ON records (extractor_id, spend_block_hash);",
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_blocks_height ON blocks (scanner, height);")
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(())
    }

    /// Ids among `ids` that already have a row for `extractor_id`.
    async fn existing_ids(
        conn: &mut SqliteConnection,
        extractor_id: &str,
        ids: &[&str],
    ) -> Result<HashSet<String>, ScannerError> {
        let mut found = HashSet::with_capacity(ids.len());
        for chunk in ids.chunks(ID_CHUNK_SIZE) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "SELECT record_id FROM records WHERE extractor_id = ",
            );
            qb.push_bind(extractor_id);
            qb.push(" AND record_id IN (");
            let mut list = qb.separated(", ");
            for id in chunk {
                list.push_bind(*id);
            }
            list.push_unseparated(")");

            let rows = qb.build().fetch_all(&mut *conn).await.map_err(storage_err)?;
            found.extend(rows.iter().map(|r| r.get::<String, _>("record_id")));
        }
        Ok(found)
    }

    async fn insert_record(
        conn: &mut SqliteConnection,
        row: &StoredRecord,
    ) -> Result<(), ScannerError> {
        let payload = serde_json::to_string(&row.payload).map_err(payload_err)?;
        sqlx::query(
            "INSERT OR REPLACE INTO records
             (record_id, extractor_id, payload, creation_block_hash, creation_height)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&row.record_id)
        .bind(&row.extractor_id)
        .bind(&payload)
        .bind(&row.creation_block_hash)
        .bind(row.creation_height as i64)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;
        Ok(())
    }

    /// Mark `ids` spent in `block` by `tx_id`; returns the rows touched.
    async fn spend_ids(
        conn: &mut SqliteConnection,
        extractor_id: &str,
        block: &Block,
        tx_id: Option<&str>,
        ids: &[&str],
    ) -> Result<usize, ScannerError> {
        let mut spent = 0;
        for chunk in ids.chunks(ID_CHUNK_SIZE) {
            let mut qb = QueryBuilder::<Sqlite>::new("UPDATE records SET spend_block_hash = ");
            qb.push_bind(&block.hash);
            qb.push(", spend_height = ");
            qb.push_bind(block.height as i64);
            qb.push(", spend_tx_id = ");
            qb.push_bind(tx_id);
            qb.push(" WHERE extractor_id = ");
            qb.push_bind(extractor_id);
            qb.push(" AND record_id IN (");
            let mut list = qb.separated(", ");
            for id in chunk {
                list.push_bind(*id);
            }
            list.push_unseparated(")");

            let result = qb.build().execute(&mut *conn).await.map_err(storage_err)?;
            spent += result.rows_affected() as usize;
        }
        Ok(spent)
    }
}

fn row_to_record(row: &SqliteRow) -> Result<StoredRecord, ScannerError> {
    let payload: String = row.get("payload");
    Ok(StoredRecord {
        record_id: row.get("record_id"),
        extractor_id: row.get("extractor_id"),
        payload: serde_json::from_str(&payload).map_err(payload_err)?,
        creation_block_hash: row.get("creation_block_hash"),
        creation_height: row.get::<i64, _>("creation_height") as u64,
        spend_block_hash: row.get("spend_block_hash"),
        spend_height: row.get::<Option<i64>, _>("spend_height").map(|h| h as u64),
        spend_tx_id: row.get("spend_tx_id"),
    })
}

fn row_to_block(row: &SqliteRow) -> Block {
    Block {
        hash: row.get("hash"),
        parent_hash: row.get("parent_hash"),
        height: row.get::<i64, _>("height") as u64,
        timestamp: row.get("timestamp"),
    }
}

// ─── RecordStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl RecordStore for SqliteStorage {
    async fn apply_batch(
        &self,
        extractor_id: &str,
        block: &Block,
        creations: &[ExtractedRecord],
        spends: &[SpendInfo],
    ) -> Result<BatchSummary, ScannerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        let mut summary = BatchSummary::default();

        let ids: Vec<&str> = creations.iter().map(|c| c.record_id.as_str()).collect();
        let mut existing = Self::existing_ids(&mut tx, extractor_id, &ids).await?;

        for record in creations {
            if existing.contains(&record.record_id) {
                let payload = serde_json::to_string(&record.payload).map_err(payload_err)?;
                sqlx::query(
                    "UPDATE records
                     SET payload = ?, creation_block_hash = ?, creation_height = ?
                     WHERE record_id = ? AND extractor_id = ?",
                )
                .bind(&payload)
                .bind(&block.hash)
                .bind(block.height as i64)
                .bind(&record.record_id)
                .bind(extractor_id)
                .execute(&mut *tx)
                .await
                .map_err(storage_err)?;
                summary.updated += 1;
            } else {
                let row = StoredRecord::created(record, extractor_id, &block.hash, block.height);
                Self::insert_record(&mut tx, &row).await?;
                existing.insert(record.record_id.clone());
                summary.inserted += 1;
            }
        }

        let mut by_tx: BTreeMap<Option<&str>, Vec<&str>> = BTreeMap::new();
        for spend in spends {
            by_tx
                .entry(spend.tx_id.as_deref())
                .or_default()
                .push(spend.record_id.as_str());
        }
        for (tx_id, ids) in &by_tx {
            summary.spent += Self::spend_ids(&mut tx, extractor_id, block, *tx_id, ids).await?;
        }

        tx.commit().await.map_err(storage_err)?;
        debug!(extractor = %extractor_id, height = block.height, ?summary, "batch committed");
        Ok(summary)
    }

    async fn undo_block(
        &self,
        extractor_id: &str,
        block_hash: &str,
    ) -> Result<UndoSummary, ScannerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        let deleted = sqlx::query(
            "DELETE FROM records WHERE extractor_id = ? AND creation_block_hash = ?",
        )
        .bind(extractor_id)
        .bind(block_hash)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?
        .rows_affected();

        let unspent = sqlx::query(
            "UPDATE records
             SET spend_block_hash = NULL, spend_height = NULL, spend_tx_id = NULL
             WHERE extractor_id = ? AND spend_block_hash = ?",
        )
        .bind(extractor_id)
        .bind(block_hash)
        .execute(&mut *tx)
        .await
        .map_err(storage_err)?
        .rows_affected();

        tx.commit().await.map_err(storage_err)?;
        Ok(UndoSummary {
            deleted: deleted as usize,
            unspent: unspent as usize,
        })
    }

    async fn warm_start(
        &self,
        extractor_id: &str,
        records: &[ExtractedRecord],
        height: u64,
    ) -> Result<(), ScannerError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;

        sqlx::query("DELETE FROM records WHERE extractor_id = ?")
            .bind(extractor_id)
            .execute(&mut *tx)
            .await
            .map_err(storage_err)?;

        for record in records {
            let row = StoredRecord::created(record, extractor_id, WARM_START_BLOCK, height);
            Self::insert_record(&mut tx, &row).await?;
        }

        tx.commit().await.map_err(storage_err)?;
        debug!(extractor = %extractor_id, count = records.len(), height, "warm start committed");
        Ok(())
    }

    async fn get(
        &self,
        extractor_id: &str,
        record_id: &str,
    ) -> Result<Option<StoredRecord>, ScannerError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE extractor_id = ? AND record_id = ?"
        ))
        .bind(extractor_id)
        .bind(record_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        row.as_ref().map(row_to_record).transpose()
    }

    async fn records(&self, extractor_id: &str) -> Result<Vec<StoredRecord>, ScannerError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records WHERE extractor_id = ?
             ORDER BY creation_height, record_id"
        ))
        .bind(extractor_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(row_to_record).collect()
    }

    async fn unspent(&self, extractor_id: &str) -> Result<Vec<StoredRecord>, ScannerError> {
        let rows = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM records
             WHERE extractor_id = ? AND spend_block_hash IS NULL
             ORDER BY creation_height, record_id"
        ))
        .bind(extractor_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter().map(row_to_record).collect()
    }

    async fn count(&self, extractor_id: &str) -> Result<u64, ScannerError> {
        let row = sqlx::query("SELECT COUNT(*) as cnt FROM records WHERE extractor_id = ?")
            .bind(extractor_id)
            .fetch_one(&self.pool)
            .await
            .map_err(storage_err)?;

        let cnt: i64 = row.get("cnt");
        Ok(cnt as u64)
    }
}

// ─── BlockStore impl ─────────────────────────────────────────────────────────

#[async_trait]
impl BlockStore for SqliteStorage {
    async fn save_block(
        &self,
        scanner: &str,
        block: &Block,
        status: BlockStatus,
    ) -> Result<(), ScannerError> {
        sqlx::query(&format!(
            "INSERT OR REPLACE INTO blocks ({BLOCK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(scanner)
        .bind(&block.hash)
        .bind(&block.parent_hash)
        .bind(block.height as i64)
        .bind(block.timestamp)
        .bind(status.as_str())
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        debug!(scanner, height = block.height, status = status.as_str(), "block saved");
        Ok(())
    }

    async fn set_status(
        &self,
        scanner: &str,
        hash: &str,
        status: BlockStatus,
    ) -> Result<(), ScannerError> {
        let result = sqlx::query(
            "UPDATE blocks SET status = ?, updated_at = ? WHERE scanner = ? AND hash = ?",
        )
        .bind(status.as_str())
        .bind(chrono::Utc::now().timestamp())
        .bind(scanner)
        .bind(hash)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() == 0 {
            return Err(ScannerError::Storage(format!(
                "block {hash} not stored for scanner {scanner}"
            )));
        }
        Ok(())
    }

    async fn last_done(&self, scanner: &str) -> Result<Option<Block>, ScannerError> {
        let row = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks
             WHERE scanner = ? AND status = ?
             ORDER BY height DESC LIMIT 1"
        ))
        .bind(scanner)
        .bind(BlockStatus::Done.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(row.as_ref().map(row_to_block))
    }

    async fn processing(&self, scanner: &str) -> Result<Vec<Block>, ScannerError> {
        let rows = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks
             WHERE scanner = ? AND status = ?
             ORDER BY height"
        ))
        .bind(scanner)
        .bind(BlockStatus::Processing.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows.iter().map(row_to_block).collect())
    }

    async fn blocks_from(
        &self,
        scanner: &str,
        from_height: u64,
    ) -> Result<Vec<Block>, ScannerError> {
        let rows = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks
             WHERE scanner = ? AND height >= ?
             ORDER BY height DESC"
        ))
        .bind(scanner)
        .bind(from_height as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(rows.iter().map(row_to_block).collect())
    }

    async fn remove_block(&self, scanner: &str, hash: &str) -> Result<(), ScannerError> {
        sqlx::query("DELETE FROM blocks WHERE scanner = ? AND hash = ?")
            .bind(scanner)
            .bind(hash)
            .execute(&self.pool)
            .await
            .map_err(storage_err)?;
        Ok(())
    }

    async fn blocks(&self, scanner: &str) -> Result<Vec<StoredBlock>, ScannerError> {
        let rows = sqlx::query(&format!(
            "SELECT {BLOCK_COLUMNS} FROM blocks WHERE scanner = ? ORDER BY height"
        ))
        .bind(scanner)
        .fetch_all(&self.pool)
        .await
        .map_err(storage_err)?;

        rows.iter()
            .map(|row| {
                let status: String = row.get("status");
                Ok(StoredBlock {
                    scanner: row.get("scanner"),
                    block: row_to_block(row),
                    status: BlockStatus::parse(&status)?,
                    updated_at: row.get("updated_at"),
                })
            })
            .collect()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
