//! Durable catalog of blocks, blobs and bundles.
//!
//! The catalog is the only state shared between the sync and verify loops;
//! its transactional writes are their sole synchronisation mechanism. Backed
//! by sqlite through an r2d2 connection pool. Multi-row writes run in one
//! transaction; duplicate-key inserts are absorbed with upserts so every
//! loop step is replay-safe: bundles insert-or-ignore, block and blob rows
//! insert-or-replace with the primary key preserved (second write wins,
//! which is what the re-upload path relies on).

use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, OptionalExtension, Row};
use std::fmt;
use std::path::Path;

mod models;

pub use models::{Blob, Block, BlockStatus, Bundle, BundleStatus};

#[derive(Debug)]
pub enum Error {
    Sqlite(rusqlite::Error),
    Pool(r2d2::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Sqlite(e) => write!(f, "{e}"),
            Error::Pool(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Sqlite(e)
    }
}

impl From<r2d2::Error> for Error {
    fn from(e: r2d2::Error) -> Self {
        Error::Pool(e)
    }
}

pub const DEFAULT_POOL_SIZE: u32 = 8;

#[derive(Clone)]
pub struct Catalog {
    pool: r2d2::Pool<SqliteConnectionManager>,
}

impl Catalog {
    /// Opens (creating if needed) the catalog database at `path`.
    pub fn open(path: &Path, pool_size: u32) -> Result<Self, Error> {
        let manager = SqliteConnectionManager::file(path).with_init(|conn| {
            // journal_mode returns the resulting mode as a row.
            conn.query_row("PRAGMA journal_mode=WAL", [], |_| Ok(()))?;
            conn.pragma_update(None, "foreign_keys", true)?;
            Ok(())
        });
        let pool = r2d2::Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)?;
        let catalog = Self { pool };
        catalog.ensure_schema()?;
        Ok(catalog)
    }

    fn ensure_schema(&self) -> Result<(), Error> {
        let conn = self.pool.get()?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS block (
                 id              INTEGER PRIMARY KEY,
                 slot            INTEGER NOT NULL,
                 root            TEXT NOT NULL DEFAULT '',
                 parent_root     TEXT NOT NULL DEFAULT '',
                 state_root      TEXT NOT NULL DEFAULT '',
                 body_root       TEXT NOT NULL DEFAULT '',
                 signature       TEXT NOT NULL DEFAULT '',
                 proposer_index  INTEGER NOT NULL DEFAULT 0,
                 el_block_height INTEGER NOT NULL DEFAULT 0,
                 blob_count      INTEGER NOT NULL DEFAULT 0,
                 bundle_name     TEXT NOT NULL DEFAULT '',
                 status          INTEGER NOT NULL DEFAULT 0
             );
             CREATE UNIQUE INDEX IF NOT EXISTS idx_block_slot ON block (slot);
             CREATE INDEX IF NOT EXISTS idx_block_root ON block (root);

             CREATE TABLE IF NOT EXISTS blob (
                 id                         INTEGER PRIMARY KEY,
                 name                       TEXT NOT NULL,
                 slot                       INTEGER NOT NULL,
                 idx                        INTEGER NOT NULL,
                 tx_hash                    TEXT NOT NULL DEFAULT '',
                 to_addr                    TEXT NOT NULL DEFAULT '',
                 versioned_hash             TEXT NOT NULL DEFAULT '',
                 tx_index                   INTEGER,
                 kzg_commitment             TEXT NOT NULL DEFAULT '',
                 kzg_proof                  TEXT NOT NULL DEFAULT '',
                 commitment_inclusion_proof TEXT NOT NULL DEFAULT '',
                 bundle_name                TEXT NOT NULL DEFAULT ''
             );
             CREATE UNIQUE INDEX IF NOT EXISTS idx_blob_name ON blob (name);
             CREATE UNIQUE INDEX IF NOT EXISTS idx_blob_slot_idx ON blob (slot, idx);
             CREATE INDEX IF NOT EXISTS idx_blob_tx_hash ON blob (tx_hash);
             CREATE INDEX IF NOT EXISTS idx_blob_to_addr ON blob (to_addr);

             CREATE TABLE IF NOT EXISTS bundle (
                 id           INTEGER PRIMARY KEY,
                 name         TEXT NOT NULL,
                 status       INTEGER NOT NULL DEFAULT 0,
                 calibrated   INTEGER NOT NULL DEFAULT 0,
                 created_time INTEGER NOT NULL DEFAULT 0
             );
             CREATE UNIQUE INDEX IF NOT EXISTS idx_bundle_name ON bundle (name);",
        )?;
        Ok(())
    }

    fn block_from_row(row: &Row) -> rusqlite::Result<Block> {
        Ok(Block {
            slot: row.get::<_, i64>("slot")? as u64,
            root: row.get("root")?,
            parent_root: row.get("parent_root")?,
            state_root: row.get("state_root")?,
            body_root: row.get("body_root")?,
            signature: row.get("signature")?,
            proposer_index: row.get::<_, i64>("proposer_index")? as u64,
            el_block_height: row.get::<_, i64>("el_block_height")? as u64,
            blob_count: row.get("blob_count")?,
            bundle_name: row.get("bundle_name")?,
            status: BlockStatus::from_code(row.get("status")?),
        })
    }

    fn blob_from_row(row: &Row) -> rusqlite::Result<Blob> {
        Ok(Blob {
            name: row.get("name")?,
            slot: row.get::<_, i64>("slot")? as u64,
            idx: row.get("idx")?,
            tx_hash: row.get("tx_hash")?,
            to_addr: row.get("to_addr")?,
            versioned_hash: row.get("versioned_hash")?,
            tx_index: row.get("tx_index")?,
            kzg_commitment: row.get("kzg_commitment")?,
            kzg_proof: row.get("kzg_proof")?,
            commitment_inclusion_proof: row.get("commitment_inclusion_proof")?,
            bundle_name: row.get("bundle_name")?,
        })
    }

    fn bundle_from_row(row: &Row) -> rusqlite::Result<Bundle> {
        Ok(Bundle {
            name: row.get("name")?,
            status: BundleStatus::from_code(row.get("status")?),
            calibrated: row.get::<_, i64>("calibrated")? != 0,
            created_time: row.get("created_time")?,
        })
    }

    const BLOCK_COLUMNS: &'static str = "slot, root, parent_root, state_root, body_root, \
         signature, proposer_index, el_block_height, blob_count, bundle_name, status";
    const BLOB_COLUMNS: &'static str = "name, slot, idx, tx_hash, to_addr, versioned_hash, \
         tx_index, kzg_commitment, kzg_proof, commitment_inclusion_proof, bundle_name";

    /// Highest-slot block row, regardless of status.
    pub fn get_latest_processed_block(&self) -> Result<Option<Block>, Error> {
        let conn = self.pool.get()?;
        let block = conn
            .query_row(
                &format!(
                    "SELECT {} FROM block ORDER BY slot DESC LIMIT 1",
                    Self::BLOCK_COLUMNS
                ),
                [],
                Self::block_from_row,
            )
            .optional()?;
        Ok(block)
    }

    /// Lowest-slot block still in `Processed`, i.e. the verify loop's next
    /// work item.
    pub fn get_earliest_unverified_block(&self) -> Result<Option<Block>, Error> {
        let conn = self.pool.get()?;
        let block = conn
            .query_row(
                &format!(
                    "SELECT {} FROM block WHERE status = ?1 ORDER BY slot ASC LIMIT 1",
                    Self::BLOCK_COLUMNS
                ),
                params![BlockStatus::Processed.code()],
                Self::block_from_row,
            )
            .optional()?;
        Ok(block)
    }

    pub fn get_first_block(&self) -> Result<Option<Block>, Error> {
        let conn = self.pool.get()?;
        let block = conn
            .query_row(
                &format!(
                    "SELECT {} FROM block ORDER BY slot ASC LIMIT 1",
                    Self::BLOCK_COLUMNS
                ),
                [],
                Self::block_from_row,
            )
            .optional()?;
        Ok(block)
    }

    pub fn get_latest_verified_block(&self) -> Result<Option<Block>, Error> {
        let conn = self.pool.get()?;
        let block = conn
            .query_row(
                &format!(
                    "SELECT {} FROM block WHERE status = ?1 ORDER BY slot DESC LIMIT 1",
                    Self::BLOCK_COLUMNS
                ),
                params![BlockStatus::Verified.code()],
                Self::block_from_row,
            )
            .optional()?;
        Ok(block)
    }

    pub fn get_block_by_id(&self, slot: u64) -> Result<Option<Block>, Error> {
        let conn = self.pool.get()?;
        let block = conn
            .query_row(
                &format!(
                    "SELECT {} FROM block WHERE slot = ?1",
                    Self::BLOCK_COLUMNS
                ),
                params![slot as i64],
                Self::block_from_row,
            )
            .optional()?;
        Ok(block)
    }

    /// Lookup by hex root (no `0x` prefix, as stored).
    pub fn get_block_by_root(&self, root: &str) -> Result<Option<Block>, Error> {
        let conn = self.pool.get()?;
        let block = conn
            .query_row(
                &format!(
                    "SELECT {} FROM block WHERE root = ?1 LIMIT 1",
                    Self::BLOCK_COLUMNS
                ),
                params![root],
                Self::block_from_row,
            )
            .optional()?;
        Ok(block)
    }

    /// Blob rows for a block, ascending by index. An empty `indices` filter
    /// returns every row.
    pub fn get_blobs_by_block_id(
        &self,
        slot: u64,
        indices: &[i64],
    ) -> Result<Vec<Blob>, Error> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM blob WHERE slot = ?1 ORDER BY idx ASC",
            Self::BLOB_COLUMNS
        ))?;
        let rows = stmt.query_map(params![slot as i64], Self::blob_from_row)?;
        let mut blobs = vec![];
        for blob in rows {
            let blob = blob?;
            if indices.is_empty() || indices.contains(&blob.idx) {
                blobs.push(blob);
            }
        }
        Ok(blobs)
    }

    /// All blob rows in `[start, end]`, ascending by `(slot, idx)`.
    pub fn get_blobs_between_blocks(&self, start: u64, end: u64) -> Result<Vec<Blob>, Error> {
        let conn = self.pool.get()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM blob WHERE slot BETWEEN ?1 AND ?2 ORDER BY slot ASC, idx ASC",
            Self::BLOB_COLUMNS
        ))?;
        let rows = stmt.query_map(params![start as i64, end as i64], Self::blob_from_row)?;
        let mut blobs = vec![];
        for blob in rows {
            blobs.push(blob?);
        }
        Ok(blobs)
    }

    /// Persists a block and its blobs in one transaction. Existing rows are
    /// replaced field-by-field with the row id untouched.
    pub fn save_block_and_blobs(&self, block: &Block, blobs: &[Blob]) -> Result<(), Error> {
        let mut conn = self.pool.get()?;
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO block (slot, root, parent_root, state_root, body_root, signature, \
                 proposer_index, el_block_height, blob_count, bundle_name, status)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(slot) DO UPDATE SET
                 root = excluded.root,
                 parent_root = excluded.parent_root,
                 state_root = excluded.state_root,
                 body_root = excluded.body_root,
                 signature = excluded.signature,
                 proposer_index = excluded.proposer_index,
                 el_block_height = excluded.el_block_height,
                 blob_count = excluded.blob_count,
                 bundle_name = excluded.bundle_name,
                 status = excluded.status",
            params![
                block.slot as i64,
                block.root,
                block.parent_root,
                block.state_root,
                block.body_root,
                block.signature,
                block.proposer_index as i64,
                block.el_block_height as i64,
                block.blob_count,
                block.bundle_name,
                block.status.code(),
            ],
        )?;
        for blob in blobs {
            tx.execute(
                "INSERT INTO blob (name, slot, idx, tx_hash, to_addr, versioned_hash, tx_index, \
                     kzg_commitment, kzg_proof, commitment_inclusion_proof, bundle_name)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
                 ON CONFLICT(name) DO UPDATE SET
                     slot = excluded.slot,
                     idx = excluded.idx,
                     tx_hash = excluded.tx_hash,
                     to_addr = excluded.to_addr,
                     versioned_hash = excluded.versioned_hash,
                     tx_index = excluded.tx_index,
                     kzg_commitment = excluded.kzg_commitment,
                     kzg_proof = excluded.kzg_proof,
                     commitment_inclusion_proof = excluded.commitment_inclusion_proof,
                     bundle_name = excluded.bundle_name",
                params![
                    blob.name,
                    blob.slot as i64,
                    blob.idx,
                    blob.tx_hash,
                    blob.to_addr,
                    blob.versioned_hash,
                    blob.tx_index,
                    blob.kzg_commitment,
                    blob.kzg_proof,
                    blob.commitment_inclusion_proof,
                    blob.bundle_name,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Idempotent on the unique bundle name.
    pub fn create_bundle(&self, bundle: &Bundle) -> Result<(), Error> {
        let conn = self.pool.get()?;
        conn.execute(
            "INSERT INTO bundle (name, status, calibrated, created_time)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(name) DO NOTHING",
            params![
                bundle.name,
                bundle.status.code(),
                bundle.calibrated as i64,
                bundle.created_time,
            ],
        )?;
        Ok(())
    }

    /// Most recent `Finalizing` bundle that is not a calibrated replacement;
    /// this is the sync loop's resume point.
    pub fn get_latest_finalizing_bundle(&self) -> Result<Option<Bundle>, Error> {
        let conn = self.pool.get()?;
        let bundle = conn
            .query_row(
                "SELECT name, status, calibrated, created_time FROM bundle
                 WHERE status = ?1 AND calibrated = 0 ORDER BY id DESC LIMIT 1",
                params![BundleStatus::Finalizing.code()],
                Self::bundle_from_row,
            )
            .optional()?;
        Ok(bundle)
    }

    pub fn get_bundle(&self, name: &str) -> Result<Option<Bundle>, Error> {
        let conn = self.pool.get()?;
        let bundle = conn
            .query_row(
                "SELECT name, status, calibrated, created_time FROM bundle WHERE name = ?1",
                params![name],
                Self::bundle_from_row,
            )
            .optional()?;
        Ok(bundle)
    }

    pub fn update_bundle_status(&self, name: &str, status: BundleStatus) -> Result<(), Error> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE bundle SET status = ?1 WHERE name = ?2",
            params![status.code(), name],
        )?;
        Ok(())
    }

    pub fn update_block_status(&self, slot: u64, status: BlockStatus) -> Result<(), Error> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE block SET status = ?1 WHERE slot = ?2",
            params![status.code(), slot as i64],
        )?;
        Ok(())
    }

    /// Updates every block in `[start, end]` in one statement.
    pub fn update_blocks_status(
        &self,
        start: u64,
        end: u64,
        status: BlockStatus,
    ) -> Result<(), Error> {
        let conn = self.pool.get()?;
        conn.execute(
            "UPDATE block SET status = ?1 WHERE slot BETWEEN ?2 AND ?3",
            params![status.code(), start as i64, end as i64],
        )?;
        Ok(())
    }
}
