//! SQLite snapshot persistence
//!
//! The entity store lives in memory; after a replay it is written to
//! `index.db` so `serve` can start from it. Entities are stored as JSON
//! documents keyed by (kind, id).

use std::collections::BTreeSet;
use std::path::Path;

use rusqlite::{params, Connection};
use tracing::{debug, info};

use super::{EntityStore, Table};
use crate::error::IndexerError;
use crate::model::{Entity, MetadataKind};

/// Everything needed to resume the fold
#[derive(Debug, Clone, Default)]
pub struct IndexSnapshot {
    pub store: EntityStore,
    /// Highest applied (block, log index)
    pub cursor: Option<(u64, u32)>,
    /// Content sources still waiting for bytes
    pub pending: BTreeSet<(String, MetadataKind)>,
}

pub struct SnapshotDb {
    db: Connection,
}

impl SnapshotDb {
    /// Open or create the snapshot database in `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, IndexerError> {
        std::fs::create_dir_all(data_dir)?;
        let db_path = data_dir.join("index.db");
        let db = Connection::open(&db_path)?;

        db.execute_batch("PRAGMA journal_mode=WAL;")?;
        db.execute_batch(
            "CREATE TABLE IF NOT EXISTS entities (
                kind TEXT NOT NULL,
                id TEXT NOT NULL,
                data TEXT NOT NULL,
                PRIMARY KEY (kind, id)
            );
            CREATE TABLE IF NOT EXISTS cursor (
                singleton INTEGER PRIMARY KEY CHECK (singleton = 0),
                block_number INTEGER NOT NULL,
                log_index INTEGER NOT NULL
            );
            CREATE TABLE IF NOT EXISTS pending_content (
                cid TEXT NOT NULL,
                kind TEXT NOT NULL,
                PRIMARY KEY (cid, kind)
            );",
        )?;

        info!(path = %db_path.display(), "Snapshot database opened");
        Ok(Self { db })
    }

    /// Replace the stored snapshot with `snapshot`.
    pub fn save(&mut self, snapshot: &IndexSnapshot) -> Result<(), IndexerError> {
        let tx = self.db.transaction()?;
        tx.execute("DELETE FROM entities", [])?;
        tx.execute("DELETE FROM cursor", [])?;
        tx.execute("DELETE FROM pending_content", [])?;

        let store = &snapshot.store;
        let mut rows = 0usize;
        rows += save_table(&tx, &store.strategies)?;
        rows += save_table(&tx, &store.configs)?;
        rows += save_table(&tx, &store.proposals)?;
        rows += save_table(&tx, &store.member_strategies)?;
        rows += save_table(&tx, &store.stakes)?;
        rows += save_table(&tx, &store.disputes)?;
        rows += save_table(&tx, &store.vaults)?;
        rows += save_table(&tx, &store.deposits)?;
        rows += save_table(&tx, &store.sybil_protections)?;
        rows += save_table(&tx, &store.sybil_users)?;
        rows += save_table(&tx, &store.sybil_strategies)?;
        rows += save_table(&tx, &store.proposal_metadata)?;
        rows += save_table(&tx, &store.pool_metadata)?;
        rows += save_table(&tx, &store.covenants)?;
        rows += save_table(&tx, &store.dispute_metadata)?;

        if let Some((block, log_index)) = snapshot.cursor {
            tx.execute(
                "INSERT INTO cursor (singleton, block_number, log_index) VALUES (0, ?1, ?2)",
                params![block as i64, log_index as i64],
            )?;
        }
        for (cid, kind) in &snapshot.pending {
            tx.execute(
                "INSERT INTO pending_content (cid, kind) VALUES (?1, ?2)",
                params![cid, kind.as_str()],
            )?;
        }

        tx.commit()?;
        info!(rows, pending = snapshot.pending.len(), "Snapshot saved");
        Ok(())
    }

    /// Load the stored snapshot; an empty database yields an empty snapshot.
    pub fn load(&self) -> Result<IndexSnapshot, IndexerError> {
        let mut store = EntityStore::new();
        load_table(&self.db, &mut store.strategies)?;
        load_table(&self.db, &mut store.configs)?;
        load_table(&self.db, &mut store.proposals)?;
        load_table(&self.db, &mut store.member_strategies)?;
        load_table(&self.db, &mut store.stakes)?;
        load_table(&self.db, &mut store.disputes)?;
        load_table(&self.db, &mut store.vaults)?;
        load_table(&self.db, &mut store.deposits)?;
        load_table(&self.db, &mut store.sybil_protections)?;
        load_table(&self.db, &mut store.sybil_users)?;
        load_table(&self.db, &mut store.sybil_strategies)?;
        load_table(&self.db, &mut store.proposal_metadata)?;
        load_table(&self.db, &mut store.pool_metadata)?;
        load_table(&self.db, &mut store.covenants)?;
        load_table(&self.db, &mut store.dispute_metadata)?;

        let cursor = match self.db.query_row(
            "SELECT block_number, log_index FROM cursor WHERE singleton = 0",
            [],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        ) {
            Ok((block, log_index)) => Some((block as u64, log_index as u32)),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        let mut pending = BTreeSet::new();
        let mut stmt = self.db.prepare("SELECT cid, kind FROM pending_content")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (cid, kind) = row?;
            let kind = MetadataKind::from_name(&kind)
                .ok_or_else(|| IndexerError::Snapshot(format!("unknown content kind {}", kind)))?;
            pending.insert((cid, kind));
        }

        debug!(counts = ?store.counts(), "Snapshot loaded");
        Ok(IndexSnapshot { store, cursor, pending })
    }
}

fn save_table<E: Entity>(tx: &rusqlite::Transaction<'_>, table: &Table<E>) -> Result<usize, IndexerError> {
    let mut stmt = tx.prepare_cached("INSERT INTO entities (kind, id, data) VALUES (?1, ?2, ?3)")?;
    for entity in table.values() {
        let data = serde_json::to_string(entity)?;
        stmt.execute(params![E::KIND, entity.id(), data])?;
    }
    Ok(table.len())
}

fn load_table<E: Entity>(db: &Connection, table: &mut Table<E>) -> Result<(), IndexerError> {
    let mut stmt = db.prepare_cached("SELECT data FROM entities WHERE kind = ?1")?;
    let rows = stmt.query_map([E::KIND], |row| row.get::<_, String>(0))?;
    for row in rows {
        let entity: E = serde_json::from_str(&row?)?;
        table.save(entity);
    }
    Ok(())
}
