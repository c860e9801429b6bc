//! Persistence sink for harvested matches, backed by SQLite.
//!
//! Writes follow upsert semantics keyed by match id: the first sighting of a
//! match stores every field, later sightings only refresh the fields that
//! change while a match is live (players, spectators, average MMR).

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Collection the poller writes to.
pub const DELAYED_GAMES: &str = "delayed_games";

/// A player slot as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRecord {
    #[serde(rename = "accountid")]
    pub account_id: u32,
    #[serde(rename = "heroid")]
    pub hero_id: u32,
}

/// A normalized match, one row per match id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchRecord {
    pub match_id: String,
    pub players: Vec<PlayerRecord>,
    pub server_steam_id: String,
    pub game_mode: u32,
    pub lobby_type: u32,
    pub spectators: u32,
    pub average_mmr: u32,
    pub created_at: DateTime<Utc>,
}

/// Selects the document an upsert applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchFilter {
    pub match_id: String,
}

/// Fields written on every upsert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchUpdate {
    pub players: Vec<PlayerRecord>,
    pub spectators: u32,
    pub average_mmr: u32,
}

/// Fields written only when the document is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchInsert {
    pub match_id: String,
    pub game_mode: u32,
    pub lobby_type: u32,
    pub server_steam_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpsertOp {
    pub filter: MatchFilter,
    pub set: MatchUpdate,
    pub set_on_insert: MatchInsert,
}

impl From<&MatchRecord> for UpsertOp {
    fn from(record: &MatchRecord) -> Self {
        Self {
            filter: MatchFilter {
                match_id: record.match_id.clone(),
            },
            set: MatchUpdate {
                players: record.players.clone(),
                spectators: record.spectators,
                average_mmr: record.average_mmr,
            },
            set_on_insert: MatchInsert {
                match_id: record.match_id.clone(),
                game_mode: record.game_mode,
                lobby_type: record.lobby_type,
                server_steam_id: record.server_steam_id.clone(),
                created_at: record.created_at,
            },
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkWriteResult {
    pub inserted: usize,
    pub updated: usize,
}

/// Anything that can take a batch of match upserts.
pub trait MatchSink: Send + Sync {
    /// Apply all operations as one batch.
    fn bulk_upsert(&self, collection: &str, ops: &[UpsertOp]) -> Result<BulkWriteResult>;
}

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (or create) the database at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn find_one(&self, collection: &str, match_id: &str) -> Result<Option<MatchRecord>> {
        let conn = self.conn.lock();
        ensure_collection(&conn, collection)?;
        let sql = format!("SELECT {COLUMNS} FROM {collection} WHERE match_id = ?1");
        let record = conn.query_row(&sql, params![match_id], read_record).optional()?;
        Ok(record)
    }

    /// Most recently created match the player appears in. Timestamps are
    /// stored at fixed nanosecond width so they sort as text.
    pub fn find_by_player(&self, collection: &str, account_id: u32) -> Result<Option<MatchRecord>> {
        let conn = self.conn.lock();
        ensure_collection(&conn, collection)?;
        let sql = format!(
            "SELECT {COLUMNS} FROM {collection}
             WHERE EXISTS (
                 SELECT 1 FROM json_each({collection}.players_json)
                 WHERE json_extract(value, '$.accountid') = ?1
             )
             ORDER BY created_at DESC, rowid DESC LIMIT 1"
        );
        let record = conn.query_row(&sql, params![account_id], read_record).optional()?;
        Ok(record)
    }

    /// Returns whether a row was removed.
    pub fn delete_one(&self, collection: &str, match_id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        ensure_collection(&conn, collection)?;
        let sql = format!("DELETE FROM {collection} WHERE match_id = ?1");
        Ok(conn.execute(&sql, params![match_id])? > 0)
    }

    pub fn count(&self, collection: &str) -> Result<usize> {
        let conn = self.conn.lock();
        ensure_collection(&conn, collection)?;
        let sql = format!("SELECT COUNT(*) FROM {collection}");
        let n: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

impl MatchSink for SqliteStore {
    fn bulk_upsert(&self, collection: &str, ops: &[UpsertOp]) -> Result<BulkWriteResult> {
        let mut conn = self.conn.lock();
        ensure_collection(&conn, collection)?;

        let exists_sql = format!("SELECT 1 FROM {collection} WHERE match_id = ?1");
        let upsert_sql = format!(
            "INSERT INTO {collection}
                (match_id, server_steam_id, game_mode, lobby_type, players_json, spectators, average_mmr, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(match_id) DO UPDATE SET
                players_json = excluded.players_json,
                spectators = excluded.spectators,
                average_mmr = excluded.average_mmr"
        );

        let tx = conn.transaction()?;
        let mut result = BulkWriteResult::default();
        {
            let mut exists = tx.prepare(&exists_sql)?;
            let mut upsert = tx.prepare(&upsert_sql)?;
            for op in ops {
                let present = exists
                    .query_row(params![op.filter.match_id], |_| Ok(()))
                    .optional()?
                    .is_some();
                let players_json = serde_json::to_string(&op.set.players)?;
                upsert.execute(params![
                    op.filter.match_id,
                    op.set_on_insert.server_steam_id,
                    op.set_on_insert.game_mode,
                    op.set_on_insert.lobby_type,
                    players_json,
                    op.set.spectators,
                    op.set.average_mmr,
                    op.set_on_insert.created_at.to_rfc3339_opts(SecondsFormat::Nanos, true),
                ])?;
                if present {
                    result.updated += 1;
                } else {
                    result.inserted += 1;
                }
            }
        }
        tx.commit()?;
        Ok(result)
    }
}

const COLUMNS: &str =
    "match_id, server_steam_id, game_mode, lobby_type, players_json, spectators, average_mmr, created_at";

fn ensure_collection(conn: &Connection, collection: &str) -> Result<()> {
    let valid = collection
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && collection.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
    if !valid {
        return Err(Error::InvalidCollection(collection.to_string()));
    }
    conn.execute_batch(&format!(
        "CREATE TABLE IF NOT EXISTS {collection} (
            match_id        TEXT PRIMARY KEY,
            server_steam_id TEXT NOT NULL,
            game_mode       INTEGER NOT NULL,
            lobby_type      INTEGER NOT NULL,
            players_json    TEXT NOT NULL DEFAULT '[]',
            spectators      INTEGER NOT NULL DEFAULT 0,
            average_mmr     INTEGER NOT NULL DEFAULT 0,
            created_at      TEXT NOT NULL
        );"
    ))?;
    Ok(())
}

fn read_record(row: &Row<'_>) -> rusqlite::Result<MatchRecord> {
    let players_json: String = row.get(4)?;
    let players = serde_json::from_str(&players_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    let created_at: String = row.get(7)?;
    let created_at = DateTime::parse_from_rfc3339(&created_at)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, Type::Text, Box::new(e)))?
        .with_timezone(&Utc);
    Ok(MatchRecord {
        match_id: row.get(0)?,
        server_steam_id: row.get(1)?,
        game_mode: row.get(2)?,
        lobby_type: row.get(3)?,
        players,
        spectators: row.get(5)?,
        average_mmr: row.get(6)?,
        created_at,
    })
}
