use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

use crate::error::{Result, WakeError};

/// Initialise the wake-up schema in `conn` (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS wakeups (
            id  INTEGER NOT NULL PRIMARY KEY,
            at  TEXT    NOT NULL    -- RFC 3339, UTC
        ) STRICT;
        ",
    )?;
    Ok(())
}

/// Replace the saved wake-ups with `entries` in a single transaction.
pub fn save_entries(conn: &mut Connection, entries: &[(u64, DateTime<Utc>)]) -> Result<()> {
    init_db(conn)?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM wakeups", [])?;
    {
        let mut stmt = tx.prepare("INSERT INTO wakeups (id, at) VALUES (?1, ?2)")?;
        for (id, at) in entries {
            stmt.execute(rusqlite::params![*id as i64, at.to_rfc3339()])?;
        }
    }
    tx.commit()?;
    Ok(())
}

/// Read every saved wake-up with its id, earliest first.
pub fn load_entries(conn: &Connection) -> Result<Vec<(u64, DateTime<Utc>)>> {
    init_db(conn).map_err(corrupt)?;
    let mut stmt = conn
        .prepare("SELECT id, at FROM wakeups ORDER BY at, id")
        .map_err(corrupt)?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?)))
        .map_err(corrupt)?;

    let mut entries = Vec::new();
    for row in rows {
        let (id, raw) = row.map_err(corrupt)?;
        let id = u64::try_from(id)
            .map_err(|_| WakeError::PersistenceCorrupt(format!("negative id {id}")))?;
        let at = DateTime::parse_from_rfc3339(&raw)
            .map_err(|e| WakeError::PersistenceCorrupt(format!("bad timestamp {raw:?}: {e}")))?;
        entries.push((id, at.with_timezone(&Utc)));
    }
    Ok(entries)
}

/// Load the wake-ups saved at `path`. A missing file is an empty set.
pub fn load_from(path: &Path) -> Result<Vec<(u64, DateTime<Utc>)>> {
    if !path.exists() {
        debug!(path = %path.display(), "no saved wake-ups");
        return Ok(Vec::new());
    }
    let conn = Connection::open(path).map_err(corrupt)?;
    load_entries(&conn)
}

/// Save to the database at `path`, creating it if needed.
pub fn save_to(path: &Path, entries: &[(u64, DateTime<Utc>)]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut conn = Connection::open(path)?;
    save_entries(&mut conn, entries)
}

fn corrupt(e: impl std::fmt::Display) -> WakeError {
    WakeError::PersistenceCorrupt(e.to_string())
}
