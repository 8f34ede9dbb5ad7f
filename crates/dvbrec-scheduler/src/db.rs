use std::path::Path;

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use tracing::debug;

use crate::{
    error::{Result, SchedulerError},
    types::{Job, JobId, JobSpec},
};

/// Initialise the recordings schema in `conn`.
///
/// Only jobs that have not started yet are ever written here; the table is
/// rewritten as a whole on every save.
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS recordings (
            id              INTEGER NOT NULL PRIMARY KEY,
            adapter         INTEGER NOT NULL,
            channel         TEXT    NOT NULL,
            program_name    TEXT    NOT NULL,
            begin_at        TEXT    NOT NULL,   -- RFC 3339, UTC
            end_at          TEXT    NOT NULL,   -- RFC 3339, UTC
            duration        INTEGER NOT NULL,   -- seconds
            shutdown_after  INTEGER NOT NULL DEFAULT 0
        ) STRICT;
        ",
    )?;
    Ok(())
}

/// Replace the saved recordings with `jobs` in a single transaction.
pub fn save_jobs(conn: &mut Connection, jobs: &[Job]) -> Result<()> {
    init_db(conn)?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM recordings", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO recordings
             (id, adapter, channel, program_name, begin_at, end_at, duration, shutdown_after)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
        )?;
        for job in jobs {
            stmt.execute(rusqlite::params![
                job.id as i64,
                job.adapter as i64,
                job.channel,
                job.program_name,
                job.begin_at.to_rfc3339(),
                job.end_at.to_rfc3339(),
                job.duration as i64,
                job.shutdown_after,
            ])?;
        }
    }
    tx.commit()?;
    debug!(count = jobs.len(), "recordings saved");
    Ok(())
}

/// Append one recording to the saved table without touching the others.
///
/// Used to queue a recording while no scheduler is running; it is picked up
/// by the next `load`.
pub fn append_job(conn: &Connection, spec: &JobSpec) -> Result<JobId> {
    init_db(conn)?;
    conn.execute(
        "INSERT INTO recordings
         (id, adapter, channel, program_name, begin_at, end_at, duration, shutdown_after)
         VALUES ((SELECT COALESCE(MAX(id), 0) + 1 FROM recordings),?1,?2,?3,?4,?5,?6,?7)",
        rusqlite::params![
            spec.adapter as i64,
            spec.channel,
            spec.program_name,
            spec.begin_at.to_rfc3339(),
            spec.end_at.to_rfc3339(),
            spec.duration as i64,
            spec.shutdown_after,
        ],
    )?;
    Ok(conn.last_insert_rowid() as JobId)
}

/// Read every saved recording, ordered by begin time.
///
/// Rows that cannot be decoded are reported as `PersistenceCorrupt` rather
/// than skipped: losing a recording silently is worse than refusing to start.
pub fn load_jobs(conn: &Connection) -> Result<Vec<JobSpec>> {
    Ok(load_rows(conn)?.into_iter().map(|(_, spec)| spec).collect())
}

/// Like [`load_jobs`], keeping the saved id of every row.
pub fn load_rows(conn: &Connection) -> Result<Vec<(JobId, JobSpec)>> {
    init_db(conn).map_err(corrupt)?;
    let mut stmt = conn
        .prepare(
            "SELECT id, adapter, channel, program_name, begin_at, end_at, duration, shutdown_after
             FROM recordings ORDER BY begin_at, id",
        )
        .map_err(corrupt)?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,    // id
                row.get::<_, i64>(1)?,    // adapter
                row.get::<_, String>(2)?, // channel
                row.get::<_, String>(3)?, // program_name
                row.get::<_, String>(4)?, // begin_at
                row.get::<_, String>(5)?, // end_at
                row.get::<_, i64>(6)?,    // duration
                row.get::<_, bool>(7)?,   // shutdown_after
            ))
        })
        .map_err(corrupt)?;

    let mut saved = Vec::new();
    for row in rows {
        let (id, adapter, channel, program_name, begin_at, end_at, duration, shutdown_after) =
            row.map_err(corrupt)?;
        let id = JobId::try_from(id).map_err(|_| corrupted(format!("negative id {id}")))?;
        let adapter = usize::try_from(adapter)
            .map_err(|_| corrupted(format!("negative adapter {adapter}")))?;
        let duration = u64::try_from(duration)
            .map_err(|_| corrupted(format!("negative duration {duration}")))?;
        saved.push((
            id,
            JobSpec {
                adapter,
                channel,
                program_name,
                immediate: false,
                begin_at: parse_timestamp(&begin_at)?,
                end_at: parse_timestamp(&end_at)?,
                duration,
                shutdown_after,
            },
        ));
    }
    Ok(saved)
}

/// Remove one saved recording. Returns `false` if `id` is not in the table.
pub fn delete_job(conn: &Connection, id: JobId) -> Result<bool> {
    init_db(conn)?;
    let deleted = conn.execute("DELETE FROM recordings WHERE id = ?1", [id as i64])?;
    Ok(deleted > 0)
}

/// Load the recordings saved at `path`. A missing file is an empty table.
pub fn load_from(path: &Path) -> Result<Vec<JobSpec>> {
    if !path.exists() {
        debug!(path = %path.display(), "no saved recordings");
        return Ok(Vec::new());
    }
    let conn = Connection::open(path).map_err(corrupt)?;
    load_jobs(&conn)
}

/// Saved recordings with their ids. A missing file is an empty table.
pub fn load_rows_from(path: &Path) -> Result<Vec<(JobId, JobSpec)>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let conn = Connection::open(path).map_err(corrupt)?;
    load_rows(&conn)
}

/// Save `jobs` to the database at `path`, creating it if needed.
pub fn save_to(path: &Path, jobs: &[Job]) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut conn = Connection::open(path)?;
    save_jobs(&mut conn, jobs)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| corrupted(format!("bad timestamp {raw:?}: {e}")))
}

fn corrupt(e: impl std::fmt::Display) -> SchedulerError {
    SchedulerError::PersistenceCorrupt(e.to_string())
}

fn corrupted(reason: String) -> SchedulerError {
    SchedulerError::PersistenceCorrupt(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::JobState;
    use chrono::Duration;

    fn job(id: JobId, offset_mins: i64, name: &str) -> Job {
        let begin = Utc::now() + Duration::minutes(offset_mins);
        Job {
            id,
            adapter: 0,
            channel: "TF1".to_string(),
            program_name: name.to_string(),
            begin_at: begin,
            end_at: begin + Duration::minutes(30),
            duration: 1800,
            shutdown_after: id % 2 == 0,
            state: JobState::Scheduled,
        }
    }

    #[test]
    fn save_replaces_previous_content() {
        let mut conn = Connection::open_in_memory().unwrap();
        save_jobs(&mut conn, &[job(1, 10, "first one"), job(2, 20, "second one")]).unwrap();
        save_jobs(&mut conn, &[job(3, 5, "third one")]).unwrap();

        let specs = load_jobs(&conn).unwrap();
        assert_eq!(specs.len(), 1);
        assert_eq!(specs[0].program_name, "third one");
        assert!(!specs[0].immediate);
    }

    #[test]
    fn load_orders_by_begin() {
        let mut conn = Connection::open_in_memory().unwrap();
        save_jobs(
            &mut conn,
            &[job(1, 30, "late show"), job(2, 10, "early show"), job(3, 20, "mid show")],
        )
        .unwrap();
        let names: Vec<_> = load_jobs(&conn)
            .unwrap()
            .into_iter()
            .map(|s| s.program_name)
            .collect();
        assert_eq!(names, vec!["early show", "mid show", "late show"]);
    }

    #[test]
    fn append_assigns_next_id() {
        let mut conn = Connection::open_in_memory().unwrap();
        save_jobs(&mut conn, &[job(7, 10, "existing")]).unwrap();
        let id = append_job(&conn, &job(1, 15, "appended").spec()).unwrap();
        assert_eq!(id, 8);
        assert_eq!(load_jobs(&conn).unwrap().len(), 2);
    }

    #[test]
    fn delete_removes_only_that_row() {
        let mut conn = Connection::open_in_memory().unwrap();
        save_jobs(&mut conn, &[job(3, 10, "keep this"), job(4, 20, "drop this")]).unwrap();

        assert!(delete_job(&conn, 4).unwrap());
        assert!(!delete_job(&conn, 4).unwrap());

        let rows = load_rows(&conn).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].0, 3);
        assert_eq!(rows[0].1.program_name, "keep this");
    }

    #[test]
    fn delete_on_fresh_database_is_false() {
        let conn = Connection::open_in_memory().unwrap();
        assert!(!delete_job(&conn, 1).unwrap());
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let specs = load_from(&dir.path().join("absent.db")).unwrap();
        assert!(specs.is_empty());
    }

    #[test]
    fn garbage_file_is_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dvbrec.db");
        std::fs::write(&path, vec![b'x'; 4096]).unwrap();
        let err = load_from(&path).unwrap_err();
        assert!(matches!(err, SchedulerError::PersistenceCorrupt(_)));
    }

    #[test]
    fn bad_timestamp_is_corrupt() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        conn.execute(
            "INSERT INTO recordings VALUES (1, 0, 'TF1', 'broken row', 'yesterday', 'today', 60, 0)",
            [],
        )
        .unwrap();
        assert!(matches!(
            load_jobs(&conn),
            Err(SchedulerError::PersistenceCorrupt(_))
        ));
    }

    #[test]
    fn save_to_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("dvbrec.db");
        save_to(&path, &[job(1, 10, "nested save")]).unwrap();
        assert_eq!(load_from(&path).unwrap().len(), 1);
    }
}
