// Database module

pub mod migrations;
pub mod schema;

use std::path::{Path, PathBuf};

use rusqlite::Connection;
use uuid::Uuid;

use crate::constants::{APP_DIR_NAME, DB_FILENAME};
use crate::detection::MotionEvent;
use crate::error::{PorchlightError, Result};

pub use schema::MotionEventRow;

/// Open or create a database at the given path
pub fn open_db(db_path: &Path) -> Result<Connection> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let conn = Connection::open(db_path)?;

    // Enable WAL mode so the CLI can read while a watcher writes
    conn.execute_batch("PRAGMA journal_mode = WAL;")?;

    migrations::run_migrations(&conn)?;

    Ok(conn)
}

/// Default database location: <data dir>/porchlight/porchlight.db
pub fn default_db_path() -> Result<PathBuf> {
    let dirs = directories::ProjectDirs::from("", "", APP_DIR_NAME)
        .ok_or_else(|| PorchlightError::Other("Could not determine data directory".to_string()))?;
    Ok(dirs.data_dir().join(DB_FILENAME))
}

/// Persistence for motion events, owned by the recorder thread
pub trait EventStore: Send {
    fn insert_motion_event(&mut self, event: &MotionEvent) -> Result<()>;

    fn close_motion_event(&mut self, event: &MotionEvent) -> Result<()>;

    fn mark_notified(&mut self, id: Uuid) -> Result<()>;

    fn recent_events(&mut self, limit: i64) -> Result<Vec<MotionEventRow>>;
}

pub struct SqliteEventStore {
    conn: Connection,
}

impl SqliteEventStore {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self { conn: open_db(path)? })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrations::run_migrations(&conn)?;
        Ok(Self { conn })
    }
}

impl EventStore for SqliteEventStore {
    fn insert_motion_event(&mut self, event: &MotionEvent) -> Result<()> {
        schema::insert_motion_event(&self.conn, event).map(|_| ())
    }

    fn close_motion_event(&mut self, event: &MotionEvent) -> Result<()> {
        schema::close_motion_event(&self.conn, event)
    }

    fn mark_notified(&mut self, id: Uuid) -> Result<()> {
        schema::mark_motion_event_notified(&self.conn, id)
    }

    fn recent_events(&mut self, limit: i64) -> Result<Vec<MotionEventRow>> {
        schema::list_recent_motion_events(&self.conn, limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    #[test]
    fn test_open_db_creates_parent_dirs() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("events.db");
        let conn = open_db(&path).unwrap();
        assert!(path.exists());

        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
    }

    #[test]
    fn test_store_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.db");
        let event = MotionEvent {
            id: Uuid::new_v4(),
            level: 8.0,
            peak_level: 8.0,
            started_at: Utc::now(),
            cleared_at: None,
            notified: false,
            recording_triggered: false,
        };

        {
            let mut store = SqliteEventStore::open(&path).unwrap();
            store.insert_motion_event(&event).unwrap();
            store.mark_notified(event.id).unwrap();
        }

        let mut store = SqliteEventStore::open(&path).unwrap();
        let recent = store.recent_events(10).unwrap();
        assert_eq!(recent.len(), 1);
        assert!(recent[0].notified);
    }
}
