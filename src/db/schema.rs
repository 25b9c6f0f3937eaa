// Database schema types and query helpers

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::detection::MotionEvent;
use crate::error::{PorchlightError, Result};

// ----- Motion events -----

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MotionEventRow {
    pub id: i64,
    pub event_uuid: String,
    pub level: f64,
    pub peak_level: f64,
    pub started_at: String,
    pub cleared_at: Option<String>,
    pub notified: bool,
    pub recording_triggered: bool,
    pub created_at: String,
}

const MOTION_EVENT_COLUMNS: &str =
    "id, event_uuid, level, peak_level, started_at, cleared_at, notified, recording_triggered, created_at";

fn timestamp(t: &DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn map_motion_event(row: &rusqlite::Row) -> rusqlite::Result<MotionEventRow> {
    Ok(MotionEventRow {
        id: row.get(0)?,
        event_uuid: row.get(1)?,
        level: row.get(2)?,
        peak_level: row.get(3)?,
        started_at: row.get(4)?,
        cleared_at: row.get(5)?,
        notified: row.get::<_, i32>(6)? != 0,
        recording_triggered: row.get::<_, i32>(7)? != 0,
        created_at: row.get(8)?,
    })
}

pub fn insert_motion_event(conn: &Connection, event: &MotionEvent) -> Result<i64> {
    conn.execute(
        "INSERT INTO motion_events (event_uuid, level, peak_level, started_at, cleared_at, notified, recording_triggered)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.id.to_string(),
            event.level,
            event.peak_level,
            timestamp(&event.started_at),
            event.cleared_at.as_ref().map(timestamp),
            event.notified as i32,
            event.recording_triggered as i32,
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Record the clear time and final peak of an event
pub fn close_motion_event(conn: &Connection, event: &MotionEvent) -> Result<()> {
    let cleared_at = event.cleared_at.unwrap_or_else(Utc::now);
    let updated = conn.execute(
        "UPDATE motion_events
         SET cleared_at = ?1, peak_level = MAX(peak_level, ?2), notified = MAX(notified, ?3)
         WHERE event_uuid = ?4",
        params![
            timestamp(&cleared_at),
            event.peak_level,
            event.notified as i32,
            event.id.to_string(),
        ],
    )?;
    if updated == 0 {
        return Err(PorchlightError::EventNotFound(event.id.to_string()));
    }
    Ok(())
}

pub fn mark_motion_event_notified(conn: &Connection, id: Uuid) -> Result<()> {
    let updated = conn.execute(
        "UPDATE motion_events SET notified = 1 WHERE event_uuid = ?1",
        params![id.to_string()],
    )?;
    if updated == 0 {
        return Err(PorchlightError::EventNotFound(id.to_string()));
    }
    Ok(())
}

pub fn get_motion_event(conn: &Connection, id: Uuid) -> Result<Option<MotionEventRow>> {
    let sql = format!(
        "SELECT {} FROM motion_events WHERE event_uuid = ?1",
        MOTION_EVENT_COLUMNS
    );
    let result = conn
        .query_row(&sql, params![id.to_string()], map_motion_event)
        .optional()?;
    Ok(result)
}

/// Newest first
pub fn list_recent_motion_events(conn: &Connection, limit: i64) -> Result<Vec<MotionEventRow>> {
    let sql = format!(
        "SELECT {} FROM motion_events ORDER BY started_at DESC, id DESC LIMIT ?1",
        MOTION_EVENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![limit], map_motion_event)?;
    let mut events = Vec::new();
    for row in rows {
        events.push(row?);
    }
    Ok(events)
}

pub fn count_motion_events(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM motion_events", [], |row| row.get(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::migrations::run_migrations;
    use chrono::Duration;

    fn setup() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        conn
    }

    fn event(offset_secs: i64) -> MotionEvent {
        MotionEvent {
            id: Uuid::new_v4(),
            level: 12.5,
            peak_level: 12.5,
            started_at: DateTime::<Utc>::from_timestamp(1_700_000_000 + offset_secs, 0).unwrap(),
            cleared_at: None,
            notified: false,
            recording_triggered: true,
        }
    }

    #[test]
    fn test_insert_and_close() {
        let conn = setup();
        let mut e = event(0);
        insert_motion_event(&conn, &e).unwrap();

        let row = get_motion_event(&conn, e.id).unwrap().unwrap();
        assert_eq!(row.level, 12.5);
        assert!(row.cleared_at.is_none());
        assert!(row.recording_triggered);
        assert!(!row.notified);

        e.peak_level = 40.0;
        e.cleared_at = Some(e.started_at + Duration::seconds(4));
        close_motion_event(&conn, &e).unwrap();

        let row = get_motion_event(&conn, e.id).unwrap().unwrap();
        assert_eq!(row.peak_level, 40.0);
        assert_eq!(row.cleared_at.as_deref(), Some("2023-11-14T22:13:24.000Z"));
    }

    #[test]
    fn test_close_does_not_unset_notified() {
        let conn = setup();
        let e = event(0);
        insert_motion_event(&conn, &e).unwrap();
        mark_motion_event_notified(&conn, e.id).unwrap();

        // The controller's copy may not have seen the notification yet
        let mut closing = e.clone();
        closing.cleared_at = Some(e.started_at);
        close_motion_event(&conn, &closing).unwrap();

        assert!(get_motion_event(&conn, e.id).unwrap().unwrap().notified);
    }

    #[test]
    fn test_unknown_event_errors() {
        let conn = setup();
        let e = event(0);
        assert!(matches!(
            close_motion_event(&conn, &e),
            Err(PorchlightError::EventNotFound(_))
        ));
        assert!(matches!(
            mark_motion_event_notified(&conn, e.id),
            Err(PorchlightError::EventNotFound(_))
        ));
    }

    #[test]
    fn test_recent_events_newest_first() {
        let conn = setup();
        let ids: Vec<Uuid> = (0..5)
            .map(|i| {
                let e = event(i * 60);
                insert_motion_event(&conn, &e).unwrap();
                e.id
            })
            .collect();

        let recent = list_recent_motion_events(&conn, 3).unwrap();
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].event_uuid, ids[4].to_string());
        assert_eq!(recent[2].event_uuid, ids[2].to_string());
        assert_eq!(count_motion_events(&conn).unwrap(), 5);
    }
}
