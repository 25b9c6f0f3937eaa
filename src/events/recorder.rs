// Event recorder
// Owns the EventStore on a worker thread. Callers never wait on SQLite;
// failures come back to the supervisor as warnings.

use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

use uuid::Uuid;

use crate::db::EventStore;
use crate::detection::MotionEvent;
use crate::error::{PorchlightError, Result};
use crate::runtime::Message;

enum RecorderCommand {
    Open(MotionEvent),
    Close(MotionEvent),
    MarkNotified(Uuid),
}

pub struct EventRecorder {
    tx: Option<Sender<RecorderCommand>>,
    handle: Option<JoinHandle<()>>,
}

impl EventRecorder {
    pub fn spawn(mut store: Box<dyn EventStore>, inbox: Sender<Message>) -> Result<Self> {
        let (tx, rx) = mpsc::channel::<RecorderCommand>();

        let handle = std::thread::Builder::new()
            .name("event-recorder".into())
            .spawn(move || {
                for command in rx {
                    let (what, result) = match command {
                        RecorderCommand::Open(event) => {
                            ("record motion event", store.insert_motion_event(&event))
                        }
                        RecorderCommand::Close(event) => {
                            ("close motion event", store.close_motion_event(&event))
                        }
                        RecorderCommand::MarkNotified(id) => ("mark event notified", store.mark_notified(id)),
                    };
                    if let Err(e) = result {
                        log::warn!("Failed to {}: {}", what, e);
                        let _ = inbox.send(Message::Warning(format!("Failed to {}: {}", what, e)));
                    }
                }
                log::debug!("Event recorder stopped");
            })
            .map_err(|e| PorchlightError::Other(format!("Failed to spawn event recorder: {}", e)))?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queue an insert. The id is known up front, so nothing waits for the write.
    pub fn open(&self, event: &MotionEvent) -> Uuid {
        self.send(RecorderCommand::Open(event.clone()));
        event.id
    }

    pub fn close(&self, event: &MotionEvent) {
        self.send(RecorderCommand::Close(event.clone()));
    }

    pub fn mark_notified(&self, id: Uuid) {
        self.send(RecorderCommand::MarkNotified(id));
    }

    /// Drain queued writes and stop the worker. Idempotent.
    pub fn shutdown(&mut self) {
        self.tx = None;
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                log::error!("Event recorder thread panicked");
            }
        }
    }

    fn send(&self, command: RecorderCommand) {
        match &self.tx {
            Some(tx) => {
                if tx.send(command).is_err() {
                    log::warn!("Event recorder is gone, dropping write");
                }
            }
            None => log::warn!("Event recorder already shut down, dropping write"),
        }
    }
}

impl Drop for EventRecorder {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MotionEventRow, SqliteEventStore};
    use chrono::Utc;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    fn event() -> MotionEvent {
        MotionEvent {
            id: Uuid::new_v4(),
            level: 20.0,
            peak_level: 20.0,
            started_at: Utc::now(),
            cleared_at: None,
            notified: false,
            recording_triggered: false,
        }
    }

    /// Store that fails every write
    struct BrokenStore;

    impl EventStore for BrokenStore {
        fn insert_motion_event(&mut self, _event: &MotionEvent) -> Result<()> {
            Err(PorchlightError::Other("disk full".to_string()))
        }
        fn close_motion_event(&mut self, _event: &MotionEvent) -> Result<()> {
            Err(PorchlightError::Other("disk full".to_string()))
        }
        fn mark_notified(&mut self, _id: Uuid) -> Result<()> {
            Err(PorchlightError::Other("disk full".to_string()))
        }
        fn recent_events(&mut self, _limit: i64) -> Result<Vec<MotionEventRow>> {
            Ok(Vec::new())
        }
    }

    /// Records call order
    struct LoggingStore(Arc<Mutex<Vec<String>>>);

    impl EventStore for LoggingStore {
        fn insert_motion_event(&mut self, event: &MotionEvent) -> Result<()> {
            self.0.lock().unwrap().push(format!("open {}", event.id));
            Ok(())
        }
        fn close_motion_event(&mut self, event: &MotionEvent) -> Result<()> {
            self.0.lock().unwrap().push(format!("close {}", event.id));
            Ok(())
        }
        fn mark_notified(&mut self, id: Uuid) -> Result<()> {
            self.0.lock().unwrap().push(format!("notified {}", id));
            Ok(())
        }
        fn recent_events(&mut self, _limit: i64) -> Result<Vec<MotionEventRow>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_writes_apply_in_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let (inbox, _rx) = mpsc::channel();
        let mut recorder = EventRecorder::spawn(Box::new(LoggingStore(Arc::clone(&calls))), inbox).unwrap();

        let e = event();
        assert_eq!(recorder.open(&e), e.id);
        recorder.mark_notified(e.id);
        recorder.close(&e);
        recorder.shutdown();

        let calls = calls.lock().unwrap();
        assert_eq!(
            *calls,
            vec![
                format!("open {}", e.id),
                format!("notified {}", e.id),
                format!("close {}", e.id)
            ]
        );
    }

    #[test]
    fn test_failures_become_warnings() {
        let (inbox, rx) = mpsc::channel();
        let mut recorder = EventRecorder::spawn(Box::new(BrokenStore), inbox).unwrap();
        recorder.open(&event());
        recorder.shutdown();

        match rx.try_recv() {
            Ok(Message::Warning(msg)) => assert!(msg.contains("disk full")),
            other => panic!("expected a warning, got {:?}", other.is_ok()),
        }
    }

    #[test]
    fn test_sqlite_round_trip_through_worker() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("events.db");
        let (inbox, rx) = mpsc::channel();

        let mut e = event();
        {
            let store = SqliteEventStore::open(&path).unwrap();
            let mut recorder = EventRecorder::spawn(Box::new(store), inbox).unwrap();
            recorder.open(&e);
            e.cleared_at = Some(e.started_at);
            recorder.close(&e);
            recorder.shutdown();
        }
        assert!(rx.try_recv().is_err());

        let mut store = SqliteEventStore::open(&path).unwrap();
        let rows = store.recent_events(5).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].cleared_at.is_some());
    }

    #[test]
    fn test_writes_after_shutdown_are_dropped() {
        let (inbox, _rx) = mpsc::channel();
        let mut recorder = EventRecorder::spawn(Box::new(BrokenStore), inbox).unwrap();
        recorder.shutdown();
        recorder.shutdown();
        recorder.close(&event());
    }
}
