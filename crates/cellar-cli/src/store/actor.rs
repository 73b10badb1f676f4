//! DB Actor - Thread-safe access to SQLite
//!
//! SQLite connections are not `Sync`, so the history database lives on a
//! dedicated thread and async command code talks to it by message passing.

use std::fmt;
use std::path::Path;
use std::sync::mpsc;
use std::thread;

use tokio::sync::oneshot;

use super::db::{DbError, HistoryEvent, StateDb};

/// Events that can be sent to the DB actor
pub enum DbEvent {
    /// Append a history entry
    AddHistory {
        event: HistoryEvent,
        resp: oneshot::Sender<Result<(), DbError>>,
    },
    /// Entries for one package
    GetHistory {
        package: String,
        resp: oneshot::Sender<Result<Vec<HistoryEvent>, DbError>>,
    },
    /// Latest entries across all packages
    RecentHistory {
        limit: usize,
        resp: oneshot::Sender<Result<Vec<HistoryEvent>, DbError>>,
    },
    /// Shutdown the actor
    Shutdown,
}

impl fmt::Debug for DbEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddHistory { event, .. } => f
                .debug_struct("AddHistory")
                .field("package", &event.package)
                .field("action", &event.action)
                .finish_non_exhaustive(),
            Self::GetHistory { package, .. } => f
                .debug_struct("GetHistory")
                .field("package", package)
                .finish_non_exhaustive(),
            Self::RecentHistory { limit, .. } => f
                .debug_struct("RecentHistory")
                .field("limit", limit)
                .finish_non_exhaustive(),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// A handle to the Database Actor that is Send + Sync and Clone.
#[derive(Clone)]
pub struct DbHandle {
    sender: mpsc::Sender<DbEvent>,
}

impl fmt::Debug for DbHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DbHandle").finish_non_exhaustive()
    }
}

impl DbHandle {
    /// Open the database at `path` and spawn its actor thread.
    pub fn spawn(path: &Path) -> Result<Self, DbError> {
        let (sender, receiver) = mpsc::channel();
        let db = StateDb::open_at(path)?;

        thread::spawn(move || {
            run_db_event_loop(&db, &receiver);
        });

        Ok(Self { sender })
    }

    /// Helper to send a request and wait for the response
    async fn request<T, F>(&self, f: F) -> Result<T, DbError>
    where
        F: FnOnce(oneshot::Sender<Result<T, DbError>>) -> DbEvent,
    {
        let (tx, rx) = oneshot::channel();
        self.sender.send(f(tx)).map_err(|_| DbError::ActorDied)?;
        rx.await.map_err(|_| DbError::ActorDied)?
    }

    pub async fn add_history(&self, event: HistoryEvent) -> Result<(), DbError> {
        self.request(|resp| DbEvent::AddHistory { event, resp })
            .await
    }

    pub async fn get_history(&self, package: String) -> Result<Vec<HistoryEvent>, DbError> {
        self.request(|resp| DbEvent::GetHistory { package, resp })
            .await
    }

    pub async fn recent_history(&self, limit: usize) -> Result<Vec<HistoryEvent>, DbError> {
        self.request(|resp| DbEvent::RecentHistory { limit, resp })
            .await
    }

    /// Stop the actor once queued requests are answered.
    pub fn shutdown(&self) {
        let _ = self.sender.send(DbEvent::Shutdown);
    }
}

/// The event loop running in the background thread
fn run_db_event_loop(db: &StateDb, receiver: &mpsc::Receiver<DbEvent>) {
    while let Ok(event) = receiver.recv() {
        match event {
            DbEvent::AddHistory { event, resp } => {
                let _ = resp.send(db.add_history(&event));
            }
            DbEvent::GetHistory { package, resp } => {
                let _ = resp.send(db.get_history(&package));
            }
            DbEvent::RecentHistory { limit, resp } => {
                let _ = resp.send(db.recent_history(limit));
            }
            DbEvent::Shutdown => break,
        }
    }
}
