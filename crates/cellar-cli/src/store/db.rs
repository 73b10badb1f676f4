//! SQLite history database
//!
//! Receipts are the source of truth for what is installed; this database
//! only keeps an append-only log of what the CLI did, for `cellar history`.

use std::path::Path;

use rusqlite::{Connection, params};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("History database actor stopped")]
    ActorDied,
}

/// What a history entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Install,
    Upgrade,
    Remove,
    Test,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Upgrade => "upgrade",
            Self::Remove => "remove",
            Self::Test => "test",
        }
    }
}

/// A row of the history table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryEvent {
    pub id: Option<i64>,
    /// Unix time in milliseconds.
    pub timestamp: i64,
    pub action: String,
    pub package: String,
    pub version_from: Option<String>,
    pub version_to: Option<String>,
    pub success: bool,
    /// Failure reason or test status.
    pub detail: Option<String>,
}

impl HistoryEvent {
    /// A new entry stamped with the current time.
    pub fn now(action: Action, package: &str, success: bool) -> Self {
        Self {
            id: None,
            timestamp: chrono::Utc::now().timestamp_millis(),
            action: action.as_str().to_string(),
            package: package.to_string(),
            version_from: None,
            version_to: None,
            success,
            detail: None,
        }
    }

    pub fn with_from(mut self, version: impl ToString) -> Self {
        self.version_from = Some(version.to_string());
        self
    }

    pub fn with_to(mut self, version: impl ToString) -> Self {
        self.version_to = Some(version.to_string());
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// History database.
#[derive(Debug)]
pub struct StateDb {
    conn: Connection,
}

impl StateDb {
    /// Open database at a specific path, creating it if needed.
    pub fn open_at(path: &Path) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;

        // Enable WAL mode for better concurrency
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<(), DbError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS history (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp INTEGER NOT NULL,
                action TEXT NOT NULL,
                package TEXT NOT NULL,
                version_from TEXT,
                version_to TEXT,
                success INTEGER NOT NULL,
                detail TEXT
            );

            CREATE INDEX IF NOT EXISTS idx_history_package ON history(package);
            ",
        )?;
        Ok(())
    }

    /// Append an entry.
    pub fn add_history(&self, event: &HistoryEvent) -> Result<(), DbError> {
        self.conn.execute(
            "INSERT INTO history (timestamp, action, package, version_from, version_to, success, detail)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                event.timestamp,
                event.action,
                event.package,
                event.version_from,
                event.version_to,
                event.success,
                event.detail,
            ],
        )?;
        Ok(())
    }

    /// Entries for one package, oldest first.
    pub fn get_history(&self, package: &str) -> Result<Vec<HistoryEvent>, DbError> {
        self.query(
            "SELECT id, timestamp, action, package, version_from, version_to, success, detail
             FROM history WHERE package = ?1 ORDER BY id",
            params![package],
        )
    }

    /// The most recent `limit` entries across all packages, oldest first.
    pub fn recent_history(&self, limit: usize) -> Result<Vec<HistoryEvent>, DbError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let mut events = self.query(
            "SELECT id, timestamp, action, package, version_from, version_to, success, detail
             FROM history ORDER BY id DESC LIMIT ?1",
            params![limit],
        )?;
        events.reverse();
        Ok(events)
    }

    fn query(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<HistoryEvent>, DbError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, |row| {
            Ok(HistoryEvent {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                action: row.get(2)?,
                package: row.get(3)?,
                version_from: row.get(4)?,
                version_to: row.get(5)?,
                success: row.get(6)?,
                detail: row.get(7)?,
            })
        })?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_history_round_trip() {
        let dir = tempdir().unwrap();
        let db = StateDb::open_at(&dir.path().join("state.db")).unwrap();

        db.add_history(&HistoryEvent::now(Action::Install, "jq", true).with_to("1.7.1"))
            .unwrap();
        db.add_history(
            &HistoryEvent::now(Action::Upgrade, "jq", false)
                .with_from("1.7.1")
                .with_to("1.8.0")
                .with_detail("install step 2 failed"),
        )
        .unwrap();
        db.add_history(&HistoryEvent::now(Action::Install, "fd", true).with_to("10.2.0"))
            .unwrap();

        let history = db.get_history("jq").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].action, "install");
        assert_eq!(history[1].version_from.as_deref(), Some("1.7.1"));
        assert!(!history[1].success);
        assert_eq!(history[1].detail.as_deref(), Some("install step 2 failed"));
    }

    #[test]
    fn test_recent_history_is_bounded_and_ordered() {
        let dir = tempdir().unwrap();
        let db = StateDb::open_at(&dir.path().join("state.db")).unwrap();
        for name in ["a", "b", "c"] {
            db.add_history(&HistoryEvent::now(Action::Install, name, true))
                .unwrap();
        }

        let recent = db.recent_history(2).unwrap();
        let names: Vec<_> = recent.iter().map(|e| e.package.as_str()).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn test_reopen_keeps_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.db");
        StateDb::open_at(&path)
            .unwrap()
            .add_history(&HistoryEvent::now(Action::Remove, "jq", true))
            .unwrap();
        let db = StateDb::open_at(&path).unwrap();
        assert_eq!(db.get_history("jq").unwrap().len(), 1);
    }
}
