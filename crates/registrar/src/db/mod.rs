/// Database module for the enrollment catalog

mod catalog;
mod types;

pub use catalog::CatalogTx;
pub use types::*;

use crate::config::StoreConfig;
use crate::error::RegistrarError;
use chrono::{DateTime, SecondsFormat, Utc};
use rand::Rng;
use rusqlite::{Connection, TransactionBehavior};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, warn};

const SCHEMA_SQL: &str = include_str!("../../../../sql/init_catalog.sql");

/// Upper bound for a single retry delay.
const MAX_RETRY_DELAY_MS: u64 = 2_000;

/// Current time in the fixed-width format stored in timestamp columns.
///
/// Fixed width keeps text ordering equal to time ordering.
pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQLite-backed catalog store.
///
/// Every unit of work runs inside an `IMMEDIATE` transaction, so writers are
/// serialized by the database write lock and a check followed by a write
/// cannot interleave with another writer. Lock waits are bounded by the
/// configured busy timeout.
pub struct CatalogStore {
    path: PathBuf,
    settings: StoreConfig,
    idle: Mutex<Vec<Connection>>,
}

impl CatalogStore {
    /// Opens (or creates) the catalog file and initializes the schema.
    pub fn open(path: impl AsRef<Path>, settings: StoreConfig) -> Result<Self, RegistrarError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| RegistrarError::Store {
                message: format!("cannot create {}: {}", parent.display(), e),
            })?;
        }

        let conn = Self::connect(&path, &settings)?;

        // WAL lets readers proceed while one writer holds the lock; the mode
        // is persistent, so only the first connection sets it.
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        debug!(path = %path.display(), journal_mode = %mode, "Opened catalog store");

        conn.execute_batch(SCHEMA_SQL)?;

        Ok(Self {
            path,
            settings,
            idle: Mutex::new(vec![conn]),
        })
    }

    fn connect(path: &Path, settings: &StoreConfig) -> Result<Connection, RegistrarError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(settings.busy_timeout())?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(conn)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn checkout(&self) -> Result<Connection, RegistrarError> {
        let pooled = self
            .idle
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop();
        match pooled {
            Some(conn) => Ok(conn),
            None => Self::connect(&self.path, &self.settings),
        }
    }

    fn checkin(&self, conn: Connection) {
        let mut idle = self.idle.lock().unwrap_or_else(PoisonError::into_inner);
        if idle.len() < self.settings.pool_size {
            idle.push(conn);
        }
    }

    /// Runs `work` as one write transaction, committing on `Ok`.
    ///
    /// An `Err` (or a panic) rolls back everything `work` did. A transient
    /// failure (lock timeout, busy database) re-runs the whole transaction
    /// up to `max_retries` times with backoff; semantic errors are returned
    /// immediately.
    pub fn transaction<T, F>(&self, op: &'static str, mut work: F) -> Result<T, RegistrarError>
    where
        F: FnMut(&CatalogTx<'_>) -> Result<T, RegistrarError>,
    {
        self.run_with_retry(op, TransactionBehavior::Immediate, &mut work)
    }

    /// Runs `work` as a read-only snapshot.
    pub fn read<T, F>(&self, op: &'static str, mut work: F) -> Result<T, RegistrarError>
    where
        F: FnMut(&CatalogTx<'_>) -> Result<T, RegistrarError>,
    {
        self.run_with_retry(op, TransactionBehavior::Deferred, &mut work)
    }

    fn run_with_retry<T, F>(
        &self,
        op: &'static str,
        behavior: TransactionBehavior,
        work: &mut F,
    ) -> Result<T, RegistrarError>
    where
        F: FnMut(&CatalogTx<'_>) -> Result<T, RegistrarError>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.run_once(behavior, work) {
                Err(e) if e.is_retryable() && attempt <= self.settings.max_retries => {
                    let delay = self.retry_delay(attempt);
                    warn!(
                        op = op,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Transient store failure, retrying transaction"
                    );
                    std::thread::sleep(delay);
                }
                Err(RegistrarError::TransientStoreFailure { message, .. }) => {
                    warn!(op = op, attempts = attempt, "Transaction retries exhausted");
                    return Err(RegistrarError::TransientStoreFailure {
                        message,
                        attempts: attempt,
                    });
                }
                other => return other,
            }
        }
    }

    fn run_once<T, F>(&self, behavior: TransactionBehavior, work: &mut F) -> Result<T, RegistrarError>
    where
        F: FnMut(&CatalogTx<'_>) -> Result<T, RegistrarError>,
    {
        let mut conn = self.checkout()?;
        let result = Self::run_in(&mut conn, behavior, work);
        self.checkin(conn);
        result
    }

    fn run_in<T, F>(
        conn: &mut Connection,
        behavior: TransactionBehavior,
        work: &mut F,
    ) -> Result<T, RegistrarError>
    where
        F: FnMut(&CatalogTx<'_>) -> Result<T, RegistrarError>,
    {
        // Dropping `tx` without commit rolls it back.
        let tx = conn.transaction_with_behavior(behavior)?;
        let value = work(&CatalogTx::new(&tx))?;
        tx.commit()?;
        Ok(value)
    }

    /// Calculates retry delay with exponential backoff and jitter.
    fn retry_delay(&self, attempt: u32) -> Duration {
        let base = self.settings.retry_backoff_ms.max(1);
        let exponential = base * 2u64.pow(attempt.saturating_sub(1).min(5));
        let capped = exponential.min(MAX_RETRY_DELAY_MS);
        // 0-20% jitter so competing writers do not retry in lockstep
        let jitter = rand::thread_rng().gen_range(0..=(capped / 5));
        Duration::from_millis(capped + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn open_store(dir: &tempfile::TempDir, settings: StoreConfig) -> CatalogStore {
        CatalogStore::open(dir.path().join("catalog.db"), settings).unwrap()
    }

    #[test]
    fn test_error_rolls_back_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, StoreConfig::default());

        let result: Result<(), _> = store.transaction("test", |tx| {
            tx.insert_teacher("T001", "Grace")?;
            Err(RegistrarError::CapacityExceeded { offering_id: 1 })
        });
        assert!(result.is_err());

        let count: i64 = store
            .read("test", |tx| tx.count_rows("teachers"))
            .unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn test_transient_failure_retried_once() {
        let dir = tempfile::tempdir().unwrap();
        let settings = StoreConfig {
            retry_backoff_ms: 1,
            ..StoreConfig::default()
        };
        let store = open_store(&dir, settings);
        let calls = Cell::new(0);

        let result = store.transaction("test", |_tx| {
            calls.set(calls.get() + 1);
            if calls.get() == 1 {
                Err(RegistrarError::TransientStoreFailure {
                    message: "database is locked".to_string(),
                    attempts: 1,
                })
            } else {
                Ok(42)
            }
        });

        assert_eq!(result, Ok(42));
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_transient_failure_surfaces_after_retries() {
        let dir = tempfile::tempdir().unwrap();
        let settings = StoreConfig {
            retry_backoff_ms: 1,
            max_retries: 1,
            ..StoreConfig::default()
        };
        let store = open_store(&dir, settings);
        let calls = Cell::new(0);

        let result: Result<(), _> = store.transaction("test", |_tx| {
            calls.set(calls.get() + 1);
            Err(RegistrarError::TransientStoreFailure {
                message: "database is locked".to_string(),
                attempts: 1,
            })
        });

        assert_eq!(calls.get(), 2);
        match result {
            Err(RegistrarError::TransientStoreFailure { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_semantic_error_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, StoreConfig::default());
        let calls = Cell::new(0);

        let _ = store.transaction::<(), _>("test", |_tx| {
            calls.set(calls.get() + 1);
            Err(RegistrarError::CapacityExceeded { offering_id: 1 })
        });
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_lock_timeout_is_transient() {
        let dir = tempfile::tempdir().unwrap();
        let settings = StoreConfig {
            busy_timeout_ms: 50,
            max_retries: 0,
            ..StoreConfig::default()
        };
        let store = open_store(&dir, settings);

        // Hold the write lock from a separate connection.
        let mut blocker = Connection::open(store.path()).unwrap();
        let held = blocker
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .unwrap();

        let result = store.transaction("test", |tx| tx.insert_teacher("T001", "Grace"));
        assert!(matches!(
            result,
            Err(RegistrarError::TransientStoreFailure { attempts: 1, .. })
        ));

        held.rollback().unwrap();
    }

    #[test]
    fn test_retry_delay_backoff() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_store(&dir, StoreConfig::default());

        let d1 = store.retry_delay(1);
        let d3 = store.retry_delay(3);
        assert!(d1 >= Duration::from_millis(50));
        assert!(d3 >= Duration::from_millis(200));
        assert!(store.retry_delay(30) <= Duration::from_millis(MAX_RETRY_DELAY_MS * 6 / 5));
    }
}
