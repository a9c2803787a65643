//! SQLite database module for the disposal ledger
//!
//! ## Tables
//!
//! - `waste_categories` - Category catalog referenced by disposals
//! - `user_profiles` - Profile details and cumulative totals
//! - `waste_logs` - Immutable disposal records
//! - `xp_logs` - Immutable experience entries
//! - `badges` / `user_badges` - Badge catalog and awards
//! - `challenges` / `challenge_participants` - Challenges and progress
//!
//! Totals are only ever changed with in-place increments
//! (`SET total = total + ?`) so concurrent disposals never lose updates.

pub mod schema;
pub mod badges;
pub mod categories;
pub mod challenges;
pub mod disposals;
pub mod experience;
pub mod profiles;
pub mod seed;
mod ledger_store;

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::{Connection, ErrorCode};
use tracing::{debug, info};

use crate::error::LedgerError;

/// Default busy timeout when none is configured
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite database for the ledger
pub struct LedgerDb {
    conn: Mutex<Connection>,
}

impl LedgerDb {
    /// Open or create the ledger database file
    pub fn open(db_path: &Path) -> Result<Self, LedgerError> {
        Self::open_with_timeout(db_path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Open or create the ledger database file with a custom busy timeout
    pub fn open_with_timeout(db_path: &Path, busy_timeout: Duration) -> Result<Self, LedgerError> {
        info!("Opening SQLite database at {:?}", db_path);

        let conn = Connection::open(db_path)
            .map_err(|e| LedgerError::StoreUnavailable(format!("Failed to open SQLite: {}", e)))?;

        // WAL for concurrent readers while a disposal is being written
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL; PRAGMA foreign_keys=ON;")
            .map_err(|e| LedgerError::Internal(format!("Failed to set PRAGMA: {}", e)))?;
        conn.busy_timeout(busy_timeout)
            .map_err(|e| LedgerError::Internal(format!("Failed to set busy timeout: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self, LedgerError> {
        debug!("Opening in-memory SQLite database");

        let conn = Connection::open_in_memory()
            .map_err(|e| LedgerError::Internal(format!("Failed to open in-memory SQLite: {}", e)))?;
        conn.execute_batch("PRAGMA foreign_keys=ON;")
            .map_err(|e| LedgerError::Internal(format!("Failed to set PRAGMA: {}", e)))?;

        let db = Self {
            conn: Mutex::new(conn),
        };

        db.init_schema()?;

        Ok(db)
    }

    /// Initialize database schema
    fn init_schema(&self) -> Result<(), LedgerError> {
        self.with_conn(|conn| schema::init_schema(conn))
    }

    /// Run a read with the shared connection
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&Connection) -> Result<T, LedgerError>,
    {
        let conn = self.conn.lock()
            .map_err(|e| LedgerError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&conn)
    }

    /// Execute a write operation with exclusive access
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T, LedgerError>
    where
        F: FnOnce(&mut Connection) -> Result<T, LedgerError>,
    {
        let mut conn = self.conn.lock()
            .map_err(|e| LedgerError::Internal(format!("Lock poisoned: {}", e)))?;
        f(&mut conn)
    }

    /// Get database statistics
    pub fn stats(&self) -> Result<DbStats, LedgerError> {
        self.with_conn(|conn| {
            let count = |table: &str| -> Result<u64, LedgerError> {
                let n: i64 = conn
                    .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))
                    .map_err(query_err)?;
                Ok(n as u64)
            };

            Ok(DbStats {
                users: count("user_profiles")?,
                disposals: count("waste_logs")?,
                badges_awarded: count("user_badges")?,
                active_challenges: count("challenges WHERE status = 'active'")?,
            })
        })
    }
}

/// Database statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct DbStats {
    pub users: u64,
    pub disposals: u64,
    pub badges_awarded: u64,
    pub active_challenges: u64,
}

/// Map a rusqlite error, separating transient lock contention from the rest
pub(crate) fn query_err(e: rusqlite::Error) -> LedgerError {
    match e.sqlite_error_code() {
        Some(ErrorCode::DatabaseBusy) | Some(ErrorCode::DatabaseLocked) => {
            LedgerError::StoreUnavailable(e.to_string())
        }
        _ => LedgerError::Internal(format!("Query failed: {}", e)),
    }
}

/// Whether a rusqlite error is a UNIQUE/PRIMARY KEY violation
pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    match e {
        rusqlite::Error::SqliteFailure(err, _) => {
            err.code == ErrorCode::ConstraintViolation
                && (err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                    || err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY)
        }
        _ => false,
    }
}

/// Current time as an RFC 3339 UTC string
pub(crate) fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

// Re-exports
pub use badges::{BadgeProgress, CreateBadgeInput};
pub use categories::{CategoryRow, CreateCategoryInput};
pub use challenges::{ChallengeRow, ChallengeView, CreateChallengeInput};
pub use disposals::DisposalRow;
pub use experience::ExperienceRow;
pub use profiles::{LeaderboardEntry, LeaderboardKind, ProfileDetails, ProfileRow};
