//! Database schema definitions

use rusqlite::Connection;
use tracing::info;

use crate::error::LedgerError;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema
pub fn init_schema(conn: &Connection) -> Result<(), LedgerError> {
    let current_version = get_schema_version(conn)?;

    if current_version == 0 {
        info!("Creating new database schema v{}", SCHEMA_VERSION);
        create_tables(conn)?;
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else if current_version < SCHEMA_VERSION {
        info!("Migrating schema from v{} to v{}", current_version, SCHEMA_VERSION);
        set_schema_version(conn, SCHEMA_VERSION)?;
    } else {
        info!("Database schema is up to date (v{})", current_version);
    }

    Ok(())
}

/// Get current schema version (0 if not initialized)
fn get_schema_version(conn: &Connection) -> Result<i32, LedgerError> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)",
        [],
    ).map_err(|e| LedgerError::Internal(format!("Failed to create schema_version table: {}", e)))?;

    let version: i32 = conn
        .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| row.get(0))
        .unwrap_or(0);

    Ok(version)
}

/// Set schema version
fn set_schema_version(conn: &Connection, version: i32) -> Result<(), LedgerError> {
    conn.execute("DELETE FROM schema_version", [])
        .map_err(|e| LedgerError::Internal(format!("Failed to clear schema_version: {}", e)))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?)", [version])
        .map_err(|e| LedgerError::Internal(format!("Failed to set schema_version: {}", e)))?;
    Ok(())
}

/// Create all tables
fn create_tables(conn: &Connection) -> Result<(), LedgerError> {
    conn.execute_batch(CATALOG_SCHEMA)
        .map_err(|e| LedgerError::Internal(format!("Failed to create catalog tables: {}", e)))?;

    conn.execute_batch(LEDGER_SCHEMA)
        .map_err(|e| LedgerError::Internal(format!("Failed to create ledger tables: {}", e)))?;

    conn.execute_batch(CHALLENGES_SCHEMA)
        .map_err(|e| LedgerError::Internal(format!("Failed to create challenge tables: {}", e)))?;

    conn.execute_batch(INDEXES_SCHEMA)
        .map_err(|e| LedgerError::Internal(format!("Failed to create indexes: {}", e)))?;

    Ok(())
}

/// Category and badge catalogs
const CATALOG_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS waste_categories (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL UNIQUE,
    icon TEXT,
    color TEXT,
    created_at TEXT NOT NULL
);

-- A badge qualifies by cumulative weight (criteria_kg) or activity (criteria_count)
CREATE TABLE IF NOT EXISTS badges (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL UNIQUE,
    description TEXT,
    icon TEXT,
    color TEXT,
    criteria_kg REAL,
    criteria_count INTEGER,
    created_at TEXT NOT NULL
);
"#;

/// Profiles, disposals and the experience log
const LEDGER_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS user_profiles (
    id TEXT PRIMARY KEY NOT NULL,
    full_name TEXT,
    avatar_url TEXT,
    bio TEXT,
    phone TEXT,
    city TEXT,
    country TEXT,

    -- Derived totals, only changed by in-place increments
    total_waste_kg REAL NOT NULL DEFAULT 0 CHECK (total_waste_kg >= 0),
    total_points INTEGER NOT NULL DEFAULT 0 CHECK (total_points >= 0),
    level INTEGER NOT NULL DEFAULT 1,

    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Immutable disposal records (system of record for totals)
CREATE TABLE IF NOT EXISTS waste_logs (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL REFERENCES user_profiles(id),
    waste_category_id TEXT NOT NULL REFERENCES waste_categories(id),
    weight_kg REAL NOT NULL CHECK (weight_kg > 0),
    image_ref TEXT,
    notes TEXT,
    ai_classification TEXT,
    ai_confidence REAL,
    status TEXT NOT NULL DEFAULT 'verified',
    idempotency_key TEXT,
    totals_applied INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    UNIQUE (user_id, idempotency_key)
);

CREATE TABLE IF NOT EXISTS xp_logs (
    id TEXT PRIMARY KEY NOT NULL,
    user_id TEXT NOT NULL REFERENCES user_profiles(id),
    waste_log_id TEXT REFERENCES waste_logs(id),
    xp_earned INTEGER NOT NULL,
    reason TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS user_badges (
    user_id TEXT NOT NULL REFERENCES user_profiles(id),
    badge_id TEXT NOT NULL REFERENCES badges(id),
    earned_at TEXT NOT NULL,
    PRIMARY KEY (user_id, badge_id)
);
"#;

/// Challenges and per-user progress
const CHALLENGES_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS challenges (
    id TEXT PRIMARY KEY NOT NULL,
    name TEXT NOT NULL,
    description TEXT,
    icon TEXT,
    target_kg REAL NOT NULL CHECK (target_kg > 0),
    reward_xp INTEGER NOT NULL DEFAULT 0 CHECK (reward_xp >= 0),
    start_date TEXT,
    end_date TEXT,
    status TEXT NOT NULL DEFAULT 'active',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS challenge_participants (
    challenge_id TEXT NOT NULL REFERENCES challenges(id),
    user_id TEXT NOT NULL REFERENCES user_profiles(id),
    progress_kg REAL NOT NULL DEFAULT 0,
    joined_at TEXT NOT NULL,
    completed_at TEXT,
    PRIMARY KEY (challenge_id, user_id)
);
"#;

/// Indexes for history and leaderboard queries
const INDEXES_SCHEMA: &str = r#"
CREATE INDEX IF NOT EXISTS idx_waste_logs_user ON waste_logs(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_xp_logs_user ON xp_logs(user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_profiles_waste ON user_profiles(total_waste_kg DESC);
CREATE INDEX IF NOT EXISTS idx_profiles_points ON user_profiles(total_points DESC);
CREATE INDEX IF NOT EXISTS idx_participants_user ON challenge_participants(user_id);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_duplicate_badge_award_rejected_by_schema() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        conn.execute_batch(
            "INSERT INTO user_profiles (id, created_at, updated_at) VALUES ('u1', 'now', 'now');
             INSERT INTO badges (id, name, created_at) VALUES ('b1', 'First', 'now');
             INSERT INTO user_badges (user_id, badge_id, earned_at) VALUES ('u1', 'b1', 'now');",
        ).unwrap();
        let dup = conn.execute(
            "INSERT INTO user_badges (user_id, badge_id, earned_at) VALUES ('u1', 'b1', 'later')",
            [],
        );
        assert!(dup.is_err());
    }
}
