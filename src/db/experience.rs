//! Experience log operations

use rusqlite::{params, Connection, Row};
use serde::Serialize;
use uuid::Uuid;

use super::{now_rfc3339, query_err};
use crate::error::LedgerError;

/// Experience log row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperienceRow {
    pub id: String,
    pub user_id: String,
    pub disposal_id: Option<String>,
    pub xp_earned: i64,
    pub reason: String,
    pub created_at: String,
}

impl ExperienceRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            disposal_id: row.get("waste_log_id")?,
            xp_earned: row.get("xp_earned")?,
            reason: row.get("reason")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Append an experience entry
pub fn insert_entry(
    conn: &Connection,
    user_id: &str,
    disposal_id: Option<&str>,
    xp: i64,
    reason: &str,
) -> Result<String, LedgerError> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO xp_logs (id, user_id, waste_log_id, xp_earned, reason, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![id, user_id, disposal_id, xp, reason, now_rfc3339()],
    )
    .map_err(query_err)?;
    Ok(id)
}

/// Most recent experience entries for a user
pub fn list_for_user(conn: &Connection, user_id: &str, limit: u32) -> Result<Vec<ExperienceRow>, LedgerError> {
    let mut stmt = conn
        .prepare("SELECT * FROM xp_logs WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?")
        .map_err(query_err)?;

    let rows = stmt
        .query_map(params![user_id, limit as i64], |row| ExperienceRow::from_row(row))
        .map_err(query_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(query_err)?;

    Ok(rows)
}
