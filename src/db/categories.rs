//! Waste category catalog

use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{is_unique_violation, now_rfc3339, query_err};
use crate::error::LedgerError;

/// Category row from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRow {
    pub id: String,
    pub name: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub created_at: String,
}

impl CategoryRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            icon: row.get("icon")?,
            color: row.get("color")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Input for creating a category
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCategoryInput {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
}

pub fn create_category(conn: &Connection, input: &CreateCategoryInput) -> Result<CategoryRow, LedgerError> {
    let id = input.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
    conn.execute(
        "INSERT INTO waste_categories (id, name, icon, color, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![id, input.name, input.icon, input.color, now_rfc3339()],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            LedgerError::Conflict(format!("category {} already exists", input.name))
        } else {
            query_err(e)
        }
    })?;

    get_category(conn, &id)?.ok_or_else(|| LedgerError::Internal("category vanished after insert".into()))
}

pub fn get_category(conn: &Connection, id: &str) -> Result<Option<CategoryRow>, LedgerError> {
    conn.query_row("SELECT * FROM waste_categories WHERE id = ?", params![id], |row| CategoryRow::from_row(row))
        .optional()
        .map_err(query_err)
}

pub fn list_categories(conn: &Connection) -> Result<Vec<CategoryRow>, LedgerError> {
    let mut stmt = conn
        .prepare("SELECT * FROM waste_categories ORDER BY name ASC")
        .map_err(query_err)?;

    let rows = stmt
        .query_map([], |row| CategoryRow::from_row(row))
        .map_err(query_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(query_err)?;

    Ok(rows)
}
