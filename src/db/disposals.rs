//! Disposal (waste log) operations
//!
//! Disposal rows are append-only. There is no update or delete.

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use super::{is_unique_violation, now_rfc3339, query_err};
use crate::error::LedgerError;
use crate::ledger::{NewDisposal, RecordedDisposal};

/// Status given to every newly recorded disposal
pub const DEFAULT_STATUS: &str = "verified";

/// Disposal row from database
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisposalRow {
    pub id: String,
    pub user_id: String,
    pub category_id: String,
    pub weight_kg: f64,
    pub image_ref: Option<String>,
    pub notes: Option<String>,
    pub ai_classification: Option<String>,
    pub ai_confidence: Option<f64>,
    pub status: String,
    pub idempotency_key: Option<String>,
    /// Whether this disposal's weight and experience are in the totals
    pub totals_applied: bool,
    pub created_at: String,
}

impl DisposalRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            user_id: row.get("user_id")?,
            category_id: row.get("waste_category_id")?,
            weight_kg: row.get("weight_kg")?,
            image_ref: row.get("image_ref")?,
            notes: row.get("notes")?,
            ai_classification: row.get("ai_classification")?,
            ai_confidence: row.get("ai_confidence")?,
            status: row.get("status")?,
            idempotency_key: row.get("idempotency_key")?,
            totals_applied: row.get("totals_applied")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Insert a disposal. A repeated idempotency key returns the existing id.
pub fn insert_disposal(conn: &mut Connection, event: &NewDisposal) -> Result<RecordedDisposal, LedgerError> {
    event.validate()?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(query_err)?;

    if let Some(key) = &event.idempotency_key {
        let existing = tx
            .query_row(
                "SELECT id, weight_kg, totals_applied FROM waste_logs
                 WHERE user_id = ?1 AND idempotency_key = ?2",
                params![event.user_id, key],
                |row| {
                    Ok(RecordedDisposal {
                        id: row.get(0)?,
                        weight_kg: row.get(1)?,
                        replayed: true,
                        totals_applied: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(query_err)?;

        if let Some(recorded) = existing {
            debug!(
                user_id = %event.user_id,
                disposal_id = %recorded.id,
                totals_applied = recorded.totals_applied,
                "Idempotency key matched"
            );
            return Ok(recorded);
        }
    }

    let category_exists: bool = tx
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM waste_categories WHERE id = ?)",
            params![event.category_id],
            |row| row.get(0),
        )
        .map_err(query_err)?;
    if !category_exists {
        return Err(LedgerError::NotFound(format!("waste category {}", event.category_id)));
    }

    let user_exists: bool = tx
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM user_profiles WHERE id = ?)",
            params![event.user_id],
            |row| row.get(0),
        )
        .map_err(query_err)?;
    if !user_exists {
        return Err(LedgerError::NotFound(format!("profile {}", event.user_id)));
    }

    let id = Uuid::new_v4().to_string();
    let (ai_label, ai_confidence) = match &event.classification {
        Some(c) => (Some(c.label.clone()), Some(c.confidence)),
        None => (None, None),
    };

    tx.execute(
        "INSERT INTO waste_logs (
            id, user_id, waste_category_id, weight_kg, image_ref, notes,
            ai_classification, ai_confidence, status, idempotency_key, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        params![
            id,
            event.user_id,
            event.category_id,
            event.weight_kg,
            event.image_ref,
            event.notes,
            ai_label,
            ai_confidence,
            DEFAULT_STATUS,
            event.idempotency_key,
            now_rfc3339(),
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            LedgerError::Conflict(format!("duplicate disposal for user {}", event.user_id))
        } else {
            query_err(e)
        }
    })?;

    tx.commit().map_err(query_err)?;

    Ok(RecordedDisposal {
        id,
        weight_kg: event.weight_kg,
        replayed: false,
        totals_applied: false,
    })
}

/// Get disposal by id
pub fn get_disposal(conn: &Connection, id: &str) -> Result<Option<DisposalRow>, LedgerError> {
    conn.query_row("SELECT * FROM waste_logs WHERE id = ?", params![id], |row| DisposalRow::from_row(row))
        .optional()
        .map_err(query_err)
}

/// Most recent disposals for a user
pub fn list_for_user(conn: &Connection, user_id: &str, limit: u32) -> Result<Vec<DisposalRow>, LedgerError> {
    let mut stmt = conn
        .prepare("SELECT * FROM waste_logs WHERE user_id = ? ORDER BY created_at DESC, rowid DESC LIMIT ?")
        .map_err(query_err)?;

    let rows = stmt
        .query_map(params![user_id, limit as i64], |row| DisposalRow::from_row(row))
        .map_err(query_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(query_err)?;

    Ok(rows)
}

/// Weights of every disposal for a user, oldest first
pub fn weights_for_user(conn: &Connection, user_id: &str) -> Result<Vec<f64>, LedgerError> {
    let mut stmt = conn
        .prepare("SELECT weight_kg FROM waste_logs WHERE user_id = ? ORDER BY rowid ASC")
        .map_err(query_err)?;

    let weights = stmt
        .query_map(params![user_id], |row| row.get(0))
        .map_err(query_err)?
        .collect::<Result<Vec<f64>, _>>()
        .map_err(query_err)?;

    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{categories, profiles, schema};
    use crate::ledger::Classification;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        schema::init_schema(&conn).unwrap();
        categories::create_category(&conn, &categories::CreateCategoryInput {
            id: Some("plastic".into()),
            name: "Plastic".into(),
            icon: None,
            color: None,
        }).unwrap();
        profiles::ensure_profile(&conn, "u1").unwrap();
        conn
    }

    fn disposal(weight_kg: f64, key: Option<&str>) -> NewDisposal {
        NewDisposal {
            user_id: "u1".into(),
            category_id: "plastic".into(),
            weight_kg,
            image_ref: Some("waste-images/u1/1.jpg".into()),
            notes: None,
            classification: Some(Classification { label: "Plastic".into(), confidence: 0.9 }),
            idempotency_key: key.map(String::from),
        }
    }

    #[test]
    fn test_insert_and_get() {
        let mut conn = conn();
        let recorded = insert_disposal(&mut conn, &disposal(1.5, None)).unwrap();
        assert!(!recorded.replayed);

        let row = get_disposal(&conn, &recorded.id).unwrap().unwrap();
        assert_eq!(row.weight_kg, 1.5);
        assert_eq!(row.status, "verified");
        assert_eq!(row.ai_classification.as_deref(), Some("Plastic"));
        assert_eq!(row.image_ref.as_deref(), Some("waste-images/u1/1.jpg"));
    }

    #[test]
    fn test_idempotency_key_replays() {
        let mut conn = conn();
        let first = insert_disposal(&mut conn, &disposal(1.0, Some("k1"))).unwrap();
        let second = insert_disposal(&mut conn, &disposal(1.0, Some("k1"))).unwrap();
        assert_eq!(first.id, second.id);
        assert!(second.replayed);
        assert_eq!(weights_for_user(&conn, "u1").unwrap(), vec![1.0]);
    }

    #[test]
    fn test_unknown_category() {
        let mut conn = conn();
        let mut d = disposal(1.0, None);
        d.category_id = "glass".into();
        assert!(matches!(insert_disposal(&mut conn, &d), Err(LedgerError::NotFound(_))));
    }

    #[test]
    fn test_invalid_weight_writes_nothing() {
        let mut conn = conn();
        assert!(matches!(insert_disposal(&mut conn, &disposal(0.0, None)), Err(LedgerError::InvalidInput(_))));
        assert!(weights_for_user(&conn, "u1").unwrap().is_empty());
    }

    #[test]
    fn test_list_for_user_newest_first() {
        let mut conn = conn();
        insert_disposal(&mut conn, &disposal(1.0, None)).unwrap();
        insert_disposal(&mut conn, &disposal(3.0, None)).unwrap();
        let rows = list_for_user(&conn, "u1", 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].weight_kg, 3.0);
        assert_eq!(list_for_user(&conn, "u1", 1).unwrap().len(), 1);
    }
}
