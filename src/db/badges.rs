//! Badge catalog and awards

use std::collections::HashSet;

use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{is_unique_violation, now_rfc3339, query_err};
use crate::error::LedgerError;
use crate::ledger::{AwardOutcome, Badge};

fn badge_from_row(row: &Row) -> Result<Badge, rusqlite::Error> {
    Ok(Badge {
        id: row.get("id")?,
        name: row.get("name")?,
        description: row.get("description")?,
        icon: row.get("icon")?,
        color: row.get("color")?,
        criteria_kg: row.get("criteria_kg")?,
        criteria_count: row.get("criteria_count")?,
    })
}

/// Input for creating a badge
#[derive(Debug, Clone, Deserialize)]
pub struct CreateBadgeInput {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub criteria_kg: Option<f64>,
    #[serde(default)]
    pub criteria_count: Option<i64>,
}

/// A catalog badge as seen by one user
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BadgeProgress {
    #[serde(flatten)]
    pub badge: Badge,
    pub earned: bool,
    pub earned_at: Option<String>,
    /// Progress toward a weight threshold, capped at 100
    pub progress_pct: Option<f64>,
}

pub fn create_badge(conn: &Connection, input: &CreateBadgeInput) -> Result<Badge, LedgerError> {
    if input.name.trim().is_empty() {
        return Err(LedgerError::InvalidInput("badge name is required".into()));
    }
    if let Some(kg) = input.criteria_kg {
        if !kg.is_finite() || kg < 0.0 {
            return Err(LedgerError::InvalidInput(format!("criteria_kg must be non-negative, got {}", kg)));
        }
    }
    if let Some(count) = input.criteria_count {
        if count < 0 {
            return Err(LedgerError::InvalidInput(format!("criteria_count must be non-negative, got {}", count)));
        }
    }

    let id = input.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
    conn.execute(
        "INSERT INTO badges (id, name, description, icon, color, criteria_kg, criteria_count, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            id,
            input.name,
            input.description,
            input.icon,
            input.color,
            input.criteria_kg,
            input.criteria_count,
            now_rfc3339(),
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            LedgerError::Conflict(format!("badge {} already exists", input.name))
        } else {
            query_err(e)
        }
    })?;

    Ok(Badge {
        id,
        name: input.name.clone(),
        description: input.description.clone(),
        icon: input.icon.clone(),
        color: input.color.clone(),
        criteria_kg: input.criteria_kg,
        criteria_count: input.criteria_count,
    })
}

/// Full catalog in creation order
pub fn list_badges(conn: &Connection) -> Result<Vec<Badge>, LedgerError> {
    let mut stmt = conn
        .prepare("SELECT * FROM badges ORDER BY rowid ASC")
        .map_err(query_err)?;

    let rows = stmt
        .query_map([], |row| badge_from_row(row))
        .map_err(query_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(query_err)?;

    Ok(rows)
}

pub fn earned_badge_ids(conn: &Connection, user_id: &str) -> Result<HashSet<String>, LedgerError> {
    let mut stmt = conn
        .prepare("SELECT badge_id FROM user_badges WHERE user_id = ?")
        .map_err(query_err)?;

    let ids = stmt
        .query_map(params![user_id], |row| row.get(0))
        .map_err(query_err)?
        .collect::<Result<HashSet<String>, _>>()
        .map_err(query_err)?;

    Ok(ids)
}

/// Insert-if-absent award
pub fn award_badge(conn: &Connection, user_id: &str, badge_id: &str) -> Result<AwardOutcome, LedgerError> {
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO user_badges (user_id, badge_id, earned_at) VALUES (?1, ?2, ?3)",
            params![user_id, badge_id, now_rfc3339()],
        )
        .map_err(query_err)?;

    Ok(if inserted == 0 {
        AwardOutcome::AlreadyAwarded
    } else {
        AwardOutcome::Awarded
    })
}

/// Catalog with the user's earned state and weight progress
pub fn progress_for_user(
    conn: &Connection,
    user_id: &str,
    total_waste_kg: f64,
) -> Result<Vec<BadgeProgress>, LedgerError> {
    let mut stmt = conn
        .prepare(
            "SELECT b.*, ub.earned_at AS earned_at FROM badges b
             LEFT JOIN user_badges ub ON ub.badge_id = b.id AND ub.user_id = ?
             ORDER BY b.rowid ASC",
        )
        .map_err(query_err)?;

    let rows = stmt
        .query_map(params![user_id], |row| {
            let badge = badge_from_row(row)?;
            let earned_at: Option<String> = row.get("earned_at")?;
            Ok((badge, earned_at))
        })
        .map_err(query_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(query_err)?;

    Ok(rows
        .into_iter()
        .map(|(badge, earned_at)| {
            let progress_pct = badge.criteria_kg.filter(|kg| *kg > 0.0).map(|kg| {
                (total_waste_kg / kg * 100.0).min(100.0)
            });
            BadgeProgress {
                badge,
                earned: earned_at.is_some(),
                earned_at,
                progress_pct,
            }
        })
        .collect())
}
