//! User profile and totals operations

use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{challenges, disposals, now_rfc3339, query_err};
use crate::error::LedgerError;
use crate::ledger::scoring::{self, XP_PER_LEVEL};
use crate::ledger::{RecomputedTotals, Totals};

/// Profile row from database
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileRow {
    pub id: String,
    pub full_name: Option<String>,
    pub avatar_url: Option<String>,
    pub bio: Option<String>,
    pub phone: Option<String>,
    pub city: Option<String>,
    pub country: Option<String>,
    pub total_waste_kg: f64,
    pub total_points: i64,
    pub level: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl ProfileRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            full_name: row.get("full_name")?,
            avatar_url: row.get("avatar_url")?,
            bio: row.get("bio")?,
            phone: row.get("phone")?,
            city: row.get("city")?,
            country: row.get("country")?,
            total_waste_kg: row.get("total_waste_kg")?,
            total_points: row.get("total_points")?,
            level: row.get("level")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    pub fn totals(&self) -> Totals {
        Totals {
            waste_kg: self.total_waste_kg,
            points: self.total_points,
            level: self.level,
        }
    }
}

/// Editable profile fields. `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileDetails {
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub bio: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub city: Option<String>,
    #[serde(default)]
    pub country: Option<String>,
}

/// Leaderboard ordering
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LeaderboardKind {
    #[default]
    Waste,
    Points,
}

/// Leaderboard row
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LeaderboardEntry {
    pub rank: u32,
    pub user_id: String,
    pub name: String,
    pub waste_kg: f64,
    pub points: i64,
    pub level: i64,
}

/// Insert a zero-totals profile if absent; returns the current totals
pub fn ensure_profile(conn: &Connection, user_id: &str) -> Result<Totals, LedgerError> {
    let now = now_rfc3339();
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO user_profiles (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
            params![user_id, now],
        )
        .map_err(query_err)?;

    if inserted > 0 {
        debug!(user_id = %user_id, "Created default profile");
    }

    read_totals(conn, user_id)
}

/// Get profile by user id
pub fn get_profile(conn: &Connection, user_id: &str) -> Result<Option<ProfileRow>, LedgerError> {
    conn.query_row(
        "SELECT * FROM user_profiles WHERE id = ?",
        params![user_id],
        ProfileRow::from_row,
    )
    .optional()
    .map_err(query_err)
}

/// Read totals; `NotFound` if the profile does not exist
pub fn read_totals(conn: &Connection, user_id: &str) -> Result<Totals, LedgerError> {
    conn.query_row(
        "SELECT total_waste_kg, total_points, level FROM user_profiles WHERE id = ?",
        params![user_id],
        |row| {
            Ok(Totals {
                waste_kg: row.get(0)?,
                points: row.get(1)?,
                level: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(query_err)?
    .ok_or_else(|| LedgerError::NotFound(format!("profile {}", user_id)))
}

/// Atomically add to totals. The increment and level recomputation happen in
/// one UPDATE inside an IMMEDIATE transaction, so concurrent writers
/// serialize on the database write lock and no delta is lost.
pub fn apply_delta(
    conn: &mut Connection,
    user_id: &str,
    delta_kg: f64,
    delta_points: i64,
) -> Result<Totals, LedgerError> {
    check_delta(delta_kg, delta_points)?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(query_err)?;
    let totals = increment(&tx, user_id, delta_kg, delta_points)?;
    tx.commit().map_err(query_err)?;

    Ok(totals)
}

/// Count one disposal in its owner's totals. The `totals_applied` flag is
/// flipped in the same transaction as the increment, so a disposal is
/// counted at most once no matter how often this is retried.
pub fn apply_disposal_totals(
    conn: &mut Connection,
    disposal_id: &str,
    user_id: &str,
    delta_kg: f64,
    delta_points: i64,
) -> Result<Option<Totals>, LedgerError> {
    check_delta(delta_kg, delta_points)?;

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(query_err)?;

    let claimed = tx
        .execute(
            "UPDATE waste_logs SET totals_applied = 1
             WHERE id = ?1 AND user_id = ?2 AND totals_applied = 0",
            params![disposal_id, user_id],
        )
        .map_err(query_err)?;

    if claimed == 0 {
        debug!(disposal_id = %disposal_id, "Disposal already counted in totals");
        return Ok(None);
    }

    let totals = increment(&tx, user_id, delta_kg, delta_points)?;
    tx.commit().map_err(query_err)?;

    Ok(Some(totals))
}

/// Rebuild totals from history inside one IMMEDIATE transaction: disposal
/// weights, per-disposal experience and completed challenge rewards are
/// read and the totals overwritten under the same write lock.
pub fn recompute_totals(conn: &mut Connection, user_id: &str) -> Result<RecomputedTotals, LedgerError> {
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(query_err)?;

    let before = read_totals(&tx, user_id)?;
    let weights = disposals::weights_for_user(&tx, user_id)?;

    let waste_kg: f64 = weights.iter().sum();
    let disposal_xp: i64 = weights
        .iter()
        .filter_map(|w| scoring::compute_experience(*w).ok())
        .sum();
    let points = disposal_xp + challenges::completed_rewards(&tx, user_id)?;

    tx.execute(
        "UPDATE user_profiles
         SET total_waste_kg = ?1, total_points = ?2, level = ?2 / ?3 + 1, updated_at = ?4
         WHERE id = ?5",
        params![waste_kg, points, XP_PER_LEVEL, now_rfc3339(), user_id],
    )
    .map_err(query_err)?;
    tx.execute(
        "UPDATE waste_logs SET totals_applied = 1 WHERE user_id = ? AND totals_applied = 0",
        params![user_id],
    )
    .map_err(query_err)?;

    let after = read_totals(&tx, user_id)?;
    tx.commit().map_err(query_err)?;

    Ok(RecomputedTotals {
        disposals: weights.len(),
        before,
        after,
    })
}

fn check_delta(delta_kg: f64, delta_points: i64) -> Result<(), LedgerError> {
    if !delta_kg.is_finite() || delta_kg < 0.0 || delta_points < 0 {
        return Err(LedgerError::InvalidInput(format!(
            "totals may only grow (delta {} kg, {} points)",
            delta_kg, delta_points
        )));
    }
    Ok(())
}

fn increment(conn: &Connection, user_id: &str, delta_kg: f64, delta_points: i64) -> Result<Totals, LedgerError> {
    let updated = conn
        .execute(
            "UPDATE user_profiles
             SET total_waste_kg = total_waste_kg + ?1,
                 total_points = total_points + ?2,
                 level = (total_points + ?2) / ?3 + 1,
                 updated_at = ?4
             WHERE id = ?5",
            params![delta_kg, delta_points, XP_PER_LEVEL, now_rfc3339(), user_id],
        )
        .map_err(query_err)?;

    if updated == 0 {
        return Err(LedgerError::NotFound(format!("profile {}", user_id)));
    }

    read_totals(conn, user_id)
}

/// Update editable profile details; totals are never touched here
pub fn update_details(
    conn: &Connection,
    user_id: &str,
    details: &ProfileDetails,
) -> Result<ProfileRow, LedgerError> {
    let updated = conn
        .execute(
            "UPDATE user_profiles SET
                full_name = COALESCE(?1, full_name),
                avatar_url = COALESCE(?2, avatar_url),
                bio = COALESCE(?3, bio),
                phone = COALESCE(?4, phone),
                city = COALESCE(?5, city),
                country = COALESCE(?6, country),
                updated_at = ?7
             WHERE id = ?8",
            params![
                details.full_name,
                details.avatar_url,
                details.bio,
                details.phone,
                details.city,
                details.country,
                now_rfc3339(),
                user_id,
            ],
        )
        .map_err(query_err)?;

    if updated == 0 {
        return Err(LedgerError::NotFound(format!("profile {}", user_id)));
    }

    get_profile(conn, user_id)?
        .ok_or_else(|| LedgerError::NotFound(format!("profile {}", user_id)))
}

/// Ranked profiles by cumulative weight or points
pub fn leaderboard(
    conn: &Connection,
    kind: LeaderboardKind,
    limit: u32,
) -> Result<Vec<LeaderboardEntry>, LedgerError> {
    let order = match kind {
        LeaderboardKind::Waste => "total_waste_kg DESC, total_points DESC",
        LeaderboardKind::Points => "total_points DESC, total_waste_kg DESC",
    };
    let sql = format!(
        "SELECT id, full_name, total_waste_kg, total_points, level FROM user_profiles
         ORDER BY {}, created_at ASC LIMIT ?",
        order
    );

    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let rows = stmt
        .query_map(params![limit as i64], |row| {
            let name: Option<String> = row.get(1)?;
            Ok(LeaderboardEntry {
                rank: 0,
                user_id: row.get(0)?,
                name: name
                    .filter(|n| !n.trim().is_empty())
                    .unwrap_or_else(|| "Anonymous".to_string()),
                waste_kg: row.get(2)?,
                points: row.get(3)?,
                level: row.get(4)?,
            })
        })
        .map_err(query_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(query_err)?;

    Ok(rows
        .into_iter()
        .enumerate()
        .map(|(i, mut entry)| {
            entry.rank = i as u32 + 1;
            entry
        })
        .collect())
}
