//! Challenges and per-user progress
//!
//! Progress only grows. A participation completes once, the first time its
//! progress reaches the challenge target.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use super::{is_unique_violation, query_err};
use crate::error::LedgerError;
use crate::ledger::ChallengeCompletion;

/// Status of a challenge accepting progress
pub const STATUS_ACTIVE: &str = "active";

/// Challenge timestamps are stored in one fixed format so that SQL string
/// comparison orders them correctly.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Challenge row from database
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChallengeRow {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub target_kg: f64,
    pub reward_xp: i64,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
    pub status: String,
    pub created_at: String,
}

impl ChallengeRow {
    fn from_row(row: &Row) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            name: row.get("name")?,
            description: row.get("description")?,
            icon: row.get("icon")?,
            target_kg: row.get("target_kg")?,
            reward_xp: row.get("reward_xp")?,
            start_date: row.get("start_date")?,
            end_date: row.get("end_date")?,
            status: row.get("status")?,
            created_at: row.get("created_at")?,
        })
    }
}

/// Input for creating a challenge
#[derive(Debug, Clone, Deserialize)]
pub struct CreateChallengeInput {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    pub target_kg: f64,
    #[serde(default)]
    pub reward_xp: i64,
    #[serde(default)]
    pub start_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end_date: Option<DateTime<Utc>>,
}

impl CreateChallengeInput {
    fn validate(&self) -> Result<(), LedgerError> {
        if self.name.trim().is_empty() {
            return Err(LedgerError::InvalidInput("challenge name is required".into()));
        }
        if !self.target_kg.is_finite() || self.target_kg <= 0.0 {
            return Err(LedgerError::InvalidInput(format!(
                "target_kg must be greater than zero, got {}",
                self.target_kg
            )));
        }
        if self.reward_xp < 0 {
            return Err(LedgerError::InvalidInput("reward_xp must not be negative".into()));
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if end < start {
                return Err(LedgerError::InvalidInput("end_date precedes start_date".into()));
            }
        }
        Ok(())
    }
}

/// A challenge with one user's participation state
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChallengeView {
    #[serde(flatten)]
    pub challenge: ChallengeRow,
    pub joined: bool,
    pub progress_kg: f64,
    /// Display percentage, capped at 100
    pub progress_pct: f64,
    pub completed_at: Option<String>,
}

/// SQL predicate selecting challenges open at `?now`
const OPEN_AT: &str = "c.status = 'active'
    AND (c.start_date IS NULL OR c.start_date <= :now)
    AND (c.end_date IS NULL OR c.end_date >= :now)";

pub fn create_challenge(conn: &Connection, input: &CreateChallengeInput) -> Result<ChallengeRow, LedgerError> {
    input.validate()?;

    let id = input.id.clone().unwrap_or_else(|| Uuid::new_v4().to_string());
    conn.execute(
        "INSERT INTO challenges (
            id, name, description, icon, target_kg, reward_xp, start_date, end_date, status, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            id,
            input.name,
            input.description,
            input.icon,
            input.target_kg,
            input.reward_xp,
            input.start_date.map(format_ts),
            input.end_date.map(format_ts),
            STATUS_ACTIVE,
            format_ts(Utc::now()),
        ],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            LedgerError::Conflict(format!("challenge {} already exists", id))
        } else {
            query_err(e)
        }
    })?;

    get_challenge(conn, &id)?.ok_or_else(|| LedgerError::Internal("challenge vanished after insert".into()))
}

pub fn get_challenge(conn: &Connection, id: &str) -> Result<Option<ChallengeRow>, LedgerError> {
    conn.query_row("SELECT * FROM challenges WHERE id = ?", params![id], |row| ChallengeRow::from_row(row))
        .optional()
        .map_err(query_err)
}

/// Challenges open at `now`, earliest start first, with `user_id`'s progress
pub fn list_open(
    conn: &Connection,
    user_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Vec<ChallengeView>, LedgerError> {
    let sql = format!(
        "SELECT c.*, p.progress_kg AS progress_kg, p.completed_at AS completed_at,
                p.user_id IS NOT NULL AS joined
         FROM challenges c
         LEFT JOIN challenge_participants p ON p.challenge_id = c.id AND p.user_id = :user
         WHERE {}
         ORDER BY c.start_date ASC, c.rowid ASC",
        OPEN_AT
    );

    let mut stmt = conn.prepare(&sql).map_err(query_err)?;
    let rows = stmt
        .query_map(
            rusqlite::named_params! { ":user": user_id, ":now": format_ts(now) },
            |row| {
                let challenge = ChallengeRow::from_row(row)?;
                let progress_kg: Option<f64> = row.get("progress_kg")?;
                let completed_at: Option<String> = row.get("completed_at")?;
                let joined: bool = row.get("joined")?;
                Ok((challenge, joined, progress_kg.unwrap_or(0.0), completed_at))
            },
        )
        .map_err(query_err)?
        .collect::<Result<Vec<_>, _>>()
        .map_err(query_err)?;

    Ok(rows
        .into_iter()
        .map(|(challenge, joined, progress_kg, completed_at)| {
            let progress_pct = progress_pct(progress_kg, challenge.target_kg);
            ChallengeView {
                challenge,
                joined,
                progress_kg,
                progress_pct,
                completed_at,
            }
        })
        .collect())
}

/// Capped display percentage
pub fn progress_pct(progress_kg: f64, target_kg: f64) -> f64 {
    if target_kg <= 0.0 {
        return 100.0;
    }
    (progress_kg / target_kg * 100.0).min(100.0)
}

/// Join an open challenge. Joining twice is a conflict.
pub fn join(
    conn: &Connection,
    challenge_id: &str,
    user_id: &str,
    now: DateTime<Utc>,
) -> Result<(), LedgerError> {
    let sql = format!("SELECT EXISTS(SELECT 1 FROM challenges c WHERE c.id = :id AND {})", OPEN_AT);
    let open: bool = conn
        .query_row(
            &sql,
            rusqlite::named_params! { ":id": challenge_id, ":now": format_ts(now) },
            |row| row.get(0),
        )
        .map_err(query_err)?;
    if !open {
        return Err(LedgerError::NotFound(format!("open challenge {}", challenge_id)));
    }

    conn.execute(
        "INSERT INTO challenge_participants (challenge_id, user_id, progress_kg, joined_at)
         VALUES (?1, ?2, 0, ?3)",
        params![challenge_id, user_id, format_ts(now)],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            LedgerError::Conflict(format!("user {} already joined challenge {}", user_id, challenge_id))
        } else {
            query_err(e)
        }
    })?;

    Ok(())
}

/// Add `delta_kg` to every open, uncompleted participation of the user and
/// mark the ones that reach their target
pub fn advance(
    conn: &mut Connection,
    user_id: &str,
    delta_kg: f64,
    now: DateTime<Utc>,
) -> Result<Vec<ChallengeCompletion>, LedgerError> {
    if !delta_kg.is_finite() || delta_kg < 0.0 {
        return Err(LedgerError::InvalidInput(format!("progress may only grow, got {}", delta_kg)));
    }
    let now = format_ts(now);

    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(query_err)?;

    let advanced = tx
        .execute(
            &format!(
                "UPDATE challenge_participants SET progress_kg = progress_kg + :delta
                 WHERE user_id = :user AND completed_at IS NULL
                   AND challenge_id IN (SELECT c.id FROM challenges c WHERE {})",
                OPEN_AT
            ),
            rusqlite::named_params! { ":delta": delta_kg, ":user": user_id, ":now": now },
        )
        .map_err(query_err)?;

    if advanced == 0 {
        return Ok(Vec::new());
    }
    debug!(user_id = %user_id, challenges = advanced, "Advanced challenge progress");

    let completions = {
        let mut stmt = tx
            .prepare(
                "SELECT c.id, c.name, c.reward_xp FROM challenge_participants p
                 JOIN challenges c ON c.id = p.challenge_id
                 WHERE p.user_id = ? AND p.completed_at IS NULL AND p.progress_kg >= c.target_kg
                 ORDER BY c.rowid ASC",
            )
            .map_err(query_err)?;
        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(ChallengeCompletion {
                    challenge_id: row.get(0)?,
                    name: row.get(1)?,
                    reward_xp: row.get(2)?,
                })
            })
            .map_err(query_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(query_err)?;
        rows
    };

    for completion in &completions {
        tx.execute(
            "UPDATE challenge_participants SET completed_at = ?1
             WHERE challenge_id = ?2 AND user_id = ?3 AND completed_at IS NULL",
            params![now, completion.challenge_id, user_id],
        )
        .map_err(query_err)?;
    }

    tx.commit().map_err(query_err)?;

    Ok(completions)
}

/// Total reward XP over the user's completed challenges
pub fn completed_rewards(conn: &Connection, user_id: &str) -> Result<i64, LedgerError> {
    conn.query_row(
        "SELECT COALESCE(SUM(c.reward_xp), 0) FROM challenge_participants p
         JOIN challenges c ON c.id = p.challenge_id
         WHERE p.user_id = ? AND p.completed_at IS NOT NULL",
        params![user_id],
        |row| row.get(0),
    )
    .map_err(query_err)
}
