//! Persistence contract for the ledger
//!
//! Every operation is atomic with respect to one user's totals row.
//! `apply_delta` and `apply_disposal_totals` must be store-level
//! increments: two concurrent +1 kg deltas always yield +2 kg.
//! `recompute_totals` reads history and writes totals in one transaction
//! so no concurrent increment can fall between the read and the write.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::badges::Badge;
use crate::error::LedgerError;

/// Cumulative totals for a user
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Totals {
    pub waste_kg: f64,
    pub points: i64,
    pub level: i64,
}

impl Totals {
    pub fn zero() -> Self {
        Self {
            waste_kg: 0.0,
            points: 0,
            level: 1,
        }
    }
}

/// Label and confidence from the image classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub label: String,
    pub confidence: f64,
}

impl Classification {
    pub fn is_valid(&self) -> bool {
        !self.label.trim().is_empty()
            && self.confidence.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
    }
}

/// Disposal event to be recorded
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDisposal {
    pub user_id: String,
    pub category_id: String,
    pub weight_kg: f64,
    #[serde(default)]
    pub image_ref: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub classification: Option<Classification>,
    /// Client-supplied key making retries of the same submission idempotent
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl NewDisposal {
    /// Check required fields before any write
    pub fn validate(&self) -> Result<(), LedgerError> {
        if self.user_id.trim().is_empty() {
            return Err(LedgerError::InvalidInput("user_id is required".into()));
        }
        if self.category_id.trim().is_empty() {
            return Err(LedgerError::InvalidInput("category_id is required".into()));
        }
        if !self.weight_kg.is_finite() || self.weight_kg <= 0.0 {
            return Err(LedgerError::InvalidInput(format!(
                "weight_kg must be greater than zero, got {}",
                self.weight_kg
            )));
        }
        if let Some(key) = &self.idempotency_key {
            if key.trim().is_empty() {
                return Err(LedgerError::InvalidInput("idempotency_key must not be blank".into()));
            }
        }
        Ok(())
    }
}

/// Result of recording a disposal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecordedDisposal {
    pub id: String,
    /// Weight as stored. On a replay this is the original weight.
    pub weight_kg: f64,
    /// True when the idempotency key matched an existing record and
    /// nothing new was written
    pub replayed: bool,
    /// Whether the disposal has already been counted in the totals
    pub totals_applied: bool,
}

/// Outcome of an insert-if-absent badge award
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AwardOutcome {
    Awarded,
    AlreadyAwarded,
}

/// Totals before and after a recomputation from history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecomputedTotals {
    pub disposals: usize,
    pub before: Totals,
    pub after: Totals,
}

/// A challenge whose target was reached by the latest progress update
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChallengeCompletion {
    pub challenge_id: String,
    pub name: String,
    pub reward_xp: i64,
}

/// Durable store behind the ledger
pub trait LedgerStore: Send + Sync {
    /// Create a zero-totals profile if none exists; return current totals
    fn ensure_profile(&self, user_id: &str) -> Result<Totals, LedgerError>;

    /// Insert an immutable disposal record
    fn append_disposal(&self, event: &NewDisposal) -> Result<RecordedDisposal, LedgerError>;

    /// Current totals; `NotFound` when the profile does not exist
    fn read_totals(&self, user_id: &str) -> Result<Totals, LedgerError>;

    /// Count a recorded disposal in its owner's totals, at most once.
    /// Returns `None` when the disposal was already counted.
    fn apply_disposal_totals(
        &self,
        disposal_id: &str,
        user_id: &str,
        delta_kg: f64,
        delta_points: i64,
    ) -> Result<Option<Totals>, LedgerError>;

    /// Atomically add to a user's totals and return the new totals
    fn apply_delta(&self, user_id: &str, delta_kg: f64, delta_points: i64) -> Result<Totals, LedgerError>;

    /// Append an experience log entry
    fn append_experience_log(
        &self,
        user_id: &str,
        disposal_id: Option<&str>,
        xp: i64,
        reason: &str,
    ) -> Result<(), LedgerError>;

    /// Full badge catalog in catalog order
    fn badge_catalog(&self) -> Result<Vec<Badge>, LedgerError>;

    /// Ids of badges the user already holds
    fn earned_badges(&self, user_id: &str) -> Result<HashSet<String>, LedgerError>;

    /// Insert-if-absent badge award
    fn award_badge(&self, user_id: &str, badge_id: &str) -> Result<AwardOutcome, LedgerError>;

    /// Add progress to the user's active challenges and mark those that
    /// reach their target. Each completion is returned exactly once.
    fn advance_challenges(
        &self,
        user_id: &str,
        delta_kg: f64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChallengeCompletion>, LedgerError>;

    /// Rebuild totals from the full disposal history plus completed
    /// challenge rewards, marking every disposal as counted. Atomic.
    fn recompute_totals(&self, user_id: &str) -> Result<RecomputedTotals, LedgerError>;
}
