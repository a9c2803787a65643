//! `LedgerStore` backed by SQLite

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use super::{badges, challenges, disposals, experience, profiles, LedgerDb};
use crate::error::LedgerError;
use crate::ledger::{
    AwardOutcome, Badge, ChallengeCompletion, LedgerStore, NewDisposal, RecomputedTotals, RecordedDisposal, Totals,
};

impl LedgerStore for LedgerDb {
    fn ensure_profile(&self, user_id: &str) -> Result<Totals, LedgerError> {
        self.with_conn(|conn| profiles::ensure_profile(conn, user_id))
    }

    fn append_disposal(&self, event: &NewDisposal) -> Result<RecordedDisposal, LedgerError> {
        self.with_conn_mut(|conn| disposals::insert_disposal(conn, event))
    }

    fn read_totals(&self, user_id: &str) -> Result<Totals, LedgerError> {
        self.with_conn(|conn| profiles::read_totals(conn, user_id))
    }

    fn apply_disposal_totals(
        &self,
        disposal_id: &str,
        user_id: &str,
        delta_kg: f64,
        delta_points: i64,
    ) -> Result<Option<Totals>, LedgerError> {
        self.with_conn_mut(|conn| profiles::apply_disposal_totals(conn, disposal_id, user_id, delta_kg, delta_points))
    }

    fn apply_delta(&self, user_id: &str, delta_kg: f64, delta_points: i64) -> Result<Totals, LedgerError> {
        self.with_conn_mut(|conn| profiles::apply_delta(conn, user_id, delta_kg, delta_points))
    }

    fn append_experience_log(
        &self,
        user_id: &str,
        disposal_id: Option<&str>,
        xp: i64,
        reason: &str,
    ) -> Result<(), LedgerError> {
        self.with_conn(|conn| experience::insert_entry(conn, user_id, disposal_id, xp, reason))
            .map(|_| ())
    }

    fn badge_catalog(&self) -> Result<Vec<Badge>, LedgerError> {
        self.with_conn(badges::list_badges)
    }

    fn earned_badges(&self, user_id: &str) -> Result<HashSet<String>, LedgerError> {
        self.with_conn(|conn| badges::earned_badge_ids(conn, user_id))
    }

    fn award_badge(&self, user_id: &str, badge_id: &str) -> Result<AwardOutcome, LedgerError> {
        self.with_conn(|conn| badges::award_badge(conn, user_id, badge_id))
    }

    fn advance_challenges(
        &self,
        user_id: &str,
        delta_kg: f64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChallengeCompletion>, LedgerError> {
        self.with_conn_mut(|conn| challenges::advance(conn, user_id, delta_kg, now))
    }

    fn recompute_totals(&self, user_id: &str) -> Result<RecomputedTotals, LedgerError> {
        self.with_conn_mut(|conn| profiles::recompute_totals(conn, user_id))
    }
}
