//! Profile service - profiles, history, achievements and leaderboards

use std::sync::Arc;

use serde::Serialize;

use crate::db::{self, badges, disposals, experience, profiles, LedgerDb};
use crate::error::LedgerError;
use crate::ledger::{CallerContext, LevelProgress};

/// Largest page any history or leaderboard query returns
pub const MAX_PAGE: u32 = 100;

/// Profile with level progress
#[derive(Debug, Clone, Serialize)]
pub struct ProfileView {
    #[serde(flatten)]
    pub profile: db::ProfileRow,
    pub progress: LevelProgress,
}

/// Profile service for business logic
pub struct ProfileService {
    db: Arc<LedgerDb>,
}

impl ProfileService {
    pub fn new(db: Arc<LedgerDb>) -> Self {
        Self { db }
    }

    /// Get a profile, creating an empty one on first access
    pub fn get_or_create(&self, ctx: &CallerContext, user_id: &str) -> Result<ProfileView, LedgerError> {
        ctx.authorize_for(user_id)?;
        validate_user_id(user_id)?;

        let profile = self.db.with_conn(|conn| {
            profiles::ensure_profile(conn, user_id)?;
            profiles::get_profile(conn, user_id)?
                .ok_or_else(|| LedgerError::NotFound(format!("profile {}", user_id)))
        })?;

        Ok(view(profile))
    }

    /// Update editable details
    pub fn update_details(
        &self,
        ctx: &CallerContext,
        user_id: &str,
        details: &profiles::ProfileDetails,
    ) -> Result<ProfileView, LedgerError> {
        ctx.authorize_for(user_id)?;
        validate_user_id(user_id)?;

        let profile = self.db.with_conn(|conn| {
            profiles::ensure_profile(conn, user_id)?;
            profiles::update_details(conn, user_id, details)
        })?;

        Ok(view(profile))
    }

    /// Most recent disposals
    pub fn disposal_history(
        &self,
        ctx: &CallerContext,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<db::DisposalRow>, LedgerError> {
        ctx.authorize_for(user_id)?;
        self.db.with_conn(|conn| disposals::list_for_user(conn, user_id, clamp_limit(limit)))
    }

    /// Most recent experience entries
    pub fn experience_history(
        &self,
        ctx: &CallerContext,
        user_id: &str,
        limit: u32,
    ) -> Result<Vec<db::ExperienceRow>, LedgerError> {
        ctx.authorize_for(user_id)?;
        self.db.with_conn(|conn| experience::list_for_user(conn, user_id, clamp_limit(limit)))
    }

    /// Badge catalog with the user's earned state and progress
    pub fn achievements(&self, ctx: &CallerContext, user_id: &str) -> Result<Vec<db::BadgeProgress>, LedgerError> {
        ctx.authorize_for(user_id)?;
        self.db.with_conn(|conn| {
            let totals = profiles::ensure_profile(conn, user_id)?;
            badges::progress_for_user(conn, user_id, totals.waste_kg)
        })
    }

    /// Public leaderboard. `limit` defaults to and is capped at 100.
    pub fn leaderboard(
        &self,
        kind: profiles::LeaderboardKind,
        limit: Option<u32>,
    ) -> Result<Vec<db::LeaderboardEntry>, LedgerError> {
        let limit = clamp_limit(limit.unwrap_or(MAX_PAGE));
        self.db.with_conn(|conn| profiles::leaderboard(conn, kind, limit))
    }
}

fn view(profile: db::ProfileRow) -> ProfileView {
    let progress = LevelProgress::for_points(profile.total_points);
    ProfileView { profile, progress }
}

fn validate_user_id(user_id: &str) -> Result<(), LedgerError> {
    if user_id.trim().is_empty() {
        return Err(LedgerError::InvalidInput("user id is required".into()));
    }
    Ok(())
}

fn clamp_limit(limit: u32) -> u32 {
    limit.clamp(1, MAX_PAGE)
}
