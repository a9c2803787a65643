//! Challenge service - create, list and join challenges
//!
//! Progress is advanced by the disposal ledger, not here.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;

use super::events::{EventBus, LedgerEvent};
use crate::db::{challenges, profiles, LedgerDb};
use crate::error::LedgerError;
use crate::ledger::CallerContext;

pub struct ChallengeService {
    db: Arc<LedgerDb>,
    events: Arc<EventBus>,
}

impl ChallengeService {
    pub fn new(db: Arc<LedgerDb>, events: Arc<EventBus>) -> Self {
        Self { db, events }
    }

    pub fn create(
        &self,
        ctx: &CallerContext,
        input: &challenges::CreateChallengeInput,
    ) -> Result<challenges::ChallengeRow, LedgerError> {
        ctx.require_service()?;
        let row = self.db.with_conn(|conn| challenges::create_challenge(conn, input))?;
        info!(id = %row.id, target_kg = row.target_kg, reward_xp = row.reward_xp, "Challenge created");
        Ok(row)
    }

    /// Open challenges. A user caller sees their own participation; a
    /// service caller sees none.
    pub fn list_open(&self, ctx: &CallerContext) -> Result<Vec<challenges::ChallengeView>, LedgerError> {
        let user_id = (!ctx.is_service()).then_some(ctx.actor_id.as_str());
        self.db.with_conn(|conn| challenges::list_open(conn, user_id, Utc::now()))
    }

    pub fn join(&self, ctx: &CallerContext, challenge_id: &str, user_id: &str) -> Result<(), LedgerError> {
        ctx.authorize_for(user_id)?;
        self.db.with_conn(|conn| {
            profiles::ensure_profile(conn, user_id)?;
            challenges::join(conn, challenge_id, user_id, Utc::now())
        })?;

        info!(challenge_id = %challenge_id, user_id = %user_id, "Joined challenge");
        self.events.emit(LedgerEvent::ChallengeJoined {
            user_id: user_id.to_string(),
            challenge_id: challenge_id.to_string(),
        });
        Ok(())
    }
}
