//! Disposal ledger - the single entry point for recording disposals
//!
//! ## Stages
//!
//! ```text
//! validate ─▶ record ─▶ compute xp ─▶ update totals ─▶ log xp ─▶ challenges ─▶ badges
//!    │           │                          │
//!    ▼           ▼                          ▼
//!  Err        Err (nothing           PartiallyFailed
//! (Rejected)   written)              (disposal durable)
//! ```
//!
//! Once the disposal is recorded the call always returns `Ok`. Anything
//! that fails after that point is reported in the receipt's warnings and
//! can be repaired with [`DisposalLedger::reconcile`].
//!
//! A resubmission with a known idempotency key writes no new disposal. If
//! the original was never counted in the totals, bookkeeping resumes from
//! the totals stage; otherwise the current totals are returned as-is.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::badges;
use super::context::CallerContext;
use super::scoring;
use super::store::{AwardOutcome, ChallengeCompletion, LedgerStore, NewDisposal, Totals};
use crate::error::LedgerError;
use crate::services::events::{EventBus, LedgerEvent};

/// Reason recorded on the experience log for a disposal
pub const DISPOSAL_XP_REASON: &str = "Waste disposal";

/// Terminal state of a recorded submission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Disposal recorded and totals updated. Badge or challenge bookkeeping
    /// may still have produced warnings.
    Completed,
    /// Disposal recorded but totals were not updated
    PartiallyFailed,
}

/// What the caller gets back for a recorded disposal
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DisposalReceipt {
    pub disposal_id: String,
    pub status: SubmissionStatus,
    /// The idempotency key matched an earlier submission
    pub replayed: bool,
    pub xp_earned: i64,
    /// Totals after this submission, when known
    pub totals: Option<Totals>,
    pub newly_earned_badges: Vec<String>,
    pub completed_challenges: Vec<ChallengeCompletion>,
    pub warnings: Vec<String>,
}

impl DisposalReceipt {
    fn new(disposal_id: String) -> Self {
        Self {
            disposal_id,
            status: SubmissionStatus::Completed,
            replayed: false,
            xp_earned: 0,
            totals: None,
            newly_earned_badges: Vec::new(),
            completed_challenges: Vec::new(),
            warnings: Vec::new(),
        }
    }

    fn partially_failed(mut self, warning: String) -> Self {
        self.status = SubmissionStatus::PartiallyFailed;
        self.warnings.push(warning);
        self
    }
}

/// Result of recomputing a user's totals from history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub user_id: String,
    pub disposals: usize,
    pub before: Totals,
    pub after: Totals,
}

impl ReconcileReport {
    pub fn changed(&self) -> bool {
        self.before != self.after
    }
}

/// Orchestrates disposal recording over a [`LedgerStore`]
pub struct DisposalLedger<S: LedgerStore> {
    store: Arc<S>,
    events: Arc<EventBus>,
}

impl<S: LedgerStore> DisposalLedger<S> {
    pub fn new(store: Arc<S>, events: Arc<EventBus>) -> Self {
        Self { store, events }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Record a disposal and run all downstream bookkeeping.
    ///
    /// Returns `Err` only when the disposal was not recorded.
    pub fn submit_disposal(
        &self,
        ctx: &CallerContext,
        mut request: NewDisposal,
    ) -> Result<DisposalReceipt, LedgerError> {
        if let Err(e) = request.validate() {
            warn!(user_id = %request.user_id, error = %e, "Disposal rejected");
            return Err(e);
        }
        ctx.authorize_for(&request.user_id)?;

        let mut warnings = Vec::new();
        if let Some(classification) = &request.classification {
            if !classification.is_valid() {
                warn!(user_id = %request.user_id, ?classification, "Dropping invalid classification");
                warnings.push(format!(
                    "classification dropped: label {:?} confidence {}",
                    classification.label, classification.confidence
                ));
                request.classification = None;
            }
        }

        let user_id = request.user_id.clone();
        self.store.ensure_profile(&user_id)?;

        let recorded = self.store.append_disposal(&request)?;
        let mut receipt = DisposalReceipt::new(recorded.id.clone());
        receipt.warnings = warnings;
        receipt.replayed = recorded.replayed;

        if recorded.replayed {
            if recorded.totals_applied {
                info!(user_id = %user_id, disposal_id = %recorded.id, "Replayed disposal submission");
                return Ok(self.with_current_totals(receipt, &user_id));
            }
            info!(
                user_id = %user_id,
                disposal_id = %recorded.id,
                "Replayed disposal was never counted, resuming bookkeeping"
            );
        } else {
            info!(
                user_id = %user_id,
                disposal_id = %recorded.id,
                weight_kg = recorded.weight_kg,
                "Disposal recorded"
            );
            self.events.emit(LedgerEvent::DisposalRecorded {
                disposal_id: recorded.id.clone(),
                user_id: user_id.clone(),
                weight_kg: recorded.weight_kg,
            });
        }

        let weight_kg = recorded.weight_kg;
        let xp = match scoring::compute_experience(weight_kg) {
            Ok(xp) => xp,
            Err(e) => return Ok(receipt.partially_failed(format!("experience not computed: {}", e))),
        };

        let mut totals = match self.store.apply_disposal_totals(&recorded.id, &user_id, weight_kg, xp) {
            Ok(Some(totals)) => totals,
            Ok(None) => {
                // Counted concurrently by another replay or a reconcile
                debug!(user_id = %user_id, disposal_id = %recorded.id, "Disposal already counted");
                let mut receipt = self.with_current_totals(receipt, &user_id);
                if let Some(totals) = receipt.totals {
                    receipt.newly_earned_badges = self.award_badges(&user_id, &totals, &mut receipt.warnings);
                }
                return Ok(receipt);
            }
            Err(e) => {
                error!(user_id = %user_id, disposal_id = %recorded.id, error = %e, "Totals update failed");
                return Ok(receipt.partially_failed(format!("totals not updated: {}", e)));
            }
        };
        receipt.xp_earned = xp;
        self.emit_totals(&user_id, &totals);

        match self
            .store
            .append_experience_log(&user_id, Some(&recorded.id), xp, DISPOSAL_XP_REASON)
        {
            Ok(()) => self.events.emit(LedgerEvent::ExperienceLogged {
                user_id: user_id.clone(),
                xp,
                reason: DISPOSAL_XP_REASON.to_string(),
            }),
            Err(e) => {
                warn!(user_id = %user_id, disposal_id = %recorded.id, error = %e, "Experience log failed");
                receipt.warnings.push(format!("experience log not written: {}", e));
            }
        }

        let completed = self.accrue_challenges(&user_id, weight_kg, &mut totals, &mut receipt.warnings);
        receipt.completed_challenges = completed;

        receipt.newly_earned_badges = self.award_badges(&user_id, &totals, &mut receipt.warnings);
        receipt.totals = Some(totals);

        Ok(receipt)
    }

    /// Recompute a user's totals from their full disposal history plus
    /// completed challenge rewards, and overwrite the stored totals.
    ///
    /// The read of history and the write of totals are one store
    /// operation, so a disposal counted concurrently is never lost.
    pub fn reconcile(&self, ctx: &CallerContext, user_id: &str) -> Result<ReconcileReport, LedgerError> {
        ctx.authorize_for(user_id)?;

        let recomputed = self.store.recompute_totals(user_id)?;
        let (before, after) = (recomputed.before, recomputed.after);

        if before != after {
            info!(
                user_id = %user_id,
                before_kg = before.waste_kg,
                after_kg = after.waste_kg,
                before_points = before.points,
                after_points = after.points,
                "Reconciled drifted totals"
            );
        } else {
            debug!(user_id = %user_id, "Totals already consistent");
        }
        self.events.emit(LedgerEvent::TotalsReconciled {
            user_id: user_id.to_string(),
            waste_kg: after.waste_kg,
            points: after.points,
        });

        Ok(ReconcileReport {
            user_id: user_id.to_string(),
            disposals: recomputed.disposals,
            before,
            after,
        })
    }

    fn with_current_totals(&self, mut receipt: DisposalReceipt, user_id: &str) -> DisposalReceipt {
        match self.store.read_totals(user_id) {
            Ok(totals) => receipt.totals = Some(totals),
            Err(e) => receipt.warnings.push(format!("totals unavailable: {}", e)),
        }
        receipt
    }

    /// Advance challenge progress and grant rewards for completions.
    /// Best-effort: failures become warnings.
    fn accrue_challenges(
        &self,
        user_id: &str,
        weight_kg: f64,
        totals: &mut Totals,
        warnings: &mut Vec<String>,
    ) -> Vec<ChallengeCompletion> {
        let completions = match self.store.advance_challenges(user_id, weight_kg, Utc::now()) {
            Ok(c) => c,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Challenge progress update failed");
                warnings.push(format!("challenge progress not updated: {}", e));
                return Vec::new();
            }
        };

        for completion in &completions {
            self.events.emit(LedgerEvent::ChallengeCompleted {
                user_id: user_id.to_string(),
                challenge_id: completion.challenge_id.clone(),
                reward_xp: completion.reward_xp,
            });

            if completion.reward_xp <= 0 {
                continue;
            }

            match self.store.apply_delta(user_id, 0.0, completion.reward_xp) {
                Ok(updated) => {
                    *totals = updated;
                    self.emit_totals(user_id, totals);
                }
                Err(e) => {
                    warn!(user_id = %user_id, challenge_id = %completion.challenge_id, error = %e, "Challenge reward not applied");
                    warnings.push(format!("reward for challenge {} not applied: {}", completion.challenge_id, e));
                    continue;
                }
            }

            let reason = format!("Challenge completed: {}", completion.name);
            if let Err(e) = self.store.append_experience_log(user_id, None, completion.reward_xp, &reason) {
                warn!(user_id = %user_id, error = %e, "Reward experience log failed");
                warnings.push(format!("experience log not written: {}", e));
            }
        }

        completions
    }

    /// Evaluate and award badges against post-update totals.
    /// Each award is independent of its siblings.
    fn award_badges(&self, user_id: &str, totals: &Totals, warnings: &mut Vec<String>) -> Vec<String> {
        let catalog = match self.store.badge_catalog() {
            Ok(catalog) => catalog,
            Err(e) => {
                warn!(error = %e, "Badge catalog unavailable");
                warnings.push(format!("badges not evaluated: {}", e));
                return Vec::new();
            }
        };
        let earned = match self.store.earned_badges(user_id) {
            Ok(earned) => earned,
            Err(e) => {
                warn!(user_id = %user_id, error = %e, "Earned badges unavailable");
                warnings.push(format!("badges not evaluated: {}", e));
                return Vec::new();
            }
        };

        let qualifying = badges::evaluate(totals.waste_kg, totals.points, &catalog, &earned);
        let mut awarded = Vec::with_capacity(qualifying.len());

        for badge_id in qualifying {
            match self.store.award_badge(user_id, &badge_id) {
                Ok(AwardOutcome::Awarded) => {
                    self.events.emit(LedgerEvent::BadgeAwarded {
                        user_id: user_id.to_string(),
                        badge_id: badge_id.clone(),
                    });
                    awarded.push(badge_id);
                }
                Ok(AwardOutcome::AlreadyAwarded) => {
                    debug!(user_id = %user_id, badge_id = %badge_id, "Badge already awarded");
                }
                Err(e) => {
                    warn!(user_id = %user_id, badge_id = %badge_id, error = %e, "Badge award failed");
                    warnings.push(format!("badge {} not awarded: {}", badge_id, e));
                }
            }
        }

        awarded
    }

    fn emit_totals(&self, user_id: &str, totals: &Totals) {
        self.events.emit(LedgerEvent::TotalsUpdated {
            user_id: user_id.to_string(),
            waste_kg: totals.waste_kg,
            points: totals.points,
            level: totals.level,
        });
    }
}
