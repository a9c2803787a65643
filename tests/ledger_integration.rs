//! Integration tests for the disposal ledger over SQLite
//!
//! Each test builds its own in-memory database with a small catalog, except
//! the persistence test which uses a temporary directory.

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use swachh_ledger::db::{badges, categories, challenges, disposals, LedgerDb};
use swachh_ledger::ledger::{
    compute_experience, AwardOutcome, Badge, ChallengeCompletion, Classification, RecomputedTotals,
    RecordedDisposal, SubmissionStatus, Totals,
};
use swachh_ledger::services::EventBus;
use swachh_ledger::{CallerContext, DisposalLedger, LedgerError, LedgerStore, NewDisposal, Services};
use tempfile::TempDir;

const USER: &str = "user-1";

/// Create the catalog used by most tests: one category, badges at 2 kg and 5 kg
fn seed_catalog(db: &LedgerDb) {
    db.with_conn(|conn| {
        categories::create_category(conn, &categories::CreateCategoryInput {
            id: Some("plastic".into()),
            name: "Plastic".into(),
            icon: None,
            color: None,
        })?;
        for (id, kg) in [("two-kg", 2.0), ("five-kg", 5.0)] {
            badges::create_badge(conn, &badges::CreateBadgeInput {
                id: Some(id.into()),
                name: id.into(),
                description: None,
                icon: None,
                color: None,
                criteria_kg: Some(kg),
                criteria_count: None,
            })?;
        }
        Ok(())
    })
    .unwrap();
}

fn ledger() -> DisposalLedger<LedgerDb> {
    let db = LedgerDb::open_in_memory().unwrap();
    seed_catalog(&db);
    DisposalLedger::new(Arc::new(db), Arc::new(EventBus::new()))
}

fn weights(db: &LedgerDb) -> Vec<f64> {
    db.with_conn(|conn| disposals::weights_for_user(conn, USER)).unwrap()
}

fn disposal(weight_kg: f64) -> NewDisposal {
    NewDisposal {
        user_id: USER.into(),
        category_id: "plastic".into(),
        weight_kg,
        image_ref: None,
        notes: None,
        classification: None,
        idempotency_key: None,
    }
}

#[test]
fn test_submit_updates_totals_and_awards_badges() {
    let ledger = ledger();
    let ctx = CallerContext::user(USER);

    let receipt = ledger.submit_disposal(&ctx, disposal(2.5)).unwrap();

    assert_eq!(receipt.status, SubmissionStatus::Completed);
    assert_eq!(receipt.xp_earned, 25);
    assert_eq!(receipt.totals, Some(Totals { waste_kg: 2.5, points: 25, level: 1 }));
    assert_eq!(receipt.newly_earned_badges, vec!["two-kg".to_string()]);
    assert!(receipt.warnings.is_empty());

    let earned = ledger.store().earned_badges(USER).unwrap();
    assert!(earned.contains("two-kg"));
    assert!(!earned.contains("five-kg"));
}

#[test]
fn test_zero_weight_rejected_without_side_effects() {
    let ledger = ledger();
    let ctx = CallerContext::user(USER);

    let err = ledger.submit_disposal(&ctx, disposal(0.0)).unwrap_err();
    assert!(matches!(err, LedgerError::InvalidInput(_) | LedgerError::InvalidWeight(_)));

    assert!(weights(ledger.store()).is_empty());
    assert!(matches!(ledger.store().read_totals(USER), Err(LedgerError::NotFound(_))));
}

#[test]
fn test_sequential_disposals_accumulate() {
    let ledger = ledger();
    let ctx = CallerContext::user(USER);

    ledger.submit_disposal(&ctx, disposal(1.0)).unwrap();
    let receipt = ledger.submit_disposal(&ctx, disposal(3.0)).unwrap();

    assert_eq!(receipt.totals, Some(Totals { waste_kg: 4.0, points: 40, level: 1 }));
    assert!(receipt.newly_earned_badges.contains(&"two-kg".to_string()));

    let history = ledger
        .store()
        .with_conn(|conn| swachh_ledger::db::experience::list_for_user(conn, USER, 10))
        .unwrap();
    let xp: Vec<i64> = history.iter().map(|e| e.xp_earned).collect();
    assert_eq!(xp, vec![30, 10]);
    assert!(history.iter().all(|e| e.disposal_id.is_some()));
}

#[test]
fn test_concurrent_submissions_lose_no_updates() {
    const THREADS: usize = 8;
    let ledger = Arc::new(ledger());

    std::thread::scope(|scope| {
        for _ in 0..THREADS {
            let ledger = Arc::clone(&ledger);
            scope.spawn(move || {
                let ctx = CallerContext::user(USER);
                let receipt = ledger.submit_disposal(&ctx, disposal(1.5)).unwrap();
                assert_eq!(receipt.status, SubmissionStatus::Completed);
            });
        }
    });

    let totals = ledger.store().read_totals(USER).unwrap();
    assert_eq!(totals.waste_kg, 1.5 * THREADS as f64);
    assert_eq!(totals.points, 15 * THREADS as i64);
    assert_eq!(weights(ledger.store()).len(), THREADS);

    // Every qualifying badge is held exactly once
    let earned = ledger.store().earned_badges(USER).unwrap();
    assert_eq!(earned.len(), 2);
}

#[test]
fn test_duplicate_award_is_already_awarded() {
    let ledger = ledger();
    let store = ledger.store();
    store.ensure_profile(USER).unwrap();

    assert_eq!(store.award_badge(USER, "two-kg").unwrap(), AwardOutcome::Awarded);
    assert_eq!(store.award_badge(USER, "two-kg").unwrap(), AwardOutcome::AlreadyAwarded);
    assert_eq!(store.earned_badges(USER).unwrap().len(), 1);
}

#[test]
fn test_idempotent_resubmission() {
    let ledger = ledger();
    let ctx = CallerContext::user(USER);
    let mut request = disposal(2.0);
    request.idempotency_key = Some("upload-42".into());

    let first = ledger.submit_disposal(&ctx, request.clone()).unwrap();
    let second = ledger.submit_disposal(&ctx, request).unwrap();

    assert!(!first.replayed);
    assert!(second.replayed);
    assert_eq!(first.disposal_id, second.disposal_id);
    assert_eq!(second.totals, Some(Totals { waste_kg: 2.0, points: 20, level: 1 }));
    assert!(second.newly_earned_badges.is_empty());
    assert_eq!(weights(ledger.store()).len(), 1);
}

#[test]
fn test_cannot_submit_for_another_user() {
    let ledger = ledger();
    let ctx = CallerContext::user("someone-else");

    let err = ledger.submit_disposal(&ctx, disposal(1.0)).unwrap_err();
    assert!(matches!(err, LedgerError::Forbidden(_)));
    assert!(weights(ledger.store()).is_empty());

    // A service caller may act for anyone
    let receipt = ledger.submit_disposal(&CallerContext::service("kiosk"), disposal(1.0)).unwrap();
    assert_eq!(receipt.status, SubmissionStatus::Completed);
}

#[test]
fn test_invalid_classification_is_dropped() {
    let ledger = ledger();
    let ctx = CallerContext::user(USER);
    let mut request = disposal(1.0);
    request.classification = Some(Classification { label: "plastic".into(), confidence: 1.7 });

    let receipt = ledger.submit_disposal(&ctx, request).unwrap();
    assert_eq!(receipt.status, SubmissionStatus::Completed);
    assert_eq!(receipt.warnings.len(), 1);

    let row = ledger
        .store()
        .with_conn(|conn| swachh_ledger::db::disposals::get_disposal(conn, &receipt.disposal_id))
        .unwrap()
        .unwrap();
    assert_eq!(row.ai_classification, None);
    assert_eq!(row.ai_confidence, None);
}

/// Store whose totals updates can be switched off, and which can land a
/// second disposal just as a recomputation starts
struct FlakyStore {
    inner: LedgerDb,
    fail_totals: AtomicBool,
    land_before_recompute: Mutex<Option<NewDisposal>>,
}

impl FlakyStore {
    fn new(inner: LedgerDb) -> Self {
        Self {
            inner,
            fail_totals: AtomicBool::new(false),
            land_before_recompute: Mutex::new(None),
        }
    }

    fn check_totals(&self) -> Result<(), LedgerError> {
        if self.fail_totals.load(Ordering::SeqCst) {
            return Err(LedgerError::StoreUnavailable("database is locked".into()));
        }
        Ok(())
    }
}

impl LedgerStore for FlakyStore {
    fn ensure_profile(&self, user_id: &str) -> Result<Totals, LedgerError> {
        self.inner.ensure_profile(user_id)
    }

    fn append_disposal(&self, event: &NewDisposal) -> Result<RecordedDisposal, LedgerError> {
        self.inner.append_disposal(event)
    }

    fn read_totals(&self, user_id: &str) -> Result<Totals, LedgerError> {
        self.inner.read_totals(user_id)
    }

    fn apply_disposal_totals(
        &self,
        disposal_id: &str,
        user_id: &str,
        delta_kg: f64,
        delta_points: i64,
    ) -> Result<Option<Totals>, LedgerError> {
        self.check_totals()?;
        self.inner.apply_disposal_totals(disposal_id, user_id, delta_kg, delta_points)
    }

    fn apply_delta(&self, user_id: &str, delta_kg: f64, delta_points: i64) -> Result<Totals, LedgerError> {
        self.check_totals()?;
        self.inner.apply_delta(user_id, delta_kg, delta_points)
    }

    fn append_experience_log(
        &self,
        user_id: &str,
        disposal_id: Option<&str>,
        xp: i64,
        reason: &str,
    ) -> Result<(), LedgerError> {
        self.inner.append_experience_log(user_id, disposal_id, xp, reason)
    }

    fn badge_catalog(&self) -> Result<Vec<Badge>, LedgerError> {
        self.inner.badge_catalog()
    }

    fn earned_badges(&self, user_id: &str) -> Result<HashSet<String>, LedgerError> {
        self.inner.earned_badges(user_id)
    }

    fn award_badge(&self, user_id: &str, badge_id: &str) -> Result<AwardOutcome, LedgerError> {
        self.inner.award_badge(user_id, badge_id)
    }

    fn advance_challenges(
        &self,
        user_id: &str,
        delta_kg: f64,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChallengeCompletion>, LedgerError> {
        self.inner.advance_challenges(user_id, delta_kg, now)
    }

    fn recompute_totals(&self, user_id: &str) -> Result<RecomputedTotals, LedgerError> {
        if let Some(event) = self.land_before_recompute.lock().unwrap().take() {
            let recorded = self.inner.append_disposal(&event)?;
            let xp = compute_experience(event.weight_kg)?;
            self.inner
                .apply_disposal_totals(&recorded.id, &event.user_id, event.weight_kg, xp)?;
        }
        self.inner.recompute_totals(user_id)
    }
}

fn flaky_ledger() -> (Arc<FlakyStore>, DisposalLedger<FlakyStore>) {
    let db = LedgerDb::open_in_memory().unwrap();
    seed_catalog(&db);
    let store = Arc::new(FlakyStore::new(db));
    let ledger = DisposalLedger::new(Arc::clone(&store), Arc::new(EventBus::new()));
    (store, ledger)
}

#[test]
fn test_partial_failure_then_reconcile() {
    let (store, ledger) = flaky_ledger();
    let ctx = CallerContext::user(USER);

    ledger.submit_disposal(&ctx, disposal(1.0)).unwrap();

    store.fail_totals.store(true, Ordering::SeqCst);
    let receipt = ledger.submit_disposal(&ctx, disposal(3.0)).unwrap();
    assert_eq!(receipt.status, SubmissionStatus::PartiallyFailed);
    assert_eq!(receipt.totals, None);
    assert!(receipt.newly_earned_badges.is_empty());
    assert!(!receipt.warnings.is_empty());

    // The disposal is durable even though totals lag behind
    assert_eq!(weights(&store.inner), vec![1.0, 3.0]);
    assert_eq!(store.read_totals(USER).unwrap().points, 10);

    store.fail_totals.store(false, Ordering::SeqCst);
    let report = ledger.reconcile(&ctx, USER).unwrap();
    assert!(report.changed());
    assert_eq!(report.disposals, 2);
    assert_eq!(report.after, Totals { waste_kg: 4.0, points: 40, level: 1 });

    let again = ledger.reconcile(&ctx, USER).unwrap();
    assert!(!again.changed());
}

#[test]
fn test_replay_resumes_uncounted_disposal() {
    let (store, ledger) = flaky_ledger();
    let ctx = CallerContext::user(USER);
    let mut request = disposal(2.5);
    request.idempotency_key = Some("upload-7".into());

    store.fail_totals.store(true, Ordering::SeqCst);
    let first = ledger.submit_disposal(&ctx, request.clone()).unwrap();
    assert_eq!(first.status, SubmissionStatus::PartiallyFailed);

    // Still failing: the replay reports the same partial state
    let stuck = ledger.submit_disposal(&ctx, request.clone()).unwrap();
    assert!(stuck.replayed);
    assert_eq!(stuck.status, SubmissionStatus::PartiallyFailed);

    store.fail_totals.store(false, Ordering::SeqCst);
    let resumed = ledger.submit_disposal(&ctx, request.clone()).unwrap();
    assert!(resumed.replayed);
    assert_eq!(resumed.disposal_id, first.disposal_id);
    assert_eq!(resumed.status, SubmissionStatus::Completed);
    assert_eq!(resumed.xp_earned, 25);
    assert_eq!(resumed.totals, Some(Totals { waste_kg: 2.5, points: 25, level: 1 }));
    assert_eq!(resumed.newly_earned_badges, vec!["two-kg".to_string()]);

    // Counted once, however often it is resubmitted
    let again = ledger.submit_disposal(&ctx, request).unwrap();
    assert_eq!(again.status, SubmissionStatus::Completed);
    assert_eq!(again.xp_earned, 0);
    assert_eq!(again.totals, Some(Totals { waste_kg: 2.5, points: 25, level: 1 }));
    assert_eq!(weights(&store.inner), vec![2.5]);
}

#[test]
fn test_replay_after_reconcile_does_not_double_count() {
    let (store, ledger) = flaky_ledger();
    let ctx = CallerContext::user(USER);
    let mut request = disposal(3.0);
    request.idempotency_key = Some("upload-8".into());

    store.fail_totals.store(true, Ordering::SeqCst);
    ledger.submit_disposal(&ctx, request.clone()).unwrap();
    store.fail_totals.store(false, Ordering::SeqCst);

    let report = ledger.reconcile(&ctx, USER).unwrap();
    assert_eq!(report.after.points, 30);

    let replay = ledger.submit_disposal(&ctx, request).unwrap();
    assert_eq!(replay.status, SubmissionStatus::Completed);
    assert_eq!(replay.totals, Some(Totals { waste_kg: 3.0, points: 30, level: 1 }));
}

#[test]
fn test_reconcile_keeps_disposal_landing_mid_recompute() {
    let (store, ledger) = flaky_ledger();
    let ctx = CallerContext::user(USER);

    ledger.submit_disposal(&ctx, disposal(1.0)).unwrap();
    *store.land_before_recompute.lock().unwrap() = Some(disposal(5.0));

    let report = ledger.reconcile(&ctx, USER).unwrap();

    assert_eq!(report.disposals, 2);
    assert_eq!(report.after, Totals { waste_kg: 6.0, points: 60, level: 1 });
    assert_eq!(store.read_totals(USER).unwrap(), report.after);
}

#[test]
fn test_reconcile_concurrent_with_submissions() {
    const SUBMITTERS: usize = 4;
    const PER_THREAD: usize = 10;
    let ledger = Arc::new(ledger());

    std::thread::scope(|scope| {
        for _ in 0..SUBMITTERS {
            let ledger = Arc::clone(&ledger);
            scope.spawn(move || {
                let ctx = CallerContext::user(USER);
                for _ in 0..PER_THREAD {
                    ledger.submit_disposal(&ctx, disposal(0.5)).unwrap();
                }
            });
        }
        let ledger = Arc::clone(&ledger);
        scope.spawn(move || {
            let ctx = CallerContext::service("auditor");
            for _ in 0..PER_THREAD {
                match ledger.reconcile(&ctx, USER) {
                    Ok(report) => assert!(report.after.points >= report.before.points),
                    // Profile not created yet
                    Err(LedgerError::NotFound(_)) => {}
                    Err(e) => panic!("reconcile failed: {}", e),
                }
            }
        });
    });

    let expected = (SUBMITTERS * PER_THREAD) as f64 * 0.5;
    let totals = ledger.store().read_totals(USER).unwrap();
    assert_eq!(totals.waste_kg, expected);
    assert_eq!(totals.points, 5 * (SUBMITTERS * PER_THREAD) as i64);
    assert!(!ledger.reconcile(&CallerContext::user(USER), USER).unwrap().changed());
}

#[test]
fn test_challenge_completes_once_with_reward() {
    let db = Arc::new(LedgerDb::open_in_memory().unwrap());
    seed_catalog(&db);
    let services = Services::new(Arc::clone(&db));
    let admin = CallerContext::service("admin");
    let ctx = CallerContext::user(USER);

    services
        .challenges
        .create(&admin, &challenges::CreateChallengeInput {
            id: Some("clean-week".into()),
            name: "Clean Week".into(),
            description: None,
            icon: None,
            target_kg: 5.0,
            reward_xp: 100,
            start_date: None,
            end_date: None,
        })
        .unwrap();
    services.challenges.join(&ctx, "clean-week", USER).unwrap();

    let first = services.ledger.submit_disposal(&ctx, disposal(3.0)).unwrap();
    assert!(first.completed_challenges.is_empty());

    let second = services.ledger.submit_disposal(&ctx, disposal(3.0)).unwrap();
    assert_eq!(second.completed_challenges.len(), 1);
    assert_eq!(second.completed_challenges[0].reward_xp, 100);
    assert_eq!(second.totals, Some(Totals { waste_kg: 6.0, points: 160, level: 1 }));

    let third = services.ledger.submit_disposal(&ctx, disposal(3.0)).unwrap();
    assert!(third.completed_challenges.is_empty());
    assert_eq!(third.totals.map(|t| t.points), Some(190));

    let views = services.challenges.list_open(&ctx).unwrap();
    assert_eq!(views.len(), 1);
    assert_eq!(views[0].progress_pct, 100.0);
    assert!(views[0].completed_at.is_some());

    // Reconcile counts the reward alongside disposal experience
    let report = services.ledger.reconcile(&ctx, USER).unwrap();
    assert!(!report.changed());
    assert_eq!(report.after.points, 190);
}

#[test]
fn test_achievements_and_leaderboard() {
    let db = Arc::new(LedgerDb::open_in_memory().unwrap());
    seed_catalog(&db);
    let services = Services::new(Arc::clone(&db));
    let service = CallerContext::service("kiosk");

    for (user, kg) in [("a", 1.0), ("b", 6.0), ("c", 3.0)] {
        let mut request = disposal(kg);
        request.user_id = user.into();
        services.ledger.submit_disposal(&service, request).unwrap();
    }

    let board = services
        .profiles
        .leaderboard(swachh_ledger::db::LeaderboardKind::Waste, None)
        .unwrap();
    let order: Vec<&str> = board.iter().map(|e| e.user_id.as_str()).collect();
    assert_eq!(order, vec!["b", "c", "a"]);
    assert_eq!(board[0].rank, 1);

    let achievements = services.profiles.achievements(&CallerContext::user("c"), "c").unwrap();
    let two = achievements.iter().find(|a| a.badge.id == "two-kg").unwrap();
    let five = achievements.iter().find(|a| a.badge.id == "five-kg").unwrap();
    assert!(two.earned);
    assert!(!five.earned);
    assert!((five.progress_pct.unwrap() - 60.0).abs() < 1e-9);
}

#[test]
fn test_totals_persist_across_reopen() {
    let temp = TempDir::new().unwrap();

    {
        let db = LedgerDb::open(&temp.path().join("ledger.db")).unwrap();
        seed_catalog(&db);
        let ledger = DisposalLedger::new(Arc::new(db), Arc::new(EventBus::new()));
        ledger.submit_disposal(&CallerContext::user(USER), disposal(2.5)).unwrap();
    }

    let db = LedgerDb::open(&temp.path().join("ledger.db")).unwrap();
    assert_eq!(db.read_totals(USER).unwrap(), Totals { waste_kg: 2.5, points: 25, level: 1 });
    assert!(db.earned_badges(USER).unwrap().contains("two-kg"));
    assert_eq!(db.stats().unwrap().disposals, 1);
}
