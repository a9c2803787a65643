//! Ledger & achievement engine
//!
//! ```text
//! DisposalLedger (orchestrator)
//!     ├── scoring   weight → xp, level arithmetic
//!     ├── badges    qualification over totals
//!     └── store     LedgerStore trait (SQLite impl in crate::db)
//! ```

pub mod badges;
pub mod context;
pub mod disposal;
pub mod scoring;
pub mod store;

pub use badges::Badge;
pub use context::{CallerContext, CallerRole};
pub use disposal::{DisposalLedger, DisposalReceipt, ReconcileReport, SubmissionStatus};
pub use scoring::{compute_experience, level_for_points, LevelProgress};
pub use store::{
    AwardOutcome, ChallengeCompletion, Classification, LedgerStore, NewDisposal, RecomputedTotals, RecordedDisposal,
    Totals,
};
