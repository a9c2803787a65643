//! Service layer for swachh-ledger
//!
//! Services sit between HTTP handlers and the database. Each service wraps
//! database operations with:
//! - Caller authorization (every call takes a `CallerContext`)
//! - Input validation
//! - Event emission for audit/notifications
//!
//! ## Architecture
//!
//! ```text
//! HTTP Handlers (thin)
//!     ↓
//! Services / DisposalLedger (business logic)
//!     ↓
//! Repository Layer (db/*.rs)
//!     ↓
//! SQLite Database
//! ```

pub mod response;
pub mod events;
pub mod catalog_service;
pub mod challenge_service;
pub mod profile_service;

// Re-exports
pub use events::{EventBus, EventListener, LedgerEvent};
pub use catalog_service::CatalogService;
pub use challenge_service::ChallengeService;
pub use profile_service::{ProfileService, ProfileView};

use crate::db::LedgerDb;
use crate::ledger::DisposalLedger;
use std::sync::Arc;

/// Service container for dependency injection
///
/// Holds all services with a shared database connection.
/// Pass this to HttpServer for handler access.
pub struct Services {
    pub db: Arc<LedgerDb>,
    pub ledger: Arc<DisposalLedger<LedgerDb>>,
    pub profiles: Arc<ProfileService>,
    pub catalog: Arc<CatalogService>,
    pub challenges: Arc<ChallengeService>,
    pub events: Arc<EventBus>,
}

impl Services {
    /// Create all services with a shared database
    pub fn new(db: Arc<LedgerDb>) -> Self {
        Self::with_events(db, Arc::new(EventBus::new()))
    }

    /// Create all services publishing to an existing event bus
    pub fn with_events(db: Arc<LedgerDb>, events: Arc<EventBus>) -> Self {
        Self {
            ledger: Arc::new(DisposalLedger::new(db.clone(), events.clone())),
            profiles: Arc::new(ProfileService::new(db.clone())),
            catalog: Arc::new(CatalogService::new(db.clone())),
            challenges: Arc::new(ChallengeService::new(db.clone(), events.clone())),
            db,
            events,
        }
    }
}
