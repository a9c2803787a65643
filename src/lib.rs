//! Swachh Ledger - disposal ledger and achievement engine
//!
//! Records waste disposals, turns them into experience points and levels,
//! and awards badges and challenge rewards as cumulative totals cross
//! thresholds.
//!
//! ## Architecture
//!
//! - **ledger**: pure scoring and badge rules plus the `DisposalLedger`
//!   orchestrator, written against the `LedgerStore` trait
//! - **db**: SQLite implementation of `LedgerStore` and the catalog,
//!   profile and challenge tables
//! - **services**: authorization-aware services and the event bus
//! - **http**: JSON API over the services
//!
//! ## Storage Layout
//!
//! ```text
//! ~/.local/share/swachh-ledger/
//! ├── ledger.db              # SQLite database (WAL mode)
//! └── config.toml            # Configuration
//! ```

pub mod config;
pub mod db;
pub mod error;
pub mod http;
pub mod ledger;
pub mod services;

// Re-exports
pub use config::Config;
pub use db::LedgerDb;
pub use error::LedgerError;
pub use http::HttpServer;
pub use ledger::{CallerContext, CallerRole, DisposalLedger, DisposalReceipt, LedgerStore, NewDisposal};
pub use services::{EventBus, LedgerEvent, Services};
