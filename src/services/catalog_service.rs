//! Catalog service - waste categories and badges

use std::sync::Arc;

use tracing::info;

use crate::db::{badges, categories, seed, LedgerDb};
use crate::error::LedgerError;
use crate::ledger::{Badge, CallerContext};

pub struct CatalogService {
    db: Arc<LedgerDb>,
}

impl CatalogService {
    pub fn new(db: Arc<LedgerDb>) -> Self {
        Self { db }
    }

    pub fn list_categories(&self) -> Result<Vec<categories::CategoryRow>, LedgerError> {
        self.db.with_conn(categories::list_categories)
    }

    pub fn create_category(
        &self,
        ctx: &CallerContext,
        input: &categories::CreateCategoryInput,
    ) -> Result<categories::CategoryRow, LedgerError> {
        ctx.require_service()?;
        if input.name.trim().is_empty() {
            return Err(LedgerError::InvalidInput("category name is required".into()));
        }
        let row = self.db.with_conn(|conn| categories::create_category(conn, input))?;
        info!(id = %row.id, name = %row.name, "Category created");
        Ok(row)
    }

    pub fn list_badges(&self) -> Result<Vec<Badge>, LedgerError> {
        self.db.with_conn(badges::list_badges)
    }

    pub fn create_badge(&self, ctx: &CallerContext, input: &badges::CreateBadgeInput) -> Result<Badge, LedgerError> {
        ctx.require_service()?;
        let badge = self.db.with_conn(|conn| badges::create_badge(conn, input))?;
        info!(id = %badge.id, name = %badge.name, "Badge created");
        Ok(badge)
    }

    /// Fill empty catalogs with the default categories and badges
    pub fn seed_defaults(&self) -> Result<(usize, usize), LedgerError> {
        self.db.with_conn(seed::seed_defaults)
    }
}
