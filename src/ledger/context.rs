//! Caller context passed to every ledger operation
//!
//! There is no ambient authenticated client. Handlers build a context from
//! the request and thread it into each call.

use crate::error::LedgerError;

/// Who is calling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallerRole {
    /// An end user, allowed to act only on their own ledger
    User,
    /// A trusted server-side caller, allowed to act for any user
    Service,
}

/// Credential for a single call
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallerContext {
    pub actor_id: String,
    pub role: CallerRole,
}

impl CallerContext {
    /// Context for an authenticated end user
    pub fn user(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            role: CallerRole::User,
        }
    }

    /// Context for a trusted service
    pub fn service(name: impl Into<String>) -> Self {
        Self {
            actor_id: name.into(),
            role: CallerRole::Service,
        }
    }

    pub fn is_service(&self) -> bool {
        self.role == CallerRole::Service
    }

    /// Fail unless this caller may act on `user_id`'s ledger
    pub fn authorize_for(&self, user_id: &str) -> Result<(), LedgerError> {
        if self.is_service() || self.actor_id == user_id {
            Ok(())
        } else {
            Err(LedgerError::Forbidden(format!(
                "{} may not act for user {}",
                self.actor_id, user_id
            )))
        }
    }

    /// Fail unless this caller is a trusted service
    pub fn require_service(&self) -> Result<(), LedgerError> {
        if self.is_service() {
            Ok(())
        } else {
            Err(LedgerError::Forbidden("service credentials required".into()))
        }
    }
}

impl std::fmt::Display for CallerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "CallerContext({:?}:{})", self.role, self.actor_id)
    }
}
