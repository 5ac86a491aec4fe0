//! Caller identity as supplied by the surrounding token-issuing layer.

use crate::error::EngineError;
use crate::types::UserId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Role carried by an authenticated caller.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// Reserves and pays for tickets
    Attendee,
    /// Creates and runs events
    Organizer,
    /// May act on anything
    Admin,
}

/// Authenticated caller.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// User id
    pub id: UserId,
    /// Granted roles
    pub roles: BTreeSet<Role>,
}

impl CallerIdentity {
    /// Builds an identity with the given roles.
    pub fn new(id: UserId, roles: impl IntoIterator<Item = Role>) -> Self {
        Self {
            id,
            roles: roles.into_iter().collect(),
        }
    }

    /// Whether the caller has `role`.
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// Whether the caller is an administrator.
    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.has_role(Role::Admin)
    }

    /// Whether the caller is `owner` or an administrator.
    #[must_use]
    pub fn owns_or_admin(&self, owner: UserId) -> bool {
        self.id == owner || self.is_admin()
    }
}

/// Token resolution failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    /// The token is unknown, expired or malformed
    #[error("invalid token")]
    InvalidToken,
    /// The identity provider could not be reached
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}

impl From<IdentityError> for EngineError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidToken => Self::Forbidden {
                caller: "anonymous".to_string(),
                operation: "authenticate".to_string(),
            },
            IdentityError::Unavailable(reason) => Self::TransientInfrastructureFailure(reason),
        }
    }
}

/// Identity/token collaborator.
pub trait IdentityProvider: Send + Sync {
    /// Resolves a bearer token into a caller identity.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] when the token cannot be resolved.
    fn caller_identity(
        &self,
        token: &str,
    ) -> Pin<Box<dyn Future<Output = Result<CallerIdentity, IdentityError>> + Send>>;
}
