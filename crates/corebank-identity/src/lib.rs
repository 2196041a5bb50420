//! Identity and authorization.
//!
//! Issues opaque bearer tokens carrying a subject and role claims, keeps a
//! revocation set bounded by the remaining token lifetime, locks accounts
//! after repeated bad passwords, hands out short-lived OTP codes, and rate
//! limits per `(subject, endpoint)` with a token bucket.

#![deny(unsafe_code)]

pub mod ratelimit;
pub mod service;

pub use ratelimit::{
    CounterStore, EndpointClass, InMemoryCounterStore, RateLimiter, RateLimiterConfig,
};
pub use service::{IdentityConfig, IdentityService, IssuedToken};

use corebank_types::ErrorKind;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Role {
    Customer,
    Operator,
    Manager,
    Admin,
    Compliance,
}

impl Role {
    /// Position in the operational ladder. COMPLIANCE sits outside it and
    /// only ever matches by exact claim.
    fn ladder_rank(self) -> Option<u8> {
        match self {
            Self::Customer => Some(0),
            Self::Operator => Some(1),
            Self::Manager => Some(2),
            Self::Admin => Some(3),
            Self::Compliance => None,
        }
    }
}

/// Authenticated caller: subject plus role claims.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub subject: String,
    pub roles: Vec<Role>,
}

impl Principal {
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.contains(&role)
    }

    /// True when any claimed ladder role is at least `minimum`.
    pub fn has_at_least(&self, minimum: Role) -> bool {
        let Some(required) = minimum.ladder_rank() else {
            return self.has_role(minimum);
        };
        self.roles
            .iter()
            .filter_map(|role| role.ladder_rank())
            .any(|rank| rank >= required)
    }
}

#[derive(Debug, Error)]
pub enum IdentityError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("account '{0}' is locked")]
    AccountLocked(String),

    #[error("user '{0}' already exists")]
    DuplicateUser(String),

    #[error("bearer token is invalid")]
    TokenInvalid,

    #[error("bearer token has expired")]
    TokenExpired,

    #[error("bearer token was revoked")]
    TokenRevoked,

    #[error("one-time code is invalid or expired")]
    OtpInvalid,

    #[error("rate limit exceeded for '{0}'")]
    RateLimited(String),

    #[error("{0}")]
    Validation(String),
}

impl IdentityError {
    pub fn error_kind(&self) -> ErrorKind {
        match self {
            Self::InvalidCredentials
            | Self::AccountLocked(_)
            | Self::TokenInvalid
            | Self::TokenExpired
            | Self::TokenRevoked
            | Self::OtpInvalid => ErrorKind::Unauthenticated,
            Self::DuplicateUser(_) => ErrorKind::Duplicate,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::Validation(_) => ErrorKind::Validation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(roles: &[Role]) -> Principal {
        Principal {
            subject: "u1".to_string(),
            roles: roles.to_vec(),
        }
    }

    #[test]
    fn ladder_roles_dominate_downward() {
        assert!(principal(&[Role::Admin]).has_at_least(Role::Operator));
        assert!(principal(&[Role::Manager]).has_at_least(Role::Operator));
        assert!(!principal(&[Role::Customer]).has_at_least(Role::Operator));
        assert!(!principal(&[Role::Operator]).has_at_least(Role::Admin));
    }

    #[test]
    fn compliance_is_claim_only() {
        assert!(principal(&[Role::Compliance]).has_at_least(Role::Compliance));
        assert!(!principal(&[Role::Admin]).has_at_least(Role::Compliance));
        assert!(!principal(&[Role::Compliance]).has_at_least(Role::Operator));
    }
}
