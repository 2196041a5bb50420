use serde::{Deserialize, Serialize};

/// Platform-wide fault taxonomy.
///
/// Every domain error maps into exactly one kind; the HTTP layer owns the
/// kind-to-status mapping so domain crates never talk in status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    Validation,
    InvalidStateTransition,
    InsufficientFunds,
    LimitExceeded,
    NotFound,
    Duplicate,
    IdempotencyReplay,
    Unauthenticated,
    Unauthorized,
    RateLimited,
    Concurrency,
    Dependency,
    Compensation,
}

impl ErrorKind {
    /// Canonical uppercase code used in the response envelope.
    pub fn code(self) -> &'static str {
        match self {
            Self::Validation => "VALIDATION",
            Self::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            Self::InsufficientFunds => "INSUFFICIENT_FUNDS",
            Self::LimitExceeded => "LIMIT_EXCEEDED",
            Self::NotFound => "NOT_FOUND",
            Self::Duplicate => "DUPLICATE",
            Self::IdempotencyReplay => "IDEMPOTENCY_REPLAY",
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::RateLimited => "RATE_LIMITED",
            Self::Concurrency => "CONCURRENCY",
            Self::Dependency => "DEPENDENCY",
            Self::Compensation => "COMPENSATION",
        }
    }

    /// Whether an internal retry is ever appropriate for this kind.
    pub fn retryable(self) -> bool {
        matches!(self, Self::Concurrency | Self::Dependency)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_canonical_uppercase() {
        assert_eq!(ErrorKind::InsufficientFunds.code(), "INSUFFICIENT_FUNDS");
        assert_eq!(ErrorKind::IdempotencyReplay.code(), "IDEMPOTENCY_REPLAY");
    }

    #[test]
    fn only_transient_kinds_are_retryable() {
        assert!(ErrorKind::Concurrency.retryable());
        assert!(ErrorKind::Dependency.retryable());
        assert!(!ErrorKind::Compensation.retryable());
        assert!(!ErrorKind::Validation.retryable());
    }
}
