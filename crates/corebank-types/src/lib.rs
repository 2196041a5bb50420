//! Shared primitives for the CoreBank platform.
//!
//! Money is fixed-point with scale 2 (minor units); every fault carries an
//! [`ErrorKind`] from the platform error taxonomy; time is read through an
//! injected [`Clock`] so state machines stay deterministic under test.

#![deny(unsafe_code)]

pub mod clock;
pub mod error;
pub mod money;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use error::ErrorKind;
pub use money::{Currency, CurrencyError, Money, MoneyError};

use uuid::Uuid;

/// Build a prefixed reference such as `TRF-6f9a1c0d2b174b52`.
///
/// References are opaque; the prefix only aids log readability.
pub fn new_reference(prefix: &str) -> String {
    let id = Uuid::new_v4().simple().to_string();
    format!("{}-{}", prefix, &id[..16])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn references_are_prefixed_and_unique() {
        let a = new_reference("TRF");
        let b = new_reference("TRF");
        assert!(a.starts_with("TRF-"));
        assert_ne!(a, b);
        assert_eq!(a.len(), "TRF-".len() + 16);
    }
}
