//! Account ledger core.
//!
//! The ledger owns accounts and their append-only posting lines. Postings are
//! idempotent keyed by `(account, direction, reference_id)`, serialize per
//! account through a version compare-and-swap, and enqueue their event to the
//! outbox inside the same critical section as the balance change.

#![deny(unsafe_code)]

pub mod account;
pub mod error;
pub mod journal;
pub mod ledger;
pub mod posting;

pub use account::{Account, AccountStatus, AccountType};
pub use error::LedgerError;
pub use journal::{JournalStorageConfig, PostingJournal};
pub use ledger::{Ledger, LedgerConfig};
pub use posting::{PostingDirection, PostingLine};
