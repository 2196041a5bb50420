use crate::account::{Account, AccountStatus, AccountType};
use crate::error::LedgerError;
use crate::journal::{JournalStorageConfig, PostingJournal};
use crate::posting::{PostingDirection, PostingLine};
use chrono::{DateTime, Utc};
use corebank_events::{event_types, topics, EventEnvelope, Outbox};
use corebank_types::{new_reference, Clock, Money, SharedClock};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// CAS attempts per posting before surfacing a concurrency abort.
    pub max_posting_attempts: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_posting_attempts: 3,
        }
    }
}

type PostingKey = (String, PostingDirection, String);

#[derive(Default)]
struct LedgerState {
    accounts: HashMap<String, Account>,
    postings: Vec<PostingLine>,
    posting_index: HashMap<PostingKey, usize>,
}

/// The posting engine.
///
/// Postings serialize per account through a version compare-and-swap: the
/// read phase snapshots the account, the write phase re-checks the version
/// under the write lock and retries on mismatch. The journal mirror and the
/// outbox row are written inside the same critical section as the balance
/// change; nothing is published while the lock is held.
pub struct Ledger {
    state: RwLock<LedgerState>,
    journal: PostingJournal,
    outbox: Arc<Outbox>,
    clock: SharedClock,
    config: LedgerConfig,
}

impl Ledger {
    pub async fn bootstrap(
        journal: JournalStorageConfig,
        outbox: Arc<Outbox>,
        clock: SharedClock,
        config: LedgerConfig,
    ) -> Result<Self, LedgerError> {
        Ok(Self {
            state: RwLock::new(LedgerState::default()),
            journal: PostingJournal::bootstrap(journal).await?,
            outbox,
            clock,
            config,
        })
    }

    pub fn journal_backend(&self) -> &'static str {
        self.journal.backend_label()
    }

    /// Open an account for a customer. The account activates immediately and
    /// a positive opening balance becomes the first credit line, so the
    /// balance invariant holds from the very first posting.
    pub async fn open_account(
        &self,
        customer_id: &str,
        account_type: AccountType,
        initial_balance: Money,
    ) -> Result<Account, LedgerError> {
        if initial_balance.is_negative() {
            return Err(LedgerError::NegativeOpeningBalance);
        }

        let now = self.clock.now();
        let account_number = new_reference("ACC");
        let account = Account {
            id: Uuid::new_v4().to_string(),
            account_number: account_number.clone(),
            customer_id: customer_id.to_string(),
            currency: initial_balance.currency.clone(),
            account_type,
            status: AccountStatus::Active,
            balance: Money::zero(initial_balance.currency.clone()),
            version: 0,
            opened_at: now,
            closed_at: None,
        };

        {
            let mut state = self.state.write().await;
            state.accounts.insert(account_number.clone(), account);
        }
        tracing::info!(account = %account_number, customer = %customer_id, "account opened");

        if initial_balance.is_positive() {
            let opening_ref = format!("{account_number}:OPENING");
            self.credit(&account_number, initial_balance, &opening_ref, "Opening balance")
                .await?;
        }

        self.account(&account_number).await
    }

    pub async fn credit(
        &self,
        account_number: &str,
        amount: Money,
        reference_id: &str,
        description: &str,
    ) -> Result<PostingLine, LedgerError> {
        self.post(
            account_number,
            PostingDirection::Credit,
            amount,
            reference_id,
            description,
        )
        .await
    }

    pub async fn debit(
        &self,
        account_number: &str,
        amount: Money,
        reference_id: &str,
        description: &str,
    ) -> Result<PostingLine, LedgerError> {
        self.post(
            account_number,
            PostingDirection::Debit,
            amount,
            reference_id,
            description,
        )
        .await
    }

    async fn post(
        &self,
        account_number: &str,
        direction: PostingDirection,
        amount: Money,
        reference_id: &str,
        description: &str,
    ) -> Result<PostingLine, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount);
        }

        let key: PostingKey = (
            account_number.to_string(),
            direction,
            reference_id.to_string(),
        );
        let attempts = self.config.max_posting_attempts.max(1);

        for _ in 0..attempts {
            // Read phase: idempotency check plus an account snapshot.
            let observed = {
                let state = self.state.read().await;
                if let Some(idx) = state.posting_index.get(&key) {
                    return Ok(state.postings[*idx].clone());
                }
                state
                    .accounts
                    .get(account_number)
                    .cloned()
                    .ok_or_else(|| LedgerError::AccountNotFound(account_number.to_string()))?
            };

            if !observed.status.accepts_postings() {
                return Err(LedgerError::AccountInactive {
                    account: account_number.to_string(),
                    status: observed.status.to_string(),
                });
            }
            if observed.currency != amount.currency {
                return Err(LedgerError::CurrencyMismatch {
                    account: account_number.to_string(),
                    expected: observed.currency.to_string(),
                    actual: amount.currency.to_string(),
                });
            }

            let new_balance = match direction {
                PostingDirection::Credit => observed.balance.checked_add(&amount)?,
                PostingDirection::Debit => {
                    let next = observed.balance.checked_sub(&amount)?;
                    if next.is_negative() {
                        return Err(LedgerError::InsufficientFunds {
                            account: account_number.to_string(),
                            balance: observed.balance.to_decimal_string(),
                            requested: amount.to_decimal_string(),
                        });
                    }
                    next
                }
            };

            let line = PostingLine {
                id: Uuid::new_v4().to_string(),
                account_id: observed.id.clone(),
                account_number: account_number.to_string(),
                direction,
                amount: amount.clone(),
                reference_id: reference_id.to_string(),
                description: description.to_string(),
                balance_after: new_balance.clone(),
                posted_at: self.clock.now(),
            };

            // Write phase: commit only if nobody posted in between.
            let mut state = self.state.write().await;
            if let Some(idx) = state.posting_index.get(&key) {
                return Ok(state.postings[*idx].clone());
            }
            let current_version = state
                .accounts
                .get(account_number)
                .ok_or_else(|| LedgerError::AccountNotFound(account_number.to_string()))?
                .version;
            if current_version != observed.version {
                tracing::debug!(
                    account = %account_number,
                    observed = observed.version,
                    current = current_version,
                    "posting version conflict, retrying"
                );
                continue;
            }

            // Mirror before the in-memory commit; the write lock serializes
            // the journal per account.
            self.journal.append(&line).await?;

            {
                let account = state
                    .accounts
                    .get_mut(account_number)
                    .expect("account checked above");
                account.balance = new_balance;
                account.version += 1;
            }
            let idx = state.postings.len();
            state.postings.push(line.clone());
            state.posting_index.insert(key, idx);

            self.outbox.enqueue(
                topics::ACCOUNT_EVENTS,
                EventEnvelope::new(
                    event_types::ACCOUNT_POSTED,
                    account_number,
                    json!({
                        "accountNumber": account_number,
                        "postingId": line.id,
                        "direction": line.direction,
                        "amountMinor": line.amount.minor_units,
                        "currency": line.amount.currency.as_str(),
                        "referenceId": line.reference_id,
                        "balanceAfterMinor": line.balance_after.minor_units,
                    }),
                    line.posted_at,
                ),
            );

            tracing::info!(
                account = %account_number,
                direction = %direction,
                amount = %line.amount,
                reference = %reference_id,
                "posting committed"
            );
            return Ok(line);
        }

        Err(LedgerError::ConcurrencyAborted {
            account: account_number.to_string(),
            attempts,
        })
    }

    pub async fn set_status(
        &self,
        account_number: &str,
        new_status: AccountStatus,
    ) -> Result<Account, LedgerError> {
        let mut state = self.state.write().await;
        let now = self.clock.now();
        let account = state
            .accounts
            .get_mut(account_number)
            .ok_or_else(|| LedgerError::AccountNotFound(account_number.to_string()))?;

        if !account.status.can_transition_to(new_status) {
            return Err(LedgerError::IllegalStateTransition {
                from: account.status.to_string(),
                to: new_status.to_string(),
            });
        }
        if new_status == AccountStatus::Closed && !account.balance.is_zero() {
            return Err(LedgerError::NonZeroClose(account_number.to_string()));
        }

        let previous = account.status;
        account.status = new_status;
        account.version += 1;
        if new_status == AccountStatus::Closed {
            account.closed_at = Some(now);
        }
        let snapshot = account.clone();

        self.outbox.enqueue(
            topics::ACCOUNT_EVENTS,
            EventEnvelope::new(
                event_types::ACCOUNT_STATUS_CHANGED,
                account_number,
                json!({
                    "accountNumber": account_number,
                    "from": previous,
                    "to": new_status,
                }),
                now,
            ),
        );
        tracing::info!(account = %account_number, from = %previous, to = %new_status, "account status changed");
        Ok(snapshot)
    }

    pub async fn freeze(&self, account_number: &str) -> Result<Account, LedgerError> {
        self.set_status(account_number, AccountStatus::Frozen).await
    }

    pub async fn activate(&self, account_number: &str) -> Result<Account, LedgerError> {
        self.set_status(account_number, AccountStatus::Active).await
    }

    pub async fn close(&self, account_number: &str) -> Result<Account, LedgerError> {
        self.set_status(account_number, AccountStatus::Closed).await
    }

    pub async fn account(&self, account_number: &str) -> Result<Account, LedgerError> {
        let state = self.state.read().await;
        state
            .accounts
            .get(account_number)
            .cloned()
            .ok_or_else(|| LedgerError::AccountNotFound(account_number.to_string()))
    }

    pub async fn balance(&self, account_number: &str) -> Result<Money, LedgerError> {
        Ok(self.account(account_number).await?.balance)
    }

    /// Posting history, oldest first, optionally bounded by a time range.
    pub async fn history(
        &self,
        account_number: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Result<Vec<PostingLine>, LedgerError> {
        let state = self.state.read().await;
        if !state.accounts.contains_key(account_number) {
            return Err(LedgerError::AccountNotFound(account_number.to_string()));
        }
        Ok(state
            .postings
            .iter()
            .filter(|line| line.account_number == account_number)
            .filter(|line| from.map(|f| line.posted_at >= f).unwrap_or(true))
            .filter(|line| to.map(|t| line.posted_at <= t).unwrap_or(true))
            .cloned()
            .collect())
    }

    /// Audit check: Σ credits − Σ debits across posting lines equals the
    /// account balance.
    pub async fn verify_account_consistency(
        &self,
        account_number: &str,
    ) -> Result<bool, LedgerError> {
        let state = self.state.read().await;
        let account = state
            .accounts
            .get(account_number)
            .ok_or_else(|| LedgerError::AccountNotFound(account_number.to_string()))?;
        let derived: i64 = state
            .postings
            .iter()
            .filter(|line| line.account_number == account_number)
            .map(|line| line.signed_minor_units())
            .sum();
        Ok(derived == account.balance.minor_units)
    }
}
