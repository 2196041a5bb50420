use crate::{IdentityError, Principal, Role};
use chrono::{DateTime, Duration, Utc};
use corebank_events::{event_types, topics, EventEnvelope, Outbox};
use corebank_types::{Clock, SharedClock};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct IdentityConfig {
    pub token_ttl: Duration,
    /// Bad passwords before the account locks.
    pub failed_attempts_lock: u32,
    pub otp_ttl: Duration,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            token_ttl: Duration::hours(8),
            failed_attempts_lock: 5,
            otp_ttl: Duration::minutes(5),
        }
    }
}

/// Issued bearer credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token: String,
    pub subject: String,
    pub roles: Vec<Role>,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct UserAccount {
    subject: String,
    salt: String,
    password_hash: String,
    roles: Vec<Role>,
    failed_login_attempts: u32,
    locked: bool,
}

#[derive(Debug, Clone)]
struct OtpEntry {
    code: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
struct IdentityState {
    users: HashMap<String, UserAccount>,
    tokens: HashMap<String, IssuedToken>,
    /// Revoked token -> original expiry; entries die with the token.
    revoked: HashMap<String, DateTime<Utc>>,
    otps: HashMap<String, OtpEntry>,
}

pub struct IdentityService {
    state: RwLock<IdentityState>,
    outbox: Arc<Outbox>,
    clock: SharedClock,
    config: IdentityConfig,
}

impl IdentityService {
    pub fn new(outbox: Arc<Outbox>, clock: SharedClock, config: IdentityConfig) -> Self {
        Self {
            state: RwLock::new(IdentityState::default()),
            outbox,
            clock,
            config,
        }
    }

    pub async fn register_user(
        &self,
        subject: &str,
        password: &str,
        roles: Vec<Role>,
    ) -> Result<(), IdentityError> {
        if subject.trim().is_empty() {
            return Err(IdentityError::Validation("subject is required".to_string()));
        }
        if password.len() < 8 {
            return Err(IdentityError::Validation(
                "password must be at least 8 characters".to_string(),
            ));
        }

        let mut state = self.state.write().await;
        if state.users.contains_key(subject) {
            return Err(IdentityError::DuplicateUser(subject.to_string()));
        }
        let salt = Uuid::new_v4().to_string();
        state.users.insert(
            subject.to_string(),
            UserAccount {
                subject: subject.to_string(),
                password_hash: hash_password(&salt, password),
                salt,
                roles,
                failed_login_attempts: 0,
                locked: false,
            },
        );
        Ok(())
    }

    /// Authenticate and issue a bearer token. Each bad password counts
    /// toward the lockout; a success resets the counter.
    pub async fn login(&self, subject: &str, password: &str) -> Result<IssuedToken, IdentityError> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let lock_threshold = self.config.failed_attempts_lock;
        let user = state
            .users
            .get_mut(subject)
            .ok_or(IdentityError::InvalidCredentials)?;

        if user.locked {
            return Err(IdentityError::AccountLocked(subject.to_string()));
        }

        if user.password_hash != hash_password(&user.salt, password) {
            user.failed_login_attempts += 1;
            if user.failed_login_attempts >= lock_threshold {
                user.locked = true;
                self.outbox.enqueue(
                    topics::USER_EVENTS,
                    EventEnvelope::new(
                        event_types::USER_LOCKED,
                        subject,
                        serde_json::json!({
                            "subject": subject,
                            "failedAttempts": user.failed_login_attempts,
                        }),
                        now,
                    ),
                );
                tracing::warn!(subject, "account locked after repeated failures");
                return Err(IdentityError::AccountLocked(subject.to_string()));
            }
            return Err(IdentityError::InvalidCredentials);
        }

        user.failed_login_attempts = 0;
        let token = IssuedToken {
            token: Uuid::new_v4().simple().to_string(),
            subject: user.subject.clone(),
            roles: user.roles.clone(),
            issued_at: now,
            expires_at: now + self.config.token_ttl,
        };
        state.tokens.insert(token.token.clone(), token.clone());
        tracing::info!(subject, "login succeeded");
        Ok(token)
    }

    pub async fn verify_token(&self, token: &str) -> Result<Principal, IdentityError> {
        let now = self.clock.now();
        let state = self.state.read().await;
        if state.revoked.contains_key(token) {
            return Err(IdentityError::TokenRevoked);
        }
        let issued = state.tokens.get(token).ok_or(IdentityError::TokenInvalid)?;
        if issued.expires_at <= now {
            return Err(IdentityError::TokenExpired);
        }
        Ok(Principal {
            subject: issued.subject.clone(),
            roles: issued.roles.clone(),
        })
    }

    /// Revoke a token; the entry lives as long as the token would have.
    pub async fn revoke_token(&self, token: &str) -> Result<(), IdentityError> {
        let mut state = self.state.write().await;
        let issued = state.tokens.get(token).ok_or(IdentityError::TokenInvalid)?;
        let expires_at = issued.expires_at;
        state.revoked.insert(token.to_string(), expires_at);
        Ok(())
    }

    /// Drop revocation entries (and tokens) whose lifetime has passed.
    pub async fn purge_expired(&self) {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        state.revoked.retain(|_, expires_at| *expires_at > now);
        state.tokens.retain(|_, token| token.expires_at > now);
        state.otps.retain(|_, otp| otp.expires_at > now);
    }

    /// Admin action; the lock never resets on its own.
    pub async fn unlock_account(&self, subject: &str) -> Result<(), IdentityError> {
        let mut state = self.state.write().await;
        let user = state
            .users
            .get_mut(subject)
            .ok_or(IdentityError::InvalidCredentials)?;
        user.locked = false;
        user.failed_login_attempts = 0;
        tracing::info!(subject, "account unlocked");
        Ok(())
    }

    pub async fn issue_otp(&self, subject: &str) -> Result<String, IdentityError> {
        let now = self.clock.now();
        let code = format!("{:06}", rand::thread_rng().gen_range(0..1_000_000));
        let mut state = self.state.write().await;
        if !state.users.contains_key(subject) {
            return Err(IdentityError::InvalidCredentials);
        }
        state.otps.insert(
            subject.to_string(),
            OtpEntry {
                code: code.clone(),
                expires_at: now + self.config.otp_ttl,
            },
        );
        Ok(code)
    }

    /// A successful verification consumes the code.
    pub async fn verify_otp(&self, subject: &str, code: &str) -> Result<(), IdentityError> {
        let now = self.clock.now();
        let mut state = self.state.write().await;
        let entry = state.otps.get(subject).ok_or(IdentityError::OtpInvalid)?;
        if entry.expires_at <= now || entry.code != code {
            return Err(IdentityError::OtpInvalid);
        }
        state.otps.remove(subject);
        Ok(())
    }
}

fn hash_password(salt: &str, password: &str) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    hasher.finalize().to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use corebank_types::ManualClock;

    fn service() -> (IdentityService, Arc<ManualClock>, Arc<Outbox>) {
        let start = Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::at(start));
        let outbox = Arc::new(Outbox::new());
        (
            IdentityService::new(outbox.clone(), clock.clone(), IdentityConfig::default()),
            clock,
            outbox,
        )
    }

    #[tokio::test]
    async fn login_issues_a_verifiable_token() {
        let (service, _clock, _outbox) = service();
        service
            .register_user("ops-1", "sup3rsecret", vec![Role::Operator])
            .await
            .unwrap();

        let token = service.login("ops-1", "sup3rsecret").await.unwrap();
        let principal = service.verify_token(&token.token).await.unwrap();
        assert_eq!(principal.subject, "ops-1");
        assert!(principal.has_role(Role::Operator));
    }

    #[tokio::test]
    async fn five_bad_passwords_lock_the_account() {
        let (service, _clock, outbox) = service();
        service
            .register_user("ops-1", "sup3rsecret", vec![Role::Operator])
            .await
            .unwrap();

        for _ in 0..4 {
            let err = service.login("ops-1", "wrong").await.unwrap_err();
            assert!(matches!(err, IdentityError::InvalidCredentials));
        }
        let err = service.login("ops-1", "wrong").await.unwrap_err();
        assert!(matches!(err, IdentityError::AccountLocked(_)));
        assert_eq!(outbox.pending(), 1);

        // Correct password no longer helps until an admin unlocks.
        let err = service.login("ops-1", "sup3rsecret").await.unwrap_err();
        assert!(matches!(err, IdentityError::AccountLocked(_)));

        service.unlock_account("ops-1").await.unwrap();
        service.login("ops-1", "sup3rsecret").await.unwrap();
    }

    #[tokio::test]
    async fn success_resets_the_failure_counter() {
        let (service, _clock, _outbox) = service();
        service
            .register_user("ops-1", "sup3rsecret", vec![Role::Operator])
            .await
            .unwrap();

        for _ in 0..4 {
            let _ = service.login("ops-1", "wrong").await;
        }
        service.login("ops-1", "sup3rsecret").await.unwrap();
        // The slate is clean again; four more misses do not lock.
        for _ in 0..4 {
            let err = service.login("ops-1", "wrong").await.unwrap_err();
            assert!(matches!(err, IdentityError::InvalidCredentials));
        }
    }

    #[tokio::test]
    async fn tokens_expire_and_revocation_sticks() {
        let (service, clock, _outbox) = service();
        service
            .register_user("ops-1", "sup3rsecret", vec![Role::Operator])
            .await
            .unwrap();

        let token = service.login("ops-1", "sup3rsecret").await.unwrap();
        service.revoke_token(&token.token).await.unwrap();
        let err = service.verify_token(&token.token).await.unwrap_err();
        assert!(matches!(err, IdentityError::TokenRevoked));

        let second = service.login("ops-1", "sup3rsecret").await.unwrap();
        clock.advance(Duration::hours(9));
        let err = service.verify_token(&second.token).await.unwrap_err();
        assert!(matches!(err, IdentityError::TokenExpired));

        service.purge_expired().await;
        let err = service.verify_token(&second.token).await.unwrap_err();
        assert!(matches!(err, IdentityError::TokenInvalid));
    }

    #[tokio::test]
    async fn otp_expires_and_is_single_use() {
        let (service, clock, _outbox) = service();
        service
            .register_user("cust-1", "longenough", vec![Role::Customer])
            .await
            .unwrap();

        let code = service.issue_otp("cust-1").await.unwrap();
        assert_eq!(code.len(), 6);
        service.verify_otp("cust-1", &code).await.unwrap();
        let err = service.verify_otp("cust-1", &code).await.unwrap_err();
        assert!(matches!(err, IdentityError::OtpInvalid));

        let code = service.issue_otp("cust-1").await.unwrap();
        clock.advance(Duration::minutes(6));
        let err = service.verify_otp("cust-1", &code).await.unwrap_err();
        assert!(matches!(err, IdentityError::OtpInvalid));
    }
}
