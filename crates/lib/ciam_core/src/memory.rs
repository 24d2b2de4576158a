//! In-memory implementations of the ports.
//!
//! Used by the server when no database is configured and by tests. Both
//! types can be switched into a failing mode to exercise dependency errors.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock};

use crate::auth::secret::hash_api_key;
use crate::models::auth::{OneTimeSecret, UserLookup, UserRecord};
use crate::ports::{CiamRepository, MailError, RepositoryError, SigninMailer};

#[derive(Debug, Default)]
struct Store {
    users: HashMap<String, UserRecord>,
    secrets: HashMap<String, OneTimeSecret>,
    /// key hash -> (user id, active)
    api_tokens: HashMap<String, (String, bool)>,
    requests: HashMap<String, Vec<DateTime<Utc>>>,
}

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    store: RwLock<Store>,
    failing: AtomicBool,
    failing_activation: AtomicBool,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`RepositoryError::Unavailable`].
    pub fn set_failure(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Make only [`CiamRepository::update_user_set_active`] fail.
    pub fn set_activation_failure(&self, failing: bool) {
        self.failing_activation.store(failing, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), RepositoryError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("in-memory store switched off".into()));
        }
        Ok(())
    }

    pub async fn user_count(&self) -> usize {
        self.store.read().await.users.len()
    }

    pub async fn users(&self) -> Vec<UserRecord> {
        self.store.read().await.users.values().cloned().collect()
    }

    pub async fn insert_user(&self, user: UserRecord) {
        self.store.write().await.users.insert(user.id.clone(), user);
    }

    pub async fn deactivate_user(&self, user_id: &str) {
        if let Some(user) = self.store.write().await.users.get_mut(user_id) {
            user.is_active = false;
        }
    }

    /// Stored secret for a user, regardless of age.
    pub async fn secret_for(&self, user_id: &str) -> Option<OneTimeSecret> {
        self.store.read().await.secrets.get(user_id).cloned()
    }

    /// Register an API key for a user.
    pub async fn insert_api_token(&self, user_id: &str, key: &str, active: bool) {
        self.store
            .write()
            .await
            .api_tokens
            .insert(hash_api_key(key), (user_id.to_string(), active));
    }

    /// Recorded successful-request timestamps for a user.
    pub async fn timestamps(&self, user_id: &str) -> Vec<DateTime<Utc>> {
        self.store
            .read()
            .await
            .requests
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl CiamRepository for InMemoryRepository {
    async fn create_user(&self, user: &UserRecord) -> Result<(), RepositoryError> {
        self.check()?;
        let mut store = self.store.write().await;
        if store.users.contains_key(&user.id) {
            return Err(RepositoryError::Integrity(format!(
                "user {} already exists",
                user.id
            )));
        }
        store.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn read_user(&self, user_id: &str) -> Result<Option<UserRecord>, RepositoryError> {
        self.check()?;
        Ok(self.store.read().await.users.get(user_id).cloned())
    }

    async fn lookup_user_by_email(
        &self,
        email: &str,
    ) -> Result<Option<UserLookup>, RepositoryError> {
        self.check()?;
        let store = self.store.read().await;
        Ok(store
            .users
            .values()
            .find(|u| u.email.as_deref() == Some(email))
            .map(|u| UserLookup {
                id: u.id.clone(),
                is_active: u.is_active,
            }))
    }

    async fn lookup_user_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<UserLookup>, RepositoryError> {
        self.check()?;
        let store = self.store.read().await;
        Ok(store
            .users
            .values()
            .find(|u| !u.role.is_registered_user() && u.fingerprint.as_deref() == Some(fingerprint))
            .map(|u| UserLookup {
                id: u.id.clone(),
                is_active: u.is_active,
            }))
    }

    async fn update_user_set_active(&self, user_id: &str) -> Result<(), RepositoryError> {
        self.check()?;
        if self.failing_activation.load(Ordering::SeqCst) {
            return Err(RepositoryError::Unavailable("user activation switched off".into()));
        }
        match self.store.write().await.users.get_mut(user_id) {
            Some(user) => {
                user.is_active = true;
                Ok(())
            }
            None => Err(RepositoryError::Integrity(format!("user {user_id} not found"))),
        }
    }

    async fn write_one_time_secret(&self, secret: &OneTimeSecret) -> Result<(), RepositoryError> {
        self.check()?;
        self.store
            .write()
            .await
            .secrets
            .insert(secret.user_id.clone(), secret.clone());
        Ok(())
    }

    async fn read_one_time_secret(
        &self,
        user_id: &str,
    ) -> Result<Option<OneTimeSecret>, RepositoryError> {
        self.check()?;
        Ok(self.store.read().await.secrets.get(user_id).cloned())
    }

    async fn delete_one_time_secret(
        &self,
        user_id: &str,
        secret: &str,
    ) -> Result<bool, RepositoryError> {
        self.check()?;
        let mut store = self.store.write().await;
        let matches = store
            .secrets
            .get(user_id)
            .is_some_and(|stored| stored.secret == secret);
        if matches {
            store.secrets.remove(user_id);
        }
        Ok(matches)
    }

    async fn get_daily_successful_results_timestamps(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, RepositoryError> {
        self.check()?;
        let store = self.store.read().await;
        Ok(store
            .requests
            .get(user_id)
            .map(|ts| ts.iter().copied().filter(|t| *t >= since).collect())
            .unwrap_or_default())
    }

    async fn get_active_user_id_by_active_token_id(
        &self,
        token: &str,
    ) -> Result<Option<String>, RepositoryError> {
        self.check()?;
        let store = self.store.read().await;
        Ok(match store.api_tokens.get(&hash_api_key(token)) {
            Some((user_id, true)) if store.users.get(user_id).is_some_and(|u| u.is_active) => {
                Some(user_id.clone())
            }
            _ => None,
        })
    }

    async fn record_successful_request(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError> {
        self.check()?;
        self.store
            .write()
            .await
            .requests
            .entry(user_id.to_string())
            .or_default()
            .push(at);
        Ok(())
    }
}

/// A sign-in email captured by [`RecordingMailer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMail {
    pub recipient: String,
    pub secret: String,
}

/// Mailer that records sends instead of delivering them.
#[derive(Debug, Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<SentMail>>,
    failing: AtomicBool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failure(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub async fn sent(&self) -> Vec<SentMail> {
        self.sent.lock().await.clone()
    }

    pub async fn last_secret_for(&self, recipient: &str) -> Option<String> {
        self.sent
            .lock()
            .await
            .iter()
            .rev()
            .find(|m| m.recipient == recipient)
            .map(|m| m.secret.clone())
    }
}

#[async_trait]
impl SigninMailer for RecordingMailer {
    async fn send_signin_email(&self, recipient: &str, secret: &str) -> Result<(), MailError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(MailError::Delivery("recording mailer switched off".into()));
        }
        self.sent.lock().await.push(SentMail {
            recipient: recipient.to_string(),
            secret: secret.to_string(),
        });
        Ok(())
    }
}
