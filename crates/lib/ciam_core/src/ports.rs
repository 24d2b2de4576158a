//! Capabilities the sign-in flows depend on: persistence and mail delivery.
//!
//! Implementations: [`crate::auth::queries::PgCiamRepository`] and
//! [`crate::memory::InMemoryRepository`] for storage,
//! [`crate::mail::LogMailer`] and [`crate::memory::RecordingMailer`] for mail.
//! Callers bound every call with a cancellation token and drop the future on
//! cancellation, so implementations must be cancel-safe.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::auth::{OneTimeSecret, UserLookup, UserRecord};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),

    #[error("inconsistent record: {0}")]
    Integrity(String),

    #[error("repository unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum MailError {
    #[error("cannot compose message: {0}")]
    Compose(String),

    #[error("delivery failed: {0}")]
    Delivery(String),
}

/// Persistence of users, one-time secrets, API tokens and request history.
#[async_trait]
pub trait CiamRepository: Send + Sync {
    /// Insert a new user. Fails if the id is taken.
    async fn create_user(&self, user: &UserRecord) -> Result<(), RepositoryError>;

    async fn read_user(&self, user_id: &str) -> Result<Option<UserRecord>, RepositoryError>;

    async fn lookup_user_by_email(&self, email: &str)
    -> Result<Option<UserLookup>, RepositoryError>;

    /// Only anonymous users are matched by fingerprint.
    async fn lookup_user_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<UserLookup>, RepositoryError>;

    /// Mark a user active.
    async fn update_user_set_active(&self, user_id: &str) -> Result<(), RepositoryError>;

    /// Store a secret, replacing any previous one for the same user.
    async fn write_one_time_secret(&self, secret: &OneTimeSecret) -> Result<(), RepositoryError>;

    async fn read_one_time_secret(
        &self,
        user_id: &str,
    ) -> Result<Option<OneTimeSecret>, RepositoryError>;

    /// Delete the user's secret if it still equals `secret`. Returns whether a
    /// row was removed; at most one concurrent caller observes `true`.
    async fn delete_one_time_secret(
        &self,
        user_id: &str,
        secret: &str,
    ) -> Result<bool, RepositoryError>;

    /// Timestamps of the user's successful requests at or after `since`,
    /// the start of the current UTC day.
    async fn get_daily_successful_results_timestamps(
        &self,
        user_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, RepositoryError>;

    /// Resolve an API key to its owner, when both key and owner are active.
    async fn get_active_user_id_by_active_token_id(
        &self,
        token: &str,
    ) -> Result<Option<String>, RepositoryError>;

    /// Append a successful request to the user's history.
    async fn record_successful_request(
        &self,
        user_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), RepositoryError>;
}

/// Delivery of one-time secrets.
#[async_trait]
pub trait SigninMailer: Send + Sync {
    async fn send_signin_email(&self, recipient: &str, secret: &str) -> Result<(), MailError>;
}
