//! Identity and access management.
//!
//! Token issuance and verification, quota accounting, one-time secrets and
//! the sign-in flows shared by `ciam_api` and `ciam_api_server`.

pub mod jwt;
pub mod keys;
pub mod queries;
pub mod quota;
pub mod role;
pub mod secret;
pub mod signin;
pub mod validation;

use thiserror::Error;

use self::jwt::TokenError;
use crate::ports::{MailError, RepositoryError};

/// Coarse failure classes used by the edge layer to pick a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Auth,
    State,
    NotFound,
    RateLimit,
    Dependency,
    Canceled,
}

/// Sign-in and access errors.
#[derive(Debug, Error)]
pub enum CiamError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error(transparent)]
    Token(#[from] TokenError),

    #[error("secret is wrong")]
    SecretMismatch,

    #[error("no secret pending confirmation")]
    NoSecretPending,

    #[error("user {0} was deactivated")]
    UserDeactivated(String),

    #[error("email is not verified")]
    EmailNotVerified,

    #[error("user {0} not found")]
    UserNotFound(String),

    #[error("api key not found")]
    ApiKeyNotFound,

    #[error("daily quota exceeded")]
    DailyQuotaExceeded,

    #[error("throttling quota exceeded")]
    ThrottlingQuotaExceeded,

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("mail error: {0}")]
    Mail(#[from] MailError),

    #[error("operation canceled")]
    Canceled,
}

impl CiamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation(_) => ErrorKind::Validation,
            Self::Token(_) | Self::SecretMismatch | Self::NoSecretPending | Self::ApiKeyNotFound => {
                ErrorKind::Auth
            }
            Self::UserDeactivated(_) | Self::EmailNotVerified => ErrorKind::State,
            Self::UserNotFound(_) => ErrorKind::NotFound,
            Self::DailyQuotaExceeded | Self::ThrottlingQuotaExceeded => ErrorKind::RateLimit,
            Self::Repository(_) | Self::Mail(_) => ErrorKind::Dependency,
            Self::Canceled => ErrorKind::Canceled,
        }
    }
}
