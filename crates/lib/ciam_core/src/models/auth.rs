//! Identity domain models.
//!
//! These are the records exchanged with the repository port and the values
//! handed back to the edge layer. Wire-specific request shapes live in
//! `ciam_api`.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::auth::role::Role;
use crate::auth::secret::SECRET_VALIDITY_SECS;

/// Stored user record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: String,
    pub email: Option<String>,
    pub fingerprint: Option<String>,
    pub is_active: bool,
    pub role: Role,
}

/// Result of looking a user up by email or fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserLookup {
    pub id: String,
    pub is_active: bool,
}

/// One-time sign-in secret awaiting confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OneTimeSecret {
    pub user_id: String,
    /// Six lowercase hex characters.
    pub secret: String,
    pub issued_at: DateTime<Utc>,
}

impl OneTimeSecret {
    /// Instant after which the secret counts as absent.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.issued_at + Duration::seconds(SECRET_VALIDITY_SECS)
    }

    /// Whether the secret is still within its confirmation window at `now`.
    pub fn is_live_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at() > now
    }
}

/// A user resolved from an access token or an API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub id: String,
    pub role: Role,
    /// Set when the user authenticated with a static API key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl AuthenticatedUser {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
            api_key: None,
        }
    }
}

/// Identity recovered from a valid ID token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: String,
    pub email: Option<String>,
    pub fingerprint: Option<String>,
}

/// Tokens returned by the sign-in flows.
///
/// Serialized as `{"id": .., "access": .., "refresh": ..}` with absent
/// members omitted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenSet {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh: Option<String>,
}
