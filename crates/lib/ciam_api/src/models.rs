//! Request and response bodies.
//!
//! Request fields default to empty so a missing field is reported as a
//! validation failure rather than a parse failure.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnonymSigninRequest {
    #[serde(default)]
    pub fingerprint: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UserSigninInitRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub fingerprint: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SecretConfirmationRequest {
    #[serde(default)]
    pub id_token: String,
    #[serde(default)]
    pub secret: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RefreshRequest {
    #[serde(default)]
    pub refresh_token: String,
}

/// Error body returned by every failing route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
