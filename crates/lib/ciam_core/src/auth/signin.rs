//! Sign-in flows: anonymous sign-in, email sign-in with one-time secret
//! confirmation, token refresh, request authentication and quota admission.
//!
//! Every method that touches the repository or the mailer takes a
//! [`CancellationToken`]. When it fires, the in-flight call is dropped and the
//! method returns [`CiamError::Canceled`].

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::CiamError;
use super::jwt::{TokenIssuer, with_custom_iat, with_validity_duration};
use super::quota::{QuotaUsage, QuotaWindows, check_admission, quota_usage};
use super::role::Role;
use super::secret::{SECRET_VALIDITY_SECS, generate_one_time_secret};
use super::validation::{is_valid_email, is_valid_fingerprint};
use crate::clock::Clock;
use crate::models::auth::{AuthenticatedUser, OneTimeSecret, TokenSet, UserRecord};
use crate::ports::{CiamRepository, SigninMailer};
use crate::uuid::new_user_id;

pub struct SigninService {
    repository: Arc<dyn CiamRepository>,
    mailer: Arc<dyn SigninMailer>,
    issuer: TokenIssuer,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for SigninService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigninService")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

/// Run `op` unless `cancel` fires first.
async fn guard<T, E, F>(cancel: &CancellationToken, op: F) -> Result<T, CiamError>
where
    F: Future<Output = Result<T, E>>,
    CiamError: From<E>,
{
    tokio::select! {
        biased;
        () = cancel.cancelled() => Err(CiamError::Canceled),
        result = op => result.map_err(CiamError::from),
    }
}

impl SigninService {
    /// The service reads time from the issuer's clock.
    pub fn new(
        repository: Arc<dyn CiamRepository>,
        mailer: Arc<dyn SigninMailer>,
        issuer: TokenIssuer,
    ) -> Self {
        let clock = Arc::clone(issuer.clock());
        Self {
            repository,
            mailer,
            issuer,
            clock,
        }
    }

    pub fn issuer(&self) -> &TokenIssuer {
        &self.issuer
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    // -----------------------------------------------------------------------
    // Sign-in flows
    // -----------------------------------------------------------------------

    /// Sign in by browser fingerprint, creating an anonymous user on first
    /// contact. Repeated calls with the same fingerprint resolve to the same
    /// user.
    pub async fn signin_anonym(
        &self,
        cancel: &CancellationToken,
        fingerprint: &str,
    ) -> Result<TokenSet, CiamError> {
        if !is_valid_fingerprint(fingerprint) {
            return Err(CiamError::Validation("invalid fingerprint".into()));
        }

        let user_id = match guard(cancel, self.repository.lookup_user_by_fingerprint(fingerprint))
            .await?
        {
            Some(found) if !found.is_active => return Err(CiamError::UserDeactivated(found.id)),
            Some(found) => found.id,
            None => {
                let user = UserRecord {
                    id: new_user_id(),
                    email: None,
                    fingerprint: Some(fingerprint.to_string()),
                    is_active: true,
                    role: Role::AnonymUser,
                };
                guard(cancel, self.repository.create_user(&user)).await?;
                info!(user_id = %user.id, "created anonymous user");
                user.id
            }
        };

        self.issue_tokens(
            &AuthenticatedUser::new(user_id, Role::AnonymUser),
            None,
            Some(fingerprint),
        )
    }

    /// Start email sign-in. Returns a short-lived ID token to be exchanged
    /// together with the emailed secret at confirmation.
    ///
    /// An inactive user is refused. For an active user with a live secret, no
    /// new email is sent and the returned token expires together with that
    /// secret.
    pub async fn signin_user_init(
        &self,
        cancel: &CancellationToken,
        email: &str,
        fingerprint: Option<&str>,
    ) -> Result<String, CiamError> {
        if !is_valid_email(email) {
            return Err(CiamError::Validation("invalid email".into()));
        }
        if let Some(fp) = fingerprint
            && !is_valid_fingerprint(fp)
        {
            return Err(CiamError::Validation("invalid fingerprint".into()));
        }

        let user_id = match guard(cancel, self.repository.lookup_user_by_email(email)).await? {
            None => {
                let user = UserRecord {
                    id: new_user_id(),
                    email: Some(email.to_string()),
                    fingerprint: fingerprint.map(str::to_string),
                    is_active: false,
                    role: Role::RegisteredUser,
                };
                guard(cancel, self.repository.create_user(&user)).await?;
                info!(user_id = %user.id, "created user pending email confirmation");
                user.id
            }
            Some(found) if !found.is_active => return Err(CiamError::UserDeactivated(found.id)),
            Some(found) => {
                let pending = guard(cancel, self.repository.read_one_time_secret(&found.id)).await?;
                if let Some(secret) = pending.filter(|s| s.is_live_at(self.now())) {
                    debug!(user_id = %found.id, "secret still live, reissuing id token");
                    return self.pending_id_token(&found.id, email, fingerprint, secret.issued_at);
                }
                found.id
            }
        };

        let secret = OneTimeSecret {
            user_id: user_id.clone(),
            secret: generate_one_time_secret(),
            issued_at: self.now(),
        };
        guard(cancel, self.repository.write_one_time_secret(&secret)).await?;
        guard(cancel, self.mailer.send_signin_email(email, &secret.secret)).await?;
        info!(user_id = %user_id, "sent sign-in secret");

        self.pending_id_token(&user_id, email, fingerprint, secret.issued_at)
    }

    fn pending_id_token(
        &self,
        user_id: &str,
        email: &str,
        fingerprint: Option<&str>,
        issued_at: DateTime<Utc>,
    ) -> Result<String, CiamError> {
        Ok(self.issuer.new_id_token(
            user_id,
            Some(email),
            fingerprint,
            &[
                with_custom_iat(issued_at),
                with_validity_duration(Duration::seconds(SECRET_VALIDITY_SECS)),
            ],
        )?)
    }

    /// Exchange the ID token from [`Self::signin_user_init`] and the emailed
    /// secret for a full token set. The secret can be used once.
    pub async fn confirm_secret(
        &self,
        cancel: &CancellationToken,
        id_token: &str,
        secret: &str,
    ) -> Result<TokenSet, CiamError> {
        let identity = self.issuer.parse_id_token(id_token)?;

        let stored = guard(cancel, self.repository.read_one_time_secret(&identity.user_id))
            .await?
            .filter(|s| s.is_live_at(self.now()))
            .ok_or(CiamError::NoSecretPending)?;
        if stored.secret != secret {
            warn!(user_id = %identity.user_id, "secret mismatch");
            return Err(CiamError::SecretMismatch);
        }

        // Activation goes first so a failure leaves the secret in place for a
        // retry. The delete is the single-use gate.
        guard(cancel, self.repository.update_user_set_active(&identity.user_id)).await?;
        if !guard(
            cancel,
            self.repository
                .delete_one_time_secret(&identity.user_id, secret),
        )
        .await?
        {
            return Err(CiamError::NoSecretPending);
        }
        info!(user_id = %identity.user_id, "email confirmed");

        self.issue_tokens(
            &AuthenticatedUser::new(identity.user_id, Role::RegisteredUser),
            identity.email.as_deref(),
            identity.fingerprint.as_deref(),
        )
    }

    /// Issue fresh ID and access tokens for the owner of a refresh token.
    /// The refresh token itself is not rotated.
    pub async fn refresh_tokens(
        &self,
        cancel: &CancellationToken,
        refresh_token: &str,
    ) -> Result<TokenSet, CiamError> {
        let user_id = self.issuer.parse_refresh_token(refresh_token)?;
        let user = guard(cancel, self.repository.read_user(&user_id))
            .await?
            .ok_or_else(|| CiamError::UserNotFound(user_id.clone()))?;
        if !user.is_active {
            return Err(CiamError::UserDeactivated(user_id));
        }
        if user.email.as_deref().is_some_and(|e| !e.is_empty()) && !user.role.is_registered_user()
        {
            return Err(CiamError::EmailNotVerified);
        }

        let mut tokens = self.issue_tokens(
            &AuthenticatedUser::new(user.id, user.role),
            user.email.as_deref(),
            user.fingerprint.as_deref(),
        )?;
        tokens.refresh = None;
        Ok(tokens)
    }

    /// Mint ID, access and refresh tokens sharing one `iat`.
    pub fn issue_tokens(
        &self,
        user: &AuthenticatedUser,
        email: Option<&str>,
        fingerprint: Option<&str>,
    ) -> Result<TokenSet, CiamError> {
        let iat = [with_custom_iat(self.now())];
        Ok(TokenSet {
            id: self.issuer.new_id_token(&user.id, email, fingerprint, &iat)?,
            access: Some(self.issuer.new_access_token(user, &iat)?),
            refresh: Some(self.issuer.new_refresh_token(&user.id, &iat)?),
        })
    }

    // -----------------------------------------------------------------------
    // Request authentication
    // -----------------------------------------------------------------------

    /// Resolve a bearer access token.
    pub fn authenticate_access_token(&self, token: &str) -> Result<AuthenticatedUser, CiamError> {
        Ok(self.issuer.parse_access_token(token)?)
    }

    /// Resolve a static API key. Both the key and its owner must be active.
    pub async fn authenticate_api_key(
        &self,
        cancel: &CancellationToken,
        key: &str,
    ) -> Result<AuthenticatedUser, CiamError> {
        let user_id = guard(
            cancel,
            self.repository.get_active_user_id_by_active_token_id(key),
        )
        .await?
        .ok_or(CiamError::ApiKeyNotFound)?;
        let user = guard(cancel, self.repository.read_user(&user_id))
            .await?
            .filter(|u| u.is_active)
            .ok_or(CiamError::ApiKeyNotFound)?;
        Ok(AuthenticatedUser {
            id: user.id,
            role: user.role,
            api_key: Some(key.to_string()),
        })
    }

    // -----------------------------------------------------------------------
    // Quotas
    // -----------------------------------------------------------------------

    /// Current quota usage of a user.
    pub async fn quota_usage(
        &self,
        cancel: &CancellationToken,
        user: &AuthenticatedUser,
    ) -> Result<QuotaUsage, CiamError> {
        let now = self.now();
        let since = QuotaWindows::at(now).day_start;
        let timestamps = guard(
            cancel,
            self.repository
                .get_daily_successful_results_timestamps(&user.id, since),
        )
        .await?;
        Ok(quota_usage(user.role, &timestamps, now))
    }

    /// Admit a quota-gated request, returning the usage it was admitted under.
    pub async fn admit(
        &self,
        cancel: &CancellationToken,
        user: &AuthenticatedUser,
    ) -> Result<QuotaUsage, CiamError> {
        let usage = self.quota_usage(cancel, user).await?;
        if let Err(e) = check_admission(&usage) {
            debug!(user_id = %user.id, error = %e, "request not admitted");
            return Err(e);
        }
        Ok(usage)
    }

    /// Count a successful quota-gated request against the user's quota.
    pub async fn record_successful_request(
        &self,
        cancel: &CancellationToken,
        user: &AuthenticatedUser,
    ) -> Result<(), CiamError> {
        guard(
            cancel,
            self.repository
                .record_successful_request(&user.id, self.now()),
        )
        .await
    }
}
