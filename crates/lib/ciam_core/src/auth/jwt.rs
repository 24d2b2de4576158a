//! JWT issuance and verification with ED25519 (EdDSA) signatures.
//!
//! Tokens are compact `header.payload.signature` strings, each segment
//! base64url-encoded without padding. The header is fixed to
//! `{"alg":"EdDSA","typ":"JWT"}` and the signature is a pure ED25519 signature
//! over `header.payload`.

use std::fmt;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, Utc};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::role::{Quotas, Role};
use crate::clock::{Clock, SystemClock};
use crate::models::auth::{AuthenticatedUser, Identity};

/// Token issuer (`iss` claim).
pub const ISSUER: &str = "https://ciam.diagramastext.dev";

/// Token audience (`aud` claim).
pub const AUDIENCE: &str = "https://diagramastext.dev";

/// ID token lifetime: 1 hour.
pub const ID_TOKEN_EXPIRY_SECS: i64 = 60 * 60;

/// Access token lifetime: 1 hour.
pub const ACCESS_TOKEN_EXPIRY_SECS: i64 = 60 * 60;

/// Refresh token lifetime: 100 days.
pub const REFRESH_TOKEN_EXPIRY_SECS: i64 = 100 * 24 * 60 * 60;

const ALGORITHM: &str = "EdDSA";
const TOKEN_TYPE: &str = "JWT";
const HEADER_JSON: &[u8] = br#"{"alg":"EdDSA","typ":"JWT"}"#;

/// Token encoding and verification failures.
#[derive(Debug, Error)]
pub enum TokenError {
    #[error("token must have three dot-separated segments")]
    Malformed,

    #[error("token {0} segment is not valid base64url")]
    InvalidEncoding(&'static str),

    #[error("token header is not valid")]
    InvalidHeader,

    #[error("token algorithm {0:?} is not accepted")]
    UnsupportedAlgorithm(String),

    #[error("token signature is not valid")]
    InvalidSignature,

    #[error("token payload cannot be deserialized")]
    InvalidPayload,

    #[error("token claim {0} is not valid")]
    InvalidClaim(&'static str),

    #[error("token has expired")]
    Expired,

    #[error("token quotas are not up to date")]
    StaleQuotas,

    #[error("token cannot be serialized: {0}")]
    Serialization(String),

    #[error("signing key is not valid: {0}")]
    InvalidKey(&'static str),
}

#[derive(Debug, Deserialize)]
struct Header {
    alg: String,
    typ: String,
}

/// Claims shared by every token kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StandardClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
}

impl StandardClaims {
    fn new(sub: &str, validity_secs: i64, now: DateTime<Utc>, options: &[ClaimsOption]) -> Self {
        let iat = now.timestamp();
        let mut claims = Self {
            sub: sub.to_string(),
            iss: ISSUER.to_string(),
            aud: AUDIENCE.to_string(),
            iat,
            exp: iat + validity_secs,
        };
        for option in options {
            option.apply(&mut claims);
        }
        claims
    }

    /// Token validity in seconds.
    pub fn validity_secs(&self) -> i64 {
        self.exp - self.iat
    }

    /// Check the issuer and audience, then expiry against `now`.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), TokenError> {
        if self.iss != ISSUER {
            return Err(TokenError::InvalidClaim("iss"));
        }
        if self.aud != AUDIENCE {
            return Err(TokenError::InvalidClaim("aud"));
        }
        if self.sub.is_empty() {
            return Err(TokenError::InvalidClaim("sub"));
        }
        if self.exp <= self.iat || self.exp < now.timestamp() {
            return Err(TokenError::Expired);
        }
        Ok(())
    }
}

/// Adjustments applied to the standard claims when a token is minted.
///
/// `exp` is always recomputed from `iat`, never set directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimsOption {
    /// Rebase `iat`, keeping the current validity.
    CustomIat(DateTime<Utc>),
    /// Replace the default validity.
    ValidityDuration(Duration),
}

impl ClaimsOption {
    fn apply(&self, claims: &mut StandardClaims) {
        match *self {
            Self::CustomIat(iat) => {
                let validity = claims.validity_secs();
                claims.iat = iat.timestamp();
                claims.exp = claims.iat + validity;
            }
            Self::ValidityDuration(validity) => {
                claims.exp = claims.iat + validity.num_seconds();
            }
        }
    }
}

/// Rebase `iat` while preserving the validity duration.
pub fn with_custom_iat(iat: DateTime<Utc>) -> ClaimsOption {
    ClaimsOption::CustomIat(iat)
}

/// Override the default validity duration.
pub fn with_validity_duration(validity: Duration) -> ClaimsOption {
    ClaimsOption::ValidityDuration(validity)
}

/// Payload of an ID token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdTokenClaims {
    #[serde(flatten)]
    pub std: StandardClaims,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
}

/// Payload of an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    #[serde(flatten)]
    pub std: StandardClaims,
    pub role: Role,
    pub quotas: Quotas,
}

/// Payload of a refresh token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    #[serde(flatten)]
    pub std: StandardClaims,
}

/// Issues and parses ID, access and refresh tokens.
///
/// Holds the private key read-only; safe to share across tasks.
#[derive(Clone)]
pub struct TokenIssuer {
    signing_key: SigningKey,
    verifying_key: VerifyingKey,
    header: String,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer")
            .field("verifying_key", &encode_segment(self.verifying_key.as_bytes()))
            .field("signing_key", &"**redacted**")
            .finish()
    }
}

impl TokenIssuer {
    pub fn new(signing_key: SigningKey) -> Self {
        let verifying_key = signing_key.verifying_key();
        Self {
            signing_key,
            verifying_key,
            header: encode_segment(HEADER_JSON),
            clock: Arc::new(SystemClock),
        }
    }

    /// Build an issuer from raw key bytes, checking the pair belongs together.
    pub fn from_keypair(private_key: &[u8], public_key: &[u8]) -> Result<Self, TokenError> {
        let seed: [u8; 32] = private_key
            .get(..32)
            .and_then(|seed| seed.try_into().ok())
            .ok_or(TokenError::InvalidKey("private key must hold a 32-byte seed"))?;
        let signing_key = SigningKey::from_bytes(&seed);
        if signing_key.verifying_key().as_bytes().as_slice() != public_key {
            return Err(TokenError::InvalidKey("public key does not match private key"));
        }
        Ok(Self::new(signing_key))
    }

    /// Replace the clock used for `iat` and expiry checks.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }

    /// Mint an ID token carrying the user's email and fingerprint.
    pub fn new_id_token(
        &self,
        user_id: &str,
        email: Option<&str>,
        fingerprint: Option<&str>,
        options: &[ClaimsOption],
    ) -> Result<String, TokenError> {
        let claims = IdTokenClaims {
            std: StandardClaims::new(user_id, ID_TOKEN_EXPIRY_SECS, self.clock.now(), options),
            email: email.map(str::to_string),
            fingerprint: fingerprint.map(str::to_string),
        };
        self.sign(&claims)
    }

    /// Mint an access token with the role and its current quota snapshot.
    pub fn new_access_token(
        &self,
        user: &AuthenticatedUser,
        options: &[ClaimsOption],
    ) -> Result<String, TokenError> {
        let claims = AccessTokenClaims {
            std: StandardClaims::new(&user.id, ACCESS_TOKEN_EXPIRY_SECS, self.clock.now(), options),
            role: user.role,
            quotas: user.role.quotas(),
        };
        self.sign(&claims)
    }

    /// Mint a refresh token.
    pub fn new_refresh_token(
        &self,
        user_id: &str,
        options: &[ClaimsOption],
    ) -> Result<String, TokenError> {
        let claims = RefreshTokenClaims {
            std: StandardClaims::new(user_id, REFRESH_TOKEN_EXPIRY_SECS, self.clock.now(), options),
        };
        self.sign(&claims)
    }

    /// Verify an ID token and recover the identity it carries.
    pub fn parse_id_token(&self, token: &str) -> Result<Identity, TokenError> {
        let claims: IdTokenClaims = self.verify(token)?;
        claims.std.validate(self.clock.now())?;
        Ok(Identity {
            user_id: claims.std.sub,
            email: claims.email,
            fingerprint: claims.fingerprint,
        })
    }

    /// Verify a refresh token and return the user id.
    pub fn parse_refresh_token(&self, token: &str) -> Result<String, TokenError> {
        let claims: RefreshTokenClaims = self.verify(token)?;
        claims.std.validate(self.clock.now())?;
        Ok(claims.std.sub)
    }

    /// Verify an access token. Fails with [`TokenError::StaleQuotas`] when the
    /// embedded quota snapshot differs from the role's current quotas.
    pub fn parse_access_token(&self, token: &str) -> Result<AuthenticatedUser, TokenError> {
        let claims: AccessTokenClaims = self.verify(token)?;
        claims.std.validate(self.clock.now())?;
        if claims.quotas != claims.role.quotas() {
            return Err(TokenError::StaleQuotas);
        }
        Ok(AuthenticatedUser::new(claims.std.sub, claims.role))
    }

    fn sign<T: Serialize>(&self, claims: &T) -> Result<String, TokenError> {
        let payload =
            serde_json::to_vec(claims).map_err(|e| TokenError::Serialization(e.to_string()))?;
        let signing_input = format!("{}.{}", self.header, encode_segment(&payload));
        let signature = self.signing_key.sign(signing_input.as_bytes());
        Ok(format!(
            "{signing_input}.{}",
            encode_segment(&signature.to_bytes())
        ))
    }

    fn verify<T: DeserializeOwned>(&self, token: &str) -> Result<T, TokenError> {
        let mut segments = token.split('.');
        let (header, payload, signature) = match (
            segments.next(),
            segments.next(),
            segments.next(),
            segments.next(),
        ) {
            (Some(header), Some(payload), Some(signature), None) => (header, payload, signature),
            // An unsigned (`alg: none`) token has only two segments.
            (Some(header), Some(_), None, None) => {
                let header = decode_header(header)?;
                if header.alg.eq_ignore_ascii_case("none") {
                    return Err(TokenError::UnsupportedAlgorithm(header.alg));
                }
                return Err(TokenError::Malformed);
            }
            _ => return Err(TokenError::Malformed),
        };

        let decoded_header = decode_header(header)?;
        if decoded_header.typ != TOKEN_TYPE {
            return Err(TokenError::InvalidHeader);
        }
        if decoded_header.alg != ALGORITHM {
            return Err(TokenError::UnsupportedAlgorithm(decoded_header.alg));
        }

        let signature_bytes =
            decode_segment(signature).map_err(|_| TokenError::InvalidEncoding("signature"))?;
        let signature =
            Signature::from_slice(&signature_bytes).map_err(|_| TokenError::InvalidSignature)?;
        let signing_input = format!("{header}.{payload}");
        self.verifying_key
            .verify(signing_input.as_bytes(), &signature)
            .map_err(|_| TokenError::InvalidSignature)?;

        let payload_bytes =
            decode_segment(payload).map_err(|_| TokenError::InvalidEncoding("payload"))?;
        serde_json::from_slice(&payload_bytes).map_err(|_| TokenError::InvalidPayload)
    }
}

fn decode_header(segment: &str) -> Result<Header, TokenError> {
    let bytes = decode_segment(segment).map_err(|_| TokenError::InvalidEncoding("header"))?;
    serde_json::from_slice(&bytes).map_err(|_| TokenError::InvalidHeader)
}

fn encode_segment(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

fn decode_segment(segment: &str) -> Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(segment)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;

    const NOW: i64 = 1_700_000_000;

    fn clock() -> Arc<FixedClock> {
        Arc::new(FixedClock::new(DateTime::from_timestamp(NOW, 0).unwrap()))
    }

    fn issuer_with(clock: Arc<FixedClock>) -> TokenIssuer {
        TokenIssuer::new(SigningKey::from_bytes(&[7u8; 32])).with_clock(clock)
    }

    fn issuer() -> TokenIssuer {
        issuer_with(clock())
    }

    fn payload_of(token: &str) -> serde_json::Value {
        let payload = token.split('.').nth(1).unwrap();
        serde_json::from_slice(&decode_segment(payload).unwrap()).unwrap()
    }

    fn flip_signature_byte(token: &str, index: usize) -> String {
        let (signing_input, signature) = token.rsplit_once('.').unwrap();
        let mut bytes = decode_segment(signature).unwrap();
        bytes[index] ^= 0x01;
        format!("{signing_input}.{}", encode_segment(&bytes))
    }

    #[test]
    fn header_is_precomputed_eddsa_jwt() {
        let token = issuer().new_refresh_token("user-1", &[]).unwrap();
        let header = token.split('.').next().unwrap();
        assert_eq!(decode_segment(header).unwrap(), HEADER_JSON);
        assert_eq!(token.split('.').count(), 3);
    }

    #[test]
    fn id_token_round_trip() {
        let issuer = issuer();
        let token = issuer
            .new_id_token(
                "c40bad11-0822-4d84-9f61-44b9a97b0432",
                Some("foo@bar.baz"),
                Some("9468a4a53a2f2fd9ea96db22dc9dd9bb6ce38b71"),
                &[],
            )
            .unwrap();
        let identity = issuer.parse_id_token(&token).unwrap();
        assert_eq!(
            identity,
            Identity {
                user_id: "c40bad11-0822-4d84-9f61-44b9a97b0432".into(),
                email: Some("foo@bar.baz".into()),
                fingerprint: Some("9468a4a53a2f2fd9ea96db22dc9dd9bb6ce38b71".into()),
            }
        );
    }

    #[test]
    fn id_token_omits_absent_fields() {
        let token = issuer().new_id_token("user-1", None, Some("fp"), &[]).unwrap();
        let payload = payload_of(&token);
        assert!(payload.get("email").is_none());
        assert_eq!(payload["fingerprint"], "fp");
        assert_eq!(payload["iss"], ISSUER);
        assert_eq!(payload["aud"], AUDIENCE);
    }

    #[test]
    fn exp_is_iat_plus_default_validity() {
        let issuer = issuer();
        let cases = [
            (issuer.new_id_token("u", None, None, &[]).unwrap(), ID_TOKEN_EXPIRY_SECS),
            (
                issuer
                    .new_access_token(&AuthenticatedUser::new("u", Role::AnonymUser), &[])
                    .unwrap(),
                ACCESS_TOKEN_EXPIRY_SECS,
            ),
            (issuer.new_refresh_token("u", &[]).unwrap(), REFRESH_TOKEN_EXPIRY_SECS),
        ];
        for (token, validity) in cases {
            let payload = payload_of(&token);
            assert_eq!(payload["iat"], NOW);
            assert_eq!(payload["exp"], NOW + validity);
        }
    }

    #[test]
    fn custom_iat_preserves_validity() {
        let iat = DateTime::from_timestamp(NOW - 600, 0).unwrap();
        let token = issuer()
            .new_refresh_token("u", &[with_custom_iat(iat)])
            .unwrap();
        let payload = payload_of(&token);
        assert_eq!(payload["iat"], NOW - 600);
        assert_eq!(payload["exp"], NOW - 600 + REFRESH_TOKEN_EXPIRY_SECS);
    }

    #[test]
    fn validity_override_and_custom_iat_commute() {
        let issuer = issuer();
        let iat = DateTime::from_timestamp(NOW - 120, 0).unwrap();
        let validity = Duration::minutes(10);
        let a = issuer
            .new_id_token("u", None, None, &[with_custom_iat(iat), with_validity_duration(validity)])
            .unwrap();
        let b = issuer
            .new_id_token("u", None, None, &[with_validity_duration(validity), with_custom_iat(iat)])
            .unwrap();
        assert_eq!(payload_of(&a)["exp"], NOW - 120 + 600);
        assert_eq!(payload_of(&a), payload_of(&b));
    }

    #[test]
    fn expired_token_is_rejected() {
        let clock = clock();
        let issuer = issuer_with(clock.clone());
        let token = issuer.new_id_token("u", None, None, &[]).unwrap();
        clock.advance(Duration::seconds(ID_TOKEN_EXPIRY_SECS + 1));
        assert!(matches!(issuer.parse_id_token(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn token_issued_in_the_past_beyond_validity_is_rejected() {
        let issuer = issuer();
        let iat = DateTime::from_timestamp(NOW - REFRESH_TOKEN_EXPIRY_SECS - 1, 0).unwrap();
        let token = issuer.new_refresh_token("u", &[with_custom_iat(iat)]).unwrap();
        assert!(matches!(
            issuer.parse_refresh_token(&token),
            Err(TokenError::Expired)
        ));
    }

    #[test]
    fn zero_validity_is_expired() {
        let issuer = issuer();
        let token = issuer
            .new_id_token("u", None, None, &[with_validity_duration(Duration::zero())])
            .unwrap();
        assert!(matches!(issuer.parse_id_token(&token), Err(TokenError::Expired)));
    }

    #[test]
    fn tampered_signature_fails_every_parser() {
        let issuer = issuer();
        let user = AuthenticatedUser::new("u", Role::RegisteredUser);
        let id = issuer.new_id_token("u", Some("a@b.c"), None, &[]).unwrap();
        let access = issuer.new_access_token(&user, &[]).unwrap();
        let refresh = issuer.new_refresh_token("u", &[]).unwrap();

        for index in [0, 17, 63] {
            assert!(issuer.parse_id_token(&flip_signature_byte(&id, index)).is_err());
            assert!(issuer.parse_access_token(&flip_signature_byte(&access, index)).is_err());
            assert!(issuer.parse_refresh_token(&flip_signature_byte(&refresh, index)).is_err());
        }
    }

    #[test]
    fn token_signed_by_another_key_is_rejected() {
        let other = TokenIssuer::new(SigningKey::from_bytes(&[9u8; 32])).with_clock(clock());
        let token = other.new_refresh_token("u", &[]).unwrap();
        assert!(matches!(
            issuer().parse_refresh_token(&token),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let issuer = issuer();
        let token = issuer.new_refresh_token("user-1", &[]).unwrap();
        let mut parts: Vec<&str> = token.split('.').collect();
        let forged = encode_segment(
            br#"{"sub":"admin","iss":"https://ciam.diagramastext.dev","aud":"https://diagramastext.dev","iat":1700000000,"exp":1900000000}"#,
        );
        parts[1] = &forged;
        assert!(matches!(
            issuer.parse_refresh_token(&parts.join(".")),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn unsigned_token_is_rejected() {
        let header = encode_segment(br#"{"alg":"none","typ":"JWT"}"#);
        let payload = encode_segment(br#"{"sub":"u"}"#);
        let err = issuer()
            .parse_refresh_token(&format!("{header}.{payload}"))
            .unwrap_err();
        assert!(matches!(err, TokenError::UnsupportedAlgorithm(alg) if alg == "none"));
    }

    #[test]
    fn malformed_tokens_fail_with_distinct_errors() {
        let issuer = issuer();
        assert!(matches!(issuer.parse_id_token("abc"), Err(TokenError::Malformed)));
        assert!(matches!(issuer.parse_id_token("a.b.c.d"), Err(TokenError::Malformed)));
        assert!(matches!(
            issuer.parse_id_token("!!.b.c"),
            Err(TokenError::InvalidEncoding("header"))
        ));

        let token = issuer.new_id_token("u", None, None, &[]).unwrap();
        let (signing_input, _) = token.rsplit_once('.').unwrap();
        assert!(matches!(
            issuer.parse_id_token(&format!("{signing_input}.***")),
            Err(TokenError::InvalidEncoding("signature"))
        ));
    }

    #[test]
    fn non_json_payload_is_rejected_after_signature_check() {
        let issuer = issuer();
        let signing_input = format!("{}.{}", issuer.header, encode_segment(b"not json"));
        let signature = issuer.signing_key.sign(signing_input.as_bytes());
        let token = format!("{signing_input}.{}", encode_segment(&signature.to_bytes()));
        assert!(matches!(
            issuer.parse_id_token(&token),
            Err(TokenError::InvalidPayload)
        ));
    }

    #[test]
    fn access_token_round_trip() {
        let issuer = issuer();
        let user = AuthenticatedUser::new("user-1", Role::RegisteredUser);
        let token = issuer.new_access_token(&user, &[]).unwrap();
        assert_eq!(issuer.parse_access_token(&token).unwrap(), user);
        let payload = payload_of(&token);
        assert_eq!(payload["role"], 1);
        assert_eq!(payload["quotas"]["rpd"], 20);
    }

    #[test]
    fn stale_quota_snapshot_is_rejected() {
        let issuer = issuer();
        let claims = AccessTokenClaims {
            std: StandardClaims::new("u", ACCESS_TOKEN_EXPIRY_SECS, issuer.clock.now(), &[]),
            role: Role::RegisteredUser,
            quotas: Quotas {
                prompt_length_max: 300,
                requests_per_minute: 3,
                requests_per_day: 50,
            },
        };
        let token = issuer.sign(&claims).unwrap();
        assert!(matches!(
            issuer.parse_access_token(&token),
            Err(TokenError::StaleQuotas)
        ));
    }

    #[test]
    fn foreign_issuer_claim_is_rejected() {
        let issuer = issuer();
        let mut claims = RefreshTokenClaims {
            std: StandardClaims::new("u", REFRESH_TOKEN_EXPIRY_SECS, issuer.clock.now(), &[]),
        };
        claims.std.iss = "https://evil.example".into();
        let token = issuer.sign(&claims).unwrap();
        assert!(matches!(
            issuer.parse_refresh_token(&token),
            Err(TokenError::InvalidClaim("iss"))
        ));
    }

    #[test]
    fn keypair_must_match() {
        let signing_key = SigningKey::from_bytes(&[3u8; 32]);
        let public = signing_key.verifying_key().to_bytes();
        assert!(TokenIssuer::from_keypair(&signing_key.to_keypair_bytes(), &public).is_ok());

        let other = SigningKey::from_bytes(&[4u8; 32]).verifying_key().to_bytes();
        assert!(matches!(
            TokenIssuer::from_keypair(&signing_key.to_bytes(), &other),
            Err(TokenError::InvalidKey(_))
        ));
        assert!(TokenIssuer::from_keypair(&[0u8; 8], &public).is_err());
    }

    #[test]
    fn debug_output_redacts_signing_key() {
        let rendered = format!("{:?}", issuer());
        assert!(rendered.contains("**redacted**"));
    }
}
