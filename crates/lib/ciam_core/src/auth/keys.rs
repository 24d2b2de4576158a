//! ED25519 signing key resolution.
//!
//! Resolution order: `CIAM_PRIVATE_KEY` env var, then a key file persisted
//! under the user data dir, then (only when allowed) a freshly generated key
//! that is written back to that file.

use std::path::{Path, PathBuf};

use base64::Engine;
use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use ed25519_dalek::SigningKey;
use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

/// Env var holding the base64-encoded 32-byte private key seed.
pub const PRIVATE_KEY_ENV: &str = "CIAM_PRIVATE_KEY";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("private key is not valid base64")]
    Encoding,

    #[error("private key must be a 32-byte seed, got {0} bytes")]
    Length(usize),

    #[error("no private key configured; set CIAM_PRIVATE_KEY")]
    Missing,

    #[error("key file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Decode a base64 (standard or url-safe, padded or not) 32-byte seed.
pub fn decode_signing_key(encoded: &str) -> Result<SigningKey, KeyError> {
    let encoded = encoded.trim();
    let bytes = STANDARD
        .decode(encoded)
        .or_else(|_| URL_SAFE_NO_PAD.decode(encoded))
        .or_else(|_| STANDARD_NO_PAD.decode(encoded))
        .map_err(|_| KeyError::Encoding)?;
    let seed: [u8; 32] = bytes
        .as_slice()
        .try_into()
        .map_err(|_| KeyError::Length(bytes.len()))?;
    Ok(SigningKey::from_bytes(&seed))
}

/// Encode a key's seed as standard base64.
pub fn encode_signing_key(key: &SigningKey) -> String {
    STANDARD.encode(key.to_bytes())
}

/// Generate a new random signing key.
pub fn generate_signing_key() -> SigningKey {
    let mut seed = [0u8; 32];
    rand::rng().fill(&mut seed);
    SigningKey::from_bytes(&seed)
}

/// Resolve the signing key from the environment or the persisted key file.
///
/// With `allow_generate` unset a missing key is an error.
pub fn resolve_signing_key(allow_generate: bool) -> Result<SigningKey, KeyError> {
    let env_value = std::env::var(PRIVATE_KEY_ENV).ok();
    resolve_signing_key_at(&signing_key_path(), env_value.as_deref(), allow_generate)
}

/// [`resolve_signing_key`] with an explicit key file path and env value.
pub fn resolve_signing_key_at(
    path: &Path,
    env_value: Option<&str>,
    allow_generate: bool,
) -> Result<SigningKey, KeyError> {
    if let Some(encoded) = env_value
        && !encoded.trim().is_empty()
    {
        return decode_signing_key(encoded);
    }

    match std::fs::read_to_string(path) {
        Ok(existing) if !existing.trim().is_empty() => return decode_signing_key(&existing),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(KeyError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    }

    if !allow_generate {
        return Err(KeyError::Missing);
    }

    let key = generate_signing_key();
    persist_key(path, &key)?;
    warn!(path = %path.display(), "generated new signing key; tokens will not survive a key change");
    info!(path = %path.display(), "persisted signing key");
    Ok(key)
}

fn persist_key(path: &Path, key: &SigningKey) -> Result<(), KeyError> {
    let io_err = |source| KeyError::Io {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(io_err)?;
    }
    std::fs::write(path, encode_signing_key(key)).map_err(io_err)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).map_err(io_err)?;
    }
    Ok(())
}

/// Path to the persisted signing key file.
fn signing_key_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("diagramastext")
        .join("ciam-ed25519.key")
}
