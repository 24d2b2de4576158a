//! One-time sign-in secrets and API key hashing.

use rand::Rng;
use sha2::{Digest, Sha256};

/// Number of hex characters in a one-time secret.
pub const SECRET_LENGTH: usize = 6;

/// How long a one-time secret can be confirmed: 10 minutes.
pub const SECRET_VALIDITY_SECS: i64 = 10 * 60;

const ALPHABET: &[u8] = b"0123456789abcdef";

/// Generate a fresh secret of [`SECRET_LENGTH`] lowercase hex characters.
pub fn generate_one_time_secret() -> String {
    let mut rng = rand::rng();
    (0..SECRET_LENGTH)
        .map(|_| char::from(ALPHABET[rng.random_range(0..ALPHABET.len())]))
        .collect()
}

/// Hex-encoded SHA-256 of an API key, the form in which keys are stored.
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_is_six_lowercase_hex_chars() {
        for _ in 0..100 {
            let secret = generate_one_time_secret();
            assert_eq!(secret.len(), SECRET_LENGTH);
            assert!(
                secret.bytes().all(|b| ALPHABET.contains(&b)),
                "unexpected secret {secret}"
            );
        }
    }

    #[test]
    fn secrets_vary() {
        let secrets: std::collections::HashSet<String> =
            (0..32).map(|_| generate_one_time_secret()).collect();
        assert!(secrets.len() > 1);
    }

    #[test]
    fn api_key_hash_is_hex_sha256() {
        assert_eq!(
            hash_api_key("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }
}
