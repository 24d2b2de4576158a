//! API configuration.

use ciam_core::mail::DEFAULT_SENDER;

/// Configuration for the CIAM HTTP edge.
#[derive(Clone, Debug)]
pub struct ApiConfig {
    /// Address to bind the HTTP listener (e.g. "127.0.0.1:9000").
    pub bind_addr: String,
    /// PostgreSQL connection URL. `None` selects the in-memory store.
    pub database_url: Option<String>,
    /// Deployment environment name; `dev*` enables development fallbacks.
    pub env: String,
    /// `From` address of sign-in emails.
    pub sender_email: String,
    /// Allowed CORS origin. `None` allows any origin.
    pub cors_allowed_origin: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9000".into(),
            database_url: None,
            env: String::new(),
            sender_email: DEFAULT_SENDER.into(),
            cors_allowed_origin: None,
        }
    }
}

impl ApiConfig {
    /// Reads configuration from environment variables with sensible defaults.
    ///
    /// | Variable                  | Default                      |
    /// |---------------------------|------------------------------|
    /// | `BIND_ADDR`               | `127.0.0.1:9000`             |
    /// | `DATABASE_URL`            | unset (in-memory store)      |
    /// | `ENV`                     | empty (production rules)     |
    /// | `CIAM_SMTP_SENDER_EMAIL`  | `support@diagramastext.dev`  |
    /// | `CORS_ALLOWED_ORIGIN`     | any origin                   |
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let defaults = Self::default();
        Self {
            bind_addr: non_empty("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: non_empty("DATABASE_URL"),
            env: non_empty("ENV").unwrap_or(defaults.env),
            sender_email: non_empty("CIAM_SMTP_SENDER_EMAIL").unwrap_or(defaults.sender_email),
            cors_allowed_origin: non_empty("CORS_ALLOWED_ORIGIN").filter(|v| v != "*"),
        }
    }

    /// Development deployments may fall back to a generated signing key.
    pub fn is_dev(&self) -> bool {
        self.env.to_ascii_lowercase().starts_with("dev")
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn config_from(vars: &[(&str, &str)]) -> ApiConfig {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ApiConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let config = config_from(&[]);
        assert_eq!(config.bind_addr, "127.0.0.1:9000");
        assert_eq!(config.database_url, None);
        assert_eq!(config.sender_email, "support@diagramastext.dev");
        assert!(!config.is_dev());
        assert_eq!(config.cors_allowed_origin, None);
    }

    #[test]
    fn overrides() {
        let config = config_from(&[
            ("BIND_ADDR", "0.0.0.0:8080"),
            ("DATABASE_URL", "postgres://db/ciam"),
            ("ENV", "Development"),
            ("CORS_ALLOWED_ORIGIN", "https://diagramastext.dev"),
        ]);
        assert_eq!(config.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.database_url.as_deref(), Some("postgres://db/ciam"));
        assert!(config.is_dev());
        assert_eq!(
            config.cors_allowed_origin.as_deref(),
            Some("https://diagramastext.dev")
        );
    }

    #[test]
    fn blank_and_wildcard_values_fall_back() {
        let config = config_from(&[("DATABASE_URL", "  "), ("CORS_ALLOWED_ORIGIN", "*")]);
        assert_eq!(config.database_url, None);
        assert_eq!(config.cors_allowed_origin, None);
    }
}
