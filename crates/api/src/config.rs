//! API server configuration, loaded from the environment

use narra_billing::gateway::MIDTRANS_SANDBOX_BASE_URL;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, String),
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP server binds to
    pub bind_address: String,
    /// Postgres connection string
    pub database_url: String,
    /// Pool size for the API
    pub max_connections: u32,
    /// Secret for verifying bearer tokens
    pub jwt_secret: String,
    /// Midtrans server key (also used for webhook signatures)
    pub midtrans_server_key: String,
    /// Midtrans client key, exposed to the frontend for Snap
    pub midtrans_client_key: String,
    /// Midtrans base URL; sandbox by default
    pub midtrans_base_url: String,
    /// Gemini API key for the generation endpoint
    pub gemini_api_key: String,
    /// Gemini base URL, overridable for tests
    pub gemini_base_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let max_connections = match std::env::var("DATABASE_MAX_CONNECTIONS") {
            Ok(v) => v
                .parse()
                .map_err(|_| ConfigError::Invalid("DATABASE_MAX_CONNECTIONS", v))?,
            Err(_) => 10,
        };

        Ok(Self {
            bind_address: std::env::var("BIND_ADDRESS")
                .unwrap_or_else(|_| "0.0.0.0:8080".to_string()),
            database_url: std::env::var("DATABASE_URL")
                .map_err(|_| ConfigError::Missing("DATABASE_URL"))?,
            max_connections,
            jwt_secret: std::env::var("JWT_SECRET")
                .map_err(|_| ConfigError::Missing("JWT_SECRET"))?,
            midtrans_server_key: std::env::var("MIDTRANS_SERVER_KEY")
                .map_err(|_| ConfigError::Missing("MIDTRANS_SERVER_KEY"))?,
            midtrans_client_key: std::env::var("MIDTRANS_CLIENT_KEY")
                .map_err(|_| ConfigError::Missing("MIDTRANS_CLIENT_KEY"))?,
            midtrans_base_url: std::env::var("MIDTRANS_BASE_URL")
                .unwrap_or_else(|_| MIDTRANS_SANDBOX_BASE_URL.to_string()),
            gemini_api_key: std::env::var("GEMINI_API_KEY")
                .map_err(|_| ConfigError::Missing("GEMINI_API_KEY"))?,
            gemini_base_url: std::env::var("GEMINI_BASE_URL").unwrap_or_else(|_| {
                "https://generativelanguage.googleapis.com".to_string()
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::expect_used)]

    use super::*;

    #[test]
    fn test_missing_database_url_is_reported() {
        // Touch only variables this test owns to stay parallel-safe
        std::env::remove_var("DATABASE_URL");
        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("DATABASE_URL")));
    }
}
