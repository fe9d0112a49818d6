use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::config::ConfigError;

/// Main error type for freeagent-cli operations
#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("No tokens found. Run `freeagent auth` first.")]
    NotAuthenticated,

    #[error("No authorization code received.")]
    NoAuthorizationCode,

    #[error("State mismatch during OAuth flow.")]
    StateMismatch,

    #[error("Timed out after {0:?} waiting for the OAuth callback")]
    CallbackTimeout(Duration),

    #[error("OAuth callback error: {0}")]
    Callback(String),

    #[error("Token request failed. Check credentials and redirect URI. {detail}")]
    TokenExchange { status: u16, detail: String },

    #[error("API error 401: unauthorized after token refresh. Path={path}")]
    Unauthorized { path: String },

    #[error("API error 429: still rate limited after {attempts} retries. Path={path}")]
    RateLimited { path: String, attempts: u32 },

    #[error("API error {status}: {body}. Path={path}, params={params}")]
    Api {
        status: u16,
        body: String,
        path: String,
        params: String,
    },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    /// Convert error to a process exit status (sysexits.h values)
    pub fn exit_code(&self) -> u8 {
        match self {
            Error::Config(_) => 78,
            Error::InvalidArgument(_) | Error::Json(_) => 64,
            Error::NotAuthenticated
            | Error::NoAuthorizationCode
            | Error::StateMismatch
            | Error::TokenExchange { .. }
            | Error::Unauthorized { .. } => 77,
            Error::CallbackTimeout(_) | Error::RateLimited { .. } => 75,
            Error::Callback(_) | Error::Api { .. } | Error::Http(_) => 69,
            Error::Io(_) => 74,
            Error::Yaml(_) => 70,
        }
    }
}

/// Result type alias for freeagent-cli operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_errors_use_config_exit_code() {
        let err = Error::from(ConfigError::MissingKeys {
            keys: vec!["FREEAGENT_OAUTH_ID".to_string()],
            path: ".env".into(),
        });
        assert_eq!(err.exit_code(), 78);
        assert!(err.to_string().contains("FREEAGENT_OAUTH_ID"));
    }

    #[test]
    fn test_api_error_message_includes_request_context() {
        let err = Error::Api {
            status: 404,
            body: "{\"errors\":\"not found\"}".to_string(),
            path: "/invoices/1".to_string(),
            params: "{}".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("404"));
        assert!(msg.contains("/invoices/1"));
        assert!(msg.contains("not found"));
        assert_eq!(err.exit_code(), 69);
    }

    #[test]
    fn test_exhausted_recovery_exit_codes() {
        assert_eq!(Error::Unauthorized { path: "/x".into() }.exit_code(), 77);
        let limited = Error::RateLimited {
            path: "/x".into(),
            attempts: 3,
        };
        assert_eq!(limited.exit_code(), 75);
        assert!(limited.to_string().contains('3'));
    }
}
