//! OAuth2 token lifecycle for the FreeAgent API
//!
//! This module covers everything between the settings file and a usable
//! bearer token:
//! - Token records and their expiry rule
//! - The persisted token store
//! - The token endpoint client (authorization-code and refresh grants)
//! - The interactive authorization-code flow and its loopback listener

pub mod callback;
pub mod flow;
pub mod http;
pub mod store;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Deserialize;

pub use callback::{CallbackListener, CallbackParams};
pub use flow::{AuthorizationFlow, BrowserLaunch};
pub use http::TokenEndpoint;
pub use store::TokenStore;

/// Seconds subtracted from `expires_in` so a token is treated as expired
/// slightly before the server invalidates it.
pub const EXPIRY_BUFFER_SECS: i64 = 30;

/// Response structure from the token endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Token lifetime in seconds from issue
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub token_type: Option<String>,
}

/// Access/refresh token pair with its buffered expiry.
///
/// Records are only ever replaced wholesale after an exchange; fields are
/// never edited in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthTokens {
    pub access_token: String,
    /// Empty when the server did not issue one
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub token_type: String,
}

impl OAuthTokens {
    /// Build a token record from a token endpoint response issued at `issued_at`.
    ///
    /// `expires_at = issued_at + expires_in - 30s`, at whole-second precision.
    /// A lifetime past the representable range saturates: far in the future
    /// when positive, already expired when negative.
    pub fn from_response(response: TokenResponse, issued_at: DateTime<Utc>) -> Self {
        let issued = DateTime::from_timestamp(issued_at.timestamp(), 0).unwrap_or(issued_at);
        let lifetime = response
            .expires_in
            .unwrap_or(0)
            .saturating_sub(EXPIRY_BUFFER_SECS);
        let expires_at = TimeDelta::try_seconds(lifetime)
            .and_then(|delta| issued.checked_add_signed(delta))
            .unwrap_or(if lifetime > 0 {
                DateTime::<Utc>::MAX_UTC
            } else {
                issued
            });

        Self {
            access_token: response.access_token,
            refresh_token: response.refresh_token.unwrap_or_default(),
            expires_at,
            token_type: response
                .token_type
                .unwrap_or_else(|| "Bearer".to_string()),
        }
    }

    /// Whether the token should no longer be used at `now`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    /// Value for the `Authorization` header
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}
