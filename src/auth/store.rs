//! Token persistence in the settings file.

use std::path::Path;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use super::OAuthTokens;
use crate::config::{SettingKey, Settings};
use crate::error::Result;

pub const ACCESS_TOKEN_KEY: SettingKey =
    SettingKey::with_legacy("FREEAGENT_ACCESS_TOKEN", "ACCESS_TOKEN");
pub const REFRESH_TOKEN_KEY: SettingKey =
    SettingKey::with_legacy("FREEAGENT_REFRESH_TOKEN", "REFRESH_TOKEN");
pub const EXPIRES_AT_KEY: SettingKey =
    SettingKey::with_legacy("FREEAGENT_EXPIRES_AT", "EXPIRES_AT");

/// Loads and saves the current token pair.
///
/// Every save rewrites the whole settings file before returning, so the
/// in-memory token is never newer than the persisted one. Concurrent
/// processes sharing one file are last-writer-wins.
#[derive(Debug)]
pub struct TokenStore {
    settings: Settings,
}

impl TokenStore {
    pub fn new(settings: Settings) -> Self {
        Self { settings }
    }

    /// Path of the settings file tokens are written to
    pub fn path(&self) -> &Path {
        self.settings.path()
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Current tokens, or `None` when no access token is configured.
    ///
    /// A missing expiry is treated as the epoch, so the token is refreshed
    /// before first use.
    pub fn load(&self) -> Option<OAuthTokens> {
        let access_token = self.settings.pick(ACCESS_TOKEN_KEY)?.to_string();
        let refresh_token = self
            .settings
            .pick(REFRESH_TOKEN_KEY)
            .unwrap_or_default()
            .to_string();
        let expires_at = self
            .settings
            .pick(EXPIRES_AT_KEY)
            .map(parse_expires_at)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        Some(OAuthTokens {
            access_token,
            refresh_token,
            expires_at,
            token_type: "Bearer".to_string(),
        })
    }

    /// Replace the stored tokens and rewrite the settings file.
    ///
    /// The refresh token is only overwritten when the new record carries one.
    pub fn save(&mut self, tokens: &OAuthTokens) -> Result<()> {
        self.settings
            .set(ACCESS_TOKEN_KEY.preferred, &tokens.access_token);
        if !tokens.refresh_token.is_empty() {
            self.settings
                .set(REFRESH_TOKEN_KEY.preferred, &tokens.refresh_token);
        }
        self.settings.set(
            EXPIRES_AT_KEY.preferred,
            &tokens.expires_at.timestamp().to_string(),
        );
        self.settings.persist()?;
        debug!("tokens saved to {:?}", self.settings.path());
        Ok(())
    }
}

/// Parse a persisted expiry (epoch seconds, fractional values accepted).
fn parse_expires_at(raw: &str) -> DateTime<Utc> {
    match raw.trim().parse::<f64>() {
        Ok(secs) if secs.is_finite() => {
            DateTime::from_timestamp(secs.trunc() as i64, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
        }
        _ => {
            warn!("unparsable token expiry {:?}, treating token as expired", raw);
            DateTime::<Utc>::UNIX_EPOCH
        }
    }
}
