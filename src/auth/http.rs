//! Token endpoint client.
//!
//! Both the authorization-code grant and the refresh-token grant post a
//! form-encoded body to the same endpoint with HTTP Basic client
//! authentication. Error detail is only exposed when debug mode is on.

use std::time::Duration;

use chrono::Utc;
use reqwest::header::{CONTENT_TYPE, WWW_AUTHENTICATE};
use tracing::{debug, info};

use super::{OAuthTokens, TokenResponse};
use crate::config::AppConfig;
use crate::error::{Error, Result};

/// Timeout for token endpoint round-trips.
const TOKEN_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Grant parameters for a token request.
#[derive(Debug, Clone)]
enum Grant<'a> {
    AuthorizationCode { code: &'a str, redirect_uri: &'a str },
    RefreshToken { refresh_token: &'a str },
}

impl Grant<'_> {
    fn grant_type(&self) -> &'static str {
        match self {
            Grant::AuthorizationCode { .. } => "authorization_code",
            Grant::RefreshToken { .. } => "refresh_token",
        }
    }

    fn redirect_uri(&self) -> Option<&str> {
        match self {
            Grant::AuthorizationCode { redirect_uri, .. } => Some(*redirect_uri),
            Grant::RefreshToken { .. } => None,
        }
    }

    fn form(&self) -> Vec<(&'static str, &str)> {
        let mut form = vec![("grant_type", self.grant_type())];
        match self {
            Grant::AuthorizationCode { code, redirect_uri } => {
                form.push(("code", *code));
                form.push(("redirect_uri", *redirect_uri));
            }
            Grant::RefreshToken { refresh_token } => {
                form.push(("refresh_token", *refresh_token));
            }
        }
        form
    }
}

/// Client for the OAuth token endpoint.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    client: reqwest::Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    debug: bool,
}

impl TokenEndpoint {
    pub fn new(config: &AppConfig) -> Self {
        Self::with_client(reqwest::Client::new(), config)
    }

    pub fn with_client(client: reqwest::Client, config: &AppConfig) -> Self {
        Self {
            client,
            token_url: config.token_url.clone(),
            client_id: config.oauth_id.clone(),
            client_secret: config.oauth_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            debug: config.debug,
        }
    }

    /// Exchange an authorization code for a token record.
    pub async fn exchange_code(&self, code: &str) -> Result<OAuthTokens> {
        self.request(Grant::AuthorizationCode {
            code,
            redirect_uri: &self.redirect_uri,
        })
        .await
    }

    /// Exchange a refresh token for a new token record.
    pub async fn refresh(&self, refresh_token: &str) -> Result<OAuthTokens> {
        self.request(Grant::RefreshToken { refresh_token }).await
    }

    async fn request(&self, grant: Grant<'_>) -> Result<OAuthTokens> {
        debug!(grant_type = grant.grant_type(), "token request to {}", self.token_url);

        let response = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&grant.form())
            .timeout(TOKEN_REQUEST_TIMEOUT)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let detail = if self.debug {
                let www_authenticate = header_str(&response, WWW_AUTHENTICATE);
                let content_type = header_str(&response, CONTENT_TYPE);
                let body = response.text().await.unwrap_or_default();
                let mut lines = vec![
                    format!(
                        "grant_type={}, redirect_uri={}",
                        grant.grant_type(),
                        grant.redirect_uri().unwrap_or("None")
                    ),
                    format!(
                        "status={} {}",
                        status.as_u16(),
                        status.canonical_reason().unwrap_or("")
                    ),
                ];
                if let Some(value) = www_authenticate {
                    lines.push(format!("www-authenticate: {}", value));
                }
                lines.push(format!(
                    "content-type: {}",
                    content_type.unwrap_or_else(|| "None".to_string())
                ));
                lines.push(format!("body: {}", body));
                lines.join(" | ")
            } else {
                format!("Status {}. Enable --debug for details.", status.as_u16())
            };
            return Err(Error::TokenExchange {
                status: status.as_u16(),
                detail,
            });
        }

        if self.debug {
            debug!(
                "Token request succeeded: status={} content-type={:?}",
                status.as_u16(),
                header_str(&response, CONTENT_TYPE)
            );
        }

        let issued_at = Utc::now();
        let payload: TokenResponse = response.json().await?;
        info!(grant_type = grant.grant_type(), "token exchange succeeded");
        Ok(OAuthTokens::from_response(payload, issued_at))
    }
}

fn header_str(
    response: &reqwest::Response,
    name: reqwest::header::HeaderName,
) -> Option<String> {
    response
        .headers()
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}
