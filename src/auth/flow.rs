//! Interactive authorization-code flow.
//!
//! `Start -> AwaitingCallback -> Exchanging -> Done | Failed`. There are no
//! retries: any failure ends the flow and the user starts again.

use std::time::Duration;

use tracing::{debug, warn};
use url::Url;
use uuid::Uuid;

use super::{CallbackListener, CallbackParams, OAuthTokens, TokenEndpoint, TokenStore};
use crate::config::AppConfig;
use crate::error::{Error, Result};

/// How the authorization URL is handed to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserLaunch {
    /// Open the system browser, printing the URL if that fails
    Open,
    /// Only print the URL
    Print,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FlowState {
    Start,
    AwaitingCallback,
    Exchanging,
    Done,
    Failed,
}

/// One run of the authorization-code grant.
pub struct AuthorizationFlow<'a> {
    config: &'a AppConfig,
    endpoint: TokenEndpoint,
    state_token: String,
    state: FlowState,
}

impl<'a> AuthorizationFlow<'a> {
    /// Start a flow with a fresh random anti-forgery state token.
    pub fn new(config: &'a AppConfig) -> Self {
        Self::with_state_token(config, Uuid::new_v4().simple().to_string())
    }

    pub fn with_state_token(config: &'a AppConfig, state_token: impl Into<String>) -> Self {
        Self {
            config,
            endpoint: TokenEndpoint::new(config),
            state_token: state_token.into(),
            state: FlowState::Start,
        }
    }

    pub fn state_token(&self) -> &str {
        &self.state_token
    }

    /// Authorization URL carrying client id, redirect URI, scope and state.
    pub fn authorization_url(&self) -> Result<Url> {
        Url::parse_with_params(
            &self.config.auth_url,
            &[
                ("response_type", "code"),
                ("client_id", self.config.oauth_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", self.config.scope.as_str()),
                ("state", self.state_token.as_str()),
            ],
        )
        .map_err(|e| Error::InvalidArgument(format!("invalid authorization URL: {}", e)))
    }

    /// Run the flow to completion and persist the resulting tokens.
    pub async fn run(
        mut self,
        listener: CallbackListener,
        launch: BrowserLaunch,
        timeout: Option<Duration>,
        store: &mut TokenStore,
    ) -> Result<OAuthTokens> {
        let result = self.drive(listener, launch, timeout, store).await;
        if result.is_err() {
            self.transition(FlowState::Failed);
        }
        result
    }

    async fn drive(
        &mut self,
        listener: CallbackListener,
        launch: BrowserLaunch,
        timeout: Option<Duration>,
        store: &mut TokenStore,
    ) -> Result<OAuthTokens> {
        let auth_url = self.authorization_url()?;
        present_url(&auth_url, launch);
        println!(
            "Listening on http://{} for the callback...",
            listener.local_addr()
        );

        self.transition(FlowState::AwaitingCallback);
        let params = listener.wait(timeout).await?;
        let code = self.validate_callback(params)?;

        self.transition(FlowState::Exchanging);
        let tokens = self.endpoint.exchange_code(&code).await?;
        store.save(&tokens)?;

        self.transition(FlowState::Done);
        Ok(tokens)
    }

    /// Check the callback against the state token sent out; returns the code.
    ///
    /// A callback without a state is accepted; one with a different state is not.
    pub fn validate_callback(&self, params: CallbackParams) -> Result<String> {
        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or(Error::NoAuthorizationCode)?;
        match params.state {
            Some(returned) if !returned.is_empty() && returned != self.state_token => {
                Err(Error::StateMismatch)
            }
            _ => Ok(code),
        }
    }

    fn transition(&mut self, next: FlowState) {
        debug!("authorization flow {:?} -> {:?}", self.state, next);
        self.state = next;
    }
}

fn present_url(url: &Url, launch: BrowserLaunch) {
    match launch {
        BrowserLaunch::Open => {
            if let Err(e) = open::that(url.as_str()) {
                warn!("failed to open browser: {}", e);
                println!("Open this URL in your browser:\n{}\n", url);
            }
        }
        BrowserLaunch::Print => println!("Open this URL in your browser:\n{}\n", url),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AUTH_ENDPOINT, DEFAULT_MAX_RATE_LIMIT_RETRIES, TOKEN_ENDPOINT};

    fn config() -> AppConfig {
        AppConfig {
            oauth_id: "client-id".to_string(),
            oauth_secret: "secret".to_string(),
            redirect_uri: "http://127.0.0.1:8888".to_string(),
            scope: "full".to_string(),
            base_url: "http://localhost".to_string(),
            token_url: TOKEN_ENDPOINT.to_string(),
            auth_url: AUTH_ENDPOINT.to_string(),
            settings_path: ".env".into(),
            debug: false,
            request_timeout: Duration::from_secs(5),
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
        }
    }

    fn params(code: Option<&str>, state: Option<&str>) -> CallbackParams {
        CallbackParams {
            code: code.map(str::to_string),
            state: state.map(str::to_string),
        }
    }

    #[test]
    fn test_authorization_url_parameters() {
        let config = config();
        let flow = AuthorizationFlow::with_state_token(&config, "abc123");
        let url = flow.authorization_url().unwrap();

        assert!(url.as_str().starts_with(AUTH_ENDPOINT));
        let pairs: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(
            pairs,
            vec![
                ("response_type".to_string(), "code".to_string()),
                ("client_id".to_string(), "client-id".to_string()),
                ("redirect_uri".to_string(), "http://127.0.0.1:8888".to_string()),
                ("scope".to_string(), "full".to_string()),
                ("state".to_string(), "abc123".to_string()),
            ]
        );
    }

    #[test]
    fn test_random_state_tokens_differ() {
        let config = config();
        let a = AuthorizationFlow::new(&config);
        let b = AuthorizationFlow::new(&config);
        assert_eq!(a.state_token().len(), 32);
        assert_ne!(a.state_token(), b.state_token());
    }

    #[test]
    fn test_state_mismatch_rejected() {
        let config = config();
        let flow = AuthorizationFlow::with_state_token(&config, "abc123");
        let err = flow
            .validate_callback(params(Some("code"), Some("xyz999")))
            .unwrap_err();
        assert!(matches!(err, Error::StateMismatch));
    }

    #[test]
    fn test_missing_code_rejected() {
        let config = config();
        let flow = AuthorizationFlow::with_state_token(&config, "abc123");
        let err = flow
            .validate_callback(params(None, Some("abc123")))
            .unwrap_err();
        assert!(matches!(err, Error::NoAuthorizationCode));
    }

    #[test]
    fn test_matching_or_absent_state_accepted() {
        let config = config();
        let flow = AuthorizationFlow::with_state_token(&config, "abc123");
        assert_eq!(
            flow.validate_callback(params(Some("c"), Some("abc123")))
                .unwrap(),
            "c"
        );
        assert_eq!(flow.validate_callback(params(Some("c"), None)).unwrap(), "c");
    }
}
