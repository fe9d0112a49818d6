//! Shared fixtures for integration tests
//!
//! Every test gets its own settings file in a temp dir and its own mock
//! server standing in for both the resource API and the token endpoint.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use serde_json::{json, Value};
use tempfile::TempDir;
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use freeagent_cli::auth::TokenStore;
use freeagent_cli::client::ApiClient;
use freeagent_cli::config::{AppConfig, Settings, DEFAULT_MAX_RATE_LIMIT_RETRIES};

pub const TOKEN_PATH: &str = "/token_endpoint";

/// Far enough in the future that a token is always valid
pub const VALID_UNTIL: i64 = 4_102_444_800;

pub struct TestHarness {
    pub dir: TempDir,
    pub server: MockServer,
    pub settings_path: PathBuf,
}

impl TestHarness {
    pub async fn new() -> Result<Self> {
        let dir = TempDir::new()?;
        let settings_path = dir.path().join(".env");
        let server = MockServer::start().await;
        Ok(Self {
            dir,
            server,
            settings_path,
        })
    }

    /// Write a settings file with client values and the given tokens.
    pub fn write_tokens(&self, access: &str, refresh: &str, expires_at: i64) -> Result<()> {
        let content = format!(
            "FREEAGENT_OAUTH_ID=client-id\n\
             FREEAGENT_OAUTH_SECRET=client-secret\n\
             FREEAGENT_OAUTH_REDIRECT_URI=http://127.0.0.1:8888\n\
             FREEAGENT_ACCESS_TOKEN={}\n\
             FREEAGENT_REFRESH_TOKEN={}\n\
             FREEAGENT_EXPIRES_AT={}\n",
            access, refresh, expires_at
        );
        std::fs::write(&self.settings_path, content)?;
        Ok(())
    }

    pub fn config(&self) -> AppConfig {
        let uri = self.server.uri();
        AppConfig {
            oauth_id: "client-id".to_string(),
            oauth_secret: "client-secret".to_string(),
            redirect_uri: "http://127.0.0.1:8888".to_string(),
            scope: "full".to_string(),
            base_url: uri.clone(),
            token_url: format!("{}{}", uri, TOKEN_PATH),
            auth_url: format!("{}/approve_app", uri),
            settings_path: self.settings_path.clone(),
            debug: false,
            request_timeout: Duration::from_secs(5),
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
        }
    }

    pub fn store(&self) -> Result<TokenStore> {
        let settings = Settings::load(&self.settings_path, Vec::new())?;
        Ok(TokenStore::new(settings))
    }

    pub fn client(&self) -> Result<ApiClient> {
        self.client_with(self.config())
    }

    pub fn client_with(&self, config: AppConfig) -> Result<ApiClient> {
        Ok(ApiClient::new(config, self.store()?)?)
    }

    /// Settings file as written on disk
    pub fn settings_file(&self) -> Result<String> {
        Ok(std::fs::read_to_string(&self.settings_path)?)
    }

    /// Token endpoint answering one refresh grant with `access`.
    pub async fn mount_refresh(&self, access: &str, refresh: &str, expect: u64) {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .and(body_string_contains("grant_type=refresh_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(token_body(access, refresh)))
            .expect(expect)
            .mount(&self.server)
            .await;
    }
}

pub fn token_body(access: &str, refresh: &str) -> Value {
    json!({
        "access_token": access,
        "refresh_token": refresh,
        "expires_in": 3600,
        "token_type": "Bearer"
    })
}

pub fn bearer(token: &str) -> String {
    format!("Bearer {}", token)
}
