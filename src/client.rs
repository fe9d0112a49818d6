//! Authenticated request executor
//!
//! Every call goes through [`ApiClient::execute`], which guarantees the
//! request carried a currently valid bearer token:
//!
//! 1. Load tokens; refresh and persist them first if they are expired.
//! 2. Send the request with `Authorization: Bearer ..` and `Accept: application/json`.
//! 3. On the first 401, refresh, persist and resend once.
//! 4. On 429, sleep for `Retry-After` seconds and reissue with refresh-on-401
//!    disabled, up to `max_rate_limit_retries` times.
//! 5. Any other status >= 400 is returned as [`Error::Api`].

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, CONTENT_TYPE, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use reqwest::{Method, Response, StatusCode};
use serde_json::Value;
use tracing::{debug, warn};

use crate::auth::{OAuthTokens, TokenEndpoint, TokenStore};
use crate::config::AppConfig;
use crate::error::{Error, Result};

/// Backoff used when a 429 carries no usable `Retry-After`.
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(1);

/// Request body variants.
#[derive(Debug, Clone)]
pub enum RequestBody {
    /// Sent as `application/json`
    Json(Value),
    /// Sent as `multipart/form-data`: text fields followed by one file part.
    /// No JSON content type is attached.
    Multipart {
        fields: Vec<(String, String)>,
        file: FilePart,
    },
}

/// File contents for a multipart upload, kept in memory so the request can be
/// rebuilt on every retry.
#[derive(Debug, Clone)]
pub struct FilePart {
    /// Form field name
    pub field: String,
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl RequestBody {
    fn multipart_form(fields: &[(String, String)], file: &FilePart) -> Result<Form> {
        let part = Part::bytes(file.bytes.clone())
            .file_name(file.file_name.clone())
            .mime_str(&file.content_type)?;
        Ok(fields
            .iter()
            .fold(Form::new(), |form, (key, value)| {
                form.text(key.clone(), value.clone())
            })
            .part(file.field.clone(), part))
    }
}

/// A logical API call, replayable across retries.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<RequestBody>,
    pub headers: Vec<(String, String)>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            headers: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    pub fn query_pairs<I, K, V>(mut self, pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.query
            .extend(pairs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(RequestBody::Json(body));
        self
    }

    pub fn multipart(mut self, fields: Vec<(String, String)>, file: FilePart) -> Self {
        self.body = Some(RequestBody::Multipart { fields, file });
        self
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    /// Parameters rendered for error messages
    fn params_display(&self) -> String {
        let inner = self
            .query
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{}}}", inner)
    }
}

/// Client for the FreeAgent resource API.
///
/// Cheap to clone; clones share the token store.
#[derive(Clone)]
pub struct ApiClient {
    config: Arc<AppConfig>,
    http: reqwest::Client,
    endpoint: TokenEndpoint,
    store: Arc<Mutex<TokenStore>>,
}

impl ApiClient {
    pub fn new(config: AppConfig, store: TokenStore) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        let endpoint = TokenEndpoint::with_client(http.clone(), &config);
        Ok(Self {
            config: Arc::new(config),
            http,
            endpoint,
            store: Arc::new(Mutex::new(store)),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Tokens currently in the store
    pub fn current_tokens(&self) -> Option<OAuthTokens> {
        self.store.lock().load()
    }

    /// Load tokens, refreshing and persisting them first if expired.
    pub async fn ensure_tokens(&self) -> Result<OAuthTokens> {
        let tokens = self.store.lock().load().ok_or(Error::NotAuthenticated)?;
        if tokens.is_expired() {
            debug!("access token expired at {}, refreshing", tokens.expires_at);
            return self.refresh(&tokens).await;
        }
        Ok(tokens)
    }

    /// Exchange the refresh token and persist the result before returning it.
    async fn refresh(&self, tokens: &OAuthTokens) -> Result<OAuthTokens> {
        let refreshed = self.endpoint.refresh(&tokens.refresh_token).await?;
        self.store.lock().save(&refreshed)?;
        Ok(refreshed)
    }

    /// Execute a request with token maintenance, 401 and 429 recovery.
    pub async fn execute(&self, request: &ApiRequest) -> Result<Response> {
        let mut allow_refresh = true;
        let mut rate_limit_retries = 0u32;

        loop {
            let tokens = self.ensure_tokens().await?;
            let mut response = self.send(request, &tokens).await?;

            if response.status() == StatusCode::UNAUTHORIZED && allow_refresh {
                debug!("401 for {}, refreshing token and retrying once", request.path);
                let tokens = self.refresh(&tokens).await?;
                response = self.send(request, &tokens).await?;
            }

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                if rate_limit_retries >= self.config.max_rate_limit_retries {
                    return Err(Error::RateLimited {
                        path: request.path.clone(),
                        attempts: rate_limit_retries,
                    });
                }
                let wait = retry_after(response.headers());
                warn!("Rate limited. Retrying after {}s...", wait.as_secs());
                tokio::time::sleep(wait).await;
                rate_limit_retries += 1;
                allow_refresh = false;
                continue;
            }

            let status = response.status();
            if status == StatusCode::UNAUTHORIZED {
                return Err(Error::Unauthorized {
                    path: request.path.clone(),
                });
            }
            if status.as_u16() >= 400 {
                let body = response.text().await.unwrap_or_default();
                return Err(Error::Api {
                    status: status.as_u16(),
                    body,
                    path: request.path.clone(),
                    params: request.params_display(),
                });
            }

            return Ok(response);
        }
    }

    /// Execute a request and decode its JSON body.
    pub async fn execute_json(&self, request: &ApiRequest) -> Result<Value> {
        let response = self.execute(request).await?;
        let bytes = response.bytes().await?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_slice(&bytes)?)
    }

    pub async fn get_json(&self, path: &str, query: &[(String, String)]) -> Result<Value> {
        let request = ApiRequest::get(path).query_pairs(query.iter().cloned());
        self.execute_json(&request).await
    }

    async fn send(&self, request: &ApiRequest, tokens: &OAuthTokens) -> Result<Response> {
        let url = self.url_for(&request.path);
        if self.config.debug {
            debug!(
                "HTTP {} {} params={} json_body_present={} multipart_present={} timeout={:?}",
                request.method,
                url,
                request.params_display(),
                matches!(request.body, Some(RequestBody::Json(_))),
                matches!(request.body, Some(RequestBody::Multipart { .. })),
                self.config.request_timeout
            );
        }

        let mut builder = self
            .http
            .request(request.method.clone(), &url)
            .header(AUTHORIZATION, tokens.bearer())
            .header(ACCEPT, "application/json");

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }

        match &request.body {
            Some(RequestBody::Json(value)) => {
                builder = builder
                    .header(CONTENT_TYPE, "application/json")
                    .body(serde_json::to_vec(value)?);
            }
            Some(RequestBody::Multipart { fields, file }) => {
                builder = builder.multipart(RequestBody::multipart_form(fields, file)?);
            }
            None => {}
        }

        for (key, value) in &request.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }

        Ok(builder.send().await?)
    }

    /// Resolve a path against the base URL; absolute URLs pass through.
    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Delay requested by a 429 response, in whole seconds.
pub fn retry_after(headers: &HeaderMap) -> Duration {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}
