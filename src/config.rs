//! Credential resolution and settings storage

use std::collections::{BTreeMap, HashMap};
use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::env::{parse_settings, render_settings};

// =============================================================================
// Constants
// =============================================================================

/// Default API base URL
pub const API_BASE_URL: &str = "https://api.freeagent.com/v2";

/// OAuth token endpoint
pub const TOKEN_ENDPOINT: &str = "https://api.freeagent.com/v2/token_endpoint";

/// OAuth authorization (approval) endpoint
pub const AUTH_ENDPOINT: &str = "https://api.freeagent.com/v2/approve_app";

/// Default settings file, relative to the working directory
pub const DEFAULT_SETTINGS_FILE: &str = ".env";

/// Scope requested when none is configured
pub const DEFAULT_SCOPE: &str = "full";

/// Default request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound on consecutive 429 retries for a single logical call
pub const DEFAULT_MAX_RATE_LIMIT_RETRIES: u32 = 10;

pub const OAUTH_ID_KEY: &str = "FREEAGENT_OAUTH_ID";
pub const OAUTH_SECRET_KEY: &str = "FREEAGENT_OAUTH_SECRET";
pub const OAUTH_REDIRECT_URI_KEY: &str = "FREEAGENT_OAUTH_REDIRECT_URI";
pub const SCOPE_KEY: &str = "FREEAGENT_SCOPE";

/// A setting looked up under a preferred name, then an optional legacy name.
#[derive(Debug, Clone, Copy)]
pub struct SettingKey {
    pub preferred: &'static str,
    pub legacy: Option<&'static str>,
}

impl SettingKey {
    pub const fn new(preferred: &'static str) -> Self {
        Self {
            preferred,
            legacy: None,
        }
    }

    pub const fn with_legacy(preferred: &'static str, legacy: &'static str) -> Self {
        Self {
            preferred,
            legacy: Some(legacy),
        }
    }
}

// =============================================================================
// Settings (file entries + merged lookup)
// =============================================================================

/// The persisted settings file together with the merged lookup view.
///
/// `file` holds exactly what will be written back to disk. `lookup` is the
/// file overlaid with the process environment, where the environment wins.
#[derive(Debug, Clone)]
pub struct Settings {
    path: PathBuf,
    file: BTreeMap<String, String>,
    lookup: HashMap<String, String>,
}

impl Settings {
    /// Read the settings file (a missing file is empty) and merge `env` over it.
    pub fn load<I>(path: impl Into<PathBuf>, env: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let path = path.into();
        let file = match std::fs::read_to_string(&path) {
            Ok(content) => parse_settings(&content),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("settings file {:?} not found, starting empty", path);
                BTreeMap::new()
            }
            Err(e) => return Err(ConfigError::ReadError(path, e.to_string())),
        };

        let mut lookup: HashMap<String, String> = file.clone().into_iter().collect();
        lookup.extend(env);

        Ok(Self { path, file, lookup })
    }

    /// Path of the backing settings file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries that will be persisted
    pub fn file_entries(&self) -> &BTreeMap<String, String> {
        &self.file
    }

    /// First non-empty value for the preferred name, then the legacy name.
    pub fn pick(&self, key: SettingKey) -> Option<&str> {
        std::iter::once(key.preferred)
            .chain(key.legacy)
            .filter_map(|name| self.lookup.get(name))
            .map(String::as_str)
            .find(|value| !value.is_empty())
    }

    /// Set a value in both the file entries and the lookup view.
    pub fn set(&mut self, key: &str, value: &str) {
        self.file.insert(key.to_string(), value.to_string());
        self.lookup.insert(key.to_string(), value.to_string());
    }

    /// Add a file entry unless the file already defines the key.
    fn retain_in_file(&mut self, key: &str, value: &str) {
        self.file
            .entry(key.to_string())
            .or_insert_with(|| value.to_string());
    }

    /// Rewrite the whole settings file from the current entries.
    pub fn persist(&self) -> io::Result<()> {
        std::fs::write(&self.path, render_settings(&self.file))
    }
}

/// Process environment as UTF-8 pairs.
///
/// Variables whose name or value is not valid UTF-8 are skipped; none of the
/// settings this tool reads can hold such a value.
pub fn process_env() -> impl Iterator<Item = (String, String)> {
    utf8_pairs(std::env::vars_os())
}

fn utf8_pairs<I>(vars: I) -> impl Iterator<Item = (String, String)>
where
    I: IntoIterator<Item = (OsString, OsString)>,
{
    vars.into_iter().filter_map(|(key, value)| {
        match (key.into_string(), value.into_string()) {
            (Ok(key), Ok(value)) => Some((key, value)),
            (key, _) => {
                debug!("skipping non UTF-8 environment variable {:?}", key);
                None
            }
        }
    })
}

// =============================================================================
// Resolved config
// =============================================================================

/// Invocation options that do not come from the settings file
#[derive(Debug, Clone)]
pub struct ConfigOptions {
    pub base_url: String,
    pub debug: bool,
    pub request_timeout: Duration,
}

impl Default for ConfigOptions {
    fn default() -> Self {
        Self {
            base_url: API_BASE_URL.to_string(),
            debug: false,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Immutable configuration for one invocation.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// OAuth client identifier
    pub oauth_id: String,

    /// OAuth client secret
    pub oauth_secret: String,

    /// Redirect URI registered for the OAuth client
    pub redirect_uri: String,

    /// Requested OAuth scope
    pub scope: String,

    /// Resource API base URL
    pub base_url: String,

    /// Token endpoint used for both grant types
    pub token_url: String,

    /// Authorization endpoint the user is sent to
    pub auth_url: String,

    /// Settings file the tokens are persisted to
    pub settings_path: PathBuf,

    /// Expose request detail in errors and logs
    pub debug: bool,

    /// Per-request timeout
    pub request_timeout: Duration,

    /// Consecutive 429 responses tolerated before giving up
    pub max_rate_limit_retries: u32,
}

impl AppConfig {
    /// Resolve the OAuth client configuration from `settings`.
    ///
    /// Fails with every missing mandatory key listed. On success the resolved
    /// client values are retained in the settings file entries (in memory
    /// only) so a later token save keeps them even when they came from the
    /// process environment.
    pub fn resolve(settings: &mut Settings, options: ConfigOptions) -> Result<Self, ConfigError> {
        let pick = |key: &'static str| settings.pick(SettingKey::new(key)).map(str::to_string);

        let oauth_id = pick(OAUTH_ID_KEY);
        let oauth_secret = pick(OAUTH_SECRET_KEY);
        let redirect_uri = pick(OAUTH_REDIRECT_URI_KEY);
        let scope = pick(SCOPE_KEY).unwrap_or_else(|| DEFAULT_SCOPE.to_string());

        let (oauth_id, oauth_secret, redirect_uri) = match (oauth_id, oauth_secret, redirect_uri) {
            (Some(id), Some(secret), Some(redirect)) => (id, secret, redirect),
            (id, secret, redirect) => {
                let keys = [
                    (OAUTH_ID_KEY, id.is_none()),
                    (OAUTH_SECRET_KEY, secret.is_none()),
                    (OAUTH_REDIRECT_URI_KEY, redirect.is_none()),
                ]
                .into_iter()
                .filter(|(_, missing)| *missing)
                .map(|(key, _)| key.to_string())
                .collect();
                return Err(ConfigError::MissingKeys {
                    keys,
                    path: settings.path().to_path_buf(),
                });
            }
        };

        settings.retain_in_file(OAUTH_ID_KEY, &oauth_id);
        settings.retain_in_file(OAUTH_SECRET_KEY, &oauth_secret);
        settings.retain_in_file(OAUTH_REDIRECT_URI_KEY, &redirect_uri);
        settings.retain_in_file(SCOPE_KEY, &scope);

        Ok(Self {
            oauth_id,
            oauth_secret,
            redirect_uri,
            scope,
            base_url: options.base_url,
            token_url: TOKEN_ENDPOINT.to_string(),
            auth_url: AUTH_ENDPOINT.to_string(),
            settings_path: settings.path().to_path_buf(),
            debug: options.debug,
            request_timeout: options.request_timeout,
            max_rate_limit_retries: DEFAULT_MAX_RATE_LIMIT_RETRIES,
        })
    }

    /// Override the OAuth endpoints (used against mock servers)
    pub fn with_oauth_endpoints(mut self, auth_url: String, token_url: String) -> Self {
        self.auth_url = auth_url;
        self.token_url = token_url;
        self
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "Missing config keys: {}. Set them in {} or env vars FREEAGENT_OAUTH_ID/SECRET/OAUTH_REDIRECT_URI.",
        keys.join(", "),
        path.display()
    )]
    MissingKeys { keys: Vec<String>, path: PathBuf },

    #[error("Failed to read settings file {0}: {1}")]
    ReadError(PathBuf, String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}
