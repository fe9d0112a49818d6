//! freeagent-cli: a command-line client for the FreeAgent accounting API
//!
//! The library covers the parts of the client that carry state across
//! requests; the `freeagent` binary wires them to a command line.
//!
//! # Architecture
//!
//! - **Config**: settings file (`.env` style) merged with the process
//!   environment, resolved into an immutable [`config::AppConfig`].
//! - **Auth**: OAuth2 token records, the persisted token store, the token
//!   endpoint client and the interactive authorization-code flow.
//! - **Client**: the authenticated request executor, which keeps the access
//!   token valid and recovers from 401 and 429 responses.
//! - **Paginate**: lazy page walking over list endpoints.
//! - **Resources / Reports**: endpoint descriptors and handlers, rendered by
//!   the output module.
//!
//! # Example
//!
//! ```no_run
//! use freeagent_cli::auth::TokenStore;
//! use freeagent_cli::client::ApiClient;
//! use freeagent_cli::config::{process_env, AppConfig, ConfigOptions, Settings};
//! use freeagent_cli::paginate::Paginator;
//!
//! # async fn example() -> freeagent_cli::Result<()> {
//! let mut settings = Settings::load(".env", process_env())?;
//! let config = AppConfig::resolve(&mut settings, ConfigOptions::default())?;
//! let client = ApiClient::new(config, TokenStore::new(settings))?;
//!
//! let invoices = Paginator::new(client, "/invoices", "invoices")
//!     .collect_all()
//!     .await?;
//! println!("{} invoices", invoices.len());
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod client;
pub mod config;
pub mod depreciation;
pub mod env;
pub mod error;
pub mod output;
pub mod paginate;
pub mod reports;
pub mod resources;

pub use error::{Error, Result};
