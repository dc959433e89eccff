//! HTTP proxy in front of the FatSecret image recognition API.
//!
//! The proxy authenticates with the OAuth 2.0 client-credentials grant, keeps
//! the resulting bearer token in a [`TokenCache`] until shortly before it
//! expires, and forwards uploaded food images to the recognition endpoint.
//!
//! The pieces compose through [`AppState`], which the [`router`] shares with
//! every handler:
//!
//! ```no_run
//! use std::sync::Arc;
//! use fatsecret_proxy::{AppState, ProxyConfig, router};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ProxyConfig::from_env()?;
//! let addr = config.bind_addr();
//! let app = router(Arc::new(AppState::from_config(config)?));
//!
//! let listener = tokio::net::TcpListener::bind(addr).await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod recognition;
pub mod server;
pub mod token;

pub use config::{ConfigError, Credentials, ProxyConfig};
pub use error::{ErrorBody, ProxyError};
pub use recognition::{RecognitionClient, RecognitionError, RecognitionRequest};
pub use server::{AppState, router};
pub use token::{CachedToken, Clock, SystemClock, TokenCache, TokenError};
