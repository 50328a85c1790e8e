//! Cookie Catcher - Authenticated Intercepting Proxy Core
//!
//! Cookie Catcher is a forward proxy that records the cookies clients send
//! to a configured set of watched domains.
//!
//! ## Features
//!
//! - **Proxy Authentication**: HTTP Basic against a single stored username/password,
//!   remembered per client connection after a successful CONNECT
//! - **Selective Interception**: TLS connections are marked for interception only
//!   when their SNI falls under a watched domain, everything else is passed through
//! - **Cookie Capture**: cookies on requests to watched domains are upserted into
//!   SQLite, deduplicated per (domain, cookie content)
//! - **Live Configuration**: watchlist and credentials are read from the store on
//!   every decision, so management changes take effect immediately
//!
//! ## Usage
//!
//! ```rust,no_run
//! use cookie_catcher::{ProxyAddon, ProxyServer, SqliteStore, UpstreamClient};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = Arc::new(SqliteStore::open("cookies.db").await?);
//!     store.set_username("alice").await?;
//!     store.set_password("s3cret").await?;
//!     store.add_domain("*.example.com").await?;
//!
//!     let addon = Arc::new(ProxyAddon::new(store));
//!     let upstream = UpstreamClient::new(Duration::from_secs(10), 10 * 1024 * 1024);
//!     let server = Arc::new(ProxyServer::new(addon, upstream));
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//!     server
//!         .serve(listener, async {
//!             let _ = tokio::signal::ctrl_c().await;
//!         })
//!         .await
//! }
//! ```
//!
//! ## Architecture
//!
//! - `matcher` - watchlist domain matching
//! - `storage` - SQLite-backed credential, watchlist and cookie store
//! - `session` - per-connection authorization state
//! - `auth` - Basic proxy authentication gate
//! - `mitm` - ClientHello parsing and the intercept / pass-through decision
//! - `capture` - cookie extraction and persistence
//! - `addon` - the hook surface the proxy runtime drives
//! - `server` - HTTP/1.1 forward-proxy runtime
//! - `http_client` - upstream client for plain HTTP requests

// Core proxy modules
pub mod config;
pub mod http_client;
pub mod logger;
pub mod server;

// Interception core
pub mod addon;
pub mod auth;
pub mod capture;
pub mod matcher;
pub mod mitm;
pub mod session;
pub mod storage;

pub use config::{ConfigError, ProxyConfig};
pub use http_client::{HttpClientError, UpstreamClient};
pub use logger::{init_tracing, LogFormat};
pub use server::ProxyServer;

pub use addon::ProxyAddon;
pub use auth::{AuthError, AuthGate};
pub use capture::{CaptureOutcome, CookieCapturePipeline};
pub use matcher::DomainMatcher;
pub use mitm::{InterceptionDecider, MitmError, TlsDecision, TlsInterceptor, TunnelStream};
pub use session::{ConnectionId, SessionTable};
pub use storage::{CapturedCookie, CookieStore, CredentialStore, SqliteStore, StorageError};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
