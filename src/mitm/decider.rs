//! Interception decision at TLS handshake time
//!
//! The SNI of each tunneled TLS connection is checked once against the
//! live watchlist:
//! - watched hosts are decrypted and inspected
//! - everything else is forwarded as opaque bytes, so pinned certificates
//!   of unrelated sites keep working and no CPU is spent on them
//!
//! The decision holds for the life of the connection.

use crate::matcher::DomainMatcher;
use crate::storage::CredentialStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info};

/// What the runtime should do with a TLS connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TlsDecision {
    /// No SNI to judge by; the runtime's default applies
    Default,

    /// Decrypt and run request hooks
    Intercept,

    /// Forward encrypted bytes untouched; no further hooks fire
    PassThrough,
}

impl std::fmt::Display for TlsDecision {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::Default => write!(f, "Default"),
            Self::Intercept => write!(f, "Intercept"),
            Self::PassThrough => write!(f, "Pass-through"),
        }
    }
}

/// Watchlist-driven interception decider
pub struct InterceptionDecider {
    store: Arc<dyn CredentialStore>,
}

impl InterceptionDecider {
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self { store }
    }

    /// Decide for one TLS handshake
    ///
    /// The watchlist is read fresh on every call. If it cannot be read the
    /// connection is passed through rather than decrypted.
    pub async fn decide(&self, sni: Option<&str>) -> TlsDecision {
        let Some(sni) = sni else {
            debug!("No SNI in ClientHello, leaving connection to runtime default");
            return TlsDecision::Default;
        };

        let watchlist = match self.store.watchlist().await {
            Ok(watchlist) => watchlist,
            Err(e) => {
                error!(sni = %sni, error = %e, "Failed to read watchlist, passing connection through");
                return TlsDecision::PassThrough;
            }
        };

        if DomainMatcher::matches(sni, &watchlist) {
            info!(sni = %sni, "Intercepting connection");
            TlsDecision::Intercept
        } else {
            info!(sni = %sni, "Ignoring connection (not in watchlist)");
            TlsDecision::PassThrough
        }
    }
}
