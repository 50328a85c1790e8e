//! Proxy hook orchestration
//!
//! [`ProxyAddon`] is what the proxy runtime talks to. It wires the
//! authentication gate, the interception decider and cookie capture into
//! the four hook points a connection goes through:
//!
//! 1. `on_connect` for CONNECT tunnel requests
//! 2. `on_client_hello` once per TLS handshake inside a tunnel
//! 3. `on_request` for every plain or decrypted request
//! 4. `on_client_disconnect` when the client connection closes
//!
//! A hook returning `Some(response)` short-circuits proxying: the runtime
//! sends that response to the client instead of forwarding.

use crate::auth::AuthGate;
use crate::capture::CookieCapturePipeline;
use crate::mitm::decider::{InterceptionDecider, TlsDecision};
use crate::session::ConnectionId;
use crate::storage::{CookieStore, CredentialStore};
use bytes::Bytes;
use http::{Request, Response};
use http_body_util::Full;
use std::sync::Arc;
use tracing::debug;

pub struct ProxyAddon {
    auth: AuthGate,
    decider: InterceptionDecider,
    capture: CookieCapturePipeline,
}

impl ProxyAddon {
    /// Build from a single store serving both configuration and cookies
    pub fn new<S>(store: Arc<S>) -> Self
    where
        S: CredentialStore + CookieStore + 'static,
    {
        Self::from_parts(store.clone(), store)
    }

    pub fn from_parts(credentials: Arc<dyn CredentialStore>, cookies: Arc<dyn CookieStore>) -> Self {
        Self {
            auth: AuthGate::new(Arc::clone(&credentials)),
            decider: InterceptionDecider::new(Arc::clone(&credentials)),
            capture: CookieCapturePipeline::new(credentials, cookies),
        }
    }

    pub fn with_realm(mut self, realm: &str) -> Self {
        self.auth = self.auth.with_realm(realm);
        self
    }

    pub fn auth(&self) -> &AuthGate {
        &self.auth
    }

    /// TLS handshake seen inside a tunnel
    pub async fn on_client_hello(&self, conn: ConnectionId, sni: Option<&str>) -> TlsDecision {
        let decision = self.decider.decide(sni).await;
        debug!(conn = %conn, sni = ?sni, decision = %decision, "TLS interception decision");
        decision
    }

    /// CONNECT request; on success the connection is authorized for life
    pub async fn on_connect<B>(
        &self,
        conn: ConnectionId,
        req: &Request<B>,
    ) -> Option<Response<Full<Bytes>>> {
        self.auth.authorize_connect(conn, req).await
    }

    /// Plain (or decrypted) request: gate, then capture cookies
    pub async fn on_request<B>(
        &self,
        conn: ConnectionId,
        req: &Request<B>,
    ) -> Option<Response<Full<Bytes>>> {
        if let Some(rejection) = self.auth.authorize_request(conn, req).await {
            return Some(rejection);
        }

        self.capture.capture(req).await;
        None
    }

    pub async fn on_client_disconnect(&self, conn: ConnectionId) {
        self.auth.connection_closed(conn).await;
    }
}
