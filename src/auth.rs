// Proxy Authentication Module
// Basic credentials checked against the single configured username/password

use crate::session::{ConnectionId, SessionTable};
use crate::storage::CredentialStore;
use base64::{engine::general_purpose, Engine as _};
use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_TYPE, PROXY_AUTHENTICATE, PROXY_AUTHORIZATION};
use http::{HeaderValue, Request, Response, StatusCode};
use http_body_util::Full;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Realm advertised in the `Proxy-Authenticate` challenge
pub const DEFAULT_REALM: &str = "MITM Cookie Catcher";

/// Body of the 503 sent while no credentials are configured
pub const SETUP_REQUIRED_BODY: &str =
    "Proxy Setup Required: Please configure username/password (cookie-catcher credentials set).";

/// Body of the 407 challenge
pub const AUTH_REQUIRED_BODY: &str = "Proxy Authentication Required";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Proxy credentials are not configured")]
    Unconfigured,

    #[error("Missing Proxy-Authorization header")]
    MissingHeader,

    #[error("Invalid Proxy-Authorization format (expected: Basic <base64(user:pass)>)")]
    InvalidFormat,

    #[error("Invalid username or password")]
    InvalidCredentials,
}

/// Decode a `Basic` Proxy-Authorization value into (username, password)
///
/// Scheme is case-insensitive. The password may itself contain colons.
pub fn parse_basic_credentials(auth_header: &str) -> Result<(String, String), AuthError> {
    let (scheme, encoded) = auth_header
        .trim()
        .split_once(' ')
        .ok_or(AuthError::InvalidFormat)?;

    if !scheme.eq_ignore_ascii_case("basic") {
        return Err(AuthError::InvalidFormat);
    }

    let decoded = general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| AuthError::InvalidFormat)?;
    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::InvalidFormat)?;

    let (username, password) = decoded.split_once(':').ok_or(AuthError::InvalidFormat)?;

    Ok((username.to_string(), password.to_string()))
}

/// Gate in front of all proxied traffic
///
/// Holds the session table: once a connection authenticates it stays
/// authorized until [`AuthGate::connection_closed`].
pub struct AuthGate {
    credentials: Arc<dyn CredentialStore>,
    sessions: SessionTable,
    challenge: HeaderValue,
}

impl AuthGate {
    pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
        Self {
            credentials,
            sessions: SessionTable::new(),
            challenge: HeaderValue::from_static("Basic realm=\"MITM Cookie Catcher\""),
        }
    }

    /// Use a custom realm in the 407 challenge
    pub fn with_realm(mut self, realm: &str) -> Self {
        match HeaderValue::from_str(&format!("Basic realm=\"{}\"", realm)) {
            Ok(value) => self.challenge = value,
            Err(_) => warn!(realm = %realm, "Realm is not a valid header value, keeping default"),
        }
        self
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    /// Check a request's Proxy-Authorization against the live credentials
    pub async fn check<B>(&self, req: &Request<B>) -> Result<(), AuthError> {
        let (username, password) = match self.load_credentials().await {
            Some(creds) => creds,
            None => return Err(AuthError::Unconfigured),
        };

        let header = req
            .headers()
            .get(PROXY_AUTHORIZATION)
            .ok_or(AuthError::MissingHeader)?;
        let header = header.to_str().map_err(|_| AuthError::InvalidFormat)?;

        let (supplied_user, supplied_pass) = parse_basic_credentials(header)?;

        if supplied_user != username || supplied_pass != *password.expose_secret() {
            return Err(AuthError::InvalidCredentials);
        }

        Ok(())
    }

    /// Authenticate a request, producing the rejection response on failure
    ///
    /// All failures other than missing configuration share one 407 so the
    /// client cannot tell them apart.
    pub async fn authenticate<B>(&self, req: &Request<B>) -> Result<(), Response<Full<Bytes>>> {
        match self.check(req).await {
            Ok(()) => Ok(()),
            Err(AuthError::Unconfigured) => {
                warn!(uri = %req.uri(), "Rejecting request: proxy credentials not configured");
                Err(setup_required_response())
            }
            Err(e) => {
                warn!(uri = %req.uri(), reason = %e, "Proxy authentication failed");
                Err(self.challenge_response())
            }
        }
    }

    /// CONNECT: on success the connection stays authorized for its lifetime
    pub async fn authorize_connect<B>(
        &self,
        conn: ConnectionId,
        req: &Request<B>,
    ) -> Option<Response<Full<Bytes>>> {
        match self.authenticate(req).await {
            Ok(()) => {
                self.sessions.authorize(conn).await;
                debug!(conn = %conn, "Connection authorized via CONNECT");
                None
            }
            Err(response) => Some(response),
        }
    }

    /// Plain request: skip the check on already-authorized connections
    pub async fn authorize_request<B>(
        &self,
        conn: ConnectionId,
        req: &Request<B>,
    ) -> Option<Response<Full<Bytes>>> {
        if self.sessions.is_authorized(conn).await {
            return None;
        }

        match self.authenticate(req).await {
            Ok(()) => {
                self.sessions.authorize(conn).await;
                debug!(conn = %conn, "Connection authorized via request");
                None
            }
            Err(response) => Some(response),
        }
    }

    pub async fn connection_closed(&self, conn: ConnectionId) {
        if self.sessions.remove(conn).await {
            debug!(conn = %conn, "Authorization dropped on disconnect");
        }
    }

    /// Username and password, or None when either is unset or empty
    ///
    /// A failing store is treated as unconfigured, so traffic is refused.
    async fn load_credentials(&self) -> Option<(String, SecretString)> {
        let username = match self.credentials.username().await {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "Failed to read proxy username");
                return None;
            }
        };
        let password = match self.credentials.password().await {
            Ok(value) => value,
            Err(e) => {
                error!(error = %e, "Failed to read proxy password");
                return None;
            }
        };

        match (username, password) {
            (Some(u), Some(p)) if !u.is_empty() && !p.is_empty() => {
                Some((u, SecretString::new(p)))
            }
            _ => None,
        }
    }

    /// 407 challenge response
    pub fn challenge_response(&self) -> Response<Full<Bytes>> {
        let mut response = Response::new(Full::new(Bytes::from_static(
            AUTH_REQUIRED_BODY.as_bytes(),
        )));
        *response.status_mut() = StatusCode::PROXY_AUTHENTICATION_REQUIRED;

        let headers = response.headers_mut();
        headers.insert(PROXY_AUTHENTICATE, self.challenge.clone());
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html"));
        headers.insert(CONNECTION, HeaderValue::from_static("close"));
        response
    }
}

/// 503 response sent while credentials are unset
pub fn setup_required_response() -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from_static(
        SETUP_REQUIRED_BODY.as_bytes(),
    )));
    *response.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}
