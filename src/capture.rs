//! Cookie capture for watched domains
//!
//! Runs on authenticated plain requests (including requests decrypted from
//! intercepted tunnels). Responses are never inspected.
//!
//! Nothing here can fail the proxied request: unreadable cookies count as
//! no cookies, and storage errors are logged and dropped.

use crate::matcher::DomainMatcher;
use crate::storage::{CookieStore, CredentialStore};
use cookie::Cookie;
use http::header::{COOKIE, HOST, SET_COOKIE};
use http::uri::Authority;
use http::{HeaderMap, Request};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Result of running the pipeline on one request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Target host could not be determined
    NoHost,

    /// Host is not on the watchlist (or the watchlist was unreadable)
    NotWatched { host: String },

    /// Watched host, but the request carries no cookies
    NoCookies { host: String },

    /// Cookie string persisted
    Captured { host: String, content: String },

    /// Cookie string built, but the store rejected it
    StoreFailed { host: String },
}

/// Target host of a request, without port
///
/// Absolute-form URIs win over the Host header.
pub fn request_host<B>(req: &Request<B>) -> Option<String> {
    if let Some(host) = req.uri().host() {
        return Some(DomainMatcher::canonical_host(host));
    }

    let value = req.headers().get(HOST)?.to_str().ok()?;
    let authority: Authority = value.trim().parse().ok()?;
    Some(DomainMatcher::canonical_host(authority.host()))
}

/// Parsed (name, value) pairs from all Cookie headers
///
/// A bare token without `=` is a cookie with an empty value. Non-UTF-8
/// headers and pairs with an empty name are skipped.
pub fn parse_cookie_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .map(str::trim)
        .filter(|segment| !segment.is_empty())
        .filter_map(|segment| {
            if segment.contains('=') {
                Cookie::parse(segment)
                    .ok()
                    .map(|c| (c.name().to_string(), c.value().to_string()))
            } else {
                Some((segment.to_string(), String::new()))
            }
        })
        .collect()
}

/// Join the readable values of a repeated header with `"; "`
fn joined_header(headers: &HeaderMap, name: http::header::HeaderName) -> String {
    headers
        .get_all(name)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Cookie string to persist
///
/// First non-empty of: raw Cookie header text, joined Set-Cookie lines,
/// `name=value` pairs rebuilt from the parsed cookies.
pub fn cookie_content(headers: &HeaderMap, pairs: &[(String, String)]) -> Option<String> {
    let raw = joined_header(headers, COOKIE);
    if !raw.is_empty() {
        return Some(raw);
    }

    let set_cookie = joined_header(headers, SET_COOKIE);
    if !set_cookie.is_empty() {
        return Some(set_cookie);
    }

    let rebuilt = pairs
        .iter()
        .map(|(name, value)| format!("{}={}", name, value))
        .collect::<Vec<_>>()
        .join("; ");
    if rebuilt.is_empty() {
        None
    } else {
        Some(rebuilt)
    }
}

/// Extracts and stores cookies for watched hosts
pub struct CookieCapturePipeline {
    watchlist: Arc<dyn CredentialStore>,
    cookies: Arc<dyn CookieStore>,
}

impl CookieCapturePipeline {
    pub fn new(watchlist: Arc<dyn CredentialStore>, cookies: Arc<dyn CookieStore>) -> Self {
        Self { watchlist, cookies }
    }

    /// Run the pipeline for one authenticated request
    pub async fn capture<B>(&self, req: &Request<B>) -> CaptureOutcome {
        let Some(host) = request_host(req) else {
            debug!(uri = %req.uri(), "No target host, skipping cookie capture");
            return CaptureOutcome::NoHost;
        };

        // Fresh read: the watchlist can change while connections are open
        let watchlist = match self.watchlist.watchlist().await {
            Ok(watchlist) => watchlist,
            Err(e) => {
                error!(host = %host, error = %e, "Failed to read watchlist, skipping cookie capture");
                return CaptureOutcome::NotWatched { host };
            }
        };

        if !DomainMatcher::matches(&host, &watchlist) {
            debug!(host = %host, "Host not watched");
            return CaptureOutcome::NotWatched { host };
        }

        let pairs = parse_cookie_pairs(req.headers());
        if pairs.is_empty() {
            debug!(host = %host, "Watched host, no cookies in request");
            return CaptureOutcome::NoCookies { host };
        }

        let Some(content) = cookie_content(req.headers(), &pairs) else {
            return CaptureOutcome::NoCookies { host };
        };

        match self.cookies.upsert_cookie(&host, &content, &content).await {
            Ok(()) => {
                info!(host = %host, cookies = pairs.len(), "Captured cookies");
                debug!(host = %host, content = %content, "Captured cookie content");
                CaptureOutcome::Captured { host, content }
            }
            Err(e) => {
                error!(host = %host, error = %e, "Failed to store captured cookies");
                CaptureOutcome::StoreFailed { host }
            }
        }
    }
}
