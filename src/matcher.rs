//! Watchlist domain matching
//!
//! Every "is this host watched?" question in the proxy goes through
//! [`DomainMatcher::matches`]: the TLS handshake decision, the request gate
//! and cookie capture all share it.

/// Hostname normalization and watchlist matching
pub struct DomainMatcher;

impl DomainMatcher {
    /// Strip one leading `*.` or `.` from a watchlist entry
    ///
    /// `*.` is checked first, so `*..example.com` becomes `.example.com`.
    pub fn normalize(raw: &str) -> &str {
        if let Some(rest) = raw.strip_prefix("*.") {
            rest
        } else if let Some(rest) = raw.strip_prefix('.') {
            rest
        } else {
            raw
        }
    }

    /// Canonical form of a hostname: ASCII-lowercased, surrounding
    /// whitespace removed
    pub fn canonical_host(host: &str) -> String {
        host.trim().to_ascii_lowercase()
    }

    /// Canonical form of a watchlist entry, as stored
    pub fn canonical_entry(raw: &str) -> String {
        Self::canonical_host(Self::normalize(raw.trim()))
    }

    /// Check a bare hostname against a single watchlist entry
    ///
    /// Matches the domain itself or any subdomain on a label boundary,
    /// ignoring ASCII case on both sides. Ports are not stripped.
    pub fn matches_domain(host: &str, entry: &str) -> bool {
        let host = host.as_bytes();
        let domain = Self::normalize(entry).as_bytes();

        if host.eq_ignore_ascii_case(domain) {
            return true;
        }

        let Some(boundary) = host.len().checked_sub(domain.len() + 1) else {
            return false;
        };
        host[boundary] == b'.' && host[boundary + 1..].eq_ignore_ascii_case(domain)
    }

    /// Check a bare hostname against the whole watchlist
    pub fn matches<S: AsRef<str>>(host: &str, watchlist: &[S]) -> bool {
        watchlist
            .iter()
            .any(|entry| Self::matches_domain(host, entry.as_ref()))
    }
}
