//! MITM (Man-in-the-Middle) interception module
//!
//! This module decides, per tunneled TLS connection, whether to intercept:
//! - ClientHello reading and SNI extraction
//! - Watchlist-based intercept / pass-through decision
//! - The seam for a pluggable TLS termination engine

pub mod client_hello;
pub mod decider;
pub mod engine;
pub mod error;

pub use client_hello::{parse_sni, read_client_preface, ClientPreface};
pub use decider::{InterceptionDecider, TlsDecision};
pub use engine::{Rewind, TlsInterceptor, TunnelStream};
pub use error::{ClientHelloError, MitmError, Result};
