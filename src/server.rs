//! HTTP/1.1 forward-proxy runtime
//!
//! Accepts client connections and drives [`ProxyAddon`] hooks:
//! - plain requests: `on_request`, then forwarding to the origin
//! - CONNECT: `on_connect`, then `on_client_hello` on the tunneled
//!   ClientHello, then pass-through or hand-off to a [`TlsInterceptor`]
//! - `on_client_disconnect` once the connection and any tunnel are gone

use crate::addon::ProxyAddon;
use crate::http_client::UpstreamClient;
use crate::mitm::{read_client_preface, Rewind, TlsDecision, TlsInterceptor, TunnelStream};
use crate::session::{ConnectionId, ConnectionIdGenerator};
use anyhow::Result;
use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Parse and validate CONNECT authority (host:port)
fn parse_authority(authority: &str) -> Result<(String, u16), String> {
    let (host, port) = authority
        .rsplit_once(':')
        .ok_or_else(|| "CONNECT target must be host:port".to_string())?;

    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        return Err("CONNECT target has an empty host".to_string());
    }

    let port: u16 = port
        .parse()
        .map_err(|_| format!("Invalid port in CONNECT target: {}", port))?;
    if port == 0 {
        return Err("CONNECT target port cannot be 0".to_string());
    }

    Ok((host.to_string(), port))
}

fn text_response(status: StatusCode, message: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(message.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain"));
    response
}

/// Fires `on_client_disconnect` when the last holder drops
///
/// Held by the HTTP service and by any tunnel task spawned from it.
struct ConnectionGuard {
    conn: ConnectionId,
    addon: Arc<ProxyAddon>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        let conn = self.conn;
        let addon = Arc::clone(&self.addon);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    addon.on_client_disconnect(conn).await;
                    debug!(conn = %conn, "Client disconnected");
                });
            }
            Err(_) => warn!(conn = %conn, "No runtime to run disconnect hook"),
        }
    }
}

pub struct ProxyServer {
    addon: Arc<ProxyAddon>,
    upstream: UpstreamClient,
    interceptor: Option<Arc<dyn TlsInterceptor>>,
    ids: ConnectionIdGenerator,
}

impl ProxyServer {
    pub fn new(addon: Arc<ProxyAddon>, upstream: UpstreamClient) -> Self {
        Self {
            addon,
            upstream,
            interceptor: None,
            ids: ConnectionIdGenerator::new(),
        }
    }

    /// Install the engine that handles connections marked for interception
    pub fn with_interceptor(mut self, interceptor: Arc<dyn TlsInterceptor>) -> Self {
        self.interceptor = Some(interceptor);
        self
    }

    /// Accept connections until `shutdown` resolves
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> Result<()> {
        let local_addr = listener.local_addr()?;
        info!(addr = %local_addr, "Proxy listening");

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutdown requested, no longer accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let server = Arc::clone(&self);
                            tokio::spawn(async move {
                                server.handle_connection(stream, peer).await;
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
            }
        }
    }

    async fn handle_connection(self: Arc<Self>, stream: TcpStream, peer: SocketAddr) {
        let conn = self.ids.next_id();
        debug!(conn = %conn, peer = %peer, "Client connected");

        let guard = Arc::new(ConnectionGuard {
            conn,
            addon: Arc::clone(&self.addon),
        });

        let server = Arc::clone(&self);
        let service = service_fn(move |req: Request<Incoming>| {
            let server = Arc::clone(&server);
            let guard = Arc::clone(&guard);
            async move { Ok::<_, Infallible>(server.handle_request(conn, guard, req).await) }
        });

        let result = hyper::server::conn::http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .with_upgrades()
            .await;

        if let Err(e) = result {
            debug!(conn = %conn, error = %e, "Client connection ended with error");
        }
    }

    async fn handle_request(
        self: Arc<Self>,
        conn: ConnectionId,
        guard: Arc<ConnectionGuard>,
        req: Request<Incoming>,
    ) -> Response<Full<Bytes>> {
        debug!(conn = %conn, method = %req.method(), uri = %req.uri(), "Request received");

        if req.method() == Method::CONNECT {
            return self.handle_connect(conn, guard, req).await;
        }

        if let Some(response) = self.addon.on_request(conn, &req).await {
            return response;
        }

        match self.upstream.forward(req).await {
            Ok(response) => response,
            Err(e) => {
                warn!(conn = %conn, error = %e, "Forwarding failed");
                text_response(e.status_code(), e.to_string())
            }
        }
    }

    async fn handle_connect(
        self: Arc<Self>,
        conn: ConnectionId,
        guard: Arc<ConnectionGuard>,
        mut req: Request<Incoming>,
    ) -> Response<Full<Bytes>> {
        let target = match req.uri().authority() {
            Some(authority) => authority.to_string(),
            None => {
                warn!(conn = %conn, "Missing authority in CONNECT request");
                return text_response(
                    StatusCode::BAD_REQUEST,
                    "Bad Request: CONNECT requires a valid host:port authority",
                );
            }
        };

        if let Err(msg) = parse_authority(&target) {
            warn!(conn = %conn, target = %target, error = %msg, "Invalid CONNECT authority");
            return text_response(StatusCode::BAD_REQUEST, format!("Bad Request: {}", msg));
        }

        if let Some(response) = self.addon.on_connect(conn, &req).await {
            return response;
        }

        info!(conn = %conn, target = %target, "CONNECT established");

        tokio::spawn(async move {
            // Keeps the connection's authorization alive while tunneling
            let _guard = guard;

            match hyper::upgrade::on(&mut req).await {
                Ok(upgraded) => {
                    if let Err(e) = self.run_tunnel(conn, target.clone(), TokioIo::new(upgraded)).await {
                        debug!(conn = %conn, target = %target, error = %e, "Tunnel closed with error");
                    }
                }
                Err(e) => {
                    error!(conn = %conn, target = %target, error = %e, "Upgrade error");
                }
            }
        });

        Response::new(Full::new(Bytes::new()))
    }

    async fn run_tunnel(
        &self,
        conn: ConnectionId,
        target: String,
        mut client: TokioIo<hyper::upgrade::Upgraded>,
    ) -> crate::mitm::Result<()> {
        let preface = read_client_preface(&mut client).await?;

        let decision = if preface.is_tls {
            let sni = preface.sni();
            self.addon.on_client_hello(conn, sni.as_deref()).await
        } else {
            debug!(conn = %conn, "Tunnel does not start with TLS");
            TlsDecision::Default
        };

        let client = Rewind::new(preface.bytes, client);

        match (decision, &self.interceptor) {
            (TlsDecision::Intercept, Some(interceptor)) => {
                interceptor
                    .intercept(conn, &target, client, Arc::clone(&self.addon))
                    .await
            }
            (TlsDecision::Intercept, None) => {
                warn!(conn = %conn, target = %target, "No TLS interceptor installed, passing watched connection through");
                pass_through(conn, &target, client).await
            }
            _ => pass_through(conn, &target, client).await,
        }
    }
}

/// Forward tunnel bytes opaquely in both directions
async fn pass_through(
    conn: ConnectionId,
    target: &str,
    mut client: TunnelStream,
) -> crate::mitm::Result<()> {
    let mut upstream = TcpStream::connect(target).await.map_err(|source| {
        crate::mitm::MitmError::UpstreamConnect {
            host: target.to_string(),
            source,
        }
    })?;

    let (to_upstream, to_client) = tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;

    debug!(
        conn = %conn,
        target = %target,
        client_to_upstream = to_upstream,
        upstream_to_client = to_client,
        "Tunnel finished"
    );
    Ok(())
}
