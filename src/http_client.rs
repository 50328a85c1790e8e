// Upstream HTTP client for plain (non-tunneled) proxy requests
// One HTTP/1.1 connection per forwarded request, response buffered with a size cap

use bytes::{Bytes, BytesMut};
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::{Request, Response, StatusCode, Uri};
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Incoming};
use hyper_util::rt::TokioIo;
use std::io;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Headers that apply to a single hop and are never forwarded
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

#[derive(Debug, thiserror::Error)]
pub enum HttpClientError {
    #[error("Proxy requests must use an absolute-form URI: {0}")]
    InvalidTarget(String),

    #[error("Unsupported scheme for plain proxying: {0}")]
    UnsupportedScheme(String),

    #[error("Connection timeout")]
    ConnectionTimeout,

    #[error("Failed to connect to upstream: {0}")]
    Connect(#[source] io::Error),

    #[error("Upstream HTTP error: {0}")]
    Http(#[from] hyper::Error),

    #[error("Response body too large: {size} bytes (limit: {limit})")]
    ResponseTooLarge { size: usize, limit: usize },
}

impl HttpClientError {
    /// Status returned to the proxy client for this failure
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::InvalidTarget(_) | Self::UnsupportedScheme(_) => StatusCode::BAD_REQUEST,
            Self::ConnectionTimeout => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

/// Remove hop-by-hop headers, including any named in `Connection`
pub fn strip_hop_by_hop(headers: &mut HeaderMap) {
    let listed: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();

    for name in listed {
        headers.remove(name);
    }
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
}

/// Split an absolute-form `http://` URI into (host, port, origin-form path)
fn parse_target(uri: &Uri) -> Result<(String, u16, Uri), HttpClientError> {
    let scheme = uri
        .scheme_str()
        .ok_or_else(|| HttpClientError::InvalidTarget(uri.to_string()))?;
    if !scheme.eq_ignore_ascii_case("http") {
        return Err(HttpClientError::UnsupportedScheme(scheme.to_string()));
    }

    let authority = uri
        .authority()
        .ok_or_else(|| HttpClientError::InvalidTarget(uri.to_string()))?;
    let host = authority.host().trim_start_matches('[').trim_end_matches(']');
    let port = authority.port_u16().unwrap_or(80);

    let path = uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .parse::<Uri>()
        .map_err(|_| HttpClientError::InvalidTarget(uri.to_string()))?;

    Ok((host.to_string(), port, path))
}

/// Buffer a body, failing as soon as it exceeds `max_size`
async fn read_body_with_limit<B>(mut body: B, max_size: usize) -> Result<Bytes, HttpClientError>
where
    B: Body<Data = Bytes, Error = hyper::Error> + Unpin,
{
    let mut collected = BytesMut::new();

    while let Some(frame) = body.frame().await {
        let frame = frame?;
        if let Ok(data) = frame.into_data() {
            let size = collected.len() + data.len();
            if size > max_size {
                warn!(size = size, limit = max_size, "Upstream response body exceeded limit");
                return Err(HttpClientError::ResponseTooLarge {
                    size,
                    limit: max_size,
                });
            }
            collected.extend_from_slice(&data);
        }
    }

    Ok(collected.freeze())
}

/// Forwards plain HTTP requests to their origin
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    connect_timeout: Duration,
    max_response_body_size: usize,
}

impl UpstreamClient {
    pub fn new(connect_timeout: Duration, max_response_body_size: usize) -> Self {
        Self {
            connect_timeout,
            max_response_body_size,
        }
    }

    /// Send `req` to the origin named in its absolute-form URI
    pub async fn forward(
        &self,
        req: Request<Incoming>,
    ) -> Result<Response<Full<Bytes>>, HttpClientError> {
        let (mut parts, body) = req.into_parts();
        let (host, port, path) = parse_target(&parts.uri)?;

        let stream = timeout(self.connect_timeout, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|_| HttpClientError::ConnectionTimeout)?
            .map_err(HttpClientError::Connect)?;

        debug!(host = %host, port = port, "Connected to upstream");

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream)).await?;
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "Upstream connection closed with error");
            }
        });

        let host_header = match port {
            80 => host.clone(),
            _ => format!("{}:{}", host, port),
        };

        strip_hop_by_hop(&mut parts.headers);
        if !parts.headers.contains_key(header::HOST) {
            if let Ok(value) = HeaderValue::from_str(&host_header) {
                parts.headers.insert(header::HOST, value);
            }
        }
        parts.uri = path;

        let upstream_req = Request::from_parts(parts, body);
        let response = sender.send_request(upstream_req).await?;

        let (mut parts, body) = response.into_parts();
        let body = read_body_with_limit(body, self.max_response_body_size).await?;

        strip_hop_by_hop(&mut parts.headers);
        parts.headers.remove(header::CONTENT_LENGTH);

        Ok(Response::from_parts(parts, Full::new(body)))
    }
}
