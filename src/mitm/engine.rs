//! TLS interception engine seam
//!
//! Terminating TLS (certificates, upstream TLS, HTTP parsing of the
//! decrypted stream) is not done by this crate. A [`TlsInterceptor`]
//! implementation receives connections the decider marked for
//! interception and must route every decrypted request through
//! [`ProxyAddon::on_request`].

use crate::addon::ProxyAddon;
use crate::mitm::error::Result;
use crate::session::ConnectionId;
use async_trait::async_trait;
use hyper::upgrade::Upgraded;
use hyper_util::rt::TokioIo;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Client side of an upgraded CONNECT tunnel, with the ClientHello replayed
pub type TunnelStream = Rewind<TokioIo<Upgraded>>;

/// Pluggable TLS termination engine
#[async_trait]
pub trait TlsInterceptor: Send + Sync {
    /// Take over an intercepted connection until it closes
    ///
    /// `client` still yields the full ClientHello.
    async fn intercept(
        &self,
        conn: ConnectionId,
        target: &str,
        client: TunnelStream,
        addon: Arc<ProxyAddon>,
    ) -> Result<()>;
}

/// Stream that yields already-consumed bytes before reading from `inner`
pub struct Rewind<S> {
    prefix: Vec<u8>,
    prefix_pos: usize,
    inner: S,
}

impl<S> Rewind<S> {
    pub fn new(prefix: Vec<u8>, inner: S) -> Self {
        Self {
            prefix,
            prefix_pos: 0,
            inner,
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for Rewind<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        let this = self.get_mut();

        if this.prefix_pos < this.prefix.len() {
            let remaining = &this.prefix[this.prefix_pos..];
            let to_copy = remaining.len().min(buf.remaining());
            buf.put_slice(&remaining[..to_copy]);
            this.prefix_pos += to_copy;
            return Poll::Ready(Ok(()));
        }

        Pin::new(&mut this.inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for Rewind<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        Pin::new(&mut self.get_mut().inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}
