//! TLS ClientHello inspection
//!
//! Reads the first TLS record of a tunneled connection without consuming
//! it for good: the caller gets the raw bytes back so they can be replayed
//! to the upstream (pass-through) or to a TLS acceptor (interception).
//! The SNI is read by rustls from a copy of those bytes.

use crate::mitm::error::ClientHelloError;
use rustls::server::Acceptor;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::debug;

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const RECORD_HEADER_LEN: usize = 5;

/// Largest TLSPlaintext fragment (2^14) plus slack for TLS 1.2 expansion
const MAX_RECORD_LEN: usize = 16384 + 2048;

/// Bytes read from the client before the interception decision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientPreface {
    /// Everything consumed from the client so far
    pub bytes: Vec<u8>,

    /// Whether the stream starts with a TLS handshake record
    pub is_tls: bool,
}

impl ClientPreface {
    /// SNI hostname, if this is a parseable ClientHello carrying one
    pub fn sni(&self) -> Option<String> {
        if !self.is_tls {
            return None;
        }
        match parse_sni(&self.bytes) {
            Ok(sni) => sni,
            Err(e) => {
                debug!(error = %e, "Could not extract SNI from ClientHello");
                None
            }
        }
    }
}

/// Read the first TLS record from the client
///
/// Stops after one byte when the stream does not start with a handshake
/// record (plain HTTP inside a CONNECT tunnel, for instance).
pub async fn read_client_preface<R: AsyncRead + Unpin>(
    reader: &mut R,
) -> Result<ClientPreface, ClientHelloError> {
    let mut first = [0u8; 1];
    let n = reader.read(&mut first).await?;
    if n == 0 {
        return Err(ClientHelloError::Closed);
    }

    if first[0] != CONTENT_TYPE_HANDSHAKE {
        return Ok(ClientPreface {
            bytes: first.to_vec(),
            is_tls: false,
        });
    }

    let mut header = [0u8; RECORD_HEADER_LEN];
    header[0] = first[0];
    reader.read_exact(&mut header[1..]).await?;

    let length = u16::from_be_bytes([header[3], header[4]]) as usize;
    if length > MAX_RECORD_LEN {
        return Err(ClientHelloError::RecordTooLarge(length));
    }

    let mut bytes = Vec::with_capacity(RECORD_HEADER_LEN + length);
    bytes.extend_from_slice(&header);
    bytes.resize(RECORD_HEADER_LEN + length, 0);
    reader.read_exact(&mut bytes[RECORD_HEADER_LEN..]).await?;

    Ok(ClientPreface {
        bytes,
        is_tls: true,
    })
}

/// Extract the SNI host name from raw TLS records holding a ClientHello
///
/// Returns `Ok(None)` for a valid ClientHello without the server_name
/// extension. The input is only read, never consumed.
pub fn parse_sni(records: &[u8]) -> Result<Option<String>, ClientHelloError> {
    if records.first() != Some(&CONTENT_TYPE_HANDSHAKE) {
        return Err(ClientHelloError::NotTls);
    }

    let mut acceptor = Acceptor::default();
    let mut input = records;
    while !input.is_empty() {
        if acceptor.read_tls(&mut input)? == 0 {
            break;
        }
    }

    match acceptor.accept() {
        Ok(Some(accepted)) => Ok(accepted.client_hello().server_name().map(str::to_string)),
        Ok(None) => Err(ClientHelloError::Incomplete),
        Err((e, _alert)) => Err(ClientHelloError::Rejected(e)),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a minimal ClientHello record, optionally carrying an SNI
    pub(crate) fn client_hello(sni: Option<&str>) -> Vec<u8> {
        let mut extensions = Vec::new();

        // signature_algorithms: ecdsa_secp256r1_sha256
        extensions.extend_from_slice(&[0x00, 0x0d, 0x00, 0x04, 0x00, 0x02, 0x04, 0x03]);
        // supported_versions: TLS 1.3
        extensions.extend_from_slice(&[0x00, 0x2b, 0x00, 0x03, 0x02, 0x03, 0x04]);

        if let Some(name) = sni {
            let name = name.as_bytes();
            let entry_len = 1 + 2 + name.len();
            let ext_len = 2 + entry_len;
            extensions.extend_from_slice(&[0x00, 0x00]); // server_name
            extensions.extend_from_slice(&(ext_len as u16).to_be_bytes());
            extensions.extend_from_slice(&(entry_len as u16).to_be_bytes());
            extensions.push(0x00); // host_name
            extensions.extend_from_slice(&(name.len() as u16).to_be_bytes());
            extensions.extend_from_slice(name);
        }

        let mut body = Vec::new();
        body.extend_from_slice(&[0x03, 0x03]);
        body.extend_from_slice(&[0x42; 32]);
        body.push(0); // session id
        body.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]);
        body.extend_from_slice(&[0x01, 0x00]);
        body.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
        body.extend_from_slice(&extensions);

        let mut handshake = vec![0x01]; // client_hello
        let len = body.len() as u32;
        handshake.extend_from_slice(&len.to_be_bytes()[1..]);
        handshake.extend_from_slice(&body);

        let mut record = vec![CONTENT_TYPE_HANDSHAKE, 0x03, 0x01];
        record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
        record.extend_from_slice(&handshake);
        record
    }

    #[test]
    fn test_parse_sni() {
        let record = client_hello(Some("sub.example.com"));
        assert_eq!(parse_sni(&record).unwrap().as_deref(), Some("sub.example.com"));
    }

    #[test]
    fn test_parse_sni_mixed_case() {
        let record = client_hello(Some("Sub.Example.COM"));
        let sni = parse_sni(&record).unwrap().unwrap();
        assert!(sni.eq_ignore_ascii_case("sub.example.com"));
    }

    #[test]
    fn test_parse_without_sni() {
        let record = client_hello(None);
        assert_eq!(parse_sni(&record).unwrap(), None);
    }

    #[test]
    fn test_parse_truncated() {
        let record = client_hello(Some("example.com"));
        let truncated = &record[..record.len() - 4];
        assert!(matches!(parse_sni(truncated), Err(ClientHelloError::Incomplete)));
    }

    #[test]
    fn test_parse_not_tls() {
        assert!(matches!(
            parse_sni(b"GET / HTTP/1.1\r\n\r\n"),
            Err(ClientHelloError::NotTls)
        ));
    }

    #[test]
    fn test_parse_rejects_non_client_hello() {
        // Handshake record carrying a ServerHello type byte
        let mut record = client_hello(Some("example.com"));
        record[RECORD_HEADER_LEN] = 0x02;
        assert!(parse_sni(&record).is_err());
    }

    #[tokio::test]
    async fn test_read_preface_tls() {
        let record = client_hello(Some("example.com"));
        let mut input = record.clone();
        input.extend_from_slice(b"trailing application data");

        let mut reader = &input[..];
        let preface = read_client_preface(&mut reader).await.unwrap();

        assert!(preface.is_tls);
        assert_eq!(preface.bytes, record);
        assert_eq!(preface.sni().as_deref(), Some("example.com"));
        assert_eq!(reader, b"trailing application data");
    }

    #[tokio::test]
    async fn test_read_preface_plain_http() {
        let input = b"GET http://example.com/ HTTP/1.1\r\n\r\n";
        let mut reader = &input[..];
        let preface = read_client_preface(&mut reader).await.unwrap();

        assert!(!preface.is_tls);
        assert_eq!(preface.bytes, b"G");
        assert_eq!(preface.sni(), None);
    }

    #[tokio::test]
    async fn test_read_preface_oversized_record() {
        let input = [CONTENT_TYPE_HANDSHAKE, 0x03, 0x01, 0xff, 0xff];
        let mut reader = &input[..];
        assert!(matches!(
            read_client_preface(&mut reader).await,
            Err(ClientHelloError::RecordTooLarge(0xffff))
        ));
    }

    #[tokio::test]
    async fn test_read_preface_closed() {
        let mut reader: &[u8] = &[];
        assert!(matches!(
            read_client_preface(&mut reader).await,
            Err(ClientHelloError::Closed)
        ));
    }
}
