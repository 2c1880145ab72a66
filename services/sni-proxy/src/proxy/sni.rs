//! SNI (Server Name Indication) extraction from TLS ClientHello.
//!
//! The proxy reads exactly one TLS record from the client: the 5-byte
//! record header followed by the payload length it declares. Those bytes
//! are kept so they can be replayed to the backend, and the SNI hostname
//! is decoded from them without ever reading past the buffer.

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::time::timeout;
use tracing::debug;

use crate::error::FramingError;

/// Read deadline for the ClientHello record, measured from acceptance.
pub const DEFAULT_HELLO_TIMEOUT: Duration = Duration::from_secs(10);

/// TLS record header: type (1), legacy version (2), payload length (2).
pub const TLS_RECORD_HEADER_LEN: usize = 5;

const CONTENT_TYPE_HANDSHAKE: u8 = 0x16;
const HANDSHAKE_TYPE_CLIENT_HELLO: u8 = 0x01;
const EXTENSION_SERVER_NAME: u16 = 0x0000;
const SERVER_NAME_TYPE_HOST_NAME: u8 = 0x00;

/// Read one TLS record (header plus declared payload) from `stream`.
///
/// Returns every consumed byte so the caller can replay it upstream.
/// The whole read is bounded by `deadline`; on return the deadline no
/// longer applies to the stream.
pub async fn read_client_hello<R: AsyncRead + Unpin>(
    stream: &mut R,
    deadline: Duration,
) -> Result<Vec<u8>, FramingError> {
    match timeout(deadline, read_record(stream)).await {
        Ok(result) => result,
        Err(_) => Err(FramingError::Timeout(deadline)),
    }
}

async fn read_record<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>, FramingError> {
    let mut buffer = vec![0u8; TLS_RECORD_HEADER_LEN];
    stream
        .read_exact(&mut buffer)
        .await
        .map_err(|e| framing_error("header", e))?;

    let payload_len = u16::from_be_bytes([buffer[3], buffer[4]]) as usize;
    buffer.resize(TLS_RECORD_HEADER_LEN + payload_len, 0);
    stream
        .read_exact(&mut buffer[TLS_RECORD_HEADER_LEN..])
        .await
        .map_err(|e| framing_error("payload", e))?;

    debug!(
        record_type = buffer[0],
        payload_len = payload_len,
        "TLS record read"
    );

    Ok(buffer)
}

fn framing_error(stage: &'static str, e: io::Error) -> FramingError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        FramingError::ShortRead(stage)
    } else {
        FramingError::Io { stage, source: e }
    }
}

/// Bounds-checked big-endian cursor over a byte slice.
struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    fn take(&mut self, n: usize) -> Option<&'a [u8]> {
        if n > self.data.len() {
            return None;
        }
        let (head, tail) = self.data.split_at(n);
        self.data = tail;
        Some(head)
    }

    fn u8(&mut self) -> Option<u8> {
        self.take(1).map(|b| b[0])
    }

    fn u16(&mut self) -> Option<u16> {
        self.take(2).map(|b| u16::from_be_bytes([b[0], b[1]]))
    }

    fn u24(&mut self) -> Option<usize> {
        self.take(3)
            .map(|b| ((b[0] as usize) << 16) | ((b[1] as usize) << 8) | b[2] as usize)
    }

    /// A block prefixed by a one-byte length.
    fn vec8(&mut self) -> Option<&'a [u8]> {
        let len = self.u8()? as usize;
        self.take(len)
    }

    /// A block prefixed by a two-byte length.
    fn vec16(&mut self) -> Option<&'a [u8]> {
        let len = self.u16()? as usize;
        self.take(len)
    }
}

/// Extract the SNI hostname from a buffer holding one TLS record.
///
/// TLS Record structure:
/// - byte 0: record type (0x16 = Handshake)
/// - bytes 1-2: version
/// - bytes 3-4: record length
/// - bytes 5+: handshake message
///
/// Handshake ClientHello:
/// - byte 0: handshake type (0x01 = ClientHello)
/// - bytes 1-3: length
/// - bytes 4-5: client version
/// - bytes 6-37: random (32 bytes)
/// - 1-byte length + session ID
/// - 2-byte length + cipher suites
/// - 1-byte length + compression methods
/// - optional 2-byte length + extensions
///
/// Returns `None` on any type mismatch, on a missing extensions block or
/// server_name extension, and whenever a declared length runs past the
/// bytes that are actually present.
pub fn extract_sni(record: &[u8]) -> Option<String> {
    let mut reader = Reader::new(record);

    if reader.u8()? != CONTENT_TYPE_HANDSHAKE {
        return None;
    }
    let _version = reader.u16()?;
    let payload = reader.vec16()?;

    let mut handshake = Reader::new(payload);
    if handshake.u8()? != HANDSHAKE_TYPE_CLIENT_HELLO {
        return None;
    }
    let body_len = handshake.u24()?;
    let mut hello = Reader::new(handshake.take(body_len)?);

    let _legacy_version = hello.u16()?;
    let _random = hello.take(32)?;
    let _session_id = hello.vec8()?;
    let _cipher_suites = hello.vec16()?;
    let _compression_methods = hello.vec8()?;

    if hello.is_empty() {
        // Extensions are optional; without them there is no SNI.
        return None;
    }
    let mut extensions = Reader::new(hello.vec16()?);

    while !extensions.is_empty() {
        let ext_type = extensions.u16()?;
        let ext_data = extensions.vec16()?;
        if ext_type == EXTENSION_SERVER_NAME {
            return parse_server_name(ext_data);
        }
    }

    None
}

/// Parse the server_name extension body.
///
/// - 2 bytes: list length
/// - for each entry:
///   - 1 byte: name type (0 = hostname)
///   - 2 bytes: name length
///   - variable: name
fn parse_server_name(data: &[u8]) -> Option<String> {
    let mut list = Reader::new(Reader::new(data).vec16()?);

    while !list.is_empty() {
        let name_type = list.u8()?;
        let name = list.vec16()?;
        if name_type == SERVER_NAME_TYPE_HOST_NAME {
            return std::str::from_utf8(name).ok().map(str::to_string);
        }
    }

    None
}
