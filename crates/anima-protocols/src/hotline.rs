//! Hotline: length-prefixed binary framing
//!
//! Each frame is an 8-byte little-endian header followed by the payload:
//!
//! ```text
//! bytes 0..3   kind  (u32) message-type identifier
//! bytes 4..7   size  (u32) payload length, must be > 0
//! bytes 8..    payload
//! ```
//!
//! One deadline applies per read or write call; the connection timeout is
//! re-armed before every operation. A frame is one header-plus-payload
//! unit; there is no multiplexing.

use anima_core::{Error, Result};
use bytes::{BufMut, BytesMut};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the frame header in bytes.
pub const HEADER_SIZE: usize = 8;

/// A framed connection (or half of one).
#[derive(Debug)]
pub struct Hotline<S> {
    stream: S,
    timeout: Duration,
}

impl<S> Hotline<S> {
    /// Wrap `stream`, applying `timeout` to every read and write call.
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self { stream, timeout }
    }

    /// Unwrap the underlying stream.
    pub fn into_inner(self) -> S {
        self.stream
    }
}

fn timed_out(op: &str) -> Error {
    Error::Io(std::io::Error::new(
        std::io::ErrorKind::TimedOut,
        format!("hotline {op} timed out"),
    ))
}

impl<S: AsyncRead + Unpin> Hotline<S> {
    /// Read one frame, yielding its kind and payload.
    pub async fn read_frame(&mut self) -> Result<(u32, Vec<u8>)> {
        let mut header = [0u8; HEADER_SIZE];
        tokio::time::timeout(self.timeout, self.stream.read_exact(&mut header))
            .await
            .map_err(|_| timed_out("read"))??;

        let kind = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
        let size = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if size == 0 {
            return Err(Error::Frame("zero payload size".to_string()));
        }

        let mut payload = vec![0u8; size as usize];
        tokio::time::timeout(self.timeout, self.stream.read_exact(&mut payload))
            .await
            .map_err(|_| timed_out("read"))??;

        Ok((kind, payload))
    }
}

impl<S: AsyncWrite + Unpin> Hotline<S> {
    /// Write one frame with the given kind and payload.
    pub async fn write_frame(&mut self, kind: u32, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Err(Error::Frame("zero payload size".to_string()));
        }

        let mut buffer = BytesMut::with_capacity(HEADER_SIZE + payload.len());
        buffer.put_u32_le(kind);
        buffer.put_u32_le(payload.len() as u32);
        buffer.put_slice(payload);

        tokio::time::timeout(self.timeout, self.stream.write_all(&buffer))
            .await
            .map_err(|_| timed_out("write"))??;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair() -> (
        Hotline<tokio::io::DuplexStream>,
        Hotline<tokio::io::DuplexStream>,
    ) {
        let (a, b) = tokio::io::duplex(4096);
        (
            Hotline::new(a, Duration::from_millis(200)),
            Hotline::new(b, Duration::from_millis(200)),
        )
    }

    #[tokio::test]
    async fn test_write_then_read_yields_identical_frame() {
        let (mut client, mut server) = pair();

        client.write_frame(102, b"hello").await.unwrap();
        let (kind, payload) = server.read_frame().await.unwrap();

        assert_eq!(kind, 102);
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn test_header_is_little_endian() {
        let (mut client, server) = pair();

        client.write_frame(0x01020304, b"x").await.unwrap();

        let mut raw = server.into_inner();
        let mut header = [0u8; HEADER_SIZE];
        raw.read_exact(&mut header).await.unwrap();
        assert_eq!(&header[0..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&header[4..8], &[0x01, 0x00, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_write_rejects_empty_payload() {
        let (mut client, _server) = pair();

        let err = client.write_frame(1, b"").await.unwrap_err();
        assert!(matches!(err, Error::Frame(_)));
    }

    #[tokio::test]
    async fn test_read_rejects_zero_size() {
        let (client, mut server) = pair();

        let mut raw = client.into_inner();
        let mut header = BytesMut::new();
        header.put_u32_le(7);
        header.put_u32_le(0);
        raw.write_all(&header).await.unwrap();

        let err = server.read_frame().await.unwrap_err();
        assert!(matches!(err, Error::Frame(_)));
    }

    #[tokio::test]
    async fn test_read_times_out_without_data() {
        let (_client, mut server) = pair();

        let err = server.read_frame().await.unwrap_err();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::TimedOut),
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_eof_surfaces_as_unexpected_eof() {
        let (client, mut server) = pair();
        drop(client);

        let err = server.read_frame().await.unwrap_err();
        match err {
            Error::Io(e) => assert_eq!(e.kind(), std::io::ErrorKind::UnexpectedEof),
            other => panic!("expected eof, got {other:?}"),
        }
    }
}
