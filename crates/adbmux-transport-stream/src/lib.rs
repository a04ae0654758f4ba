//! adbmux-transport-stream: ADB wire framing over byte streams.
//!
//! Works with any `AsyncRead + AsyncWrite` stream: a TCP connection to
//! `device:5555`, an emulator console channel, or a USB bridge exposing bulk
//! endpoints as a stream.
//!
//! # Wire format
//!
//! Exactly what adbd speaks: each packet is the 24-byte little-endian header
//! followed by `payload_length` payload bytes. One `send_packet` produces one
//! contiguous header+payload write sequence; an internal lock keeps concurrent
//! senders from interleaving packet halves.

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use adbmux_core::{
    Packet, PacketHeader, Transport, TransportError, WireError, HEADER_LEN, MAX_PAYLOAD_CEILING,
};
use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex as AsyncMutex;

/// Stream-based transport.
///
/// Generic over split read/write halves so send and receive proceed
/// concurrently.
pub struct StreamTransport<R, W> {
    inner: Arc<StreamInner<R, W>>,
}

struct StreamInner<R, W> {
    /// Read half (async mutex: held across awaits).
    reader: AsyncMutex<R>,
    /// Write half (async mutex: serializes whole packets).
    writer: AsyncMutex<W>,
    closed: AtomicBool,
    /// Allocation bound for inbound payloads, independent of negotiation.
    max_payload: usize,
}

impl<S> StreamTransport<ReadHalf<S>, WriteHalf<S>>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Split `stream` into a transport.
    pub fn new(stream: S) -> Self {
        Self::with_max_payload(stream, MAX_PAYLOAD_CEILING)
    }

    /// Like [`StreamTransport::new`] with a custom inbound payload cap.
    pub fn with_max_payload(stream: S, max_payload: usize) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            inner: Arc::new(StreamInner {
                reader: AsyncMutex::new(reader),
                writer: AsyncMutex::new(writer),
                closed: AtomicBool::new(false),
                max_payload,
            }),
        }
    }
}

impl StreamTransport<ReadHalf<tokio::io::DuplexStream>, WriteHalf<tokio::io::DuplexStream>> {
    /// A connected pair of stream transports for testing, built on
    /// `tokio::io::duplex`.
    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(65536);
        (Self::new(a), Self::new(b))
    }
}

impl<R, W> StreamTransport<R, W> {
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl<R, W> Transport for StreamTransport<R, W>
where
    R: AsyncRead + Unpin + Send + Sync + 'static,
    W: AsyncWrite + Unpin + Send + Sync + 'static,
{
    async fn send_packet(&self, packet: &Packet) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let header = packet.encode_header();
        let mut writer = self.inner.writer.lock().await;
        writer.write_all(&header).await?;
        if !packet.payload.is_empty() {
            writer.write_all(&packet.payload).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    async fn recv_packet(&self) -> Result<Packet, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let mut reader = self.inner.reader.lock().await;

        let mut header = [0u8; HEADER_LEN];
        reader.read_exact(&mut header).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                // EOF on a packet boundary is a plain disconnect.
                TransportError::Closed
            } else {
                TransportError::Io(e)
            }
        })?;
        let header = PacketHeader::decode(&header).map_err(TransportError::Wire)?;

        let payload_len = header.payload_len as usize;
        if payload_len > self.inner.max_payload {
            return Err(TransportError::Wire(WireError::PayloadTooLarge {
                len: payload_len,
                max: self.inner.max_payload,
            }));
        }

        let payload = if payload_len > 0 {
            let mut buf = BytesMut::zeroed(payload_len);
            reader.read_exact(&mut buf).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::UnexpectedEof {
                    TransportError::Wire(WireError::ShortRead)
                } else {
                    TransportError::Io(e)
                }
            })?;
            buf.freeze()
        } else {
            bytes::Bytes::new()
        };

        Ok(header.into_packet(payload))
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.closed.store(true, Ordering::Release);
        // Signal EOF to the peer; ignore failures from already-dead streams.
        let mut writer = self.inner.writer.lock().await;
        let _ = writer.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adbmux_core::Command;
    use bytes::Bytes;

    #[tokio::test]
    async fn send_recv_roundtrip() {
        let (a, b) = StreamTransport::pair();
        let packet =
            Packet::with_payload(Command::Open, 1, 0, Bytes::from_static(b"shell:\0"), true);
        a.send_packet(&packet).await.unwrap();
        let received = b.recv_packet().await.unwrap();
        assert_eq!(received, packet);
    }

    #[tokio::test]
    async fn empty_payload_roundtrip() {
        let (a, b) = StreamTransport::pair();
        let packet = Packet::new(Command::Okay, 3, 9);
        a.send_packet(&packet).await.unwrap();
        assert_eq!(b.recv_packet().await.unwrap(), packet);
    }

    #[tokio::test]
    async fn eof_between_packets_is_closed() {
        let (a, b) = StreamTransport::pair();
        a.close().await.unwrap();
        assert!(matches!(
            b.recv_packet().await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn eof_mid_payload_is_short_read() {
        let (a, b) = tokio::io::duplex(65536);
        let b = StreamTransport::new(b);

        // A real header promising 16 payload bytes, then only 4 and EOF.
        let packet =
            Packet::with_payload(Command::Write, 1, 2, Bytes::from_static(&[0u8; 16]), true);
        let (_, mut write_a) = tokio::io::split(a);
        write_a.write_all(&packet.encode_header()).await.unwrap();
        write_a.write_all(&[0u8; 4]).await.unwrap();
        write_a.shutdown().await.unwrap();
        drop(write_a);

        assert!(matches!(
            b.recv_packet().await,
            Err(TransportError::Wire(WireError::ShortRead))
        ));
    }

    #[tokio::test]
    async fn corrupt_magic_is_rejected() {
        let (a, b) = tokio::io::duplex(65536);
        let b = StreamTransport::new(b);

        let mut header = Packet::new(Command::Okay, 0, 0).encode_header();
        header[21] ^= 0xFF;
        let (_, mut write_a) = tokio::io::split(a);
        write_a.write_all(&header).await.unwrap();

        assert!(matches!(
            b.recv_packet().await,
            Err(TransportError::Wire(WireError::BadMagic { .. }))
        ));
    }

    #[tokio::test]
    async fn oversized_payload_is_capped() {
        let (a, b) = tokio::io::duplex(65536);
        let b = StreamTransport::with_max_payload(b, 64);

        let packet =
            Packet::with_payload(Command::Write, 1, 2, Bytes::from(vec![0u8; 128]), true);
        let (_, mut write_a) = tokio::io::split(a);
        write_a.write_all(&packet.encode_header()).await.unwrap();

        assert!(matches!(
            b.recv_packet().await,
            Err(TransportError::Wire(WireError::PayloadTooLarge { len: 128, max: 64 }))
        ));
    }
}

/// Conformance scenarios shared with the other transports.
#[cfg(test)]
mod conformance_tests {
    use super::*;
    use adbmux_testkit::TransportFactory;

    struct StreamFactory;

    impl TransportFactory for StreamFactory {
        type Transport = StreamTransport<
            ReadHalf<tokio::io::DuplexStream>,
            WriteHalf<tokio::io::DuplexStream>,
        >;

        async fn connect_pair() -> (Self::Transport, Self::Transport) {
            StreamTransport::pair()
        }
    }

    #[tokio::test]
    async fn echo_roundtrip() {
        adbmux_testkit::run_echo_roundtrip::<StreamFactory>().await;
    }

    #[tokio::test]
    async fn rejected_open() {
        adbmux_testkit::run_rejected_open::<StreamFactory>().await;
    }

    #[tokio::test]
    async fn fragmented_write() {
        adbmux_testkit::run_fragmented_write::<StreamFactory>().await;
    }

    #[tokio::test]
    async fn auth_handshake() {
        adbmux_testkit::run_auth_handshake::<StreamFactory>().await;
    }

    #[tokio::test]
    async fn concurrent_sockets() {
        adbmux_testkit::run_concurrent_sockets::<StreamFactory>().await;
    }

    #[tokio::test]
    async fn socket_stream_io() {
        adbmux_testkit::run_socket_stream_io::<StreamFactory>().await;
    }
}
