//! adbmux-transport-mem: in-process transport.
//!
//! This is the **semantic reference** transport. Packets pass through async
//! channels without touching the wire codec, so behavior differences between
//! this and any other transport point at a bug in the other transport.
//!
//! # Usage
//!
//! ```ignore
//! let (host_end, device_end) = MemTransport::pair();
//! ```

#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use adbmux_core::{Packet, Transport, TransportError};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

/// Channel capacity for each direction.
const CHANNEL_CAPACITY: usize = 64;

/// In-process transport: one end of a connected pair.
pub struct MemTransport {
    inner: Arc<MemInner>,
}

struct MemInner {
    /// Packets to the peer.
    tx: mpsc::Sender<Packet>,
    /// Packets from the peer (async mutex: held across the recv await).
    rx: AsyncMutex<mpsc::Receiver<Packet>>,
    closed: AtomicBool,
}

impl MemTransport {
    /// Create a connected pair. Packets sent on one end are received on the
    /// other, in order, both directions.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);

        let a = Self {
            inner: Arc::new(MemInner {
                tx: tx_b,
                rx: AsyncMutex::new(rx_a),
                closed: AtomicBool::new(false),
            }),
        };
        let b = Self {
            inner: Arc::new(MemInner {
                tx: tx_a,
                rx: AsyncMutex::new(rx_b),
                closed: AtomicBool::new(false),
            }),
        };
        (a, b)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl Transport for MemTransport {
    async fn send_packet(&self, packet: &Packet) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.inner
            .tx
            .send(packet.clone())
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv_packet(&self) -> Result<Packet, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut rx = self.inner.rx.lock().await;
        rx.recv().await.ok_or(TransportError::Closed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.inner.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adbmux_core::Command;
    use bytes::Bytes;

    #[tokio::test]
    async fn send_recv() {
        let (a, b) = MemTransport::pair();
        let packet =
            Packet::with_payload(Command::Write, 1, 2, Bytes::from_static(b"ping"), true);
        a.send_packet(&packet).await.unwrap();
        let received = b.recv_packet().await.unwrap();
        assert_eq!(received, packet);
    }

    #[tokio::test]
    async fn peer_drop_is_closed() {
        let (a, b) = MemTransport::pair();
        drop(b);
        assert!(matches!(
            a.recv_packet().await,
            Err(TransportError::Closed)
        ));
        let packet = Packet::new(Command::Sync, 0, 0);
        assert!(matches!(
            a.send_packet(&packet).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn close_refuses_further_sends() {
        let (a, _b) = MemTransport::pair();
        a.close().await.unwrap();
        assert!(a.is_closed());
        let packet = Packet::new(Command::Sync, 0, 0);
        assert!(matches!(
            a.send_packet(&packet).await,
            Err(TransportError::Closed)
        ));
    }
}

/// Conformance scenarios shared with the other transports.
#[cfg(test)]
mod conformance_tests {
    use super::*;
    use adbmux_testkit::TransportFactory;

    struct MemFactory;

    impl TransportFactory for MemFactory {
        type Transport = MemTransport;

        async fn connect_pair() -> (Self::Transport, Self::Transport) {
            MemTransport::pair()
        }
    }

    #[tokio::test]
    async fn echo_roundtrip() {
        adbmux_testkit::run_echo_roundtrip::<MemFactory>().await;
    }

    #[tokio::test]
    async fn rejected_open() {
        adbmux_testkit::run_rejected_open::<MemFactory>().await;
    }

    #[tokio::test]
    async fn fragmented_write() {
        adbmux_testkit::run_fragmented_write::<MemFactory>().await;
    }

    #[tokio::test]
    async fn auth_handshake() {
        adbmux_testkit::run_auth_handshake::<MemFactory>().await;
    }

    #[tokio::test]
    async fn concurrent_sockets() {
        adbmux_testkit::run_concurrent_sockets::<MemFactory>().await;
    }

    #[tokio::test]
    async fn socket_stream_io() {
        adbmux_testkit::run_socket_stream_io::<MemFactory>().await;
    }
}
