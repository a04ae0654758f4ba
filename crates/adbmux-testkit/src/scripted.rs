//! A transport driven by the test instead of a peer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use adbmux_core::{Packet, Transport, TransportError};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;

/// How long [`ScriptHandle::expect`] waits before declaring the engine stuck.
const EXPECT_TIMEOUT: Duration = Duration::from_secs(5);

/// A [`Transport`] whose inbound packets are injected by the test and whose
/// outbound packets the test asserts on, one by one.
pub struct ScriptedTransport {
    inbound: AsyncMutex<mpsc::UnboundedReceiver<Packet>>,
    outbound: mpsc::UnboundedSender<Packet>,
    closed: AtomicBool,
}

/// The test's side of a [`ScriptedTransport`].
pub struct ScriptHandle {
    inject: Option<mpsc::UnboundedSender<Packet>>,
    outbound: mpsc::UnboundedReceiver<Packet>,
}

impl ScriptedTransport {
    pub fn new() -> (Self, ScriptHandle) {
        let (inject, inbound) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        (
            Self {
                inbound: AsyncMutex::new(inbound),
                outbound: outbound_tx,
                closed: AtomicBool::new(false),
            },
            ScriptHandle {
                inject: Some(inject),
                outbound: outbound_rx,
            },
        )
    }
}

impl ScriptHandle {
    /// Queue a packet for the engine to receive.
    pub fn inject(&self, packet: Packet) {
        self.inject
            .as_ref()
            .expect("transport already hung up")
            .send(packet)
            .expect("engine dropped the transport");
    }

    /// Simulate the device disconnecting: the engine's next receive reports
    /// end of stream.
    pub fn hang_up(&mut self) {
        self.inject = None;
    }

    /// The next packet the engine sent, or a panic if none shows up.
    pub async fn expect(&mut self) -> Packet {
        tokio::time::timeout(EXPECT_TIMEOUT, self.outbound.recv())
            .await
            .expect("timed out waiting for an outbound packet")
            .expect("engine dropped the transport")
    }

    /// Assert the engine stays quiet for `window`.
    pub async fn expect_quiet(&mut self, window: Duration) {
        if let Ok(packet) = tokio::time::timeout(window, self.outbound.recv()).await {
            panic!("expected silence, engine sent {packet:?}");
        }
    }
}

impl Transport for ScriptedTransport {
    async fn send_packet(&self, packet: &Packet) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.outbound
            .send(packet.clone())
            .map_err(|_| TransportError::Closed)
    }

    async fn recv_packet(&self) -> Result<Packet, TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        let mut inbound = self.inbound.lock().await;
        inbound.recv().await.ok_or(TransportError::Closed)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
