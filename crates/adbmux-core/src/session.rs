//! `AdbSession`: the packet dispatcher that owns the transport.
//!
//! A session multiplexes every logical socket over one transport. The key
//! invariant is that only [`AdbSession::run`] calls `recv_packet()` - all
//! routing happens from that single demux loop.
//!
//! # Architecture
//!
//! ```text
//!                 ┌───────────────────────────────────┐
//!                 │            AdbSession             │
//!                 ├───────────────────────────────────┤
//!                 │  transport: T                     │
//!                 │  sockets: HashMap<local_id,       │
//!                 │           Arc<SocketShared>>      │
//!                 │  handler: Option<ServiceHandler>  │
//!                 └────────────────┬──────────────────┘
//!                                  │
//!                             demux loop
//!                                  │
//!         ┌───────────────┬───────┴──────┬───────────────┐
//!         │               │              │               │
//!   WRTE: enqueue    OKAY: resolve   CLSE: drive    OPEN: ask the
//!   payload, then    the opener or   the two-phase  incoming-service
//!   ack with OKAY    a pending       close FSM      handler
//!                    write ack
//! ```
//!
//! Flow control is ADB's one-packet window: a socket sends one `WRTE` and may
//! not send the next until the peer's `OKAY` arrives. Symmetrically, the demux
//! loop acks an inbound `WRTE` only after its payload is accepted into the
//! socket's inbound queue, and before reading the next packet from the
//! transport - a slow consumer therefore delays the ack instead of letting the
//! queue grow without bound.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};

use crate::error::{SessionError, SocketError, TransportError};
use crate::handshake::ConnectionInfo;
use crate::packet::{Command, Packet};
use crate::socket::AdbSocket;
use crate::transport::Transport;

/// Capacity of a socket's inbound queue, in `WRTE` payloads.
const INBOUND_CHUNKS: usize = 32;

/// Lifecycle of one logical socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SocketPhase {
    /// `OPEN` sent, waiting for the peer's first `OKAY`.
    Opening,
    /// Both ids known; data may flow.
    Established,
    /// We sent `CLSE` and are waiting for the peer's.
    HalfClosed,
    /// Both `CLSE`s exchanged, or the session tore down.
    Closed,
}

pub(crate) struct SocketState {
    pub(crate) phase: SocketPhase,
    pub(crate) remote_id: u32,
    /// At most one outstanding write waiting for `OKAY`.
    pub(crate) pending_ack: Option<oneshot::Sender<Result<(), SocketError>>>,
    /// Resolves the `open()` caller once the first `OKAY` or `CLSE` arrives.
    pub(crate) opened: Option<oneshot::Sender<Result<(), SocketError>>>,
    /// Where inbound `WRTE` payloads go. Dropped to end the readable half.
    pub(crate) inbound: Option<mpsc::Sender<Bytes>>,
    /// Set when the socket died with the session rather than by a clean close.
    pub(crate) failed: bool,
}

/// State shared between the session's table and a socket handle.
pub(crate) struct SocketShared {
    pub(crate) local_id: u32,
    pub(crate) service: String,
    pub(crate) local_created: bool,
    pub(crate) state: Mutex<SocketState>,
}

struct SocketTable {
    entries: HashMap<u32, Arc<SocketShared>>,
    next_id: u32,
}

impl SocketTable {
    /// Allocate the next local id: monotonically increasing, never zero, and
    /// on wraparound never an id still present in the table.
    fn alloc_id(&mut self) -> u32 {
        loop {
            let id = self.next_id;
            self.next_id = self.next_id.wrapping_add(1);
            if id != 0 && !self.entries.contains_key(&id) {
                return id;
            }
        }
    }
}

/// Streams a consumer hands the session when accepting a device-initiated
/// service.
pub struct AcceptedService {
    /// Inbound `WRTE` payloads are delivered here, in arrival order.
    pub sink: mpsc::Sender<Bytes>,
    /// Chunks to write back to the device. Closing the sending side closes
    /// the socket.
    pub source: mpsc::Receiver<Bytes>,
}

type BoxedServiceHandler = Box<dyn Fn(&str, u32) -> Option<AcceptedService> + Send + Sync>;

struct Inner<T: Transport> {
    transport: T,
    info: ConnectionInfo,
    sockets: Mutex<SocketTable>,
    handler: Mutex<Option<BoxedServiceHandler>>,
    closed: AtomicBool,
}

/// A connected ADB session. Cheap to clone; all clones share the transport
/// and socket table.
pub struct AdbSession<T: Transport> {
    inner: Arc<Inner<T>>,
}

impl<T: Transport> Clone for AdbSession<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Transport> std::fmt::Debug for AdbSession<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdbSession").finish_non_exhaustive()
    }
}

impl<T: Transport + 'static> AdbSession<T> {
    /// Built by [`crate::connect`] once the handshake has settled.
    pub(crate) fn new(transport: T, info: ConnectionInfo) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                info,
                sockets: Mutex::new(SocketTable {
                    entries: HashMap::new(),
                    next_id: 1,
                }),
                handler: Mutex::new(None),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// What the handshake negotiated.
    pub fn connection_info(&self) -> &ConnectionInfo {
        &self.inner.info
    }

    /// Whether the session has been closed or torn down.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Register the handler consulted when the device opens a socket toward
    /// the host (reverse port forwards and the like). With no handler, every
    /// device-initiated `OPEN` is refused.
    pub fn set_service_handler<F>(&self, handler: F)
    where
        F: Fn(&str, u32) -> Option<AcceptedService> + Send + Sync + 'static,
    {
        *self.inner.handler.lock() = Some(Box::new(handler));
    }

    /// Local ids of all live sockets, sorted (for diagnostics).
    pub fn socket_ids(&self) -> Vec<u32> {
        let table = self.inner.sockets.lock();
        let mut ids: Vec<u32> = table.entries.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Open a logical socket for `service` (`"shell:ls"`, `"sync:"`,
    /// `"tcp:5555"`, ...).
    ///
    /// Suspends until the device answers `OKAY` (socket ready) or `CLSE`
    /// ([`SocketError::ServiceUnavailable`]). There is no built-in timeout;
    /// race with a timer if you need one. Dropping the returned future before
    /// it resolves cancels the open and tells the device so.
    pub async fn open(&self, service: &str) -> Result<AdbSocket<T>, SocketError> {
        if self.is_closed() {
            return Err(SocketError::Closed);
        }

        let (opened_tx, opened_rx) = oneshot::channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CHUNKS);
        let shared = {
            let mut table = self.inner.sockets.lock();
            let local_id = table.alloc_id();
            let shared = Arc::new(SocketShared {
                local_id,
                service: service.to_string(),
                local_created: true,
                state: Mutex::new(SocketState {
                    phase: SocketPhase::Opening,
                    remote_id: 0,
                    pending_ack: None,
                    opened: Some(opened_tx),
                    inbound: Some(inbound_tx),
                    failed: false,
                }),
            });
            table.entries.insert(local_id, shared.clone());
            shared
        };
        tracing::debug!(local_id = shared.local_id, service, "opening socket");

        // If this future is dropped before the peer answers, the guard
        // retracts the entry and tells the peer the id is dead.
        let mut guard = OpenGuard {
            session: self.clone(),
            local_id: shared.local_id,
            armed: true,
        };

        let mut payload = BytesMut::with_capacity(service.len() + 1);
        payload.put_slice(service.as_bytes());
        payload.put_u8(0);
        if self
            .send(Command::Open, shared.local_id, 0, payload.freeze())
            .await
            .is_err()
        {
            guard.armed = false;
            self.inner.sockets.lock().entries.remove(&shared.local_id);
            return Err(SocketError::Closed);
        }

        let outcome = opened_rx.await;
        guard.armed = false;
        match outcome {
            Ok(Ok(())) => {
                tracing::debug!(
                    local_id = shared.local_id,
                    remote_id = shared.state.lock().remote_id,
                    "socket established"
                );
                Ok(AdbSocket {
                    session: self.clone(),
                    shared,
                    reader: inbound_rx,
                })
            }
            Ok(Err(e)) => Err(e),
            // Sender dropped without a verdict: the session tore down.
            Err(_) => Err(SocketError::Closed),
        }
    }

    /// Run the demux loop until the transport closes or the protocol is
    /// violated, then tear down every socket. Spawn this right after
    /// connecting:
    ///
    /// ```ignore
    /// let session = adbmux_core::connect(transport, options, &keys).await?;
    /// tokio::spawn(session.clone().run());
    /// ```
    pub async fn run(self) -> Result<(), SessionError> {
        tracing::debug!("demux loop started");
        let result = self.demux().await;
        match &result {
            Ok(()) => tracing::debug!("transport closed, tearing down"),
            Err(e) => tracing::warn!(error = %e, "session failed, tearing down"),
        }
        self.teardown();
        let _ = self.inner.transport.close().await;
        result
    }

    /// Close the session: release the transport and fail every socket.
    pub async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!("closing session");
        let _ = self.inner.transport.close().await;
        self.teardown();
    }

    async fn demux(&self) -> Result<(), SessionError> {
        loop {
            if self.is_closed() {
                return Ok(());
            }
            let packet = match self.inner.transport.recv_packet().await {
                Ok(packet) => packet,
                Err(TransportError::Closed) => return Ok(()),
                Err(e) => return Err(e.into()),
            };
            tracing::trace!(
                command = %packet.command,
                arg0 = packet.arg0,
                arg1 = packet.arg1,
                len = packet.payload.len(),
                "recv"
            );

            if self.inner.info.checksum_required {
                let actual = Packet::payload_checksum(&packet.payload);
                if actual != packet.checksum {
                    return Err(SessionError::BadChecksum {
                        expected: packet.checksum,
                        actual,
                    });
                }
            }
            if packet.payload.len() > self.inner.info.max_payload {
                return Err(SessionError::PayloadTooLarge {
                    len: packet.payload.len(),
                    max: self.inner.info.max_payload,
                });
            }

            match packet.command {
                Command::Write => {
                    self.handle_write(packet.arg0, packet.arg1, packet.payload)
                        .await?
                }
                Command::Okay => self.handle_okay(packet.arg0, packet.arg1),
                Command::Close => self.handle_close(packet.arg0, packet.arg1).await?,
                Command::Open => self.handle_open(packet.arg0, packet.payload).await?,
                Command::Sync => tracing::trace!("ignoring SYNC keepalive"),
                command @ (Command::Connect | Command::Auth) => {
                    return Err(SessionError::UnexpectedCommand(command));
                }
            }
        }
    }

    /// Inbound `WRTE`: enqueue, then ack. The ack goes out before the next
    /// packet is read so the peer's one-packet window stays closed until the
    /// payload is truly accepted.
    async fn handle_write(
        &self,
        remote_id: u32,
        local_id: u32,
        payload: Bytes,
    ) -> Result<(), SessionError> {
        let entry = self.inner.sockets.lock().entries.get(&local_id).cloned();
        let live = entry.and_then(|shared| {
            let state = shared.state.lock();
            match state.phase {
                SocketPhase::Opening | SocketPhase::Closed => None,
                SocketPhase::Established | SocketPhase::HalfClosed => Some((
                    state.inbound.clone(),
                    if state.remote_id != 0 {
                        state.remote_id
                    } else {
                        remote_id
                    },
                )),
            }
        });

        let Some((inbound, remote_id)) = live else {
            // Unknown or not-yet-open local id: tell the peer it is dead.
            tracing::debug!(local_id, remote_id, "WRTE for dead socket, closing peer id");
            return self
                .send(Command::Close, 0, remote_id, Bytes::new())
                .await
                .map_err(Into::into);
        };

        if let Some(inbound) = inbound {
            // Suspends when the queue is full, delaying the ack below.
            if inbound.send(payload).await.is_err() {
                tracing::trace!(local_id, "reader gone, payload dropped");
            }
        }
        self.send(Command::Okay, local_id, remote_id, Bytes::new())
            .await
            .map_err(Into::into)
    }

    fn handle_okay(&self, remote_id: u32, local_id: u32) {
        let Some(shared) = self.inner.sockets.lock().entries.get(&local_id).cloned() else {
            tracing::trace!(local_id, "OKAY for unknown socket, dropped");
            return;
        };
        let mut state = shared.state.lock();
        match state.phase {
            SocketPhase::Opening => {
                state.remote_id = remote_id;
                state.phase = SocketPhase::Established;
                if let Some(opened) = state.opened.take() {
                    let _ = opened.send(Ok(()));
                }
            }
            SocketPhase::Established => {
                if let Some(ack) = state.pending_ack.take() {
                    let _ = ack.send(Ok(()));
                } else {
                    // Benign reordering across a close boundary.
                    tracing::trace!(local_id, "OKAY with no write pending, dropped");
                }
            }
            SocketPhase::HalfClosed | SocketPhase::Closed => {}
        }
    }

    async fn handle_close(&self, remote_id: u32, local_id: u32) -> Result<(), SessionError> {
        let Some(shared) = self.inner.sockets.lock().entries.get(&local_id).cloned() else {
            tracing::trace!(local_id, "CLSE for unknown socket, dropped");
            return Ok(());
        };

        enum Reply {
            None,
            Close { remote_id: u32 },
        }
        let reply = {
            let mut state = shared.state.lock();
            match state.phase {
                SocketPhase::Opening => {
                    // Remote rejection of our OPEN.
                    state.phase = SocketPhase::Closed;
                    if let Some(opened) = state.opened.take() {
                        let _ = opened.send(Err(SocketError::ServiceUnavailable));
                    }
                    state.inbound = None;
                    Reply::None
                }
                SocketPhase::Established => {
                    // Peer-initiated close: answer with ours and dispose.
                    state.phase = SocketPhase::Closed;
                    if let Some(ack) = state.pending_ack.take() {
                        let _ = ack.send(Err(SocketError::Closed));
                    }
                    state.inbound = None;
                    Reply::Close {
                        remote_id: if state.remote_id != 0 {
                            state.remote_id
                        } else {
                            remote_id
                        },
                    }
                }
                SocketPhase::HalfClosed => {
                    // Our CLSE was already on the wire; this completes the
                    // handshake.
                    state.phase = SocketPhase::Closed;
                    state.inbound = None;
                    Reply::None
                }
                SocketPhase::Closed => Reply::None,
            }
        };
        self.inner.sockets.lock().entries.remove(&local_id);
        tracing::debug!(local_id, remote_id, "socket closed");

        if let Reply::Close { remote_id } = reply {
            self.send(Command::Close, local_id, remote_id, Bytes::new())
                .await?;
        }
        Ok(())
    }

    async fn handle_open(&self, remote_id: u32, payload: Bytes) -> Result<(), SessionError> {
        let service = service_name(&payload);
        let accepted = {
            let handler = self.inner.handler.lock();
            handler.as_ref().and_then(|handler| handler(&service, remote_id))
        };
        let Some(AcceptedService { sink, source }) = accepted else {
            tracing::debug!(remote_id, service = %service, "refusing device-initiated service");
            return self
                .send(Command::Close, 0, remote_id, Bytes::new())
                .await
                .map_err(Into::into);
        };

        let shared = {
            let mut table = self.inner.sockets.lock();
            let local_id = table.alloc_id();
            let shared = Arc::new(SocketShared {
                local_id,
                service: service.clone(),
                local_created: false,
                state: Mutex::new(SocketState {
                    phase: SocketPhase::Established,
                    remote_id,
                    pending_ack: None,
                    opened: None,
                    inbound: Some(sink),
                    failed: false,
                }),
            });
            table.entries.insert(local_id, shared.clone());
            shared
        };
        tracing::debug!(
            local_id = shared.local_id,
            remote_id,
            service = %service,
            "accepted device-initiated service"
        );
        self.send(Command::Okay, shared.local_id, remote_id, Bytes::new())
            .await?;

        let session = self.clone();
        tokio::spawn(session.pump_outbound(shared, source));
        Ok(())
    }

    /// Drives a consumer-provided stream through the ack-gated write path
    /// until it ends, then closes the socket.
    async fn pump_outbound(self, shared: Arc<SocketShared>, mut source: mpsc::Receiver<Bytes>) {
        while let Some(chunk) = source.recv().await {
            if let Err(e) = self.write_socket(&shared, &chunk).await {
                tracing::debug!(local_id = shared.local_id, error = %e, "outbound pump stopped");
                return;
            }
        }
        let _ = self.close_socket(&shared).await;
    }

    /// Write `data`, re-chunked at the negotiated max payload, one `WRTE` in
    /// flight at a time.
    pub(crate) async fn write_socket(
        &self,
        shared: &Arc<SocketShared>,
        data: &[u8],
    ) -> Result<(), SocketError> {
        for chunk in data.chunks(self.inner.info.max_payload) {
            let (ack_rx, remote_id) = {
                let mut state = shared.state.lock();
                if state.phase != SocketPhase::Established {
                    return Err(SocketError::Closed);
                }
                debug_assert!(state.pending_ack.is_none(), "write while write in flight");
                let (ack_tx, ack_rx) = oneshot::channel();
                state.pending_ack = Some(ack_tx);
                (ack_rx, state.remote_id)
            };

            self.send(
                Command::Write,
                shared.local_id,
                remote_id,
                Bytes::copy_from_slice(chunk),
            )
            .await
            .map_err(|_| SocketError::Closed)?;

            match ack_rx.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => return Err(e),
                Err(_) => return Err(SocketError::Closed),
            }
        }
        Ok(())
    }

    /// Initiate the two-phase close. Idempotent; resolves the moment our
    /// `CLSE` is on the wire, not when the peer's comes back.
    pub(crate) async fn close_socket(&self, shared: &Arc<SocketShared>) -> Result<(), SocketError> {
        enum Action {
            None,
            /// Cancelled before the peer answered our OPEN.
            Retract,
            HalfClose { remote_id: u32 },
        }
        let action = {
            let mut state = shared.state.lock();
            match state.phase {
                SocketPhase::Opening => {
                    state.phase = SocketPhase::Closed;
                    if let Some(opened) = state.opened.take() {
                        let _ = opened.send(Err(SocketError::Closed));
                    }
                    state.inbound = None;
                    Action::Retract
                }
                SocketPhase::Established => {
                    state.phase = SocketPhase::HalfClosed;
                    if let Some(ack) = state.pending_ack.take() {
                        let _ = ack.send(Err(SocketError::Closed));
                    }
                    Action::HalfClose {
                        remote_id: state.remote_id,
                    }
                }
                SocketPhase::HalfClosed | SocketPhase::Closed => Action::None,
            }
        };
        match action {
            Action::None => Ok(()),
            Action::Retract => {
                self.inner.sockets.lock().entries.remove(&shared.local_id);
                let _ = self
                    .send(Command::Close, shared.local_id, 0, Bytes::new())
                    .await;
                Ok(())
            }
            Action::HalfClose { remote_id } => {
                tracing::debug!(local_id = shared.local_id, remote_id, "closing socket");
                self.send(Command::Close, shared.local_id, remote_id, Bytes::new())
                    .await
                    .map_err(|_| SocketError::Closed)
            }
        }
    }

    async fn send(
        &self,
        command: Command,
        arg0: u32,
        arg1: u32,
        payload: Bytes,
    ) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let packet = Packet::with_payload(
            command,
            arg0,
            arg1,
            payload,
            self.inner.info.checksum_required,
        );
        tracing::trace!(
            command = %packet.command,
            arg0,
            arg1,
            len = packet.payload.len(),
            "send"
        );
        self.inner.transport.send_packet(&packet).await
    }

    /// Fail every socket. Safe to call more than once.
    fn teardown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let entries: Vec<Arc<SocketShared>> = {
            let mut table = self.inner.sockets.lock();
            table.entries.drain().map(|(_, shared)| shared).collect()
        };
        for shared in entries {
            let mut state = shared.state.lock();
            state.phase = SocketPhase::Closed;
            state.failed = true;
            if let Some(ack) = state.pending_ack.take() {
                let _ = ack.send(Err(SocketError::Closed));
            }
            if let Some(opened) = state.opened.take() {
                let _ = opened.send(Err(SocketError::Closed));
            }
            state.inbound = None;
        }
    }
}

/// Retracts a half-finished `open()` when its future is dropped.
struct OpenGuard<T: Transport + 'static> {
    session: AdbSession<T>,
    local_id: u32,
    armed: bool,
}

impl<T: Transport + 'static> Drop for OpenGuard<T> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let removed = self
            .session
            .inner
            .sockets
            .lock()
            .entries
            .remove(&self.local_id);
        let Some(shared) = removed else {
            return;
        };
        let remote_id = {
            let mut state = shared.state.lock();
            state.phase = SocketPhase::Closed;
            state.opened = None;
            state.inbound = None;
            state.remote_id
        };
        tracing::debug!(local_id = self.local_id, "open cancelled");
        let session = self.session.clone();
        let local_id = self.local_id;
        tokio::spawn(async move {
            let _ = session
                .send(Command::Close, local_id, remote_id, Bytes::new())
                .await;
        });
    }
}

fn service_name(payload: &[u8]) -> String {
    let end = payload
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(payload.len());
    String::from_utf8_lossy(&payload[..end]).into_owned()
}

// Note: session behaviour tests live in adbmux-testkit to avoid a circular
// dev-dependency between this crate and the test transports.
