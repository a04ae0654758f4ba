//! User-facing socket handles.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::SocketError;
use crate::session::{AdbSession, SocketPhase, SocketShared};
use crate::socket_stream::SocketStream;
use crate::transport::Transport;

/// One logical byte stream multiplexed over the session's transport.
///
/// Reads yield inbound payloads in arrival order; writes are re-chunked at
/// the negotiated max payload and gated on the peer's `OKAY`, so at most one
/// packet per socket is ever in flight. Dropping the socket without calling
/// [`AdbSocket::close`] starts a best-effort close in the background.
pub struct AdbSocket<T: Transport + 'static> {
    pub(crate) session: AdbSession<T>,
    pub(crate) shared: Arc<SocketShared>,
    pub(crate) reader: mpsc::Receiver<Bytes>,
}

impl<T: Transport + 'static> std::fmt::Debug for AdbSocket<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdbSocket").finish_non_exhaustive()
    }
}

impl<T: Transport + 'static> AdbSocket<T> {
    /// The id this side chose for the socket.
    pub fn local_id(&self) -> u32 {
        self.shared.local_id
    }

    /// The id the device chose, learned from its first `OKAY`.
    pub fn remote_id(&self) -> u32 {
        self.shared.state.lock().remote_id
    }

    /// The service string this socket was opened for. Empty when the device
    /// opened the socket toward us.
    pub fn service(&self) -> &str {
        &self.shared.service
    }

    /// Whether this side sent the `OPEN`.
    pub fn local_created(&self) -> bool {
        self.shared.local_created
    }

    /// Next inbound payload.
    ///
    /// `Ok(None)` is a clean end of stream (the peer closed);
    /// [`SocketError::Closed`] means the socket died with the session.
    pub async fn read(&mut self) -> Result<Option<Bytes>, SocketError> {
        match self.reader.recv().await {
            Some(chunk) => Ok(Some(chunk)),
            None if self.shared.state.lock().failed => Err(SocketError::Closed),
            None => Ok(None),
        }
    }

    /// Write `data` to the device. Returns once every chunk has been acked.
    ///
    /// No framing is preserved: the peer sees the same bytes, split at
    /// arbitrary packet boundaries. Not cancellation-safe mid-packet - once a
    /// `WRTE` is on the wire, either await the ack or close the socket.
    pub async fn write(&mut self, data: &[u8]) -> Result<(), SocketError> {
        self.session.write_socket(&self.shared, data).await
    }

    /// Start the two-phase close. Resolves once our `CLSE` is on the wire;
    /// the socket is fully CLOSED when the peer's `CLSE` comes back (or the
    /// session tears down). Idempotent.
    pub async fn close(&mut self) -> Result<(), SocketError> {
        self.session.close_socket(&self.shared).await
    }

    /// Adapt into a `tokio::io::AsyncRead + AsyncWrite` stream. Use
    /// `tokio::io::split` on the result if the two directions need to be
    /// driven from separate tasks.
    pub fn into_stream(self) -> SocketStream<T> {
        SocketStream::new(self)
    }
}

impl<T: Transport + 'static> Drop for AdbSocket<T> {
    fn drop(&mut self) {
        let live = matches!(
            self.shared.state.lock().phase,
            SocketPhase::Opening | SocketPhase::Established
        );
        if !live {
            return;
        }
        tracing::debug!(local_id = self.shared.local_id, "socket dropped, closing");
        let session = self.session.clone();
        let shared = self.shared.clone();
        tokio::spawn(async move {
            let _ = session.close_socket(&shared).await;
        });
    }
}
