//! `AsyncRead`/`AsyncWrite` adapter for sockets.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use crate::error::SocketError;
use crate::socket::AdbSocket;
use crate::transport::Transport;

type PendingWrite = Pin<Box<dyn Future<Output = Result<(), SocketError>> + Send + 'static>>;

/// A socket viewed as a plain byte stream.
///
/// - Reads drain inbound payloads; end of stream maps to EOF, a session
///   teardown to an error.
/// - Each write becomes one ack-gated socket write (re-chunked internally).
/// - `poll_shutdown` flushes and then starts the socket close.
pub struct SocketStream<T: Transport + 'static> {
    socket: AdbSocket<T>,
    read_buf: Bytes,
    read_done: bool,
    pending_write: Option<PendingWrite>,
    write_closed: bool,
}

impl<T: Transport + 'static> SocketStream<T> {
    pub(crate) fn new(socket: AdbSocket<T>) -> Self {
        Self {
            socket,
            read_buf: Bytes::new(),
            read_done: false,
            pending_write: None,
            write_closed: false,
        }
    }

    /// The wrapped socket's local id.
    pub fn local_id(&self) -> u32 {
        self.socket.local_id()
    }
}

fn io_error(e: SocketError) -> std::io::Error {
    let kind = match e {
        SocketError::Closed => std::io::ErrorKind::BrokenPipe,
        SocketError::ServiceUnavailable => std::io::ErrorKind::NotFound,
    };
    std::io::Error::new(kind, e)
}

impl<T: Transport + 'static> AsyncRead for SocketStream<T> {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        if self.read_done {
            return Poll::Ready(Ok(()));
        }

        // Drain buffered bytes first.
        if !self.read_buf.is_empty() {
            let to_copy = std::cmp::min(self.read_buf.len(), buf.remaining());
            buf.put_slice(&self.read_buf.split_to(to_copy));
            return Poll::Ready(Ok(()));
        }

        match Pin::new(&mut self.socket.reader).poll_recv(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(None) => {
                self.read_done = true;
                if self.socket.shared.state.lock().failed {
                    Poll::Ready(Err(io_error(SocketError::Closed)))
                } else {
                    Poll::Ready(Ok(()))
                }
            }
            Poll::Ready(Some(chunk)) => {
                self.read_buf = chunk;
                // Recurse once to copy into the caller's buffer.
                self.poll_read(cx, buf)
            }
        }
    }
}

impl<T: Transport + 'static> AsyncWrite for SocketStream<T> {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        if self.write_closed {
            return Poll::Ready(Err(io_error(SocketError::Closed)));
        }

        // Drive any write already in flight to completion first.
        if let Some(pending) = self.pending_write.as_mut() {
            match pending.as_mut().poll(cx) {
                Poll::Ready(Ok(())) => self.pending_write = None,
                Poll::Ready(Err(e)) => {
                    self.pending_write = None;
                    return Poll::Ready(Err(io_error(e)));
                }
                Poll::Pending => return Poll::Pending,
            }
        }

        if data.is_empty() {
            return Poll::Ready(Ok(0));
        }

        let session = self.socket.session.clone();
        let shared = self.socket.shared.clone();
        let bytes = data.to_vec();
        let len = bytes.len();
        self.pending_write = Some(Box::pin(async move {
            session.write_socket(&shared, &bytes).await
        }));

        // Report the bytes as accepted now; completion is observed by the
        // next poll_write/poll_flush.
        match self.pending_write.as_mut().unwrap().as_mut().poll(cx) {
            Poll::Ready(Ok(())) => {
                self.pending_write = None;
                Poll::Ready(Ok(len))
            }
            Poll::Ready(Err(e)) => {
                self.pending_write = None;
                Poll::Ready(Err(io_error(e)))
            }
            Poll::Pending => Poll::Ready(Ok(len)),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.pending_write.as_mut() {
            None => Poll::Ready(Ok(())),
            Some(pending) => match pending.as_mut().poll(cx) {
                Poll::Ready(Ok(())) => {
                    self.pending_write = None;
                    Poll::Ready(Ok(()))
                }
                Poll::Ready(Err(e)) => {
                    self.pending_write = None;
                    Poll::Ready(Err(io_error(e)))
                }
                Poll::Pending => Poll::Pending,
            },
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        if self.write_closed {
            return Poll::Ready(Ok(()));
        }
        match self.as_mut().poll_flush(cx) {
            Poll::Ready(Ok(())) => {}
            Poll::Ready(Err(e)) => return Poll::Ready(Err(e)),
            Poll::Pending => return Poll::Pending,
        }

        self.write_closed = true;
        let session = self.socket.session.clone();
        let shared = self.socket.shared.clone();
        tokio::spawn(async move {
            let _ = session.close_socket(&shared).await;
        });
        Poll::Ready(Ok(()))
    }
}
