//! adbmux: the host side of the Android Debug Bridge protocol.
//!
//! This crate multiplexes many logical byte streams - shell sessions, file
//! sync, port forwards - over a single packet transport to one device, the
//! way the `adb` host binary does: a connection handshake with optional RSA
//! authentication, then a demux loop routing `OPEN`/`OKAY`/`WRTE`/`CLSE`
//! packets between logical sockets, with ADB's one-packet-per-socket write
//! window.
//!
//! # Quick start
//!
//! ```ignore
//! use adbmux::{connect, AdbKey, ConnectOptions, StreamTransport};
//! use tokio::net::TcpStream;
//!
//! let stream = TcpStream::connect("192.168.1.42:5555").await?;
//! let key = AdbKey::from_pkcs8_pem(&std::fs::read_to_string(key_path)?)?;
//!
//! let session = connect(StreamTransport::new(stream), ConnectOptions::default(), &[key]).await?;
//! tokio::spawn(session.clone().run());
//!
//! let mut shell = session.open("shell:getprop ro.product.model").await?;
//! while let Some(chunk) = shell.read().await? {
//!     print!("{}", String::from_utf8_lossy(&chunk));
//! }
//! ```
//!
//! # Transports
//!
//! Concrete transports are feature-gated:
//!
//! - **stream** (default): any `AsyncRead + AsyncWrite` stream - TCP to
//!   `device:5555`, emulator channels, USB bridges
//! - **mem**: an in-process packet pair, mostly for tests
//!
//! Anything implementing [`Transport`] works; the engine never touches the
//! physical link itself.
//!
//! # Device-initiated sockets
//!
//! Reverse port forwards arrive as `OPEN` packets from the device. Register a
//! handler with [`AdbSession::set_service_handler`] to accept them; without
//! one, every reverse open is refused.

#![forbid(unsafe_code)]

pub use adbmux_core::{
    connect, AcceptedService, AdbKey, AdbSession, AdbSocket, Banner, Command, ConnectError,
    ConnectOptions, ConnectionInfo, Packet, SessionError, SocketError, SocketStream, Transport,
    TransportError, WireError,
};

/// Everything from the core crate, for uses beyond the curated re-exports.
pub use adbmux_core;

/// Transport implementations, each behind its feature flag.
pub mod transport {
    #[cfg(feature = "mem")]
    pub use adbmux_transport_mem::MemTransport;

    #[cfg(feature = "stream")]
    pub use adbmux_transport_stream::StreamTransport;
}

#[cfg(feature = "mem")]
pub use transport::MemTransport;

#[cfg(feature = "stream")]
pub use transport::StreamTransport;

/// Convenient imports.
///
/// ```ignore
/// use adbmux::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{connect, AdbKey, AdbSession, AdbSocket, ConnectOptions, Transport};

    #[cfg(feature = "stream")]
    pub use crate::StreamTransport;
}
