//! adbmux-core: the host side of the ADB wire protocol.
//!
//! This crate implements the part of ADB that multiplexes many logical byte
//! streams (shell sessions, file sync, port forwards) over one packet
//! transport to a device:
//!
//! - Packet codec ([`Packet`], [`Command`])
//! - Handshake and RSA authentication ([`connect`], [`AdbKey`])
//! - The dispatcher ([`AdbSession`]) and its per-socket flow control
//! - Logical sockets ([`AdbSocket`], [`SocketStream`])
//! - The [`Transport`] trait the concrete adapters implement
//!
//! It deliberately does not interpret service payloads, enumerate USB
//! devices, or retry broken transports.

#![forbid(unsafe_code)]

mod banner;
mod error;
mod handshake;
mod keys;
mod packet;
mod session;
mod socket;
mod socket_stream;
mod transport;

pub use banner::*;
pub use error::*;
pub use handshake::*;
pub use keys::*;
pub use packet::*;
pub use session::{AcceptedService, AdbSession};
pub use socket::*;
pub use socket_stream::*;
pub use transport::*;
