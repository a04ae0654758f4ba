//! Transport trait.

use std::future::Future;

use crate::error::TransportError;
use crate::packet::Packet;

/// A transport moves decoded packets between this host and one device.
///
/// Transports are responsible for:
/// - Physical framing (e.g. one bulk read for the 24-byte header, another for
///   the payload)
/// - Never interleaving the header and payload of one packet with another
///   packet's bytes: concurrent `send_packet` calls must serialize internally
/// - Reporting disconnection as [`TransportError::Closed`]
///
/// Transports are NOT responsible for:
/// - Checksum enforcement (connection-state dependent; the session owns it)
/// - Socket semantics, ids, or flow control
///
/// Invariant: packets are delivered reliably and in order, both directions.
pub trait Transport: Send + Sync {
    /// Send one packet to the peer.
    fn send_packet(
        &self,
        packet: &Packet,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Receive the next packet from the peer.
    ///
    /// Only the session's demux loop (and the handshake that precedes it) may
    /// call this; competing receivers would race for inbound packets.
    fn recv_packet(&self) -> impl Future<Output = Result<Packet, TransportError>> + Send;

    /// Shut the transport down. Subsequent sends fail with
    /// [`TransportError::Closed`].
    fn close(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
