//! Connection handshake: banner exchange and authentication.
//!
//! Runs exactly once, before the session's demux loop exists. The flow is
//! driven entirely by the device:
//!
//! ```text
//! host                       device
//!  │ CNXN(version,max,banner) │
//!  ├─────────────────────────>│
//!  │      AUTH(TOKEN, nonce)  │   (skipped for pre-authorized hosts)
//!  │<─────────────────────────┤
//!  │ AUTH(SIGNATURE, sig)     │   (next key on every fresh TOKEN;
//!  ├─────────────────────────>│    AUTH(RSAPUBLICKEY) once exhausted)
//!  │   CNXN(version,max,banner│
//!  │<─────────────────────────┤
//! ```

use crate::banner::{Banner, HOST_BANNER};
use crate::error::{ConnectError, TransportError};
use crate::keys::AdbKey;
use crate::packet::{Command, Packet, MAX_PAYLOAD, VERSION, VERSION_MIN, VERSION_SKIP_CHECKSUM};
use crate::session::AdbSession;
use crate::transport::Transport;
use bytes::Bytes;

/// `AUTH` arg0: the payload is a 20-byte challenge to sign.
pub const AUTH_TOKEN: u32 = 1;
/// `AUTH` arg0: the payload is our signature over the last challenge.
pub const AUTH_SIGNATURE: u32 = 2;
/// `AUTH` arg0: the payload is our public key, offered for user approval.
pub const AUTH_RSAPUBLICKEY: u32 = 3;

/// Knobs for [`connect`]. The defaults are what a current host sends.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Protocol version advertised in our `CNXN`.
    pub version: u32,
    /// Largest payload we are willing to receive.
    pub max_payload: usize,
    /// Our banner string.
    pub banner: String,
    /// Label appended to a public key offer, conventionally `user@host`.
    pub key_label: String,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            version: VERSION,
            max_payload: MAX_PAYLOAD,
            banner: HOST_BANNER.to_string(),
            key_label: "adbmux@localhost".to_string(),
        }
    }
}

/// What the handshake settled on.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    /// Negotiated protocol version: the lower of the two sides'.
    pub version: u32,
    /// Negotiated max payload: the lower of the two sides'.
    pub max_payload: usize,
    /// Whether payload checksums are emitted and enforced (legacy versions).
    pub checksum_required: bool,
    /// The device's parsed banner.
    pub device_banner: Banner,
}

/// Handshake with the device on the other end of `transport` and return the
/// multiplexing session. Spawn [`AdbSession::run`] on the result before using
/// it.
///
/// `keys` is tried in order against auth challenges; once exhausted, the first
/// key is offered to the device for interactive approval. An empty slice
/// fails with [`ConnectError::NoKeys`] if the device demands auth.
pub async fn connect<T: Transport + 'static>(
    transport: T,
    options: ConnectOptions,
    keys: &[AdbKey],
) -> Result<AdbSession<T>, ConnectError> {
    let hello = Packet::with_payload(
        Command::Connect,
        options.version,
        options.max_payload as u32,
        Bytes::from(options.banner.clone().into_bytes()),
        // The peer's version is unknown until its CNXN arrives, so the
        // handshake always carries legacy checksums.
        true,
    );
    transport.send_packet(&hello).await?;

    let mut next_key = 0usize;
    let mut authing = false;
    loop {
        let packet = match transport.recv_packet().await {
            Ok(packet) => packet,
            Err(TransportError::Closed) if authing => return Err(ConnectError::AuthRejected),
            Err(e) => return Err(e.into()),
        };
        if packet.checksum != 0 && !packet.checksum_matches() {
            return Err(ConnectError::BadChecksum {
                expected: packet.checksum,
                actual: Packet::payload_checksum(&packet.payload),
            });
        }

        match packet.command {
            Command::Connect => {
                let version = packet.arg0.min(options.version);
                if version < VERSION_MIN {
                    return Err(ConnectError::UnsupportedVersion(packet.arg0));
                }
                let max_payload = (packet.arg1 as usize).min(options.max_payload);
                let device_banner = Banner::parse(&packet.payload);
                tracing::debug!(
                    version = format_args!("{version:#010x}"),
                    max_payload,
                    kind = %device_banner.kind,
                    "handshake complete"
                );
                let info = ConnectionInfo {
                    version,
                    max_payload,
                    checksum_required: version < VERSION_SKIP_CHECKSUM,
                    device_banner,
                };
                return Ok(AdbSession::new(transport, info));
            }
            Command::Auth if packet.arg0 == AUTH_TOKEN => {
                authing = true;
                if keys.is_empty() {
                    return Err(ConnectError::NoKeys);
                }
                if let Some(key) = keys.get(next_key) {
                    tracing::debug!(key = next_key, "signing auth challenge");
                    next_key += 1;
                    let signature = key.sign_token(&packet.payload)?;
                    let reply = Packet::with_payload(
                        Command::Auth,
                        AUTH_SIGNATURE,
                        0,
                        Bytes::from(signature),
                        true,
                    );
                    transport.send_packet(&reply).await?;
                } else {
                    // Every key was refused: offer the first one's public
                    // half and wait for the on-device prompt.
                    tracing::debug!("all keys refused, offering public key");
                    let reply = Packet::with_payload(
                        Command::Auth,
                        AUTH_RSAPUBLICKEY,
                        0,
                        keys[0].public_key_payload(&options.key_label),
                        true,
                    );
                    transport.send_packet(&reply).await?;
                }
            }
            Command::Sync => continue,
            command => return Err(ConnectError::UnexpectedCommand(command)),
        }
    }
}
