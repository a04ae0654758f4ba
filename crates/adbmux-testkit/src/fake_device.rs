//! A minimal adbd stand-in.
//!
//! Speaks just enough of the device side of the protocol to exercise the
//! host engine end to end: banner exchange, optional token auth, and an
//! `echo:*` service that mirrors every byte back, honoring the one-packet
//! write window in both directions.

use std::collections::{HashMap, VecDeque};

use adbmux_core::{
    Command, Packet, Transport, AUTH_RSAPUBLICKEY, AUTH_SIGNATURE, AUTH_TOKEN,
    VERSION, VERSION_SKIP_CHECKSUM,
};
use bytes::Bytes;
use rsa::{Pkcs1v15Sign, RsaPublicKey};
use sha1::Sha1;

/// Authentication posture of the fake device.
pub struct FakeAuth {
    /// The challenge sent in `AUTH(TOKEN)`.
    pub token: [u8; 20],
    /// Public keys whose signatures are accepted.
    pub trusted: Vec<RsaPublicKey>,
    /// Whether an `AUTH(RSAPUBLICKEY)` offer is auto-approved, as if the user
    /// tapped "allow". When false the device hangs up instead.
    pub accept_offered_key: bool,
}

pub struct FakeDeviceConfig {
    pub version: u32,
    pub max_payload: u32,
    pub banner: String,
    pub auth: Option<FakeAuth>,
}

impl Default for FakeDeviceConfig {
    fn default() -> Self {
        Self {
            version: VERSION,
            max_payload: 1024 * 1024,
            banner: "device::ro.product.name=fake;ro.product.model=FakeDevice;features=shell_v2,cmd".to_string(),
            auth: None,
        }
    }
}

struct FakeSocket {
    peer_id: u32,
    /// Echo payloads not yet sent because a `WRTE` is still unacked.
    backlog: VecDeque<Bytes>,
    awaiting_ack: bool,
}

/// Drive the device side of `transport` until the host disconnects.
///
/// Accepts any service whose name starts with `echo` and mirrors its bytes;
/// everything else is refused with `CLSE`.
pub async fn run_fake_device<T: Transport>(transport: T, config: FakeDeviceConfig) {
    let checksummed = config.version < VERSION_SKIP_CHECKSUM;
    let transport = &transport;
    let send = move |command, arg0, arg1, payload: Bytes| {
        let packet = Packet::with_payload(command, arg0, arg1, payload, checksummed);
        async move {
            let _ = transport.send_packet(&packet).await;
        }
    };

    // Banner exchange, challenging the host first when auth is configured.
    let Ok(hello) = transport.recv_packet().await else {
        return;
    };
    assert_eq!(hello.command, Command::Connect, "host must lead with CNXN");

    if let Some(auth) = &config.auth {
        send(
            Command::Auth,
            AUTH_TOKEN,
            0,
            Bytes::copy_from_slice(&auth.token),
        )
        .await;
        loop {
            let Ok(packet) = transport.recv_packet().await else {
                return;
            };
            match (packet.command, packet.arg0) {
                (Command::Auth, AUTH_SIGNATURE) => {
                    let accepted = auth.trusted.iter().any(|key| {
                        key.verify(Pkcs1v15Sign::new::<Sha1>(), &auth.token, &packet.payload)
                            .is_ok()
                    });
                    if accepted {
                        break;
                    }
                    // Unknown signature: challenge again so the host rotates
                    // to its next key.
                    send(
                        Command::Auth,
                        AUTH_TOKEN,
                        0,
                        Bytes::copy_from_slice(&auth.token),
                    )
                    .await;
                }
                (Command::Auth, AUTH_RSAPUBLICKEY) => {
                    if auth.accept_offered_key {
                        break;
                    }
                    // The user declined the prompt.
                    let _ = transport.close().await;
                    return;
                }
                _ => panic!("unexpected {} during auth", packet.command),
            }
        }
    }

    send(
        Command::Connect,
        config.version,
        config.max_payload,
        Bytes::from(config.banner.clone().into_bytes()),
    )
    .await;

    // Serve sockets. Keyed by our id; the host addresses us with it in arg1.
    let mut sockets: HashMap<u32, FakeSocket> = HashMap::new();
    let mut next_id: u32 = 100;

    loop {
        let Ok(packet) = transport.recv_packet().await else {
            return;
        };
        match packet.command {
            Command::Open => {
                let peer_id = packet.arg0;
                let service = packet
                    .payload
                    .split(|&b| b == 0)
                    .next()
                    .map(|s| String::from_utf8_lossy(s).into_owned())
                    .unwrap_or_default();
                if service.starts_with("echo") {
                    let id = next_id;
                    next_id += 1;
                    tracing::debug!(id, peer_id, service = %service, "fake device accepted");
                    sockets.insert(
                        id,
                        FakeSocket {
                            peer_id,
                            backlog: VecDeque::new(),
                            awaiting_ack: false,
                        },
                    );
                    send(Command::Okay, id, peer_id, Bytes::new()).await;
                } else {
                    send(Command::Close, 0, peer_id, Bytes::new()).await;
                }
            }
            Command::Write => {
                let id = packet.arg1;
                let Some(socket) = sockets.get_mut(&id) else {
                    send(Command::Close, 0, packet.arg0, Bytes::new()).await;
                    continue;
                };
                let peer_id = socket.peer_id;
                socket.backlog.push_back(packet.payload.clone());
                send(Command::Okay, id, peer_id, Bytes::new()).await;
                flush(socket, id, &send).await;
            }
            Command::Okay => {
                let id = packet.arg1;
                if let Some(socket) = sockets.get_mut(&id) {
                    socket.awaiting_ack = false;
                    flush(socket, id, &send).await;
                }
            }
            Command::Close => {
                let id = packet.arg1;
                if let Some(socket) = sockets.remove(&id) {
                    send(Command::Close, id, socket.peer_id, Bytes::new()).await;
                }
            }
            Command::Sync => {}
            other => panic!("fake device got unexpected {other}"),
        }
    }
}

/// Send the next backlogged echo if the window is open.
async fn flush<F, Fut>(socket: &mut FakeSocket, id: u32, send: &F)
where
    F: Fn(Command, u32, u32, Bytes) -> Fut,
    Fut: std::future::Future<Output = ()>,
{
    if socket.awaiting_ack {
        return;
    }
    if let Some(payload) = socket.backlog.pop_front() {
        socket.awaiting_ack = true;
        send(Command::Write, id, socket.peer_id, payload).await;
    }
}
