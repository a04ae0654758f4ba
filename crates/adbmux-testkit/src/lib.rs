//! adbmux-testkit: shared test harness for the ADB host engine.
//!
//! Provides:
//! - [`TransportFactory`] plus conformance scenarios every transport must
//!   pass (run from a `#[cfg(test)]` module in each transport crate)
//! - [`ScriptedTransport`], a transport the test drives packet by packet
//! - [`run_fake_device`], a minimal adbd stand-in for end-to-end scenarios
//!
//! Session behaviour tests live in this crate's `tests/` directory rather
//! than in adbmux-core, so the core crate never dev-depends on its own
//! transports.

use std::future::Future;
use std::time::Duration;

use adbmux_core::{
    connect, AdbKey, AdbSession, Command, ConnectError, ConnectOptions, Packet, SessionError,
    Transport,
};
use bytes::Bytes;
use rand::Rng;
use rsa::RsaPrivateKey;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinHandle;

mod fake_device;
mod scripted;

pub use fake_device::{run_fake_device, FakeAuth, FakeDeviceConfig};
pub use scripted::{ScriptHandle, ScriptedTransport};

/// Upper bound on any single scenario; a hang below this is a real deadlock.
const SCENARIO_TIMEOUT: Duration = Duration::from_secs(30);

/// Install a fmt subscriber honoring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Fail loudly instead of hanging the whole test run.
pub async fn with_timeout<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(SCENARIO_TIMEOUT, future)
        .await
        .expect("scenario timed out")
}

/// A fresh RSA-2048 host key.
pub fn generate_key() -> AdbKey {
    AdbKey::new(RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("generate RSA key"))
}

/// A random 20-byte auth challenge.
pub fn generate_token() -> [u8; 20] {
    let mut token = [0u8; 20];
    rand::thread_rng().fill(&mut token[..]);
    token
}

/// Factory trait for creating connected transport pairs.
///
/// Each transport crate implements this and runs the shared `run_*` scenarios
/// from its own test module.
pub trait TransportFactory: Send + Sync + 'static {
    type Transport: Transport + 'static;

    /// Create a connected pair: packets sent on one end arrive on the other.
    fn connect_pair() -> impl Future<Output = (Self::Transport, Self::Transport)> + Send;
}

/// Handshake against a [`ScriptedTransport`] and spawn the demux loop.
///
/// Injects the device's `CNXN(version, max_payload, ...)`, consumes the
/// host's own `CNXN` from the outbound queue, and returns the running
/// session.
pub async fn scripted_session(
    version: u32,
    max_payload: u32,
) -> (
    AdbSession<ScriptedTransport>,
    ScriptHandle,
    JoinHandle<Result<(), SessionError>>,
) {
    init_tracing();
    let (transport, mut handle) = ScriptedTransport::new();
    handle.inject(Packet::with_payload(
        Command::Connect,
        version,
        max_payload,
        Bytes::from_static(b"device::ro.product.name=scripted;features=shell_v2"),
        true,
    ));
    let session = connect(transport, ConnectOptions::default(), &[])
        .await
        .expect("scripted handshake");
    let hello = handle.expect().await;
    assert_eq!(hello.command, Command::Connect);
    let demux = tokio::spawn(session.clone().run());
    (session, handle, demux)
}

// ============================================================================
// Conformance scenarios
// ============================================================================

async fn connected_session<F: TransportFactory>(
    config: FakeDeviceConfig,
    keys: &[AdbKey],
) -> AdbSession<F::Transport> {
    let (host, device) = F::connect_pair().await;
    tokio::spawn(run_fake_device(device, config));
    let session = connect(host, ConnectOptions::default(), keys)
        .await
        .expect("handshake with fake device");
    tokio::spawn(session.clone().run());
    session
}

/// Open an echo service, write, read the same bytes back, close.
pub async fn run_echo_roundtrip<F: TransportFactory>() {
    init_tracing();
    with_timeout(async {
        let session = connected_session::<F>(FakeDeviceConfig::default(), &[]).await;

        let mut socket = session.open("echo:").await.expect("open echo:");
        assert!(socket.local_created());
        socket.write(b"hello device").await.expect("write");

        let mut echoed = Vec::new();
        while echoed.len() < 12 {
            match socket.read().await.expect("read") {
                Some(chunk) => echoed.extend_from_slice(&chunk),
                None => break,
            }
        }
        assert_eq!(echoed, b"hello device");

        socket.close().await.expect("close");
        session.close().await;
    })
    .await;
}

/// An unknown service fails that open only; the session keeps working.
pub async fn run_rejected_open<F: TransportFactory>() {
    init_tracing();
    with_timeout(async {
        let session = connected_session::<F>(FakeDeviceConfig::default(), &[]).await;

        let err = session.open("bogus:").await.expect_err("bogus: must fail");
        assert_eq!(err, adbmux_core::SocketError::ServiceUnavailable);

        // The session survives a rejected open.
        let mut socket = session.open("echo:").await.expect("open echo:");
        socket.write(b"still alive").await.expect("write");
        socket.close().await.expect("close");
        session.close().await;
    })
    .await;
}

/// A tiny negotiated max payload re-chunks writes; bytes still arrive intact
/// and in order.
pub async fn run_fragmented_write<F: TransportFactory>() {
    init_tracing();
    with_timeout(async {
        let config = FakeDeviceConfig {
            max_payload: 4,
            ..Default::default()
        };
        let session = connected_session::<F>(config, &[]).await;
        assert_eq!(session.connection_info().max_payload, 4);

        let mut socket = session.open("echo:").await.expect("open echo:");
        socket.write(b"0123456789").await.expect("write");

        let mut echoed = Vec::new();
        while echoed.len() < 10 {
            let chunk = socket
                .read()
                .await
                .expect("read")
                .expect("stream ended early");
            assert!(chunk.len() <= 4, "chunk exceeds negotiated max");
            echoed.extend_from_slice(&chunk);
        }
        assert_eq!(echoed, b"0123456789");

        socket.close().await.expect("close");
        session.close().await;
    })
    .await;
}

/// Token auth: the device challenges, the host signs, the session comes up.
/// A host without keys fails with `NoKeys` instead.
pub async fn run_auth_handshake<F: TransportFactory>() {
    init_tracing();
    with_timeout(async {
        let key = generate_key();
        let config = FakeDeviceConfig {
            auth: Some(FakeAuth {
                token: generate_token(),
                trusted: vec![key.public_key()],
                accept_offered_key: false,
            }),
            ..Default::default()
        };
        let session = connected_session::<F>(config, &[key]).await;

        let mut socket = session.open("echo:").await.expect("open after auth");
        socket.write(b"authed").await.expect("write");
        socket.close().await.expect("close");
        session.close().await;

        // Same device, no keys: the handshake must fail cleanly.
        let (host, device) = F::connect_pair().await;
        tokio::spawn(run_fake_device(
            device,
            FakeDeviceConfig {
                auth: Some(FakeAuth {
                    token: generate_token(),
                    trusted: Vec::new(),
                    accept_offered_key: false,
                }),
                ..Default::default()
            },
        ));
        let err = connect(host, ConnectOptions::default(), &[])
            .await
            .expect_err("keyless connect must fail");
        assert!(matches!(err, ConnectError::NoKeys));
    })
    .await;
}

/// Several sockets interleave on one session without crosstalk, and every
/// live socket has a distinct local id.
pub async fn run_concurrent_sockets<F: TransportFactory>() {
    init_tracing();
    with_timeout(async {
        let session = connected_session::<F>(FakeDeviceConfig::default(), &[]).await;

        let a = session.open("echo:a").await.expect("open a");
        let b = session.open("echo:b").await.expect("open b");
        let c = session.open("echo:c").await.expect("open c");
        let mut ids = vec![a.local_id(), b.local_id(), c.local_id()];
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 3, "local ids must be unique");

        let exercise = |mut socket: adbmux_core::AdbSocket<F::Transport>, payload: &'static [u8]| async move {
            socket.write(payload).await.expect("write");
            let mut echoed = Vec::new();
            while echoed.len() < payload.len() {
                match socket.read().await.expect("read") {
                    Some(chunk) => echoed.extend_from_slice(&chunk),
                    None => break,
                }
            }
            assert_eq!(echoed, payload);
            socket.close().await.expect("close");
        };

        tokio::join!(
            exercise(a, b"first socket"),
            exercise(b, b"second socket"),
            exercise(c, b"third socket"),
        );
        session.close().await;
    })
    .await;
}

/// The `AsyncRead`/`AsyncWrite` adapter carries bytes both ways and shuts
/// down cleanly.
pub async fn run_socket_stream_io<F: TransportFactory>() {
    init_tracing();
    with_timeout(async {
        let session = connected_session::<F>(FakeDeviceConfig::default(), &[]).await;

        let socket = session.open("echo:").await.expect("open echo:");
        let mut stream = socket.into_stream();

        stream.write_all(b"streamed").await.expect("write_all");
        stream.flush().await.expect("flush");
        let mut buf = [0u8; 8];
        stream.read_exact(&mut buf).await.expect("read_exact");
        assert_eq!(&buf, b"streamed");

        stream.shutdown().await.expect("shutdown");
        session.close().await;
    })
    .await;
}
