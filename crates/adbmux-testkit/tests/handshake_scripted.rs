//! Handshake behaviour, packet by packet.

use adbmux_core::{
    connect, Command, ConnectError, ConnectOptions, Packet, AUTH_RSAPUBLICKEY, AUTH_SIGNATURE,
    AUTH_TOKEN, MAX_PAYLOAD, VERSION,
};
use adbmux_testkit::{generate_key, generate_token, init_tracing, with_timeout, ScriptedTransport};
use bytes::Bytes;
use rsa::Pkcs1v15Sign;
use sha1::Sha1;

#[tokio::test]
async fn plain_handshake_negotiates_the_minimum() {
    init_tracing();
    with_timeout(async {
        let (transport, mut handle) = ScriptedTransport::new();
        let connector = tokio::spawn(async move {
            connect(transport, ConnectOptions::default(), &[]).await
        });

        let hello = handle.expect().await;
        assert_eq!(hello.command, Command::Connect);
        assert_eq!(hello.arg0, VERSION);
        assert_eq!(hello.arg1, MAX_PAYLOAD as u32);
        assert!(hello.payload.starts_with(b"host::"));
        assert_eq!(
            hello.checksum,
            Packet::payload_checksum(&hello.payload),
            "handshake packets carry legacy checksums"
        );

        handle.inject(Packet::with_payload(
            Command::Connect,
            VERSION,
            1024 * 1024,
            Bytes::from_static(b"device::ro.product.name=sargo;features=shell_v2"),
            true,
        ));

        let session = connector.await.unwrap().expect("handshake succeeds");
        let info = session.connection_info();
        assert_eq!(info.version, VERSION);
        assert_eq!(info.max_payload, MAX_PAYLOAD, "minimum of both sides wins");
        assert!(!info.checksum_required);
        assert_eq!(info.device_banner.kind, "device");
        assert_eq!(info.device_banner.property("ro.product.name"), Some("sargo"));
        assert!(info.device_banner.supports("shell_v2"));
    })
    .await;
}

#[tokio::test]
async fn token_challenge_is_signed() {
    init_tracing();
    with_timeout(async {
        let key = generate_key();
        let public = key.public_key();
        let token = generate_token();

        let (transport, mut handle) = ScriptedTransport::new();
        let connector =
            tokio::spawn(async move { connect(transport, ConnectOptions::default(), &[key]).await });

        assert_eq!(handle.expect().await.command, Command::Connect);
        handle.inject(Packet::with_payload(
            Command::Auth,
            AUTH_TOKEN,
            0,
            Bytes::copy_from_slice(&token),
            true,
        ));

        let reply = handle.expect().await;
        assert_eq!(reply.command, Command::Auth);
        assert_eq!(reply.arg0, AUTH_SIGNATURE);
        assert_eq!(reply.payload.len(), 256, "RSA-2048 signature");
        public
            .verify(Pkcs1v15Sign::new::<Sha1>(), &token, &reply.payload)
            .expect("device-side verification succeeds");

        handle.inject(Packet::with_payload(
            Command::Connect,
            VERSION,
            1024 * 1024,
            Bytes::from_static(b"device::"),
            true,
        ));
        let session = connector.await.unwrap().expect("authenticated handshake");
        assert_eq!(session.connection_info().max_payload, MAX_PAYLOAD);
    })
    .await;
}

#[tokio::test]
async fn exhausted_keys_offer_the_public_key() {
    init_tracing();
    with_timeout(async {
        let key = generate_key();
        let expected_offer = key.public_key_payload("adbmux@localhost");

        let (transport, mut handle) = ScriptedTransport::new();
        let connector =
            tokio::spawn(async move { connect(transport, ConnectOptions::default(), &[key]).await });

        assert_eq!(handle.expect().await.command, Command::Connect);

        // First challenge: signed with the only key.
        handle.inject(Packet::with_payload(
            Command::Auth,
            AUTH_TOKEN,
            0,
            Bytes::copy_from_slice(&generate_token()),
            true,
        ));
        assert_eq!(handle.expect().await.arg0, AUTH_SIGNATURE);

        // Second challenge: the device refused it, no keys left, offer.
        handle.inject(Packet::with_payload(
            Command::Auth,
            AUTH_TOKEN,
            0,
            Bytes::copy_from_slice(&generate_token()),
            true,
        ));
        let offer = handle.expect().await;
        assert_eq!(offer.command, Command::Auth);
        assert_eq!(offer.arg0, AUTH_RSAPUBLICKEY);
        assert_eq!(offer.payload, expected_offer);
        assert_eq!(offer.payload.last(), Some(&0u8));

        // The user taps allow; the device connects.
        handle.inject(Packet::with_payload(
            Command::Connect,
            VERSION,
            1024 * 1024,
            Bytes::from_static(b"device::"),
            true,
        ));
        connector.await.unwrap().expect("prompted handshake");
    })
    .await;
}

#[tokio::test]
async fn auth_without_keys_fails_fast() {
    init_tracing();
    with_timeout(async {
        let (transport, mut handle) = ScriptedTransport::new();
        let connector =
            tokio::spawn(async move { connect(transport, ConnectOptions::default(), &[]).await });

        assert_eq!(handle.expect().await.command, Command::Connect);
        handle.inject(Packet::with_payload(
            Command::Auth,
            AUTH_TOKEN,
            0,
            Bytes::copy_from_slice(&generate_token()),
            true,
        ));

        let err = connector.await.unwrap().expect_err("no keys, no session");
        assert!(matches!(err, ConnectError::NoKeys));
    })
    .await;
}

#[tokio::test]
async fn hangup_mid_auth_is_rejection() {
    init_tracing();
    with_timeout(async {
        let key = generate_key();
        let (transport, mut handle) = ScriptedTransport::new();
        let connector =
            tokio::spawn(async move { connect(transport, ConnectOptions::default(), &[key]).await });

        assert_eq!(handle.expect().await.command, Command::Connect);
        handle.inject(Packet::with_payload(
            Command::Auth,
            AUTH_TOKEN,
            0,
            Bytes::copy_from_slice(&generate_token()),
            true,
        ));
        assert_eq!(handle.expect().await.arg0, AUTH_SIGNATURE);

        // The user declined; adbd drops the connection.
        handle.hang_up();
        let err = connector.await.unwrap().expect_err("rejection surfaces");
        assert!(matches!(err, ConnectError::AuthRejected));
    })
    .await;
}

#[tokio::test]
async fn ancient_peer_version_is_refused() {
    init_tracing();
    with_timeout(async {
        let (transport, mut handle) = ScriptedTransport::new();
        let connector =
            tokio::spawn(async move { connect(transport, ConnectOptions::default(), &[]).await });

        assert_eq!(handle.expect().await.command, Command::Connect);
        handle.inject(Packet::with_payload(
            Command::Connect,
            0x0001_0000,
            4096,
            Bytes::from_static(b"device::"),
            true,
        ));

        let err = connector.await.unwrap().expect_err("version below minimum");
        assert!(matches!(
            err,
            ConnectError::UnsupportedVersion(0x0001_0000)
        ));
    })
    .await;
}

#[tokio::test]
async fn unexpected_handshake_command_fails() {
    init_tracing();
    with_timeout(async {
        let (transport, mut handle) = ScriptedTransport::new();
        let connector =
            tokio::spawn(async move { connect(transport, ConnectOptions::default(), &[]).await });

        assert_eq!(handle.expect().await.command, Command::Connect);
        handle.inject(Packet::new(Command::Open, 1, 0));

        let err = connector.await.unwrap().expect_err("OPEN before CNXN");
        assert!(matches!(
            err,
            ConnectError::UnexpectedCommand(Command::Open)
        ));
    })
    .await;
}

#[tokio::test]
async fn corrupt_handshake_checksum_fails() {
    init_tracing();
    with_timeout(async {
        let (transport, mut handle) = ScriptedTransport::new();
        let connector =
            tokio::spawn(async move { connect(transport, ConnectOptions::default(), &[]).await });

        assert_eq!(handle.expect().await.command, Command::Connect);
        let mut banner = Packet::with_payload(
            Command::Connect,
            VERSION,
            1024 * 1024,
            Bytes::from_static(b"device::"),
            true,
        );
        banner.checksum ^= 0x1;
        handle.inject(banner);

        let err = connector.await.unwrap().expect_err("corrupt banner");
        assert!(matches!(err, ConnectError::BadChecksum { .. }));
    })
    .await;
}
