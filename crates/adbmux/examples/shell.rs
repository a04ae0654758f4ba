//! Run a shell command on a device over TCP.
//!
//! Enable TCP debugging on the device (`adb tcpip 5555`), then:
//! `cargo run --example shell -p adbmux -- 192.168.1.42:5555 "getprop ro.product.model"`
//!
//! Uses `~/.android/adbkey` when present so an already-authorized host
//! connects without a prompt; otherwise a throwaway key is generated and the
//! device asks for approval.

use adbmux::{connect, AdbKey, ConnectOptions, StreamTransport};
use tokio::net::TcpStream;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async_main())
}

async fn async_main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut args = std::env::args().skip(1);
    let addr = args.next().unwrap_or_else(|| "127.0.0.1:5555".to_string());
    let command = args.next().unwrap_or_else(|| "id".to_string());

    let keys = load_keys();
    println!("Connecting to {addr}...");
    let stream = TcpStream::connect(&addr).await?;
    let session = connect(StreamTransport::new(stream), ConnectOptions::default(), &keys).await?;
    let info = session.connection_info();
    println!(
        "Connected: {} (max payload {} bytes)",
        info.device_banner
            .property("ro.product.model")
            .unwrap_or("unknown device"),
        info.max_payload
    );
    tokio::spawn(session.clone().run());

    let mut shell = session.open(&format!("shell:{command}")).await?;
    while let Some(chunk) = shell.read().await? {
        print!("{}", String::from_utf8_lossy(&chunk));
    }

    shell.close().await.ok();
    session.close().await;
    Ok(())
}

fn load_keys() -> Vec<AdbKey> {
    let path = std::env::var_os("HOME")
        .map(std::path::PathBuf::from)
        .map(|home| home.join(".android/adbkey"));
    if let Some(path) = path {
        if let Ok(pem) = std::fs::read_to_string(&path) {
            if let Ok(key) = AdbKey::from_pkcs8_pem(&pem) {
                println!("Using host key {}", path.display());
                return vec![key];
            }
        }
    }

    println!("No host key found, generating a throwaway one");
    let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).expect("generate RSA key");
    vec![AdbKey::new(key)]
}
