//! Integration tests for assuand
//!
//! These tests verify the end-to-end behavior of the daemon.

use assuan_config::{parse_config, Settings};
use assuan_ipc::{Inquiries, IpcError, Session, SocketServer};
use assuan_proto::ErrorCode;
use std::io::Write;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::process::Command;

fn make_test_settings() -> Settings {
    parse_config(
        r#"
        config_version = 1

        [daemon]
        greeting = "integration keystore"

        [info]
        site = "test-site"
        "#,
    )
    .unwrap()
}

#[test]
fn test_settings_loading() {
    let settings = make_test_settings();
    assert_eq!(settings.info("site"), Some("test-site"));
    let profile = assuand::profile(&settings);
    assert_eq!(profile.greeting(), "integration keystore");
    assert_eq!(
        profile.command_names(),
        vec!["ECHO", "GETINFO", "GETVAL", "LISTKEYS", "PUTVAL", "SETKEY"]
    );
}

#[tokio::test]
async fn test_socket_session_lifecycle() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("S.assuand");

    let mut server = SocketServer::new(&socket_path);
    server.start().await.unwrap();
    let profile = Arc::new(assuand::profile(&make_test_settings()));
    let accept = tokio::spawn(async move { server.run(profile).await });

    let mut session = Session::connect(&socket_path).await.unwrap();
    assert_eq!(session.greeting(), "integration keystore");

    let site = session.simple_command("GETINFO", "site").await.unwrap();
    assert_eq!(site, b"test-site".to_vec());

    session.simple_command("SETKEY", "blob").await.unwrap();
    let payload: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
    let mut inquiries = Inquiries::new().with_reader("VALUE", std::io::Cursor::new(payload.clone()));
    session.transact("PUTVAL", "", &mut inquiries).await.unwrap();

    let value = session.simple_command("GETVAL", "").await.unwrap();
    assert_eq!(value, payload);

    let err = session.simple_command("BOGUS", "").await.unwrap_err();
    assert_eq!(err.assuan().unwrap().code, ErrorCode::ASS_UNKNOWN_CMD);

    session.close().await.unwrap();

    accept.abort();
    let _ = accept.await;
    assert!(!socket_path.exists());
}

#[tokio::test]
async fn test_values_do_not_leak_between_connections() {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("S.assuand");

    let mut server = SocketServer::new(&socket_path);
    server.start().await.unwrap();
    let profile = Arc::new(assuand::profile(&Settings::default()));
    let accept = tokio::spawn(async move { server.run(profile).await });

    let mut writer = Session::connect(&socket_path).await.unwrap();
    writer.simple_command("SETKEY", "shared").await.unwrap();
    let mut inquiries = Inquiries::new().with_bytes("VALUE", b"private".to_vec());
    writer.transact("PUTVAL", "", &mut inquiries).await.unwrap();

    let mut reader = Session::connect(&socket_path).await.unwrap();
    reader.simple_command("SETKEY", "shared").await.unwrap();
    let err = reader.simple_command("GETVAL", "").await.unwrap_err();
    assert!(matches!(err, IpcError::Assuan(e) if e.code == ErrorCode::NOT_FOUND));

    accept.abort();
}

#[tokio::test]
async fn test_stdio_server_process() {
    let dir = tempdir().unwrap();
    let config_path = dir.path().join("config.toml");
    let mut file = std::fs::File::create(&config_path).unwrap();
    writeln!(file, "config_version = 1\n[daemon]\ngreeting = \"stdio keystore\"").unwrap();

    let mut command = Command::new(env!("CARGO_BIN_EXE_assuand"));
    command
        .arg("--stdio")
        .arg("--config")
        .arg(&config_path)
        .env("RUST_LOG", "off");

    let (mut session, mut child) = Session::spawn(command).await.unwrap();
    assert_eq!(session.greeting(), "stdio keystore");

    let pid = session.simple_command("GETINFO", "pid").await.unwrap();
    assert_eq!(String::from_utf8(pid).unwrap(), child.id().unwrap().to_string());

    let echoed = session.simple_command("ECHO", "over a pipe").await.unwrap();
    assert_eq!(echoed, b"over a pipe".to_vec());

    session.close().await.unwrap();
    let status = child.wait().await.unwrap();
    assert!(status.success());
}
