mod support;

use std::io::Write;

use crabgate::wire_protocol::MessageType;

#[tokio::test]
async fn binary_starts_from_config_file_and_accepts_auth() {
    let mut config = tempfile::NamedTempFile::new().expect("temp config");
    writeln!(
        config,
        r#"
[server]
idle_timeout = "30s"

[auth]
secret = "{}"

[registry]
health_check_enabled = false
"#,
        support::SECRET
    )
    .unwrap();

    let host = "127.0.0.1";
    let port = support::reserve_port(host);
    let mut child = support::spawn_crabgate(host, port, config.path());

    support::wait_for_listen(host, port).await;

    let mut client = support::FrameClient::connect(format!("{host}:{port}").parse().unwrap()).await;
    let reply = client.auth("boot-check", support::SECRET).await;
    assert_eq!(reply.message_type, MessageType::AuthOk);

    let _ = child.kill();
    let _ = child.wait();
}
