#![allow(dead_code)]

use bytes::BytesMut;
use std::{
    net::SocketAddr,
    path::Path,
    process::Command,
    sync::Arc,
    time::Duration,
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    select,
    sync::{oneshot, watch},
    time::{sleep, timeout},
};

use crabgate::{
    GatewayServer, GatewayState,
    config::GatewaySettings,
    frontend::TOKEN_KEY,
    shared_types::ServiceInstance,
    wire_protocol::{GatewayMessage, MessageType, decode, encode, peek_frame},
};

pub const SECRET: &str = "s3cret";

const FRAME_WAIT: Duration = Duration::from_secs(5);

// -----------------------------------------------------------------------------
// ----- Ports & Processes -----------------------------------------------------

pub fn reserve_port(host: &str) -> u16 {
    let addr = format!("{host}:0");
    let listener = std::net::TcpListener::bind(&addr).expect("bind ephemeral port");
    listener.local_addr().unwrap().port()
}

pub fn spawn_crabgate(host: &str, port: u16, config_path: &Path) -> std::process::Child {
    let exe = env!("CARGO_BIN_EXE_crabgate");

    Command::new(exe)
        .env("CRABGATE_HOST", host)
        .env("CRABGATE_PORT", port.to_string())
        .env("CRABGATE_CONFIG_FILE", config_path)
        .spawn()
        .expect("spawn crabgate")
}

pub async fn wait_for_listen(host: &str, port: u16) {
    let addr = format!("{host}:{port}");
    for _ in 0..50 {
        if TcpStream::connect(&addr).await.is_ok() {
            return;
        }
        sleep(Duration::from_millis(50)).await;
    }
    panic!("crabgate did not start listening on {addr}");
}

// -----------------------------------------------------------------------------
// ----- In-process Gateway ----------------------------------------------------

/// Defaults tuned for tests: fast retries, no background health sweeps.
pub fn test_settings() -> GatewaySettings {
    let mut settings = GatewaySettings::with_secret(SECRET);
    settings.upstream.connect_timeout = Duration::from_millis(500);
    settings.upstream.retry_backoff = Duration::from_millis(20);
    settings.upstream.max_retry_backoff = Duration::from_millis(50);
    settings.upstream.max_retries_per_incident = 3;
    settings.upstream.request_timeout = Duration::from_secs(5);
    settings.registry.health_check_enabled = false;
    settings.workers.threads = 4;
    settings
}

pub struct TestGateway {
    pub addr: SocketAddr,
    pub state: Arc<GatewayState>,
    stop: Option<oneshot::Sender<()>>,
}

impl TestGateway {
    pub async fn start(settings: GatewaySettings) -> Self {
        let server = GatewayServer::bind("127.0.0.1:0".parse().unwrap(), settings)
            .await
            .expect("bind gateway");
        let addr = server.local_addr();
        let state = server.state();

        let (stop, stopped) = oneshot::channel::<()>();
        tokio::spawn(server.serve_with_shutdown(async {
            let _ = stopped.await;
        }));

        Self {
            addr,
            state,
            stop: Some(stop),
        }
    }

    pub async fn register(&self, biz_type: &str, instance: ServiceInstance) {
        self.state.registry.register_service(biz_type, instance).await;
    }

    pub async fn client(&self) -> FrameClient {
        FrameClient::connect(self.addr).await
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

// -----------------------------------------------------------------------------
// ----- Frame Client ----------------------------------------------------------

pub struct FrameClient {
    stream: TcpStream,
    inbox: BytesMut,
}

impl FrameClient {
    pub async fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).await.expect("connect to gateway");
        Self {
            stream,
            inbox: BytesMut::with_capacity(4096),
        }
    }

    pub async fn send(&mut self, message: &GatewayMessage) {
        let frame = encode(message).expect("encode");
        self.stream.write_all(&frame).await.expect("write frame");
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write bytes");
    }

    /// Next frame, or `None` once the gateway closed the connection.
    pub async fn recv(&mut self) -> Option<GatewayMessage> {
        loop {
            if let Some(len) = peek_frame(&self.inbox, usize::MAX).expect("peek frame") {
                let frame = self.inbox.split_to(len);
                return Some(decode(&frame).expect("decode frame"));
            }

            let read = timeout(FRAME_WAIT, self.stream.read_buf(&mut self.inbox))
                .await
                .expect("timed out waiting for a frame");
            match read {
                Ok(0) | Err(_) => return None,
                Ok(_) => {}
            }
        }
    }

    /// Drain until the gateway closes, returning whatever arrived first.
    pub async fn recv_until_closed(&mut self) -> Vec<GatewayMessage> {
        let mut seen = Vec::new();
        while let Some(message) = self.recv().await {
            seen.push(message);
        }
        seen
    }

    pub async fn auth(&mut self, client_id: &str, token: &str) -> GatewayMessage {
        let auth = GatewayMessage::new(MessageType::Auth, 1)
            .with_client_id(client_id)
            .with_extension(TOKEN_KEY, token);
        self.send(&auth).await;
        self.recv().await.expect("auth reply")
    }
}

// -----------------------------------------------------------------------------
// ----- Echo Backend ----------------------------------------------------------

/// Tiny HTTP/1.1 server answering every request with its own body, plus an
/// `X-Echo-Path` header carrying the request path.
pub struct EchoBackend {
    pub port: u16,
    sever: Arc<watch::Sender<u64>>,
    stop: watch::Sender<bool>,
}

impl EchoBackend {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let sever = Arc::new(watch::channel(0u64).0);
        let (stop, mut stop_rx) = watch::channel(false);

        let sever_tx = sever.clone();
        let conn_stop = stop.subscribe();
        tokio::spawn(async move {
            loop {
                select! {
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { return };
                        tokio::spawn(serve_echo(stream, sever_tx.subscribe(), conn_stop.clone()));
                    }
                    _ = stopped(&mut stop_rx) => return,
                }
            }
        });

        Self { port, sever, stop }
    }

    pub fn instance(&self) -> ServiceInstance {
        ServiceInstance::new("127.0.0.1", self.port)
    }

    /// Drop every open connection but keep accepting new ones.
    pub fn sever_connections(&self) {
        self.sever.send_modify(|g| *g += 1);
    }

    /// Drop every connection and stop listening for good.
    pub fn shutdown(&self) {
        self.stop.send_replace(true);
    }
}

impl Drop for EchoBackend {
    fn drop(&mut self) {
        self.shutdown();
    }
}

async fn serve_echo(
    mut stream: TcpStream,
    mut sever: watch::Receiver<u64>,
    mut stop: watch::Receiver<bool>,
) {
    let mut buf = BytesMut::new();

    loop {
        while let Some((path, body)) = take_request(&mut buf) {
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Type: application/octet-stream\r\nX-Echo-Path: {path}\r\nContent-Length: {}\r\n\r\n",
                body.len()
            );
            if stream.write_all(head.as_bytes()).await.is_err()
                || stream.write_all(&body).await.is_err()
            {
                return;
            }
        }

        select! {
            read = stream.read_buf(&mut buf) => match read {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            },
            _ = sever.changed() => return,
            _ = stopped(&mut stop) => return,
        }
    }
}

async fn stopped(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|s| *s).await;
}

fn take_request(buf: &mut BytesMut) -> Option<(String, Vec<u8>)> {
    let end = buf.windows(4).position(|w| w == b"\r\n\r\n")? + 4;
    let head = String::from_utf8_lossy(&buf[..end]).into_owned();

    let path = head.split_whitespace().nth(1).unwrap_or("/").to_string();
    let len: usize = head
        .lines()
        .find_map(|l| {
            let (name, value) = l.split_once(':')?;
            if !name.eq_ignore_ascii_case("content-length") {
                return None;
            }
            value.trim().parse().ok()
        })
        .unwrap_or(0);

    if buf.len() < end + len {
        return None;
    }
    let raw = buf.split_to(end + len);
    Some((path, raw[end..].to_vec()))
}

// -----------------------------------------------------------------------------
// ----- Helpers ---------------------------------------------------------------

pub fn biz(request_id: i64, client_id: &str, biz_type: &str, body: &[u8]) -> GatewayMessage {
    GatewayMessage::new(MessageType::Biz, request_id)
        .with_client_id(client_id)
        .with_biz_type(biz_type)
        .with_body(body.to_vec())
}

pub async fn eventually(mut check: impl FnMut() -> bool, what: &str) {
    for _ in 0..250 {
        if check() {
            return;
        }
        sleep(Duration::from_millis(20)).await;
    }
    panic!("timed out waiting for {what}");
}
