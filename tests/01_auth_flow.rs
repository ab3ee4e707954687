mod support;

use std::time::Duration;

use crabgate::{
    errors::ERROR_CODE_KEY,
    frontend::{REASON_KEY, SESSION_ID_KEY},
    wire_protocol::{GatewayMessage, MessageType},
};

use support::{SECRET, TestGateway, test_settings};

#[tokio::test]
async fn auth_then_heartbeat_echoes_ids() {
    let gateway = TestGateway::start(test_settings()).await;
    let mut client = gateway.client().await;

    let ok = client.auth("alice", SECRET).await;
    assert_eq!(ok.message_type, MessageType::AuthOk);
    assert_eq!(ok.client_id, "alice");
    let session_id = ok.extension(SESSION_ID_KEY).expect("session id").to_string();

    let session = gateway
        .state
        .sessions
        .get_session_by_client_id("alice")
        .await
        .expect("session installed");
    assert_eq!(session.id(), session_id);
    let before = session.last_active_time();

    tokio::time::sleep(Duration::from_millis(5)).await;
    client
        .send(&GatewayMessage::new(MessageType::Heartbeat, 77).with_client_id("alice"))
        .await;
    let beat = client.recv().await.expect("heartbeat reply");

    assert_eq!(beat.message_type, MessageType::Heartbeat);
    assert_eq!(beat.request_id, 77);
    assert_eq!(beat.client_id, "alice");
    assert!(session.last_active_time() > before);
}

#[tokio::test]
async fn wrong_token_fails_but_keeps_the_connection() {
    let gateway = TestGateway::start(test_settings()).await;
    let mut client = gateway.client().await;

    let fail = client.auth("alice", "nope").await;
    assert_eq!(fail.message_type, MessageType::AuthFail);
    assert!(fail.extension(REASON_KEY).is_some());
    assert_eq!(fail.extension(ERROR_CODE_KEY), Some("AUTH_FAILED"));
    assert!(
        gateway
            .state
            .sessions
            .get_session_by_client_id("alice")
            .await
            .is_none()
    );

    // retry on the same connection
    let ok = client.auth("alice", SECRET).await;
    assert_eq!(ok.message_type, MessageType::AuthOk);
}

#[tokio::test]
async fn heartbeat_before_auth_closes_the_connection() {
    let gateway = TestGateway::start(test_settings()).await;
    let mut client = gateway.client().await;

    client
        .send(&GatewayMessage::new(MessageType::Heartbeat, 5).with_client_id("eve"))
        .await;
    assert!(client.recv_until_closed().await.is_empty());
    assert!(
        gateway
            .state
            .sessions
            .get_session_by_client_id("eve")
            .await
            .is_none()
    );
}

#[tokio::test]
async fn biz_before_auth_closes_without_a_business_reply() {
    let gateway = TestGateway::start(test_settings()).await;
    let mut client = gateway.client().await;

    client.send(&support::biz(9, "eve", "user.get", b"{}")).await;
    assert!(client.recv_until_closed().await.is_empty());
}

#[tokio::test]
async fn second_login_evicts_the_first_connection() {
    let gateway = TestGateway::start(test_settings()).await;

    let mut first = gateway.client().await;
    let first_ok = first.auth("alice", SECRET).await;

    let mut second = gateway.client().await;
    let second_ok = second.auth("alice", SECRET).await;
    assert_ne!(
        first_ok.extension(SESSION_ID_KEY),
        second_ok.extension(SESSION_ID_KEY)
    );

    assert!(first.recv_until_closed().await.is_empty());

    let live = gateway
        .state
        .sessions
        .get_session_by_client_id("alice")
        .await
        .expect("second session survives");
    assert_eq!(Some(live.id()), second_ok.extension(SESSION_ID_KEY));
}

#[tokio::test]
async fn idle_connection_is_closed_and_session_destroyed() {
    let mut settings = test_settings();
    settings.server.idle_timeout = Duration::from_millis(200);
    let gateway = TestGateway::start(settings).await;

    let mut client = gateway.client().await;
    let ok = client.auth("idle", SECRET).await;
    let session_id = ok.extension(SESSION_ID_KEY).unwrap().to_string();

    assert!(client.recv_until_closed().await.is_empty());
    assert!(gateway.state.sessions.get_session(&session_id).await.is_none());
}

#[tokio::test]
async fn corrupt_frame_closes_and_destroys_the_session() {
    let gateway = TestGateway::start(test_settings()).await;
    let mut client = gateway.client().await;
    let ok = client.auth("alice", SECRET).await;
    let session_id = ok.extension(SESSION_ID_KEY).unwrap().to_string();

    let mut frame = crabgate::wire_protocol::encode(&GatewayMessage::new(MessageType::Heartbeat, 2))
        .unwrap()
        .to_vec();
    let last = frame.len() - 1;
    frame[last] ^= 0xFF;
    client.send_raw(&frame).await;

    assert!(client.recv_until_closed().await.is_empty());
    assert!(gateway.state.sessions.get_session(&session_id).await.is_none());
}
