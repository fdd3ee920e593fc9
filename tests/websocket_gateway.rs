//! Gateway endpoints end to end: real listener, real client sockets,
//! in-process whisper backend

mod mock_upstream;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use mock_upstream::{EVENT_TIMEOUT, MockUpstream, UpstreamEvent};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message},
};

use whisper_relay::{
    AppState, ServerConfig,
    auth::ManualClock,
    config::WsAuthMode,
    core::relay::{RelayConnectionState, RelayEventKind},
    handlers::ws::SESSION_EXPIRED_CLOSE_CODE,
    routes::create_app_router,
};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const SOURCE_TOKEN: &str = "source-secret";
const POLICY_CLOSE_CODE: u16 = 1008;

struct Relay {
    addr: SocketAddr,
    state: Arc<AppState>,
    upstream: MockUpstream,
}

impl Relay {
    async fn start(configure: impl FnOnce(&mut ServerConfig)) -> Self {
        let upstream = MockUpstream::start().await;

        let mut config = ServerConfig::default();
        config.whisper.endpoint = upstream.url();
        config.whisper.api_key = "test-key".to_string();
        config.auth.required = true;
        config.auth.source_token = Some(SOURCE_TOKEN.to_string());
        configure(&mut config);

        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let state = AppState::with_clock(config, clock).await;
        let app = create_app_router(state.clone());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });

        Self {
            addr,
            state,
            upstream,
        }
    }

    async fn connect(&self, path: &str) -> Client {
        let (client, _) = connect_async(format!("ws://{}{}", self.addr, path))
            .await
            .unwrap();
        client
    }

    /// Connect and authorize with the first message
    async fn connect_with(&self, path: &str, auth: Value) -> Client {
        let mut client = self.connect(path).await;
        client
            .send(Message::Text(auth.to_string().into()))
            .await
            .unwrap();
        client
    }
}

async fn eventually(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn wait_for_relay(state: &AppState, expected: RelayConnectionState) {
    let mut rx = state.relay.watch_state();
    tokio::time::timeout(EVENT_TIMEOUT, rx.wait_for(|s| *s == expected))
        .await
        .unwrap_or_else(|_| panic!("relay never reached {expected}"))
        .unwrap();
}

async fn wait_for_subscribers(state: &AppState, kind: RelayEventKind, count: usize) {
    let subscribers = state.relay.subscribers().clone();
    eventually("subscribers", || subscribers.subscriber_count(kind) == count).await;
}

async fn next_json(client: &mut Client) -> Value {
    loop {
        let message = tokio::time::timeout(EVENT_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket ended")
            .unwrap();
        match message {
            Message::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected a text frame, got {other:?}"),
        }
    }
}

async fn expect_close(client: &mut Client) -> Option<u16> {
    loop {
        match tokio::time::timeout(EVENT_TIMEOUT, client.next())
            .await
            .expect("timed out waiting for close")
        {
            Some(Ok(Message::Close(frame))) => return frame.map(|f| u16::from(f.code)),
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("expected close, got {other:?}"),
            Some(Err(_)) | None => return None,
        }
    }
}

#[tokio::test]
async fn test_source_audio_reaches_backend() {
    let mut relay = Relay::start(|_| {}).await;

    let mut source = relay
        .connect_with("/source", json!({"sourceToken": SOURCE_TOKEN}))
        .await;

    let (connection, api_key) = relay.upstream.expect_handshake().await;
    assert_eq!(api_key, "test-key");
    wait_for_relay(&relay.state, RelayConnectionState::Open).await;

    source
        .send(Message::Binary(Bytes::from_static(&[1, 2, 3, 4])))
        .await
        .unwrap();
    source
        .send(Message::Text(r#"{"control":"flush"}"#.into()))
        .await
        .unwrap();

    assert_eq!(
        relay.upstream.next_event().await,
        UpstreamEvent::Received(connection, Message::Binary(Bytes::from_static(&[1, 2, 3, 4])))
    );
    assert_eq!(
        relay.upstream.next_event().await,
        UpstreamEvent::Received(connection, Message::Text(r#"{"control":"flush"}"#.into()))
    );

    source.close(None).await.unwrap();
    assert!(matches!(
        relay.upstream.next_event().await,
        UpstreamEvent::Closed(id, Some(1000)) if id == connection
    ));
    wait_for_relay(&relay.state, RelayConnectionState::Disconnected).await;
}

#[tokio::test]
async fn test_upstream_follows_last_source() {
    let mut relay = Relay::start(|_| {}).await;
    let auth = json!({"sourceToken": SOURCE_TOKEN});

    let mut first = relay.connect_with("/source", auth.clone()).await;
    let (connection, _) = relay.upstream.expect_handshake().await;
    let mut second = relay.connect_with("/sourcesink", auth).await;
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while relay.state.sources.active_count().await < 2 {
        assert!(tokio::time::Instant::now() < deadline, "second source never registered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    first.close(None).await.unwrap();
    assert_eq!(
        relay.upstream.try_next_event(Duration::from_millis(300)).await,
        None,
        "upstream closed while a source remained"
    );

    second.close(None).await.unwrap();
    assert!(matches!(
        relay.upstream.next_event().await,
        UpstreamEvent::Closed(id, _) if id == connection
    ));
}

async fn wait_for_sources(state: &AppState, count: usize) {
    let deadline = tokio::time::Instant::now() + EVENT_TIMEOUT;
    while state.sources.active_count().await < count {
        assert!(tokio::time::Instant::now() < deadline, "sources never registered");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test]
async fn test_new_source_reopens_dropped_upstream() {
    let mut relay = Relay::start(|_| {}).await;
    let auth = json!({"sourceToken": SOURCE_TOKEN});

    let _first = relay.connect_with("/source", auth.clone()).await;
    let (connection, _) = relay.upstream.expect_handshake().await;
    let _second = relay.connect_with("/sourcesink", auth.clone()).await;
    wait_for_sources(&relay.state, 2).await;
    wait_for_relay(&relay.state, RelayConnectionState::Open).await;

    // Backend goes away; reconnect is off by default
    relay.upstream.close(connection);
    assert!(matches!(
        relay.upstream.next_event().await,
        UpstreamEvent::Closed(id, _) if id == connection
    ));
    wait_for_relay(&relay.state, RelayConnectionState::Disconnected).await;

    let _third = relay.connect_with("/source", auth).await;
    let (reopened, api_key) = relay.upstream.expect_handshake().await;
    assert_ne!(reopened, connection);
    assert_eq!(api_key, "test-key");
    wait_for_relay(&relay.state, RelayConnectionState::Open).await;
    assert_eq!(relay.state.sources.active_count().await, 3);
    assert_eq!(relay.upstream.open_connections(), 1);
}

#[tokio::test]
async fn test_transcripts_fan_out_to_sinks() {
    let mut relay = Relay::start(|_| {}).await;

    let mut source = relay
        .connect_with("/sourcesink", json!({"sourceToken": SOURCE_TOKEN}))
        .await;
    let (connection, _) = relay.upstream.expect_handshake().await;

    let session = relay.state.tokens.create_session_token().token;
    let mut viewer = relay
        .connect_with("/sink", json!({"sessionToken": session}))
        .await;
    wait_for_subscribers(&relay.state, RelayEventKind::Transcription, 2).await;

    let block = json!({"kind": "InProgress", "start": 1.0, "end": 2.5, "text": "hello"});
    relay.upstream.push(connection, &block.to_string());

    assert_eq!(next_json(&mut viewer).await, block);
    assert_eq!(next_json(&mut source).await, block);
}

#[tokio::test]
async fn test_source_messages_only_reach_sources() {
    let mut relay = Relay::start(|_| {}).await;

    let mut source = relay
        .connect_with("/source", json!({"sourceToken": SOURCE_TOKEN}))
        .await;
    let (connection, _) = relay.upstream.expect_handshake().await;

    let mut viewer = relay
        .connect_with("/sink", json!({"sourceToken": SOURCE_TOKEN}))
        .await;
    wait_for_subscribers(&relay.state, RelayEventKind::Transcription, 1).await;

    let control = json!({"status": "ready", "model": "large-v3"});
    relay.upstream.push(connection, &control.to_string());
    let block = json!({"kind": "Final", "start": 0.0, "end": 1.0, "text": "hi"});
    relay.upstream.push(connection, &block.to_string());

    assert_eq!(next_json(&mut source).await, control);
    // The viewer sees the transcript and nothing before it
    assert_eq!(next_json(&mut viewer).await, block);
}

#[tokio::test]
async fn test_sink_frames_are_ignored() {
    let mut relay = Relay::start(|_| {}).await;

    let _source = relay
        .connect_with("/source", json!({"sourceToken": SOURCE_TOKEN}))
        .await;
    relay.upstream.expect_handshake().await;
    wait_for_relay(&relay.state, RelayConnectionState::Open).await;

    let mut viewer = relay
        .connect_with("/sink", json!({"sourceToken": SOURCE_TOKEN}))
        .await;
    wait_for_subscribers(&relay.state, RelayEventKind::Transcription, 1).await;

    viewer
        .send(Message::Binary(Bytes::from_static(b"not audio")))
        .await
        .unwrap();
    viewer.send(Message::Text("hello".into())).await.unwrap();

    assert_eq!(
        relay.upstream.try_next_event(Duration::from_millis(300)).await,
        None
    );
}

#[tokio::test]
async fn test_in_band_rejection_closes_with_policy_code() {
    let relay = Relay::start(|_| {}).await;

    let session = relay.state.tokens.create_session_token().token;
    let cases = [
        ("/sink", json!({"sessionToken": "bogus"}).to_string()),
        ("/sink", "not json".to_string()),
        ("/sink", "[1, 2]".to_string()),
        // Session tokens only open sinks
        ("/source", json!({"sessionToken": session}).to_string()),
        ("/sourcesink", json!({"sessionToken": session}).to_string()),
    ];

    for (path, first_message) in cases {
        let mut client = relay.connect(path).await;
        client
            .send(Message::Text(first_message.clone().into()))
            .await
            .unwrap();
        assert_eq!(
            expect_close(&mut client).await,
            Some(POLICY_CLOSE_CODE),
            "{path} with {first_message}"
        );
    }

    eventually("slots released", || relay.state.ws_connection_count() == 0).await;
    assert_eq!(relay.state.sources.active_count().await, 0);
}

#[tokio::test]
async fn test_silent_client_is_closed_after_timeout() {
    let relay = Relay::start(|config| config.websocket.auth_timeout_ms = 200).await;

    let mut client = relay.connect("/sink").await;
    let started = std::time::Instant::now();
    assert_eq!(expect_close(&mut client).await, Some(POLICY_CLOSE_CODE));
    assert!(started.elapsed() >= Duration::from_millis(150));
}

#[tokio::test]
async fn test_session_expiry_closes_sink() {
    let relay = Relay::start(|config| config.auth.session_length_sec = 1).await;

    let session = relay.state.tokens.create_session_token().token;
    let mut viewer = relay
        .connect_with("/sink", json!({"sessionToken": session}))
        .await;

    let started = std::time::Instant::now();
    assert_eq!(
        expect_close(&mut viewer).await,
        Some(SESSION_EXPIRED_CLOSE_CODE)
    );
    assert!(started.elapsed() <= Duration::from_millis(2500));
    eventually("slot released", || relay.state.ws_connection_count() == 0).await;
}

#[tokio::test]
async fn test_source_token_sink_never_expires() {
    let relay = Relay::start(|config| config.auth.session_length_sec = 1).await;

    let mut viewer = relay
        .connect_with("/sink", json!({"sourceToken": SOURCE_TOKEN}))
        .await;

    let next = tokio::time::timeout(Duration::from_millis(1500), viewer.next()).await;
    assert!(next.is_err(), "source-token sink received a frame");
}

#[tokio::test]
async fn test_request_mode_authorizes_before_upgrade() {
    let mut relay = Relay::start(|config| config.websocket.auth_mode = WsAuthMode::Request).await;

    let refused = connect_async(format!("ws://{}/source", relay.addr)).await;
    match refused {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 403),
        Err(other) => panic!("expected 403, got {other}"),
        Ok(_) => panic!("upgrade without credentials succeeded"),
    }
    assert_eq!(relay.state.ws_connection_count(), 0);

    let session = relay.state.tokens.create_session_token().token;
    let refused = connect_async(format!("ws://{}/source?sessionToken={session}", relay.addr)).await;
    assert!(matches!(refused, Err(WsError::Http(_))));

    let _source = relay
        .connect(&format!("/source?sourceToken={SOURCE_TOKEN}"))
        .await;
    relay.upstream.expect_handshake().await;

    let mut viewer = relay
        .connect(&format!("/sink?sessionToken={session}"))
        .await;
    wait_for_subscribers(&relay.state, RelayEventKind::Transcription, 1).await;
    assert_eq!(relay.state.ws_connection_count(), 2);

    viewer.close(None).await.unwrap();
    eventually("viewer slot released", || relay.state.ws_connection_count() == 1).await;
}

#[tokio::test]
async fn test_per_ip_connection_limit() {
    let relay = Relay::start(|config| config.max_connections_per_ip = 1).await;

    let _first = relay.connect("/sink").await;
    let refused = connect_async(format!("ws://{}/sink", relay.addr)).await;
    match refused {
        Err(WsError::Http(response)) => assert_eq!(response.status(), 429),
        Err(other) => panic!("expected 429, got {other}"),
        Ok(_) => panic!("second connection from the same IP was accepted"),
    }
}
