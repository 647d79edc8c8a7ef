//! HTTP API tests against an in-process server

use axum::body::Bytes;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;
use v2v_relay::{
    inference_engine::{EchoEngine, EngineHandle},
    models::{InputMode, ParamSet},
    session_registry::ClientHandle,
    state::{AppConfig, AppState},
    web_api,
};

fn test_config() -> AppConfig {
    AppConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        max_queue_size: 2,
        session_timeout_sec: 0,
        ingest_fps: 16.0,
        output_min_fps: 5.0,
        output_max_fps: 30.0,
        output_queue_capacity: 8,
        drain_poll_interval_ms: 1,
        enable_metrics: false,
        target_latency_sec: 0.3,
        metrics_flush_batches: 1000,
        metrics_dir: std::env::temp_dir().join("v2v-relay-test"),
        pipeline_step: 1,
        gpu_ids: "0".to_string(),
        static_dir: None,
        shutdown_timeout_ms: 500,
    }
}

async fn spawn_app(config: AppConfig) -> (String, AppState) {
    let engine = EngineHandle::new(EchoEngine::new(InputMode::Image));
    let state = AppState::new(config, engine, CancellationToken::new());
    state.lifecycle.start().unwrap();

    let app = web_api::create_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("http://{}", addr), state)
}

async fn get_json(url: &str) -> (u16, Value) {
    let resp = reqwest::get(url).await.unwrap();
    let status = resp.status().as_u16();
    (status, resp.json().await.unwrap())
}

type WsClient = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn ws_connect(base: &str, id: Uuid) -> WsClient {
    let url = format!("{}/api/ws/{}", base.replacen("http", "ws", 1), id);
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

/// Next status document, or `None` once the server closed the socket
async fn next_status(ws: &mut WsClient) -> Option<Value> {
    loop {
        let message = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for status");
        match message {
            Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(&text).unwrap()),
            Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return None,
            Some(Ok(_)) => continue,
        }
    }
}

/// Read the multipart body until `needle` shows up
async fn read_until(resp: &mut reqwest::Response, needle: &[u8]) {
    let mut received = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !received.windows(needle.len()).any(|w| w == needle) {
        let chunk = tokio::time::timeout_at(deadline, resp.chunk())
            .await
            .expect("timed out waiting for frame")
            .unwrap()
            .expect("stream ended early");
        received.extend_from_slice(&chunk);
    }
}

/// Drain the body until the server ends it
async fn read_to_end(resp: &mut reqwest::Response) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let chunk = tokio::time::timeout_at(deadline, resp.chunk())
            .await
            .expect("stream was not closed");
        match chunk {
            Ok(Some(_)) => continue,
            _ => break,
        }
    }
}

fn camera_frame(image: &'static [u8]) -> ParamSet {
    ParamSet {
        image: Some(Bytes::from_static(image)),
        ..ParamSet::default()
    }
}

#[tokio::test]
async fn test_health_queue_and_settings() {
    let (base, state) = spawn_app(test_config()).await;

    let (status, health) = get_json(&format!("{}/healthz", base)).await;
    assert_eq!(status, 200);
    assert_eq!(health["status"], "ok");
    assert_eq!(health["active_sessions"], 0);

    let (status, queue) = get_json(&format!("{}/api/queue", base)).await;
    assert_eq!(status, 200);
    assert_eq!(queue["queue_size"], 0);

    let (status, settings) = get_json(&format!("{}/api/settings", base)).await;
    assert_eq!(status, 200);
    assert_eq!(settings["input_mode"], "image");
    assert_eq!(settings["max_queue_size"], 2);
    assert_eq!(settings["metrics_enabled"], false);

    state.lifecycle.shutdown().await;
}

#[tokio::test]
async fn test_metrics_disabled_is_bad_request() {
    let (base, state) = spawn_app(test_config()).await;

    let (status, body) = get_json(&format!("{}/api/metrics/{}", base, Uuid::new_v4())).await;
    assert_eq!(status, 400);
    assert_eq!(body["error_code"], "METRICS_DISABLED");

    state.lifecycle.shutdown().await;
}

#[tokio::test]
async fn test_unknown_session_is_not_found() {
    let config = AppConfig {
        enable_metrics: true,
        ..test_config()
    };
    let (base, state) = spawn_app(config).await;
    let id = Uuid::new_v4();

    let (status, body) = get_json(&format!("{}/api/metrics/{}?window=10", base, id)).await;
    assert_eq!(status, 404);
    assert_eq!(body["error_code"], "NO_METRICS");

    let (status, body) = get_json(&format!("{}/api/stream/{}", base, id)).await;
    assert_eq!(status, 404);
    assert_eq!(body["error_code"], "SESSION_NOT_FOUND");

    let (status, _) = get_json(&format!("{}/api/upload/{}", base, id)).await;
    assert_eq!(status, 404);

    state.lifecycle.shutdown().await;
}

#[tokio::test]
async fn test_stream_delivers_multipart_frames_and_metrics() {
    let dir = tempfile::tempdir().unwrap();
    let config = AppConfig {
        enable_metrics: true,
        metrics_dir: dir.path().to_path_buf(),
        ..test_config()
    };
    let (base, state) = spawn_app(config).await;

    let id = Uuid::new_v4();
    let (client, _outbound) = ClientHandle::channel();
    let session = state.registry.connect(id, client).await.unwrap();

    let (_, queue) = get_json(&format!("{}/api/queue", base)).await;
    assert_eq!(queue["queue_size"], 1);

    let mut resp = reqwest::get(format!("{}/api/stream/{}", base, id))
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let content_type = resp.headers()["content-type"].to_str().unwrap().to_string();
    assert_eq!(content_type, "multipart/x-mixed-replace;boundary=frame");

    // A second stream for the same session is refused
    let second = reqwest::get(format!("{}/api/stream/{}", base, id))
        .await
        .unwrap();
    assert_eq!(second.status().as_u16(), 409);

    // Stand in for the control plane: one camera frame
    session.params().set(camera_frame(b"JPEGDATA"));

    let expected = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 8\r\n\r\nJPEGDATA\r\n";
    let mut received = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while received.len() < expected.len() * 2 {
        let chunk = tokio::time::timeout_at(deadline, resp.chunk())
            .await
            .expect("timed out waiting for frame")
            .unwrap()
            .expect("stream ended early");
        received.extend_from_slice(&chunk);
    }
    // No Firefox user agent: every part is sent twice
    assert_eq!(&received[..expected.len()], &expected[..]);
    assert_eq!(&received[expected.len()..expected.len() * 2], &expected[..]);

    let (status, stats) = get_json(&format!("{}/api/metrics/{}", base, id)).await;
    assert_eq!(status, 200);
    assert_eq!(stats["sample_count"], 1);
    assert_eq!(stats["batch_count"], 1);

    let resp = reqwest::Client::new()
        .post(format!("{}/api/metrics/{}/flush", base, id))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status().as_u16(), 200);
    let flushed: Value = resp.json().await.unwrap();
    assert_eq!(flushed["total_frames"], 1);
    let run_dir = std::path::PathBuf::from(flushed["path"].as_str().unwrap());
    assert!(run_dir.join(format!("statistics_{}.json", id)).exists());
    assert!(run_dir.join(format!("raw_data_{}.json", id)).exists());

    state.lifecycle.shutdown().await;
    assert_eq!(state.registry.count(), 0);
    assert!(state.engine.is_closed());
}

#[tokio::test]
async fn test_capacity_limit_keeps_existing_sessions() {
    let (base, state) = spawn_app(test_config()).await;

    let mut receivers = Vec::new();
    for _ in 0..2 {
        let (client, rx) = ClientHandle::channel();
        state.registry.connect(Uuid::new_v4(), client).await.unwrap();
        receivers.push(rx);
    }

    let (client, _rx) = ClientHandle::channel();
    let rejected = state.registry.connect(Uuid::new_v4(), client.clone()).await;
    assert!(rejected.is_err());
    assert!(client.is_closed());

    let (_, queue) = get_json(&format!("{}/api/queue", base)).await;
    assert_eq!(queue["queue_size"], 2);

    state.lifecycle.shutdown().await;
}

#[tokio::test]
async fn test_websocket_session_round_trip() {
    let (base, state) = spawn_app(test_config()).await;
    let id = Uuid::new_v4();

    let mut ws = ws_connect(&base, id).await;
    assert_eq!(next_status(&mut ws).await.unwrap()["status"], "connected");
    assert_eq!(next_status(&mut ws).await.unwrap()["status"], "wait");
    assert_eq!(next_status(&mut ws).await.unwrap()["status"], "send_frame");
    assert!(state.registry.contains(&id));

    let mut stream = reqwest::get(format!("{}/api/stream/{}", base, id))
        .await
        .unwrap();
    assert_eq!(stream.status().as_u16(), 200);
    assert_eq!(next_status(&mut ws).await.unwrap()["status"], "send_frame");

    ws.send(Message::Text(json!({"status": "next_frame"}).to_string()))
        .await
        .unwrap();
    ws.send(Message::Text(json!({"prompt": "a cat"}).to_string()))
        .await
        .unwrap();
    ws.send(Message::Binary(b"WSFRAME1".to_vec())).await.unwrap();

    let mut statuses = Vec::new();
    while statuses.last() != Some(&json!("send_frame")) {
        statuses.push(next_status(&mut ws).await.unwrap()["status"].clone());
    }
    assert!(statuses.contains(&json!("wait")));
    read_until(&mut stream, b"WSFRAME1").await;

    // A second socket for the live id is told why, then closed
    let mut duplicate = ws_connect(&base, id).await;
    let rejected = next_status(&mut duplicate).await.unwrap();
    assert_eq!(rejected["status"], "error");
    assert!(rejected["message"].as_str().unwrap().contains("already connected"));
    assert!(next_status(&mut duplicate).await.is_none());
    assert!(state.registry.contains(&id));

    // Client close tears the session down and ends its media stream
    ws.close(None).await.unwrap();
    read_to_end(&mut stream).await;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while state.registry.contains(&id) {
        assert!(tokio::time::Instant::now() < deadline, "session not torn down");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    state.lifecycle.shutdown().await;
}

#[tokio::test]
async fn test_disconnect_leaves_other_stream_running() {
    let (base, state) = spawn_app(test_config()).await;

    let a = Uuid::new_v4();
    let (client_a, _outbound_a) = ClientHandle::channel();
    let session_a = state.registry.connect(a, client_a).await.unwrap();
    let b = Uuid::new_v4();
    let (client_b, _outbound_b) = ClientHandle::channel();
    let session_b = state.registry.connect(b, client_b).await.unwrap();

    let mut stream_a = reqwest::get(format!("{}/api/stream/{}", base, a))
        .await
        .unwrap();
    let mut stream_b = reqwest::get(format!("{}/api/stream/{}", base, b))
        .await
        .unwrap();

    session_a.params().set(camera_frame(b"AFRAME1"));
    session_b.params().set(camera_frame(b"BFRAME1"));
    read_until(&mut stream_a, b"AFRAME1").await;
    read_until(&mut stream_b, b"BFRAME1").await;

    assert!(state.registry.disconnect(a).await);
    read_to_end(&mut stream_a).await;

    // B's dispatch loop and pacer keep going
    session_b.params().set(camera_frame(b"BFRAME2"));
    read_until(&mut stream_b, b"BFRAME2").await;
    assert!(state.registry.contains(&b));
    assert!(!session_b.is_cancelled());

    state.lifecycle.shutdown().await;
}
