mod common;

use std::future::Future;
use std::time::Duration;

use common::client;
use futures::{SinkExt, StreamExt};
use nndl_engine::live::{CloseReason, LiveEvent, LivePhase, LiveSessionLoop};
use nndl_engine::{ErrorKind, LiveConfig};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use url::Url;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

type ServerSocket = WebSocketStream<TcpStream>;

const MASTER: &str = "#EXTM3U
#EXT-X-STREAM-INF:BANDWIDTH=500000,RESOLUTION=640x360
a.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=1500000,RESOLUTION=1280x720
b.m3u8
#EXT-X-STREAM-INF:BANDWIDTH=800000,RESOLUTION=854x480
c.m3u8
";

/// Accept a single control socket connection and hand it to `handler`.
async fn serve<F, Fut>(handler: F) -> (Url, JoinHandle<()>)
where
    F: FnOnce(ServerSocket) -> Fut + Send + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let socket = tokio_tungstenite::accept_async(stream).await.unwrap();
        handler(socket).await;
    });
    let url = Url::parse(&format!("ws://{addr}/wsapi/v2/watch/lv1")).unwrap();
    (url, task)
}

async fn next_json(socket: &mut ServerSocket) -> Value {
    loop {
        match socket.next().await {
            Some(Ok(Message::Text(text))) => return serde_json::from_str(text.as_str()).unwrap(),
            Some(Ok(_)) => continue,
            other => panic!("socket ended while waiting for a frame: {other:?}"),
        }
    }
}

/// Next frame that is not a `watching` heartbeat.
async fn next_reply(socket: &mut ServerSocket) -> Value {
    loop {
        let frame = next_json(socket).await;
        if frame["body"]["command"] != "watching" {
            return frame;
        }
    }
}

async fn send_json(socket: &mut ServerSocket, value: Value) {
    socket.send(Message::text(value.to_string())).await.unwrap();
}

async fn drain(mut socket: ServerSocket) {
    while let Some(Ok(_)) = socket.next().await {}
}

fn live_config(heartbeat: Duration, strict_frames: bool) -> LiveConfig {
    LiveConfig {
        heartbeat_interval: heartbeat,
        strict_frames,
    }
}

#[tokio::test]
async fn announced_stream_resolves_to_highest_bandwidth_variant() {
    let http = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/hls/master.m3u8"))
        .respond_with(ResponseTemplate::new(200).set_body_string(MASTER))
        .mount(&http)
        .await;
    let master_url = format!("{}/hls/master.m3u8?ht2_nicolive=token", http.uri());

    let (resolved_tx, resolved_rx) = oneshot::channel::<()>();
    let announced = master_url.clone();
    let (ws_url, server) = serve(move |mut socket| async move {
        let permit = next_json(&mut socket).await;
        assert_eq!(permit["type"], "watch");
        assert_eq!(permit["body"]["command"], "getpermit");
        assert_eq!(permit["body"]["requirement"]["broadcastId"], "lv1");
        assert_eq!(permit["body"]["requirement"]["stream"]["protocol"], "hls");

        send_json(&mut socket, json!({ "type": "ping" })).await;
        let pong = next_reply(&mut socket).await;
        assert_eq!(pong, json!({ "type": "pong", "body": {} }));

        send_json(
            &mut socket,
            json!({ "type": "watch", "body": { "command": "statistics", "params": ["12", "3"] } }),
        )
        .await;
        send_json(
            &mut socket,
            json!({
                "type": "watch",
                "body": { "command": "currentstream", "currentStream": { "uri": announced } }
            }),
        )
        .await;

        resolved_rx.await.unwrap();
        socket.close(None).await.unwrap();
        drain(socket).await;
    })
    .await;

    let live = LiveSessionLoop::new(
        client(),
        ws_url,
        "lv1",
        live_config(Duration::from_secs(30), true),
    );
    let (events_tx, mut events_rx) = mpsc::channel(4);
    let watcher = tokio::spawn(async move {
        let event = events_rx.recv().await;
        let _ = resolved_tx.send(());
        event
    });

    let report = live.run(events_tx, &CancellationToken::new()).await.unwrap();
    server.await.unwrap();

    let expected = format!("{}/hls/b.m3u8", http.uri());
    let Some(LiveEvent::StreamResolved(stream)) = watcher.await.unwrap() else {
        panic!("no stream was resolved");
    };
    assert_eq!(stream.stream_url.as_str(), expected);
    assert_eq!(stream.bandwidth, 1_500_000);
    assert_eq!(stream.master_url.as_str(), master_url);

    assert_eq!(report.closed_by, CloseReason::Server);
    assert_eq!(report.streams, vec![stream]);
    assert!(report.frames_received >= 3);
    assert_eq!(live.phase(), LivePhase::Closed);
}

#[tokio::test]
async fn watching_heartbeat_repeats_on_schedule() {
    let (ws_url, server) = serve(|mut socket| async move {
        let permit = next_json(&mut socket).await;
        assert_eq!(permit["body"]["command"], "getpermit");

        for _ in 0..2 {
            let beat = tokio::time::timeout(Duration::from_secs(2), next_json(&mut socket))
                .await
                .expect("heartbeat not sent in time");
            assert_eq!(
                beat,
                json!({ "type": "watch", "body": { "command": "watching", "params": ["lv1", "-1", "0"] } })
            );
        }

        socket.close(None).await.unwrap();
        drain(socket).await;
    })
    .await;

    let live = LiveSessionLoop::new(
        client(),
        ws_url,
        "lv1",
        live_config(Duration::from_millis(50), true),
    );
    let (events_tx, _events_rx) = mpsc::channel(1);

    let report = live.run(events_tx, &CancellationToken::new()).await.unwrap();
    server.await.unwrap();

    assert_eq!(report.closed_by, CloseReason::Server);
    assert!(report.streams.is_empty());
}

#[tokio::test]
async fn watching_follows_the_permit_immediately() {
    let (ws_url, server) = serve(|mut socket| async move {
        let permit = next_json(&mut socket).await;
        assert_eq!(permit["body"]["command"], "getpermit");

        let first = tokio::time::timeout(Duration::from_secs(2), next_json(&mut socket))
            .await
            .expect("no heartbeat after the permit");
        assert_eq!(first["body"]["command"], "watching");

        socket.close(None).await.unwrap();
        drain(socket).await;
    })
    .await;

    let live = LiveSessionLoop::new(
        client(),
        ws_url,
        "lv1",
        live_config(Duration::from_secs(60), true),
    );
    let (events_tx, _events_rx) = mpsc::channel(1);

    let report = live.run(events_tx, &CancellationToken::new()).await.unwrap();
    server.await.unwrap();

    assert_eq!(report.closed_by, CloseReason::Server);
}

#[tokio::test]
async fn unknown_frame_type_ends_a_strict_session() {
    let (ws_url, server) = serve(|mut socket| async move {
        next_json(&mut socket).await;
        send_json(&mut socket, json!({ "type": "seat", "body": { "keepIntervalSec": 30 } })).await;
        drain(socket).await;
    })
    .await;

    let live = LiveSessionLoop::new(
        client(),
        ws_url,
        "lv1",
        live_config(Duration::from_secs(30), true),
    );
    let (events_tx, _events_rx) = mpsc::channel(1);

    let err = live
        .run(events_tx, &CancellationToken::new())
        .await
        .unwrap_err();
    server.await.unwrap();

    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    assert_eq!(live.phase(), LivePhase::Closed);
}

#[tokio::test]
async fn unknown_frame_type_is_skipped_when_lenient() {
    let (ws_url, server) = serve(|mut socket| async move {
        next_json(&mut socket).await;
        send_json(&mut socket, json!({ "type": "seat", "body": { "keepIntervalSec": 30 } })).await;
        send_json(&mut socket, json!({ "type": "ping" })).await;
        assert_eq!(next_reply(&mut socket).await["type"], "pong");
        socket.close(None).await.unwrap();
        drain(socket).await;
    })
    .await;

    let live = LiveSessionLoop::new(
        client(),
        ws_url,
        "lv1",
        live_config(Duration::from_secs(30), false),
    );
    let (events_tx, _events_rx) = mpsc::channel(1);

    let report = live.run(events_tx, &CancellationToken::new()).await.unwrap();
    server.await.unwrap();

    assert_eq!(report.closed_by, CloseReason::Server);
}

#[tokio::test]
async fn malformed_frame_is_a_protocol_violation() {
    let (ws_url, server) = serve(|mut socket| async move {
        next_json(&mut socket).await;
        socket.send(Message::text("not json")).await.unwrap();
        drain(socket).await;
    })
    .await;

    let live = LiveSessionLoop::new(
        client(),
        ws_url,
        "lv1",
        live_config(Duration::from_secs(30), false),
    );
    let (events_tx, _events_rx) = mpsc::channel(1);

    let err = live
        .run(events_tx, &CancellationToken::new())
        .await
        .unwrap_err();
    server.await.unwrap();

    assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
}

#[tokio::test]
async fn cancellation_closes_the_socket() {
    let (ws_url, server) = serve(|mut socket| async move {
        next_json(&mut socket).await;
        drain(socket).await;
    })
    .await;

    let live = LiveSessionLoop::new(
        client(),
        ws_url,
        "lv1",
        live_config(Duration::from_secs(30), true),
    );
    let (events_tx, _events_rx) = mpsc::channel(1);
    let token = CancellationToken::new();
    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            token.cancel();
        })
    };

    let report = live.run(events_tx, &token).await.unwrap();
    canceller.await.unwrap();
    server.await.unwrap();

    assert_eq!(report.closed_by, CloseReason::Cancelled);
    assert_eq!(live.phase(), LivePhase::Closed);
}
