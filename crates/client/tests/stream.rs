//! Streaming-channel integration tests against a local TCP fixture.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use pulsebridge_client::{CatalogSection, ClientError, RemoteClient};
use pulsebridge_core::{ConnectionState, SendChannel};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;
use tokio_util::codec::{Framed, LinesCodec};

const TEST_TIMEOUT: Duration = Duration::from_secs(5);

async fn listener() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn client(port: u16) -> RemoteClient {
    RemoteClient::builder()
        .stream_addr("127.0.0.1", port)
        .send_channel(SendChannel::Stream)
        .reconnect(Duration::from_millis(50), 2.0, Duration::from_secs(1))
        .heartbeat_interval(Duration::from_secs(30))
        .request_timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

async fn accept(listener: &TcpListener) -> Framed<TcpStream, LinesCodec> {
    let (socket, _) = timeout(TEST_TIMEOUT, listener.accept())
        .await
        .expect("accept timed out")
        .unwrap();
    Framed::new(socket, LinesCodec::new())
}

async fn wait_for_state(client: &RemoteClient, target: ConnectionState) {
    let mut watch = client.watch_state();
    timeout(TEST_TIMEOUT, async {
        while *watch.borrow_and_update() != target {
            watch.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("never reached state {target}"));
}

async fn read_json(framed: &mut Framed<TcpStream, LinesCodec>) -> Value {
    let line = timeout(TEST_TIMEOUT, framed.next())
        .await
        .expect("read timed out")
        .expect("connection closed")
        .unwrap();
    serde_json::from_str(&line).unwrap()
}

#[tokio::test]
async fn subscribe_and_receive_pushed_event() {
    let (listener, port) = listener().await;
    let client = client(port);
    client.connect();
    let mut server = accept(&listener).await;
    wait_for_state(&client, ConnectionState::Connected).await;

    let mut events = client.subscribe_events();
    client.subscribe("gift").await.unwrap();

    let msg = read_json(&mut server).await;
    assert_eq!(msg["type"], "subscribe");
    assert_eq!(msg["eventType"], "gift");

    server
        .send(r#"{"type":"event","event":"gift","payload":{"coins":50,"user":"ada"}}"#.to_string())
        .await
        .unwrap();

    let event = timeout(TEST_TIMEOUT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event.event, "gift");
    assert_eq!(event.payload["coins"], 50);

    client.disconnect();
}

#[tokio::test]
async fn correlated_send_action_round_trip() {
    let (listener, port) = listener().await;
    let client = client(port);
    client.connect();
    let mut server = accept(&listener).await;
    wait_for_state(&client, ConnectionState::Connected).await;

    let responder = tokio::spawn(async move {
        // First request succeeds, second fails.
        let msg = read_json(&mut server).await;
        assert_eq!(msg["type"], "sendAction");
        assert_eq!(msg["category"], "vibrate");
        let id = msg["id"].as_str().unwrap();
        server
            .send(format!(
                r#"{{"type":"action:response","id":"{id}","success":true,"result":{{"ok":true}}}}"#
            ))
            .await
            .unwrap();

        let msg = read_json(&mut server).await;
        let id = msg["id"].as_str().unwrap();
        server
            .send(format!(
                r#"{{"type":"action:response","id":"{id}","success":false,"error":"unknown action"}}"#
            ))
            .await
            .unwrap();
        server
    });

    let result = client
        .send("vibrate", "pulse", json!({"level": 5}))
        .await
        .unwrap();
    assert_eq!(result["ok"], true);

    let err = client
        .send("vibrate", "bogus", json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::Remote(m) if m == "unknown action"));

    responder.await.unwrap();
    client.disconnect();
}

#[tokio::test]
async fn request_times_out_when_unanswered() {
    let (listener, port) = listener().await;
    let client = RemoteClient::builder()
        .stream_addr("127.0.0.1", port)
        .send_channel(SendChannel::Stream)
        .heartbeat_interval(Duration::from_secs(30))
        .request_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    client.connect();
    let mut server = accept(&listener).await;
    wait_for_state(&client, ConnectionState::Connected).await;

    // Read the request but never answer it.
    let pending = tokio::spawn(async move {
        let msg = read_json(&mut server).await;
        assert_eq!(msg["type"], "getCategories");
        server
    });

    let err = client.get_categories().await.unwrap_err();
    assert!(matches!(err, ClientError::Timeout));

    pending.await.unwrap();
    client.disconnect();
}

#[tokio::test]
async fn reconnects_after_unexpected_close() {
    let (listener, port) = listener().await;
    let client = client(port);
    let mut watch = client.watch_state();
    client.connect();

    let first = accept(&listener).await;
    wait_for_state(&client, ConnectionState::Connected).await;
    drop(first);

    // Drop forces a close; the client must pass through reconnecting and
    // come back up on the next accept.
    let _second = accept(&listener).await;
    wait_for_state(&client, ConnectionState::Connected).await;

    let mut saw_reconnecting = false;
    while watch.has_changed().unwrap() {
        if *watch.borrow_and_update() == ConnectionState::Reconnecting {
            saw_reconnecting = true;
        }
    }
    // The watch channel conflates fast transitions; connected-again above
    // is the authoritative signal, this is best-effort.
    let _ = saw_reconnecting;

    client.disconnect();
    wait_for_state(&client, ConnectionState::Disconnected).await;
}

#[tokio::test]
async fn silent_peer_forces_reconnect() {
    let (listener, port) = listener().await;
    let client = RemoteClient::builder()
        .stream_addr("127.0.0.1", port)
        .send_channel(SendChannel::Stream)
        .reconnect(Duration::from_millis(50), 2.0, Duration::from_secs(1))
        .heartbeat_interval(Duration::from_millis(100))
        .build()
        .unwrap();
    client.connect();

    // Hold the first socket open but never answer pings.
    let first = accept(&listener).await;
    wait_for_state(&client, ConnectionState::Connected).await;

    // After two silent heartbeat intervals the client closes and reconnects.
    let _second = accept(&listener).await;
    drop(first);
    wait_for_state(&client, ConnectionState::Connected).await;

    client.disconnect();
}

#[tokio::test]
async fn responsive_peer_stays_connected() {
    let (listener, port) = listener().await;
    let client = RemoteClient::builder()
        .stream_addr("127.0.0.1", port)
        .send_channel(SendChannel::Stream)
        .heartbeat_interval(Duration::from_millis(100))
        .build()
        .unwrap();
    client.connect();
    let mut server = accept(&listener).await;
    wait_for_state(&client, ConnectionState::Connected).await;

    // Answer pings for half a second; the connection must survive.
    let deadline = tokio::time::Instant::now() + Duration::from_millis(500);
    while tokio::time::Instant::now() < deadline {
        let Ok(Some(Ok(line))) =
            timeout(Duration::from_millis(600), server.next()).await
        else {
            panic!("server lost the connection");
        };
        let msg: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(msg["type"], "ping");
        server.send(r#"{"type":"pong"}"#.to_string()).await.unwrap();
    }
    assert_eq!(client.state(), ConnectionState::Connected);

    client.disconnect();
}

#[tokio::test]
async fn catalog_push_replaces_cache() {
    let (listener, port) = listener().await;
    let client = client(port);
    client.connect();
    let mut server = accept(&listener).await;
    wait_for_state(&client, ConnectionState::Connected).await;

    let mut catalog = client.subscribe_catalog();
    server
        .send(
            r#"{"type":"categories-update","categories":[{"name":"vibrate"},{"name":"light"}]}"#
                .to_string(),
        )
        .await
        .unwrap();

    let section = timeout(TEST_TIMEOUT, catalog.recv()).await.unwrap().unwrap();
    assert_eq!(section, CatalogSection::Categories);
    let cached = client.cached_categories();
    assert_eq!(cached.len(), 2);
    assert_eq!(cached[0]["name"], "vibrate");

    // Partial combined update leaves untouched sections alone.
    server
        .send(r#"{"type":"features-update","actions":[{"name":"pulse"}]}"#.to_string())
        .await
        .unwrap();
    let section = timeout(TEST_TIMEOUT, catalog.recv()).await.unwrap().unwrap();
    assert_eq!(section, CatalogSection::Actions);
    assert_eq!(client.cached_categories().len(), 2);
    assert_eq!(client.cached_actions().len(), 1);

    client.disconnect();
}

#[tokio::test]
async fn disconnect_lands_under_event_flood() {
    let (listener, port) = listener().await;
    let client = client(port);
    client.connect();
    let mut server = accept(&listener).await;
    wait_for_state(&client, ConnectionState::Connected).await;

    // Keep the read branch permanently busy so the disconnect signal has
    // to land while the loop is mid-branch, not parked on the notifier.
    let flood = tokio::spawn(async move {
        let line = r#"{"type":"event","event":"gift","payload":{"coins":1}}"#.to_string();
        while server.send(line.clone()).await.is_ok() {}
    });

    tokio::time::sleep(Duration::from_millis(50)).await;
    client.disconnect();
    wait_for_state(&client, ConnectionState::Disconnected).await;
    flood.await.unwrap();
}

#[tokio::test]
async fn disconnect_closes_and_stays_down() {
    let (listener, port) = listener().await;
    let client = client(port);
    client.connect();
    let mut server = accept(&listener).await;
    wait_for_state(&client, ConnectionState::Connected).await;

    client.disconnect();
    wait_for_state(&client, ConnectionState::Disconnected).await;

    // The server sees EOF and no reconnect attempt follows.
    let eof = timeout(TEST_TIMEOUT, server.next()).await.unwrap();
    assert!(eof.is_none());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(client.state(), ConnectionState::Disconnected);
}
