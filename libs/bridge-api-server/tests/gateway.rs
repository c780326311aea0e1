use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use bridge_engine::SessionContext;
use broker_memory::MemoryBroker;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

async fn start(broker: &MemoryBroker) -> (SocketAddr, SessionContext) {
    let ctx = SessionContext::new(Arc::new(broker.clone()));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(bridge_api_server::serve(listener, ctx.clone(), ctx.shutdown.clone()));
    (addr, ctx)
}

async fn connect(addr: SocketAddr, client_id: &str, topic: &str) -> Client {
    let url = format!("ws://{addr}/ws/{client_id}/{topic}/");
    let (ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    ws
}

/// Next JSON frame, skipping control frames. `None` once the server closed.
async fn next_envelope(ws: &mut Client) -> Option<Value> {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("no frame within 5s");
        match frame {
            Some(Ok(Message::Text(text))) => return Some(serde_json::from_str(text.as_str()).unwrap()),
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return None,
            Some(Ok(_)) => continue,
        }
    }
}

async fn http_get(addr: SocketAddr, path: &str) -> String {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    stream.read_to_string(&mut response).await.unwrap();
    response
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_message_is_published_and_echoed() {
    let broker = MemoryBroker::default();
    let (addr, _ctx) = start(&broker).await;
    let mut ws = connect(addr, "alice", "orders").await;

    let status = next_envelope(&mut ws).await.unwrap();
    assert_eq!(status["message"], "status");
    assert_eq!(status["consumer_group_name"], "alice");
    assert_eq!(status["topic_name"], "orders");

    ws.send(Message::Text("hello".into())).await.unwrap();

    // The session consumes its own topic, so the record comes back as well.
    let mut kinds = Vec::new();
    for _ in 0..2 {
        let envelope = next_envelope(&mut ws).await.unwrap();
        match envelope["message"].as_str().unwrap() {
            "published" => {
                assert_eq!(envelope["topic_name"], "orders");
                assert_eq!(envelope["partition"], 0);
                assert_eq!(envelope["offset"], 0);
            }
            "received" => assert_eq!(envelope["value"], "hello"),
            other => panic!("unexpected envelope {other}"),
        }
        kinds.push(envelope["message"].as_str().unwrap().to_string());
    }
    kinds.sort();
    assert_eq!(kinds, vec!["published", "received"]);

    let stored = broker.records("orders");
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].payload, b"hello");
}

#[tokio::test]
async fn pending_records_are_delivered_after_status() {
    let broker = MemoryBroker::default();
    broker.append("orders", "x");
    let (addr, _ctx) = start(&broker).await;
    let mut ws = connect(addr, "bob", "orders").await;

    assert_eq!(next_envelope(&mut ws).await.unwrap()["message"], "status");
    let received = next_envelope(&mut ws).await.unwrap();
    assert_eq!(received["message"], "received");
    assert_eq!(received["value"], "x");
    assert_eq!(received["consumer_group_name"], "bob");
    assert_eq!(received["offset"], 0);
}

#[tokio::test]
async fn unreachable_broker_reports_one_error_then_closes() {
    let broker = MemoryBroker::default();
    broker.set_unreachable(true);
    let (addr, ctx) = start(&broker).await;
    let mut ws = connect(addr, "alice", "orders").await;

    let error = next_envelope(&mut ws).await.unwrap();
    assert_eq!(error["message"], "error");
    assert!(error["error"].as_str().unwrap().contains("orders"));
    assert!(next_envelope(&mut ws).await.is_none());
    assert!(ctx.registry.is_empty());
}

#[tokio::test]
async fn invalid_route_is_refused_before_upgrade() {
    let broker = MemoryBroker::default();
    let (addr, _ctx) = start(&broker).await;

    for path in ["Alice/orders", "alice/or-ders", "alice1/orders"] {
        let url = format!("ws://{addr}/ws/{path}/");
        match tokio_tungstenite::connect_async(url).await {
            Err(tungstenite::Error::Http(response)) => assert_eq!(response.status().as_u16(), 400),
            Err(e) => panic!("unexpected error for {path}: {e}"),
            Ok(_) => panic!("upgrade accepted for {path}"),
        }
    }
    assert!(broker.records("orders").is_empty());
}

#[tokio::test]
async fn operational_endpoints_report_live_sessions() {
    let broker = MemoryBroker::default();
    let (addr, ctx) = start(&broker).await;

    let health = http_get(addr, "/health").await;
    assert!(health.starts_with("HTTP/1.1 200"));
    assert!(health.ends_with("ok"));

    let mut ws = connect(addr, "carol", "payments").await;
    assert_eq!(next_envelope(&mut ws).await.unwrap()["message"], "status");

    let listing = http_get(addr, "/api/sessions").await;
    let body = listing.split("\r\n\r\n").nth(1).unwrap();
    let sessions: Value = serde_json::from_str(body).unwrap();
    assert_eq!(sessions.as_array().unwrap().len(), 1);
    assert_eq!(sessions[0]["client_id"], "carol");
    assert_eq!(sessions[0]["topic"], "payments");

    ws.close(None).await.unwrap();
    for _ in 0..50 {
        if ctx.registry.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(ctx.registry.is_empty());
}

#[tokio::test]
async fn shutdown_closes_live_sessions() {
    let broker = MemoryBroker::default();
    let (addr, ctx) = start(&broker).await;
    let mut ws = connect(addr, "dave", "orders").await;
    assert_eq!(next_envelope(&mut ws).await.unwrap()["message"], "status");

    ctx.shutdown.cancel();

    assert!(next_envelope(&mut ws).await.is_none());
}
