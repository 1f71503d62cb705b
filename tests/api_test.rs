//! Control-plane API Tests
//!
//! Exercises the HTTP surface in-process: key checks, dispatch responses and
//! request validation.

use actix_web::http::StatusCode;
use actix_web::{test, web, App};
use futures::stream::SplitStream;
use futures::StreamExt;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use signal_relay_rs::api::{self, API_KEY_HEADER};
use signal_relay_rs::connection::WsConnection;
use signal_relay_rs::credentials::CredentialStore;
use signal_relay_rs::dispatch::Dispatcher;
use signal_relay_rs::registry::ConnectionRegistry;
use signal_relay_rs::security::AuthGate;

const MASTER: &str = "master-secret";

fn dispatcher() -> Dispatcher {
    let store = CredentialStore::new(MASTER, [("A", "a-secret"), ("B", "b-secret")]);
    Dispatcher::new(
        Arc::new(ConnectionRegistry::new()),
        AuthGate::new(Arc::new(store)),
    )
}

fn open_signal() -> Value {
    json!({
        "action": "open",
        "symbol": "EURUSD",
        "type": "long",
        "entry_price": 1.0842,
        "ticket": 7
    })
}

/// Registers `id` with a WebSocket-backed handle and returns the subscriber's
/// end of the pipe. The server-side read half is returned to keep it alive.
async fn attach(
    d: &Dispatcher,
    id: &str,
) -> (
    WebSocketStream<DuplexStream>,
    SplitStream<WebSocketStream<DuplexStream>>,
) {
    let (client_io, server_io) = tokio::io::duplex(64 * 1024);
    let server = WebSocketStream::from_raw_socket(server_io, Role::Server, None).await;
    let client = WebSocketStream::from_raw_socket(client_io, Role::Client, None).await;

    let (sink, stream) = server.split();
    let (conn, _close_rx) = WsConnection::new(sink, Duration::from_secs(1));
    d.registry().register(id.into(), Arc::new(conn));
    (client, stream)
}

macro_rules! relay_app {
    () => {
        relay_app!(dispatcher())
    };
    ($dispatcher:expr) => {
        test::init_service(
            App::new()
                .app_data(web::Data::new($dispatcher))
                .configure(api::config),
        )
        .await
    };
}

#[actix_web::test]
async fn test_send_signal_wrong_key_forbidden() {
    let app = relay_app!();
    let req = test::TestRequest::post()
        .uri("/send_signal")
        .insert_header((API_KEY_HEADER, "a-secret"))
        .set_json(open_signal())
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "forbidden");
}

#[actix_web::test]
async fn test_send_signal_missing_key_forbidden() {
    let app = relay_app!();
    let req = test::TestRequest::post()
        .uri("/send_signal")
        .set_json(open_signal())
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);
}

#[actix_web::test]
async fn test_send_signal_with_no_subscribers() {
    let app = relay_app!();
    let req = test::TestRequest::post()
        .uri("/send_signal")
        .insert_header((API_KEY_HEADER, MASTER))
        .set_json(open_signal())
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "Signal sent");
    assert_eq!(body["clients"], 0);
    assert_eq!(body["delivered"], 0);
}

#[actix_web::test]
async fn test_send_signal_with_targets() {
    let d = dispatcher();
    let (mut a, _a_read) = attach(&d, "A").await;
    let (mut b, _b_read) = attach(&d, "B").await;
    let app = relay_app!(d.clone());

    let mut payload = open_signal();
    payload["target_ids"] = json!(["A", "nobody"]);
    let req = test::TestRequest::post()
        .uri("/send_signal")
        .insert_header((API_KEY_HEADER, MASTER))
        .set_json(payload)
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "Signal sent");
    assert_eq!(body["clients"], 2);
    assert_eq!(body["delivered"], 1);

    let frame = tokio::time::timeout(Duration::from_secs(5), a.next())
        .await
        .expect("A should receive the signal");
    let text = match frame {
        Some(Ok(Message::Text(text))) => text,
        other => panic!("expected a text frame, got {:?}", other),
    };
    let wire: Value = serde_json::from_str(&text).unwrap();
    assert_eq!(wire["symbol"], "EURUSD");
    assert_eq!(wire["entry_price"], 1.0842);
    assert!(wire.get("target_ids").is_none());

    let nothing = tokio::time::timeout(Duration::from_millis(200), b.next()).await;
    assert!(nothing.is_err(), "B was not targeted");
}

#[actix_web::test]
async fn test_malformed_signal_is_bad_request() {
    let app = relay_app!();
    let req = test::TestRequest::post()
        .uri("/send_signal")
        .insert_header((API_KEY_HEADER, MASTER))
        .set_json(json!({ "action": "open" }))
        .to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["error"], "bad_request");
}

#[actix_web::test]
async fn test_health_reports_client_count() {
    let app = relay_app!();
    let req = test::TestRequest::get().uri("/health").to_request();

    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["clients"], 0);
}

#[actix_web::test]
async fn test_subscribers_requires_key() {
    let app = relay_app!();

    let req = test::TestRequest::get().uri("/subscribers").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FORBIDDEN);

    let req = test::TestRequest::get()
        .uri("/subscribers")
        .insert_header((API_KEY_HEADER, MASTER))
        .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body: Value = test::read_body_json(resp).await;
    assert_eq!(body["clients"], 0);
    assert!(body["subscribers"].as_array().unwrap().is_empty());
}
