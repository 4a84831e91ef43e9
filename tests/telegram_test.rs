use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Multipart, State};
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;

use ma_music_bot::source::telegram::TelegramGateway;
use ma_music_bot::source::traits::{AudioUpload, ChatId, DeliveryGateway, MessageRef};

const TOKEN: &str = "123:TEST";

#[derive(Default)]
struct Recorded {
    calls: Vec<(String, Value)>,
    audio_fields: Vec<(String, String)>,
    audio_bytes: Vec<u8>,
    audio_file_name: Option<String>,
}

type Shared = Arc<Mutex<Recorded>>;

async fn send_message(State(rec): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    rec.lock().calls.push(("sendMessage".into(), body));
    Json(json!({ "ok": true, "result": { "message_id": 77 } }))
}

async fn edit_message(State(rec): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    let rejected = body["text"] == "stale";
    rec.lock().calls.push(("editMessageText".into(), body));
    if rejected {
        return Json(json!({ "ok": false, "description": "Bad Request: message is not modified" }));
    }
    Json(json!({ "ok": true, "result": true }))
}

async fn delete_message(State(rec): State<Shared>, Json(body): Json<Value>) -> Json<Value> {
    rec.lock().calls.push(("deleteMessage".into(), body));
    Json(json!({ "ok": true, "result": true }))
}

async fn send_audio(State(rec): State<Shared>, mut multipart: Multipart) -> Json<Value> {
    while let Some(field) = multipart.next_field().await.unwrap() {
        let name = field.name().unwrap_or_default().to_string();
        if name == "audio" {
            let file_name = field.file_name().map(str::to_string);
            let data = field.bytes().await.unwrap();
            let mut rec = rec.lock();
            rec.audio_file_name = file_name;
            rec.audio_bytes = data.to_vec();
        } else {
            let text = field.text().await.unwrap();
            rec.lock().audio_fields.push((name, text));
        }
    }
    Json(json!({ "ok": true, "result": { "message_id": 78 } }))
}

async fn start_server() -> (SocketAddr, Shared, tokio::task::JoinHandle<()>) {
    let rec: Shared = Arc::default();
    let prefix = format!("/bot{}", TOKEN);
    let app = Router::new()
        .route(&format!("{}/sendMessage", prefix), post(send_message))
        .route(&format!("{}/editMessageText", prefix), post(edit_message))
        .route(&format!("{}/deleteMessage", prefix), post(delete_message))
        .route(&format!("{}/sendAudio", prefix), post(send_audio))
        .with_state(rec.clone());
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, rec, handle)
}

#[tokio::test]
async fn test_text_messages() {
    let (addr, rec, _handle) = start_server().await;
    let gateway = TelegramGateway::with_base_url(&format!("http://{}/", addr), TOKEN).unwrap();

    let sent = gateway.send_text(ChatId(5), "Searching...").await.unwrap();
    assert_eq!(
        sent,
        MessageRef {
            chat: ChatId(5),
            message_id: 77
        }
    );
    gateway.edit_text(sent, "Upload starting...").await.unwrap();
    gateway.delete_message(sent).await.unwrap();

    let calls = rec.lock().calls.clone();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[0].1, json!({ "chat_id": 5, "text": "Searching..." }));
    assert_eq!(calls[1].0, "editMessageText");
    assert_eq!(calls[1].1["message_id"], 77);
    assert_eq!(calls[1].1["text"], "Upload starting...");
    assert_eq!(calls[2].1, json!({ "chat_id": 5, "message_id": 77 }));
}

#[tokio::test]
async fn test_rejected_call_is_an_error() {
    let (addr, _rec, _handle) = start_server().await;
    let gateway = TelegramGateway::with_base_url(&format!("http://{}", addr), TOKEN).unwrap();

    let message = MessageRef {
        chat: ChatId(5),
        message_id: 1,
    };
    let err = gateway.edit_text(message, "stale").await.unwrap_err();
    assert!(err.to_string().contains("message is not modified"));
}

#[tokio::test]
async fn test_send_audio_multipart() {
    let (addr, rec, _handle) = start_server().await;
    let gateway = TelegramGateway::with_base_url(&format!("http://{}", addr), TOKEN).unwrap();

    let upload = AudioUpload {
        data: Bytes::from_static(b"ID3 fake mp3 payload"),
        file_name: "Believer - Imagine Dragons.mp3".into(),
        caption: "Believer - Imagine Dragons".into(),
        title: "Believer".into(),
        performer: "Imagine Dragons".into(),
        duration_seconds: 204,
    };
    gateway
        .send_audio(ChatId(9), upload, Duration::from_secs(10))
        .await
        .unwrap();

    let rec = rec.lock();
    assert_eq!(rec.audio_bytes, b"ID3 fake mp3 payload");
    assert_eq!(
        rec.audio_file_name.as_deref(),
        Some("Believer - Imagine Dragons.mp3")
    );
    let field = |name: &str| {
        rec.audio_fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.clone())
    };
    assert_eq!(field("chat_id").as_deref(), Some("9"));
    assert_eq!(field("caption").as_deref(), Some("Believer - Imagine Dragons"));
    assert_eq!(field("performer").as_deref(), Some("Imagine Dragons"));
    assert_eq!(field("duration").as_deref(), Some("204"));
}

#[tokio::test]
async fn test_unreachable_server_is_an_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let gateway = TelegramGateway::with_base_url(&format!("http://{}", addr), TOKEN).unwrap();
    assert!(gateway.send_text(ChatId(1), "hi").await.is_err());
}

/// Accepts Bot API calls and answers only after `delay`.
async fn start_slow_server(delay: Duration) -> (SocketAddr, tokio::task::JoinHandle<()>) {
    let prefix = format!("/bot{}", TOKEN);
    let reply = move || async move {
        tokio::time::sleep(delay).await;
        Json(json!({ "ok": true, "result": { "message_id": 1 } }))
    };
    let app = Router::new()
        .route(&format!("{}/editMessageText", prefix), post(reply))
        .route(&format!("{}/sendMessage", prefix), post(reply))
        .route(&format!("{}/sendAudio", prefix), post(reply));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handle = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (addr, handle)
}

#[tokio::test]
async fn test_text_calls_time_out_when_server_never_answers() {
    let (addr, _handle) = start_slow_server(Duration::from_secs(3600)).await;
    let gateway = TelegramGateway::with_request_timeout(
        &format!("http://{}", addr),
        TOKEN,
        Duration::from_millis(300),
    )
    .unwrap();

    let message = MessageRef {
        chat: ChatId(5),
        message_id: 1,
    };
    let edit = tokio::time::timeout(
        Duration::from_secs(10),
        gateway.edit_text(message, "Downloading..."),
    )
    .await
    .expect("edit_text must give up on its own");
    assert!(edit.is_err());

    let send = tokio::time::timeout(Duration::from_secs(10), gateway.send_text(ChatId(5), "hi"))
        .await
        .expect("send_text must give up on its own");
    assert!(send.is_err());
}

#[tokio::test]
async fn test_send_audio_uses_its_own_budget() {
    let (addr, _handle) = start_slow_server(Duration::from_millis(600)).await;
    let gateway = TelegramGateway::with_request_timeout(
        &format!("http://{}", addr),
        TOKEN,
        Duration::from_millis(200),
    )
    .unwrap();

    let upload = AudioUpload {
        data: Bytes::from_static(b"ID3"),
        file_name: "a.mp3".into(),
        caption: "a".into(),
        title: "a".into(),
        performer: "b".into(),
        duration_seconds: 1,
    };
    gateway
        .send_audio(ChatId(9), upload, Duration::from_secs(10))
        .await
        .unwrap();
}
