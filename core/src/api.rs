/// Board messaging REST API + SSE — HTTP server for the web frontend
///
/// Endpoints:
///   GET  /api/status
///   GET  /api/conversations?user=<id>           one-shot conversation list
///   GET  /api/conversations/:key/messages       one-shot ordered history
///   POST /api/send                              body: {"from","to","text"?,
///                                                 "attachment"?:{"file_name","data_base64"}}
///   GET  /api/attachments/<path>                stored blob bytes
///   GET  /events/conversations/:key             SSE: full message snapshots
///   GET  /events/summaries?user=<id>            SSE: full conversation lists
use crate::chat_service::ChatService;
use crate::conversation::ConversationKey;
use crate::error::{BoardError, Result};
use crate::feed::Feed;
use base64::{engine::general_purpose, Engine as _};
use futures_util::stream::{unfold, StreamExt};
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::Frame;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

// ─── Type alias ──────────────────────────────────────────────────────────────

type BoxBody = http_body_util::combinators::BoxBody<bytes::Bytes, Infallible>;
type Resp = Response<BoxBody>;

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn cors_headers(builder: hyper::http::response::Builder) -> hyper::http::response::Builder {
    builder
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type")
}

fn json_resp(status: StatusCode, body: Vec<u8>) -> Resp {
    cors_headers(Response::builder())
        .status(status)
        .header("Content-Type", "application/json")
        .body(Full::new(bytes::Bytes::from(body)).boxed())
        .unwrap_or_else(|_| Response::new(Full::new(bytes::Bytes::new()).boxed()))
}

fn json_ok(value: serde_json::Value) -> Resp {
    json_resp(StatusCode::OK, serde_json::to_vec(&value).unwrap_or_default())
}

fn json_err(status: StatusCode, msg: &str) -> Resp {
    json_resp(
        status,
        serde_json::to_vec(&serde_json::json!({ "error": msg })).unwrap_or_default(),
    )
}

/// Map the error taxonomy onto HTTP statuses: caller mistakes are 4xx,
/// store/transport faults are 5xx.
fn error_status(e: &BoardError) -> StatusCode {
    match e {
        BoardError::InvalidIdentifier(_) | BoardError::EmptyMessage => StatusCode::BAD_REQUEST,
        BoardError::PayloadTooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn board_err(e: BoardError) -> Resp {
    json_err(error_status(&e), &e.to_string())
}

/// SSE stream over a live feed: every element is one full snapshot.
fn sse_feed<T>(feed: Feed<T>) -> Resp
where
    T: Serialize + Send + 'static,
{
    // Keepalive comment sent immediately so the client knows the connection is live
    let initial = bytes::Bytes::from(": connected\n\n");
    let first = futures_util::stream::once(async move {
        Ok::<Frame<bytes::Bytes>, Infallible>(Frame::data(initial))
    });

    let snapshots = unfold(feed, |mut feed| async move {
        match feed.recv().await {
            Some(snapshot) => {
                let json = serde_json::to_string(&snapshot).unwrap_or_default();
                let data = format!("data: {}\n\n", json);
                Some((
                    Ok::<_, Infallible>(Frame::data(bytes::Bytes::from(data))),
                    feed,
                ))
            }
            None => None, // feed closed
        }
    });

    let stream = first.chain(snapshots);
    cors_headers(Response::builder())
        .status(StatusCode::OK)
        .header("Content-Type", "text/event-stream; charset=utf-8")
        .header("Cache-Control", "no-cache")
        .header("X-Accel-Buffering", "no") // disable nginx buffering
        .body(StreamBody::new(stream).boxed())
        .unwrap_or_else(|_| Response::new(Full::new(bytes::Bytes::new()).boxed()))
}

// ─── Entry point ─────────────────────────────────────────────────────────────

pub async fn start_api(service: ChatService, addr: SocketAddr) -> Result<()> {
    let listener = TcpListener::bind(addr).await.map_err(BoardError::Io)?;
    info!("Board API started on http://{}", addr);

    loop {
        match listener.accept().await {
            Ok((stream, _peer)) => {
                let io = TokioIo::new(stream);
                let service = service.clone();
                tokio::spawn(async move {
                    let svc = service_fn(move |req| {
                        let service = service.clone();
                        async move { Ok::<_, Infallible>(handle(req, service).await) }
                    });
                    if let Err(e) = http1::Builder::new().serve_connection(io, svc).await {
                        // Ignore client-disconnect errors (normal for SSE)
                        if !e.is_incomplete_message() {
                            error!("Board API connection error: {:?}", e);
                        }
                    }
                });
            }
            Err(e) => error!("Board API accept error: {}", e),
        }
    }
}

// ─── Router ──────────────────────────────────────────────────────────────────

async fn handle(req: Request<hyper::body::Incoming>, service: ChatService) -> Resp {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().unwrap_or("").to_string();

    // CORS preflight
    if method == Method::OPTIONS {
        return cors_headers(Response::builder())
            .status(StatusCode::NO_CONTENT)
            .body(Full::new(bytes::Bytes::new()).boxed())
            .unwrap_or_else(|_| Response::new(Full::new(bytes::Bytes::new()).boxed()));
    }

    match (method.clone(), path.as_str()) {
        (Method::GET, "/api/status") => get_status(&service),
        (Method::GET, "/api/conversations") => get_conversations(&query, &service),
        (Method::POST, "/api/send") => post_send(req, &service).await,
        (Method::GET, "/events/summaries") => get_summary_events(&query, &service),
        _ => {
            // Dynamic segments
            if method == Method::GET && path.starts_with("/api/conversations/") {
                if let Some(key) = path
                    .strip_prefix("/api/conversations/")
                    .and_then(|rest| rest.strip_suffix("/messages"))
                {
                    return get_messages(key, &service);
                }
            }
            if method == Method::GET && path.starts_with("/api/attachments/") {
                let blob_path = path.trim_start_matches("/api/attachments/").to_string();
                return get_attachment(&blob_path, &service);
            }
            if method == Method::GET && path.starts_with("/events/conversations/") {
                let key = path.trim_start_matches("/events/conversations/").to_string();
                return get_message_events(&key, &service);
            }
            json_err(StatusCode::NOT_FOUND, "not found")
        }
    }
}

// ─── Handlers ────────────────────────────────────────────────────────────────

fn get_status(service: &ChatService) -> Resp {
    let (message_count, conversation_count) = service.stats();
    json_ok(serde_json::json!({
        "message_count": message_count,
        "conversation_count": conversation_count,
    }))
}

fn get_conversations(query: &str, service: &ChatService) -> Resp {
    let Some(user) = parse_query_param(query, "user") else {
        return json_err(StatusCode::BAD_REQUEST, "missing user parameter");
    };
    match service.conversations_for(&user) {
        Ok(list) => json_ok(serde_json::json!({ "conversations": list })),
        Err(e) => board_err(e),
    }
}

fn get_messages(raw_key: &str, service: &ChatService) -> Resp {
    let key = match ConversationKey::from_raw(raw_key) {
        Ok(k) => k,
        Err(e) => return board_err(e),
    };
    match service.history(&key) {
        Ok(messages) => json_ok(serde_json::json!({ "messages": messages })),
        Err(e) => board_err(e),
    }
}

#[derive(Deserialize)]
struct AttachmentPayload {
    file_name: String,
    data_base64: String,
}

#[derive(Deserialize)]
struct SendRequest {
    from: String,
    to: String,
    text: Option<String>,
    attachment: Option<AttachmentPayload>,
}

async fn post_send(req: Request<hyper::body::Incoming>, service: &ChatService) -> Resp {
    let body = match read_body(req).await {
        Ok(b) => b,
        Err(e) => return json_err(StatusCode::BAD_REQUEST, &format!("body read error: {}", e)),
    };
    let r: SendRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => return json_err(StatusCode::BAD_REQUEST, &format!("invalid JSON: {}", e)),
    };

    let decoded = match &r.attachment {
        Some(payload) => match general_purpose::STANDARD.decode(&payload.data_base64) {
            Ok(bytes) => Some((payload.file_name.clone(), bytes)),
            Err(e) => {
                return json_err(
                    StatusCode::BAD_REQUEST,
                    &format!("invalid attachment base64: {}", e),
                )
            }
        },
        None => None,
    };

    let result = service
        .send(
            &r.from,
            &r.to,
            r.text.as_deref(),
            decoded
                .as_ref()
                .map(|(name, bytes)| (name.as_str(), bytes.as_slice())),
        )
        .await;
    match result {
        Ok(msg) => json_ok(serde_json::json!({ "message": msg })),
        Err(e) => board_err(e),
    }
}

fn get_attachment(blob_path: &str, service: &ChatService) -> Resp {
    match service.open_attachment(blob_path) {
        Ok(Some(bytes)) => cors_headers(Response::builder())
            .status(StatusCode::OK)
            .header("Content-Type", "application/octet-stream")
            .body(Full::new(bytes::Bytes::from(bytes)).boxed())
            .unwrap_or_else(|_| Response::new(Full::new(bytes::Bytes::new()).boxed())),
        Ok(None) => json_err(StatusCode::NOT_FOUND, "attachment not found"),
        Err(e) => board_err(e),
    }
}

fn get_message_events(raw_key: &str, service: &ChatService) -> Resp {
    let key = match ConversationKey::from_raw(raw_key) {
        Ok(k) => k,
        Err(e) => return board_err(e),
    };
    sse_feed(service.subscribe(&key))
}

fn get_summary_events(query: &str, service: &ChatService) -> Resp {
    let Some(user) = parse_query_param(query, "user") else {
        return json_err(StatusCode::BAD_REQUEST, "missing user parameter");
    };
    sse_feed(service.subscribe_all(&user))
}

// ─── Utilities ────────────────────────────────────────────────────────────────

async fn read_body(
    req: Request<hyper::body::Incoming>,
) -> std::result::Result<bytes::Bytes, String> {
    req.collect()
        .await
        .map(|c| c.to_bytes())
        .map_err(|e| e.to_string())
}

fn parse_query_param(query: &str, key: &str) -> Option<String> {
    for pair in query.split('&') {
        if let Some((k, v)) = pair.split_once('=') {
            if k == key && !v.is_empty() {
                return Some(
                    urlencoding::decode(v)
                        .map(|s| s.into_owned())
                        .unwrap_or_else(|_| v.to_string()),
                );
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_query_param() {
        assert_eq!(
            parse_query_param("user=u1&limit=5", "user"),
            Some("u1".to_string())
        );
        assert_eq!(
            parse_query_param("user=prof%20saify", "user"),
            Some("prof saify".to_string())
        );
        assert_eq!(parse_query_param("user=", "user"), None);
        assert_eq!(parse_query_param("", "user"), None);
    }

    #[test]
    fn test_error_status_mapping() {
        assert_eq!(
            error_status(&BoardError::EmptyMessage),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&BoardError::InvalidIdentifier(String::new())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            error_status(&BoardError::PayloadTooLarge { size: 2, max: 1 }),
            StatusCode::PAYLOAD_TOO_LARGE
        );
        assert_eq!(
            error_status(&BoardError::Storage("down".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
