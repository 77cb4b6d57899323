use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    body::{ Body, Bytes },
    extract::State,
    http::{ header, StatusCode },
    response::{ IntoResponse, Response },
    routing::{ get, post },
    Router,
};
use futures::StreamExt;
use log::{ debug, error, info, warn };
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower_http::cors::{ Any, CorsLayer };
use uuid::Uuid;

use crate::error::Result;
use crate::llm::chat::{ ChatClient, ChunkStream };
use crate::models::chat::ChatRequest;

pub const CHAT_ROUTE: &str = "/api/chat";
const BANNER: &str = "Gemini streaming relay";

#[derive(Clone)]
pub struct AppState {
    chat_client: Arc<dyn ChatClient>,
    stream_error_sentinel: Option<String>,
}

impl AppState {
    pub fn new(chat_client: Arc<dyn ChatClient>, stream_error_sentinel: Option<String>) -> Self {
        Self { chat_client, stream_error_sentinel }
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any);

    Router::new()
        .route("/", get(index_handler))
        .route(CHAT_ROUTE, post(chat_handler))
        .layer(cors)
        .with_state(state)
}

pub fn routes() -> &'static [(&'static str, &'static str)] {
    &[
        ("GET", "/"),
        ("POST", CHAT_ROUTE),
    ]
}

async fn index_handler() -> &'static str {
    BANNER
}

async fn chat_handler(State(state): State<AppState>, body: Bytes) -> Response {
    let request_id = Uuid::new_v4();

    let conversation = match
        ChatRequest::from_slice(&body).and_then(ChatRequest::into_conversation)
    {
        Ok(conversation) => conversation,
        Err(e) => {
            warn!("[{}] Rejected chat request: {}", request_id, e);
            return e.into_response();
        }
    };

    info!(
        "[{}] Relaying {} turn(s) to model {}",
        request_id,
        conversation.turns.len(),
        state.chat_client.get_model()
    );

    let mut upstream = match state.chat_client.stream_generate(&conversation).await {
        Ok(upstream) => upstream,
        Err(e) => {
            error!("[{}] Upstream call failed before streaming: {}", request_id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    // The status is only committed once the first fragment (or a clean end)
    // has arrived.
    let first = match first_fragment(&mut upstream).await {
        Ok(first) => first,
        Err(e) => {
            error!("[{}] Upstream failed before the first chunk: {}", request_id, e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response();
        }
    };

    stream_response(request_id, first, upstream, state.stream_error_sentinel.clone())
}

/// Skips empty fragments. `Ok(None)` means the upstream finished without
/// producing any text.
async fn first_fragment(upstream: &mut ChunkStream) -> Result<Option<String>> {
    while let Some(item) = upstream.next().await {
        let text = item?;
        if !text.is_empty() {
            return Ok(Some(text));
        }
    }
    Ok(None)
}

/// Forwards each upstream fragment to the response body as soon as it
/// arrives. Headers are already committed by then, so a mid-stream failure
/// can only be logged and, when configured, marked with the sentinel.
fn stream_response(
    request_id: Uuid,
    first: Option<String>,
    mut upstream: ChunkStream,
    sentinel: Option<String>
) -> Response {
    let (tx, rx) = mpsc::channel::<std::result::Result<Bytes, Infallible>>(32);

    tokio::spawn(async move {
        let mut forwarded = 0usize;
        if let Some(text) = first {
            forwarded += 1;
            if tx.send(Ok(Bytes::from(text))).await.is_err() {
                debug!("[{}] Client disconnected before the first chunk", request_id);
                return;
            }
        }
        while let Some(item) = upstream.next().await {
            match item {
                Ok(text) => {
                    if text.is_empty() {
                        continue;
                    }
                    forwarded += 1;
                    if tx.send(Ok(Bytes::from(text))).await.is_err() {
                        debug!("[{}] Client disconnected after {} chunk(s)", request_id, forwarded);
                        return;
                    }
                }
                Err(e) => {
                    error!("[{}] Streaming error after {} chunk(s): {}", request_id, forwarded, e);
                    if let Some(marker) = sentinel {
                        let _ = tx.send(Ok(Bytes::from(marker))).await;
                    }
                    return;
                }
            }
        }
        info!("[{}] Stream complete ({} chunk(s))", request_id, forwarded);
    });

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "text/plain; charset=utf-8"),
            (header::CACHE_CONTROL, "no-cache"),
            (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
        ],
        Body::from_stream(ReceiverStream::new(rx)),
    ).into_response()
}
