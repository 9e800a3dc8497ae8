//! axum-side of the drive RPC surface: a router mounted at
//! `/ferrite/drive`, bearer-JWT auth, drive-identity check, and the
//! keep-alive/streaming response framing.

use std::collections::HashMap;

use axum::{
    Router,
    body::Body,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
};
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::auth::TokenIssuer;
use crate::framing::{KEEPALIVE_INTERVAL, encode_data, encode_eof, encode_error, encode_keepalive};
use crate::handler::{HandlerKind, HandlerRegistry};

#[derive(Clone)]
pub struct ServerState {
    pub handlers: HandlerRegistry,
    pub issuer: TokenIssuer,
    /// This drive's own id; empty during the format bootstrap window,
    /// matching `ferrite_storage::LocalDrive`'s check.
    pub drive_id: String,
}

pub fn build_router(state: ServerState) -> Router {
    Router::new()
        .route("/ferrite/drive/v1/{method}", post(dispatch))
        .with_state(state)
}

async fn dispatch(
    State(state): State<ServerState>,
    Path(method): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(resp) = authenticate(&state, &headers) {
        return resp;
    }
    if let Some(disk_id) = headers.get("x-ferrite-disk-id").and_then(|v| v.to_str().ok()) {
        if !state.drive_id.is_empty() && !disk_id.is_empty() && disk_id != state.drive_id {
            return (StatusCode::PRECONDITION_FAILED, "drive identity mismatch").into_response();
        }
    }

    let handler = match state.handlers.get(&method).await {
        Ok(handler) => handler,
        Err(err) => return (StatusCode::NOT_FOUND, err.to_string()).into_response(),
    };

    let (tx, rx) = mpsc::channel::<Bytes>(64);
    let body_bytes: Bytes = body.into();
    tokio::spawn(run_handler(handler, params, body_bytes, tx));

    let stream = futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok::<_, std::io::Error>(chunk), rx))
    });
    Response::builder()
        .status(StatusCode::OK)
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

async fn run_handler(
    handler: HandlerKind,
    params: HashMap<String, String>,
    body: Bytes,
    tx: mpsc::Sender<Bytes>,
) {
    let keepalive_tx = tx.clone();
    let work = async move {
        match handler {
            HandlerKind::Single(h) => match h.handle(params, body).await {
                Ok(payload) => {
                    let _ = tx.send(encode_eof(&payload)).await;
                }
                Err(err) => {
                    let _ = tx.send(encode_error(&err.to_string())).await;
                }
            },
            HandlerKind::Stream(h) => {
                let (inner_tx, mut inner_rx) = mpsc::channel::<Bytes>(64);
                let forward_tx = tx.clone();
                let forwarder = tokio::spawn(async move {
                    while let Some(block) = inner_rx.recv().await {
                        if forward_tx.send(encode_data(&block)).await.is_err() {
                            break;
                        }
                    }
                });
                let result = h.open(params, body, inner_tx).await;
                let _ = forwarder.await;
                match result {
                    Ok(()) => {
                        let _ = tx.send(encode_eof(&[])).await;
                    }
                    Err(err) => {
                        let _ = tx.send(encode_error(&err.to_string())).await;
                    }
                }
            }
        }
    };
    tokio::pin!(work);

    let mut ticker = tokio::time::interval(KEEPALIVE_INTERVAL);
    ticker.tick().await; // consume the immediate first tick

    loop {
        tokio::select! {
            _ = &mut work => break,
            _ = ticker.tick() => {
                if keepalive_tx.send(encode_keepalive()).await.is_err() {
                    break;
                }
            }
        }
    }
}

fn authenticate(state: &ServerState, headers: &HeaderMap) -> std::result::Result<(), Response> {
    let Some(auth) = headers.get(axum::http::header::AUTHORIZATION).and_then(|v| v.to_str().ok()) else {
        return Err((StatusCode::UNAUTHORIZED, "missing bearer token").into_response());
    };
    let Some(token) = auth.strip_prefix("Bearer ") else {
        return Err((StatusCode::UNAUTHORIZED, "malformed authorization header").into_response());
    };
    state
        .issuer
        .verify(token)
        .map(|_| ())
        .map_err(|err| (StatusCode::UNAUTHORIZED, err.to_string()).into_response())
}
