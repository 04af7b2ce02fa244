//! Self-hosted signaling server
//!
//! Serves the same HTTP surface as the hosted service on top of
//! [`MemorySignaling`], accepting both the `connection*` and `session*`
//! naming of routes and fields.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::error::SignalingError;
use crate::signaling::{MemorySignaling, RetrievalOutcome, SignalingService};

/// Body of a publish request
#[derive(Debug, Deserialize)]
pub struct PublishRequest {
    #[serde(rename = "connectionName", alias = "sessionID")]
    pub name: String,
    #[serde(default)]
    pub password: String,
    pub offer: Option<String>,
    pub answer: Option<String>,
}

/// Query string of a fetch request
#[derive(Debug, Deserialize)]
pub struct FetchParams {
    #[serde(rename = "connectionName", alias = "sessionID")]
    pub name: String,
    #[serde(default)]
    pub password: String,
}

/// Body of a successful fetch
#[derive(Debug, Serialize)]
pub struct DataReply {
    pub data: String,
}

type SharedStore = Arc<MemorySignaling>;

fn error_response(err: SignalingError) -> Response {
    match err {
        SignalingError::UnexpectedStatus { status, body } => (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            body,
        )
            .into_response(),
        other => (StatusCode::INTERNAL_SERVER_ERROR, other.to_string()).into_response(),
    }
}

async fn publish_offer(State(store): State<SharedStore>, Json(req): Json<PublishRequest>) -> Response {
    let Some(sdp) = req.offer else {
        return (StatusCode::BAD_REQUEST, "missing offer").into_response();
    };
    match store.publish_offer(&req.name, &req.password, &sdp).await {
        Ok(_) => {
            tracing::info!(session = %req.name, "offer published");
            (StatusCode::OK, "ok").into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn publish_answer(State(store): State<SharedStore>, Json(req): Json<PublishRequest>) -> Response {
    let Some(sdp) = req.answer else {
        return (StatusCode::BAD_REQUEST, "missing answer").into_response();
    };
    match store.publish_answer(&req.name, &req.password, &sdp).await {
        Ok(_) => {
            tracing::info!(session = %req.name, "answer published");
            (StatusCode::OK, "ok").into_response()
        }
        Err(e) => error_response(e),
    }
}

async fn fetch_offer(State(store): State<SharedStore>, Query(params): Query<FetchParams>) -> Response {
    match store.fetch_offer(&params.name, &params.password).await {
        Ok(RetrievalOutcome::Found(data)) => (StatusCode::OK, Json(DataReply { data })).into_response(),
        Ok(RetrievalOutcome::Forbidden) => (StatusCode::FORBIDDEN, "incorrect password").into_response(),
        Ok(RetrievalOutcome::NotFound) => (StatusCode::NOT_FOUND, "no offer").into_response(),
        Err(e) => error_response(e),
    }
}

async fn fetch_answer(State(store): State<SharedStore>, Query(params): Query<FetchParams>) -> Response {
    match store.fetch_answer(&params.name).await {
        Ok(Some(data)) => (StatusCode::OK, Json(DataReply { data })).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "no answer yet").into_response(),
        Err(e) => error_response(e),
    }
}

/// Build the signaling router over a store
pub fn router(store: SharedStore) -> Router {
    Router::new()
        .route("/connectionOffer", post(publish_offer))
        .route("/sessionOffer", post(publish_offer))
        .route("/connectionAnswer", post(publish_answer))
        .route("/sessionAnswer", post(publish_answer))
        .route("/getOffer", get(fetch_offer))
        .route("/getAnswer", get(fetch_answer))
        .layer(TraceLayer::new_for_http())
        .with_state(store)
}

/// Serve signaling on `addr` until the task is dropped
pub async fn serve(addr: SocketAddr, store: SharedStore) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Signaling server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, router(store)).await
}
