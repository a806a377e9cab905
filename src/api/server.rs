//! HTTP surface for the distributed query layer: `POST /_query` (buffered
//! and SSE modes), `GET /_status`, `GET /metrics` (spec.md §6 `QueryAPI`).

use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode as HttpStatus;
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use futures::stream::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::capture::CaptureManager;
use crate::metrics::Metrics;
use crate::query::{DistributedQuery, QueryArgs, StreamEvent};

pub struct ApiState {
    pub query: Arc<DistributedQuery>,
    pub capture: Arc<CaptureManager>,
    pub metrics: Arc<Metrics>,
    pub request_timeout: Duration,
}

pub fn router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/_query", post(query_handler))
        .route("/_query/stream", post(query_stream_handler))
        .route("/_status", get(status_handler))
        .route("/metrics", get(metrics_handler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(TimeoutLayer::new(state.request_timeout)),
        )
        .with_state(state)
}

async fn query_handler(
    State(state): State<Arc<ApiState>>,
    Json(args): Json<QueryArgs>,
) -> impl IntoResponse {
    match state.query.run(&args).await {
        Ok(result) => (HttpStatus::OK, Json(result)).into_response(),
        Err(err) => (HttpStatus::BAD_REQUEST, Json(error_body(&err.to_string()))).into_response(),
    }
}

async fn query_stream_handler(
    State(state): State<Arc<ApiState>>,
    Json(args): Json<QueryArgs>,
) -> Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>> {
    let (tx, rx) = mpsc::channel::<StreamEvent>(16);
    let query = Arc::clone(&state.query);
    tokio::spawn(async move {
        let _ = query.run_streaming(&args, tx).await;
    });

    let stream = ReceiverStream::new(rx).map(|event| {
        let name = match &event {
            StreamEvent::PartialResult(_) => "PartialResult",
            StreamEvent::Keepalive => "Keepalive",
        };
        let data = serde_json::to_string(&event).unwrap_or_default();
        Ok(Event::default().event(name).data(data))
    });
    Sse::new(stream)
}

async fn status_handler(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    let statuses = state.capture.status();
    Json(
        statuses
            .into_iter()
            .map(|s| {
                serde_json::json!({
                    "iface": s.iface,
                    "packets_processed": s.stats.packets_processed,
                    "packets_dropped": s.stats.packets_dropped,
                    "packets_parse_failed": s.stats.packets_parse_failed,
                    "rotations": s.stats.rotations,
                })
            })
            .collect::<Vec<_>>(),
    )
}

async fn metrics_handler(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    (HttpStatus::OK, state.metrics.render())
}

fn error_body(message: &str) -> serde_json::Value {
    serde_json::json!({ "error": message })
}
