use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;
use tokio::task;
use tower_http::cors::CorsLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::channel::{Channel, InboundMessage};
use crate::classifier::RelationshipClassifier;
use crate::ingestion::{build_dedupe_key, IngestionEnvelope, IngestionPayload};
use crate::ingestion_queue::{IngestionQueue, SqliteIngestionQueue};
use crate::materializer::{route_key_from_recipient, Materializer};
use crate::org_store::OrgStore;
use crate::sender_intel::SenderIntelligenceStore;
use crate::task_store::TaskStore;

use super::auth::verify_inbound_token;
use super::config::ServiceConfig;
use super::inbound::{ChatInboundPayload, EmailInboundPayload};
use super::state::AppState;
use super::worker::spawn_pipeline_worker;
use super::BoxError;

/// The ingestion front door: authenticates the transport, validates shape,
/// enqueues for the worker, and falls back to synchronous materialization
/// when the queue is unavailable. Acknowledges immediately; never blocks on
/// full task creation.
pub async fn run_server(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let config = Arc::new(config);

    // Store and client construction touches disk and spawns the blocking
    // HTTP client, so it runs off the async runtime.
    let setup_config = config.clone();
    let (org_store, task_store, intel_store, queue, classifier) =
        task::spawn_blocking(move || -> Result<_, BoxError> {
            let org_store = Arc::new(OrgStore::new(&setup_config.org_db_path)?);
            let task_store = Arc::new(TaskStore::new(&setup_config.task_db_path)?);
            let intel_store = Arc::new(SenderIntelligenceStore::new(&setup_config.intel_db_path)?);
            let queue = Arc::new(SqliteIngestionQueue::new(
                &setup_config.queue_db_path,
                setup_config.queue_lease_secs,
                setup_config.queue_max_attempts,
                setup_config.queue_backoff_secs,
            )?);
            let classifier = Arc::new(RelationshipClassifier::new(setup_config.classifier.clone()));
            Ok((org_store, task_store, intel_store, queue, classifier))
        })
        .await??;

    let materializer = Arc::new(Materializer::new(
        org_store,
        task_store,
        intel_store,
        classifier,
        config.materializer_config(),
    ));
    let queue: Arc<dyn IngestionQueue> = queue;

    let mut worker_control = spawn_pipeline_worker(
        config.worker_id.clone(),
        config.worker_poll_interval,
        queue.clone(),
        materializer.clone(),
    );

    let state = AppState {
        config: config.clone(),
        queue,
        materializer,
    };

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| format!("invalid host: {}", config.host))?;
    let addr = SocketAddr::new(host, config.port);
    info!("task pipeline service listening on {}", addr);

    let app = Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/inbound/email", post(ingest_email))
        .route("/inbound/chat", post(ingest_chat))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(DefaultBodyLimit::max(config.inbound_body_max_bytes));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let serve_result = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await;
    worker_control.stop_and_join();
    serve_result?;
    Ok(())
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

async fn ingest_email(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Err(reason) = verify_inbound_token(&headers, state.config.inbound_token.as_deref()) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"status": reason})));
    }

    let payload: EmailInboundPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(_) => return (StatusCode::BAD_REQUEST, Json(json!({"status": "bad_json"}))),
    };
    let message = match payload.to_inbound_message() {
        Ok(message) => message,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"status": err.code()})));
        }
    };
    accept_message(&state, Channel::Email, message).await
}

async fn ingest_chat(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> impl IntoResponse {
    if let Err(reason) = verify_inbound_token(&headers, state.config.inbound_token.as_deref()) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"status": reason})));
    }

    let payload: ChatInboundPayload = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(_) => return (StatusCode::BAD_REQUEST, Json(json!({"status": "bad_json"}))),
    };
    let message = match payload.to_inbound_message() {
        Ok(message) => message,
        Err(err) => {
            return (StatusCode::BAD_REQUEST, Json(json!({"status": err.code()})));
        }
    };
    accept_message(&state, Channel::Chat, message).await
}

/// Wrap the message in an envelope and enqueue it. A queue failure runs the
/// materializer synchronously instead of dropping the message; only when
/// both paths fail does the transport see an error (and will retry).
async fn accept_message(
    state: &AppState,
    channel: Channel,
    message: InboundMessage,
) -> (StatusCode, Json<serde_json::Value>) {
    let Some(route_key) = route_key_from_recipient(&message.recipient) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"status": "bad_recipient"})),
        );
    };

    let payload = IngestionPayload::from_inbound(&message);
    let envelope = IngestionEnvelope {
        envelope_id: Uuid::new_v4(),
        received_at: Utc::now(),
        route_key: route_key.clone(),
        channel,
        provider_message_id: message.provider_message_id.clone(),
        dedupe_key: build_dedupe_key(
            &route_key,
            channel,
            message.provider_message_id.as_deref(),
            &payload,
        ),
        payload,
    };

    let queue = state.queue.clone();
    let enqueue_envelope = envelope.clone();
    let enqueued =
        task::spawn_blocking(move || queue.enqueue(&enqueue_envelope)).await;

    match enqueued {
        Ok(Ok(result)) if result.inserted => {
            (StatusCode::OK, Json(json!({"status": "accepted"})))
        }
        Ok(Ok(_)) => (StatusCode::OK, Json(json!({"status": "duplicate"}))),
        Ok(Err(err)) => {
            warn!("enqueue failed, materializing inline: {}", err);
            let materializer = state.materializer.clone();
            let inline = task::spawn_blocking(move || materializer.process(&message)).await;
            match inline {
                Ok(Ok(report)) => {
                    info!("inline materialization outcome: {}", report.outcome.as_str());
                    (StatusCode::OK, Json(json!({"status": "accepted"})))
                }
                Ok(Err(err)) => {
                    error!("inline materialization failed: {}", err);
                    (
                        StatusCode::BAD_GATEWAY,
                        Json(json!({"status": "pipeline_unavailable"})),
                    )
                }
                Err(err) => {
                    error!("inline materialization panicked: {}", err);
                    (
                        StatusCode::BAD_GATEWAY,
                        Json(json!({"status": "pipeline_unavailable"})),
                    )
                }
            }
        }
        Err(err) => {
            error!("enqueue task join error: {}", err);
            (
                StatusCode::BAD_GATEWAY,
                Json(json!({"status": "enqueue_failed"})),
            )
        }
    }
}
