//! HTTP surface
//!
//! Exposes the pipeline over warp:
//!
//! - `POST /process-file?filename=<name>`: raw document bytes in, processing report out
//! - `GET /health`: liveness
//! - `GET /metrics`: metrics snapshot
//! - `POST /crm/escalate`, `/crm/log`, `/risk_alert`, `/compliance/flag`,
//!   `/compliance/accept`: simulated downstream receivers that echo the payload

use crate::config::{ConfigError, ServerSection};
use crate::error::{ErrorResponse, PipelineError, PipelineResult};
use crate::observability::metrics::metrics;
use crate::orchestrator::Orchestrator;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::convert::Infallible;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tracing::{error, info, warn};
use warp::http::StatusCode;
use warp::path::FullPath;
use warp::reply::Response;
use warp::{Filter, Rejection, Reply};

/// Receiver paths and the message each one answers with
const RECEIVERS: [(&str, &str); 5] = [
    ("/crm/escalate", "Escalation received"),
    ("/crm/log", "Logged"),
    ("/risk_alert", "Risk alert received"),
    ("/compliance/flag", "Compliance flag received"),
    ("/compliance/accept", "Compliance accept received"),
];

/// Receivers only ever see action payloads
const MAX_RECEIVER_BODY_BYTES: u64 = 1024 * 1024;

#[derive(Debug, Default, Deserialize)]
struct ProcessQuery {
    #[serde(default)]
    filename: String,
}

#[derive(Debug, Serialize)]
struct HealthStatus {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    trace_backend: &'static str,
    uptime_seconds: u64,
}

/// Every route, with rejections rendered as JSON errors
pub fn routes(
    orchestrator: Arc<Orchestrator>,
    settings: &ServerSection,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    let api = process_route(Arc::clone(&orchestrator), settings.max_upload_bytes)
        .or(health_route(orchestrator))
        .unify()
        .or(metrics_route())
        .unify()
        .boxed();

    let api = if settings.simulate_receivers {
        api.or(receiver_routes()).unify().boxed()
    } else {
        api
    };

    api.recover(handle_rejection)
        .with(warp::trace::request())
}

fn process_route(
    orchestrator: Arc<Orchestrator>,
    max_upload_bytes: u64,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("process-file")
        .and(warp::path::end())
        .and(warp::post())
        .and(warp::query::<ProcessQuery>())
        .and(warp::body::content_length_limit(max_upload_bytes))
        .and(warp::body::bytes())
        .and_then(move |query: ProcessQuery, body: Bytes| {
            let orchestrator = Arc::clone(&orchestrator);
            async move { Ok::<_, Rejection>(process_file(orchestrator, query.filename, body).await) }
        })
}

/// Run the document on its own task so a panic in one document cannot take
/// the connection handler down with it
async fn process_file(orchestrator: Arc<Orchestrator>, filename: String, body: Bytes) -> Response {
    let task = tokio::spawn(async move { orchestrator.process(&filename, body).await });

    match task.await {
        Ok(Ok(report)) => warp::reply::json(&report).into_response(),
        Ok(Err(e)) => error_reply(&e),
        Err(e) => {
            error!(error = %e, "Document processing task aborted");
            json_reply(
                &ErrorResponse {
                    error: "Document processing failed".to_string(),
                    detail: None,
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            )
        }
    }
}

fn error_reply(error: &PipelineError) -> Response {
    let status =
        StatusCode::from_u16(error.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    json_reply(&error.to_error_response(), status)
}

fn json_reply<T: Serialize>(body: &T, status: StatusCode) -> Response {
    warp::reply::with_status(warp::reply::json(body), status).into_response()
}

fn health_route(
    orchestrator: Arc<Orchestrator>,
) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("health")
        .and(warp::path::end())
        .and(warp::get())
        .map(move || {
            let status = HealthStatus {
                status: "healthy",
                service: env!("CARGO_PKG_NAME"),
                version: env!("CARGO_PKG_VERSION"),
                trace_backend: orchestrator.trace_store().backend_name(),
                uptime_seconds: metrics().get_metrics().uptime_seconds,
            };
            warp::reply::json(&status).into_response()
        })
}

fn metrics_route() -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path("metrics")
        .and(warp::path::end())
        .and(warp::get())
        .map(|| warp::reply::json(&metrics().get_metrics()).into_response())
}

fn receiver_routes() -> impl Filter<Extract = (Response,), Error = Rejection> + Clone {
    warp::path::full()
        .and_then(|path: FullPath| async move {
            RECEIVERS
                .iter()
                .find(|(receiver, _)| *receiver == path.as_str())
                .map(|(_, message)| *message)
                .ok_or_else(warp::reject::not_found)
        })
        .and(warp::post())
        .and(warp::body::content_length_limit(MAX_RECEIVER_BODY_BYTES))
        .and(warp::body::json())
        .map(|message: &'static str, data: Value| {
            info!(message, "Simulated receiver called");
            warp::reply::json(&json!({ "message": message, "data": data })).into_response()
        })
}

async fn handle_rejection(rejection: Rejection) -> Result<Response, Infallible> {
    let (status, error) = if rejection.is_not_found() {
        (StatusCode::NOT_FOUND, "Not found")
    } else if rejection.find::<warp::reject::PayloadTooLarge>().is_some() {
        (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large")
    } else if rejection.find::<warp::reject::LengthRequired>().is_some() {
        (StatusCode::LENGTH_REQUIRED, "Content-Length required")
    } else if rejection
        .find::<warp::filters::body::BodyDeserializeError>()
        .is_some()
    {
        (StatusCode::BAD_REQUEST, "Invalid JSON body")
    } else if rejection
        .find::<warp::reject::UnsupportedMediaType>()
        .is_some()
    {
        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "Unsupported media type")
    } else if rejection.find::<warp::reject::InvalidQuery>().is_some() {
        (StatusCode::BAD_REQUEST, "Invalid query string")
    } else if rejection.find::<warp::reject::MethodNotAllowed>().is_some() {
        (StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
    } else {
        warn!(rejection = ?rejection, "Unhandled rejection");
        (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    };

    Ok(json_reply(
        &ErrorResponse {
            error: error.to_string(),
            detail: None,
        },
        status,
    ))
}

/// Resolve `host:port` from the server settings
pub fn bind_address(settings: &ServerSection) -> PipelineResult<SocketAddr> {
    let ip: IpAddr = settings.host.parse().map_err(|_| {
        ConfigError::InvalidConfig(format!(
            "server.host must be an IP address, got {:?}",
            settings.host
        ))
    })?;
    Ok(SocketAddr::new(ip, settings.port))
}

/// Serve until `shutdown` resolves
pub async fn serve_with_shutdown(
    orchestrator: Arc<Orchestrator>,
    settings: &ServerSection,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> PipelineResult<()> {
    let addr = bind_address(settings)?;
    let (bound, server) = warp::serve(routes(orchestrator, settings))
        .try_bind_with_graceful_shutdown(addr, shutdown)
        .map_err(|e| PipelineError::internal_error(format!("failed to bind {addr}: {e}")))?;

    info!(
        address = %bound,
        simulate_receivers = settings.simulate_receivers,
        "HTTP server listening"
    );
    server.await;
    info!("HTTP server stopped");
    Ok(())
}

/// Serve until SIGINT or SIGTERM
pub async fn serve(orchestrator: Arc<Orchestrator>, settings: &ServerSection) -> PipelineResult<()> {
    serve_with_shutdown(orchestrator, settings, shutdown_signal()).await
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down gracefully"),
        _ = terminate => info!("Received SIGTERM, shutting down gracefully"),
    }
}
