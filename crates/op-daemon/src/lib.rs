// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
//! HTTP/SSE edge (collaborator, spec §6): wires every route over
//! `op-capability`/`op-queue`/`op-executor`/`op-bus`/`op-uelr` and formats
//! their results as HTTP responses. Handlers are thin; all policy lives in
//! the crates they call into.

/// Correlation/interaction propagation, request logging, CORS.
pub mod middleware;
/// Mock-plugin selection at process start.
pub mod plugins;
/// Route handlers, grouped by resource.
pub mod routes;
/// Round-robin stream-queue consumer loop.
pub mod worker;

use axum::extract::FromRef;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use op_bus::{BusEvent, InProcessBus, PollSubscription, ProgressBus, StreamBackedBus, Subscription};
use op_config::Config;
use op_core::{OpError, OpErrorKind};
use op_executor::{CancellableRun, Executor, ImagePlugin, TrainingPlugin};
use op_queue::QueuePlane;
use op_uelr::InteractionStore;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Shared application state, cloned cheaply into every handler via
/// [`axum::extract::State`].
#[derive(Clone)]
pub struct AppState {
    /// Resolved process configuration.
    pub config: Arc<Config>,
    /// Job store, stream queue, progress sub-stream, collaborator store.
    pub plane: Arc<QueuePlane>,
    /// The selected progress bus implementation.
    pub bus: BusHandle,
    /// Drives plugins through the stage machine.
    pub executor: Arc<Executor>,
    /// The injected training plugin (spec §9 "explicit dependency injected
    /// at process start").
    pub training_plugin: Arc<dyn TrainingPlugin>,
    /// The injected image plugin.
    pub image_plugin: Arc<dyn ImagePlugin>,
    /// Interaction register (C6).
    pub interactions: Arc<InteractionStore>,
    /// Live cancellation handles for in-flight jobs, keyed by job ID.
    pub cancels: Arc<RwLock<HashMap<String, CancellableRun>>>,
}

impl FromRef<AppState> for Arc<Config> {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}

/// The two [`ProgressBus`] implementations behind one handle, selected once
/// at startup per `config.queue_mode` (spec §4.4 "Selection").
///
/// `subscribe`/`history` dispatch to whichever concrete bus this process
/// picked; SSE handlers only ever see [`BusHandle`] and [`BusSubscription`],
/// never the concrete bus types.
#[derive(Clone)]
pub enum BusHandle {
    /// Single-process deployments: API and worker share one broadcast bus.
    InProcess(Arc<InProcessBus>),
    /// Multi-process deployments: bus is backed by `op-queue`'s progress
    /// sub-stream.
    Stream(Arc<StreamBackedBus>),
}

impl BusHandle {
    /// Returns a `dyn ProgressBus` view of this handle, for constructing an
    /// [`Executor`].
    pub fn as_progress_bus(&self) -> Arc<dyn ProgressBus> {
        match self {
            BusHandle::InProcess(bus) => bus.clone() as Arc<dyn ProgressBus>,
            BusHandle::Stream(bus) => bus.clone() as Arc<dyn ProgressBus>,
        }
    }

    /// Subscribes to a job's progress stream, unifying both concrete
    /// subscription shapes behind [`BusSubscription::recv`].
    pub async fn subscribe(&self, job_id: &str) -> BusSubscription {
        match self {
            BusHandle::InProcess(bus) => BusSubscription::InProcess(bus.subscribe(job_id).await),
            BusHandle::Stream(bus) => BusSubscription::Stream(bus.poll_subscribe(job_id).await),
        }
    }

    /// Returns the retained history for `job_id`, oldest first.
    pub async fn history(&self, job_id: &str) -> Vec<op_core::ProgressEvent> {
        match self {
            BusHandle::InProcess(bus) => bus.history(job_id).await,
            BusHandle::Stream(bus) => bus.history(job_id).await,
        }
    }
}

/// A live subscription to one job's progress stream, regardless of which
/// [`BusHandle`] variant produced it.
pub enum BusSubscription {
    /// Backed by [`op_bus::InProcessBus::subscribe`].
    InProcess(Subscription),
    /// Backed by [`op_bus::StreamBackedBus::poll_subscribe`].
    Stream(PollSubscription),
}

impl BusSubscription {
    /// Waits for the next progress frame, terminal frame, or keepalive.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        match self {
            BusSubscription::InProcess(sub) => sub.recv().await,
            BusSubscription::Stream(sub) => sub.recv().await,
        }
    }
}

/// The uniform JSON error envelope the HTTP layer returns (spec §7
/// "structured error bodies carry `{detail}`").
pub struct ApiError(OpError);

impl From<OpError> for ApiError {
    fn from(err: OpError) -> Self {
        Self(err)
    }
}

impl From<OpErrorKind> for ApiError {
    fn from(kind: OpErrorKind) -> Self {
        Self(OpError::new(kind))
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(OpError { kind: OpErrorKind::ResourceConflict { reason: err.to_string() }, source: Some(err) })
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        Self::from(anyhow::Error::from(err))
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        Self::from(anyhow::Error::from(err))
    }
}

impl From<zip::result::ZipError> for ApiError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::from(anyhow::Error::from(err))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0.kind);
        let detail = self.0.kind.detail();
        let body = Json(serde_json::json!({ "detail": detail }));
        (status, body).into_response()
    }
}

fn status_for(kind: &OpErrorKind) -> StatusCode {
    match kind {
        OpErrorKind::ValidationRejected { .. } => StatusCode::BAD_REQUEST,
        OpErrorKind::ResourceNotFound { .. } => StatusCode::NOT_FOUND,
        OpErrorKind::ResourceConflict { .. } => StatusCode::BAD_REQUEST,
        OpErrorKind::PluginUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        OpErrorKind::PluginFailed { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        OpErrorKind::QueueTransient { .. } => StatusCode::SERVICE_UNAVAILABLE,
        OpErrorKind::RateExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
    }
}

/// Builds the full router: every route in spec.md §6's HTTP surface table,
/// with correlation/interaction context, request logging, and CORS mounted
/// globally, and per-route rate limits on the submission/upload endpoints.
pub fn build_app(state: AppState, production: bool) -> Router {
    use routes::{characters, health, jobs, loras, uelr};

    let training_limited = Router::new()
        .route("/api/training", post(jobs::submit_training))
        .route("/api/training/{id}/cancel", post(jobs::cancel_training))
        .layer(op_ratelimit::RateLimiter::new("training", op_ratelimit::presets::TRAINING).into_layer());

    let generation_limited = Router::new()
        .route("/api/generation", post(jobs::submit_generation))
        .route("/api/generation/{id}/cancel", post(jobs::cancel_generation))
        .layer(op_ratelimit::RateLimiter::new("generation", op_ratelimit::presets::GENERATION).into_layer());

    let upload_limited = Router::new()
        .route("/api/characters/{id}/images", post(characters::upload_image))
        .layer(op_ratelimit::RateLimiter::new("upload", op_ratelimit::presets::UPLOAD).into_layer());

    let default_limited = Router::new()
        .route("/health", get(health::health))
        .route("/api/health", get(health::health))
        .route("/api/ready", get(health::ready))
        .route("/api/info", get(health::info))
        .route("/api/characters", get(characters::list).post(characters::create))
        .route("/api/characters/{id}", get(characters::get).patch(characters::update).delete(characters::delete))
        .route("/api/training/{id}", get(jobs::get_training))
        .route("/api/training/{id}/stream", get(jobs::stream_training))
        .route("/api/generation/{id}", get(jobs::get_generation))
        .route("/api/generation/{id}/stream", get(jobs::stream_generation))
        .route("/api/jobs/{id}/logs", get(jobs::logs))
        .route("/api/jobs/{id}/logs/view", get(jobs::logs_view))
        .route("/api/jobs/{id}/artifacts", get(jobs::artifacts))
        .route("/api/jobs/{id}/artifacts/samples/{name}", get(jobs::artifact_sample))
        .route("/api/jobs/{id}/stream", get(jobs::stream_generic))
        .route("/api/jobs/{id}/debug-bundle", get(jobs::debug_bundle))
        .route("/api/jobs/{id}/summary", get(jobs::summary))
        .route("/api/uelr/interactions", get(uelr::list).post(uelr::create))
        .route("/api/uelr/interactions/{id}", get(uelr::get).delete(uelr::delete_interaction))
        .route("/api/uelr/interactions/{id}/steps", post(uelr::append_steps))
        .route("/api/uelr/interactions/{id}/complete", post(uelr::complete))
        .route("/api/uelr/interactions/{id}/bundle", get(uelr::bundle))
        .route("/api/uelr/cleanup", post(uelr::cleanup))
        .route("/api/loras", get(loras::list))
        .route("/api/loras/{id}", get(loras::get).delete(loras::delete))
        .route("/api/client-logs", post(loras::client_logs))
        .layer(op_ratelimit::RateLimiter::new("default", op_ratelimit::presets::DEFAULT).into_layer());

    Router::new()
        .merge(training_limited)
        .merge(generation_limited)
        .merge(upload_limited)
        .merge(default_limited)
        .layer(axum::middleware::from_fn(middleware::request_logger))
        .layer(axum::middleware::from_fn(middleware::context_middleware))
        .layer(middleware::cors_layer(production))
        .with_state(state)
}
