// SPDX-License-Identifier: MIT OR Apache-2.0
//! Correlation/interaction propagation, request logging, CORS — grounded on
//! the teacher's `RequestLogger`/`CorsConfig` patterns, generalized to a
//! dev/prod split instead of a single fixed origin list.

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue, Method};
use axum::middleware::Next;
use axum::response::Response;
use op_context::RequestContext;
use std::time::Instant;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};

const CORRELATION_HEADER: &str = "x-correlation-id";
const INTERACTION_HEADER: &str = "x-interaction-id";

/// Resolves `X-Correlation-ID`/`X-Interaction-ID`, installs a
/// [`RequestContext`] for the lifetime of the request, and echoes both
/// headers back on the response.
pub async fn context_middleware(req: Request, next: Next) -> Response {
    let correlation_id =
        RequestContext::resolve_correlation_id(req.headers().get(CORRELATION_HEADER).and_then(|v| v.to_str().ok()));
    let interaction_id = req
        .headers()
        .get(INTERACTION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let ctx = match interaction_id.clone() {
        Some(id) => RequestContext::with_interaction(correlation_id.clone(), id),
        None => RequestContext::new(correlation_id.clone()),
    };

    let mut response = op_context::with_context(ctx, next.run(req)).await;

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response.headers_mut().insert(CORRELATION_HEADER, value);
    }
    if let Some(id) = interaction_id {
        if let Ok(value) = HeaderValue::from_str(&id) {
            response.headers_mut().insert(INTERACTION_HEADER, value);
        }
    }
    response
}

/// Logs method, path, status, and duration for every request.
pub async fn request_logger(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let start = Instant::now();
    let response = next.run(req).await;
    let duration_ms = start.elapsed().as_millis();
    tracing::info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        duration_ms = duration_ms,
        "request"
    );
    response
}

/// Dev builds allow any origin (browser testing against `localhost`);
/// production restricts to no cross-origin access until a real origin list
/// is configured, matching the collaborator-owned-CORS boundary (spec §1
/// "HTTP router/CORS layer is collaborator-specified, out of scope here").
pub fn cors_layer(production: bool) -> CorsLayer {
    let methods = AllowMethods::list([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS]);
    let headers = AllowHeaders::list([
        axum::http::header::CONTENT_TYPE,
        axum::http::header::AUTHORIZATION,
        HeaderName::from_static(CORRELATION_HEADER),
        HeaderName::from_static(INTERACTION_HEADER),
    ]);

    let origin = if production { AllowOrigin::list([]) } else { AllowOrigin::any() };

    CorsLayer::new().allow_origin(origin).allow_methods(methods).allow_headers(headers)
}
