//! The axum surface: route composition over component endpoint specs,
//! the auth + error-envelope wrapper, request ids, and health.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, Query, Request};
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::MethodRouter;
use axum::{middleware, Json, Router};
use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::json;
use tower_http::compression::CompressionLayer;
use tower_http::trace::TraceLayer;
use tracing::error;
use uuid::Uuid;

use twin_auth::{AuthProvider, RequestHeaders, UserDirectory};
use twin_component::{
    Caller, EndpointRequest, EndpointResponse, EndpointSpec, Method, ResponseBody,
};
use twin_core::{TwinError, TwinResult};

/// A named readiness probe run by `GET /readyz`.
pub type HealthCheck = Arc<dyn Fn() -> BoxFuture<'static, TwinResult<()>> + Send + Sync>;

/// Everything the HTTP wrapper needs around a component handler.
#[derive(Clone)]
pub struct HttpDeps {
    pub auth: Arc<dyn AuthProvider>,
    pub directory: Arc<UserDirectory>,
    pub production: bool,
    pub body_limit_bytes: usize,
    pub is_shutting_down: Arc<AtomicBool>,
    pub health_checks: Arc<Vec<(String, HealthCheck)>>,
    pub enable_compression: bool,
}

const REQUEST_ID_HEADER: &str = "x-request-id";

async fn ensure_request_id(req: Request, next: middleware::Next) -> Response {
    let request_id_header = HeaderName::from_static(REQUEST_ID_HEADER);

    let mut req = req;
    let request_id = req
        .headers()
        .get(&request_id_header)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    // Ensure the header is available to downstream handlers.
    if req.headers().get(&request_id_header).is_none() {
        if let Ok(v) = HeaderValue::from_str(&request_id) {
            req.headers_mut().insert(request_id_header.clone(), v);
        }
    }

    let mut res = next.run(req).await;

    if res.headers().get(&request_id_header).is_none() {
        if let Ok(v) = HeaderValue::from_str(&request_id) {
            res.headers_mut().insert(request_id_header, v);
        }
    }

    res
}

/// Lowercase names, first value wins for multi-value headers.
fn collapse_headers(headers: &HeaderMap) -> RequestHeaders {
    let mut map = RequestHeaders::new();
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            map.entry(name.as_str().to_ascii_lowercase())
                .or_insert_with(|| value.to_string());
        }
    }
    map
}

fn request_id_from(headers: &HeaderMap) -> String {
    headers
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string())
}

/// The §7 envelope: `{error: {code, message, timestamp, requestId,
/// context?, stack?}}`, stack suppressed in production.
fn error_response(err: anyhow::Error, request_id: &str, production: bool) -> Response {
    let stack = if production {
        None
    } else {
        Some(format!("{err:?}"))
    };
    let twin = TwinError::normalize(err).sanitize_for_client();
    let status =
        StatusCode::from_u16(twin.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

    let mut body = json!({
        "code": twin.code(),
        "message": twin.message,
        "timestamp": Utc::now().to_rfc3339(),
        "requestId": request_id,
    });
    if let Some(context) = twin.context {
        body["context"] = context;
    }
    if let Some(stack) = stack {
        body["stack"] = json!(stack);
    }

    (status, Json(json!({"error": body}))).into_response()
}

fn forward_response(response: EndpointResponse) -> Response {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::OK);
    let mut out = match response.body {
        ResponseBody::Json(value) => (status, Json(value)).into_response(),
        ResponseBody::Bytes { content_type, data } => {
            let mut out = (status, data).into_response();
            if let Ok(value) = HeaderValue::from_str(&content_type) {
                out.headers_mut().insert(header::CONTENT_TYPE, value);
            }
            out
        }
        ResponseBody::Empty => status.into_response(),
    };
    for (name, value) in response.headers {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            out.headers_mut().insert(name, value);
        }
    }
    out
}

/// Wrap one component endpoint: resolve auth, invoke, forward or
/// convert the error, log failures with request context.
fn wrap(spec: EndpointSpec, deps: HttpDeps) -> MethodRouter {
    let method = spec.method;
    let handler = move |Path(params): Path<HashMap<String, String>>,
                        Query(query): Query<HashMap<String, String>>,
                        req: Request| {
        let spec_handler = spec.handler.clone();
        let deps = deps.clone();
        async move {
            let (parts, body) = req.into_parts();
            let request_id = request_id_from(&parts.headers);
            let path = parts.uri.path().to_string();
            let headers = collapse_headers(&parts.headers);

            let body = match axum::body::to_bytes(body, deps.body_limit_bytes).await {
                Ok(body) => body,
                Err(e) => {
                    return error_response(
                        TwinError::validation(format!("unreadable request body: {e}"))
                            .into_anyhow(),
                        &request_id,
                        deps.production,
                    );
                }
            };

            // Auth runs before every handler; reconciliation keeps the
            // stored role set current.
            let caller = match deps.auth.parse_request(&headers) {
                Some(auth_user) => {
                    let is_admin = deps.auth.is_admin(&auth_user);
                    match deps.directory.resolve(&auth_user).await {
                        Ok(user) => Some(Caller { user, is_admin }),
                        Err(e) => {
                            error!(
                                method = method.as_str(),
                                path = %path,
                                request_id = %request_id,
                                error = %e,
                                "user reconciliation failed"
                            );
                            return error_response(e, &request_id, deps.production);
                        }
                    }
                }
                None => None,
            };
            let user_id = caller
                .as_ref()
                .map(|c| c.user.external_id.clone())
                .unwrap_or_default();

            let request = EndpointRequest {
                method,
                path: path.clone(),
                headers,
                params,
                query,
                body,
                caller,
            };

            match spec_handler(request).await {
                Ok(response) => forward_response(response),
                Err(e) => {
                    error!(
                        method = method.as_str(),
                        path = %path,
                        user_id = %user_id,
                        request_id = %request_id,
                        error = %e,
                        "endpoint handler failed"
                    );
                    error_response(e, &request_id, deps.production)
                }
            }
        }
    };

    match method {
        Method::Get => axum::routing::get(handler),
        Method::Post => axum::routing::post(handler),
        Method::Put => axum::routing::put(handler),
        Method::Patch => axum::routing::patch(handler),
        Method::Delete => axum::routing::delete(handler),
    }
}

fn health_router(deps: &HttpDeps) -> Router {
    let shutting_down = deps.is_shutting_down.clone();
    let healthz = move || {
        let shutting_down = shutting_down.clone();
        async move {
            if shutting_down.load(Ordering::SeqCst) {
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"status": "shutting-down"})),
                )
            } else {
                (StatusCode::OK, Json(json!({"status": "ok"})))
            }
        }
    };

    let checks = deps.health_checks.clone();
    let shutting_down = deps.is_shutting_down.clone();
    let readyz = move || {
        let checks = checks.clone();
        let shutting_down = shutting_down.clone();
        async move {
            if shutting_down.load(Ordering::SeqCst) {
                return (
                    StatusCode::SERVICE_UNAVAILABLE,
                    Json(json!({"status": "shutting-down"})),
                );
            }
            let mut results = serde_json::Map::new();
            let mut healthy = true;
            for (name, check) in checks.iter() {
                match check().await {
                    Ok(()) => {
                        results.insert(name.clone(), json!("ok"));
                    }
                    Err(e) => {
                        healthy = false;
                        results.insert(name.clone(), json!(e.to_string()));
                    }
                }
            }
            let status = if healthy {
                StatusCode::OK
            } else {
                StatusCode::SERVICE_UNAVAILABLE
            };
            (
                status,
                Json(json!({
                    "status": if healthy { "ready" } else { "unhealthy" },
                    "checks": results,
                })),
            )
        }
    };

    Router::new()
        .route("/healthz", axum::routing::get(healthz))
        .route("/readyz", axum::routing::get(readyz))
}

/// Compose the full application router from component routes.
pub fn build_router(routes: Vec<(String, EndpointSpec)>, deps: HttpDeps) -> Router {
    let mut router = health_router(&deps);

    // Group specs per full path so multiple methods merge into one
    // method router.
    let mut by_path: Vec<(String, Vec<EndpointSpec>)> = Vec::new();
    for (mount, spec) in routes {
        let full = join_paths(&mount, &spec.path);
        match by_path.iter_mut().find(|(p, _)| p == &full) {
            Some((_, specs)) => specs.push(spec),
            None => by_path.push((full, vec![spec])),
        }
    }

    for (path, specs) in by_path {
        let mut method_router: Option<MethodRouter> = None;
        for spec in specs {
            let wrapped = wrap(spec, deps.clone());
            method_router = Some(match method_router {
                Some(existing) => existing.merge(wrapped),
                None => wrapped,
            });
        }
        if let Some(method_router) = method_router {
            router = router.route(&path, method_router);
        }
    }

    let production = deps.production;
    let fallback = move |req: Request<Body>| async move {
        let request_id = request_id_from(req.headers());
        error_response(
            TwinError::not_found(format!("no route for {} {}", req.method(), req.uri().path()))
                .into_anyhow(),
            &request_id,
            production,
        )
    };
    router = router.fallback(fallback);

    router = router
        .layer(middleware::from_fn(ensure_request_id))
        .layer(TraceLayer::new_for_http());
    if deps.enable_compression {
        router = router.layer(CompressionLayer::new());
    }
    router
}

/// Join the mount point and a spec path into one axum route path.
pub fn join_paths(mount: &str, path: &str) -> String {
    let mount = mount.trim_end_matches('/');
    let path = path.trim_start_matches('/');
    if path.is_empty() {
        if mount.is_empty() {
            "/".to_string()
        } else {
            mount.to_string()
        }
    } else if mount.is_empty() {
        format!("/{path}")
    } else {
        format!("{mount}/{path}")
    }
}
