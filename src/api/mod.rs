//! HTTP surface: a thin axum layer over [`UserService`]. Handlers parse,
//! delegate, and map `AuthError` to a status code; no business rule lives
//! here.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{Extension, MatchedPath},
    http::{header::HeaderName, Request, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, patch, post},
    Router,
};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::{
    propagate_header::PropagateHeaderLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span};
use ulid::Ulid;

use crate::auth::{AuthError, UserService};

pub mod handlers;
pub mod types;

const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

#[must_use]
pub fn router(service: Arc<UserService>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/captcha", get(handlers::captcha))
        .route("/captcha/verify", post(handlers::verify_captcha))
        .route("/register", post(handlers::register))
        .route("/set-password", post(handlers::set_password))
        .route("/login", post(handlers::login))
        .route("/logout", patch(handlers::logout))
        .route("/forgot-password", post(handlers::forgot_password))
        .route("/update-password", patch(handlers::update_password))
        .route("/users", get(handlers::list_users).patch(handlers::update_user))
        .route("/users/me", get(handlers::me).delete(handlers::delete_me))
        .route("/confirm-email", post(handlers::confirm_email))
        .route("/theme", patch(handlers::change_theme))
        .route("/theme/custom", post(handlers::add_custom_theme))
        .route("/theme/custom/:name", delete(handlers::delete_custom_theme))
        .layer(
            TraceLayer::new_for_http().make_span_with(|request: &Request<_>| {
                let path = request
                    .extensions()
                    .get::<MatchedPath>()
                    .map_or_else(|| request.uri().path(), MatchedPath::as_str);
                info_span!(
                    "http.request",
                    method = %request.method(),
                    path,
                    request_id = request
                        .headers()
                        .get("x-request-id")
                        .and_then(|id| id.to_str().ok())
                        .unwrap_or_default(),
                )
            }),
        )
        .layer(PropagateHeaderLayer::new(X_REQUEST_ID))
        .layer(SetRequestHeaderLayer::if_not_present(
            X_REQUEST_ID,
            |_: &Request<axum::body::Body>| {
                Ulid::new()
                    .to_string()
                    .to_lowercase()
                    .parse::<axum::http::HeaderValue>()
                    .ok()
            },
        ))
        .layer(Extension(service))
}

/// Bind and serve until the task is cancelled.
pub async fn serve(port: u16, service: Arc<UserService>) -> Result<()> {
    let listener = TcpListener::bind(format!("::0:{port}")).await?;
    info!("listening on [::]:{port}");

    let app = router(service);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::CaptchaInvalid | Self::Authentication => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Transient { .. } => StatusCode::SERVICE_UNAVAILABLE,
            Self::Storage(source) => {
                error!("storage error: {source:?}");
                // Storage details stay in the logs.
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": "internal error" })),
                )
                    .into_response();
            }
        };
        (status, Json(json!({ "message": self.to_string() }))).into_response()
    }
}
