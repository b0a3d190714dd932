use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::HeaderMap,
    response::Json,
};
use tracing::instrument;

use crate::api::types::{AddThemeRequest, ChangeThemeRequest, MessageResponse, ThemeResponse};
use crate::auth::{AuthResult, UserService};

use super::authenticate;

// axum handler for switching the active theme
#[instrument(skip_all)]
pub async fn change_theme(
    service: Extension<Arc<UserService>>,
    headers: HeaderMap,
    Json(payload): Json<ChangeThemeRequest>,
) -> AuthResult<Json<MessageResponse>> {
    let claims = authenticate(&service, &headers).await?;
    service.change_theme(claims.sub, &payload.theme).await?;
    Ok(Json(MessageResponse::new("theme updated")))
}

// axum handler for adding a custom theme
#[instrument(skip_all)]
pub async fn add_custom_theme(
    service: Extension<Arc<UserService>>,
    headers: HeaderMap,
    Json(payload): Json<AddThemeRequest>,
) -> AuthResult<Json<MessageResponse>> {
    let claims = authenticate(&service, &headers).await?;
    service
        .add_custom_theme(claims.sub, &payload.name, &payload.hex)
        .await?;
    Ok(Json(MessageResponse::new("theme added")))
}

// axum handler for deleting a custom theme; returns the active theme,
// which falls back to the default if the deleted theme was active.
#[instrument(skip_all)]
pub async fn delete_custom_theme(
    service: Extension<Arc<UserService>>,
    headers: HeaderMap,
    Path(name): Path<String>,
) -> AuthResult<Json<ThemeResponse>> {
    let claims = authenticate(&service, &headers).await?;
    let theme = service.delete_custom_theme(claims.sub, &name).await?;
    Ok(Json(ThemeResponse { theme }))
}
