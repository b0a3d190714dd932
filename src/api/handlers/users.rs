use std::sync::Arc;

use axum::{
    extract::{Extension, Query},
    http::HeaderMap,
    response::Json,
};
use tracing::instrument;

use crate::api::types::{
    ConfirmEmailRequest, ListUsersQuery, ListUsersResponse, MessageResponse, UpdateUserRequest,
};
use crate::auth::listing::ListSource;
use crate::auth::service::Profile;
use crate::auth::{AuthResult, UserService};

use super::authenticate;

const DEFAULT_PAGE_SIZE: usize = 20;

// axum handler for the caller's profile
#[instrument(skip_all)]
pub async fn me(
    service: Extension<Arc<UserService>>,
    headers: HeaderMap,
) -> AuthResult<Json<Profile>> {
    let claims = authenticate(&service, &headers).await?;
    let profile = service.profile(claims.sub).await?;
    Ok(Json(profile))
}

// axum handler for account deletion
#[instrument(skip_all)]
pub async fn delete_me(
    service: Extension<Arc<UserService>>,
    headers: HeaderMap,
) -> AuthResult<Json<MessageResponse>> {
    let claims = authenticate(&service, &headers).await?;
    service.delete_user(claims.sub).await?;
    Ok(Json(MessageResponse::new("user deleted")))
}

// axum handler for profile updates (name now, email after confirmation)
#[instrument(skip_all)]
pub async fn update_user(
    service: Extension<Arc<UserService>>,
    headers: HeaderMap,
    Json(payload): Json<UpdateUserRequest>,
) -> AuthResult<Json<MessageResponse>> {
    let claims = authenticate(&service, &headers).await?;
    let outcome = service
        .update_user(claims.sub, payload.name.as_deref(), payload.email.as_deref())
        .await?;
    let message = if outcome.email_confirmation_sent {
        "profile updated, confirm the new email to apply it"
    } else {
        "profile updated"
    };
    Ok(Json(MessageResponse::new(message)))
}

// axum handler for committing a pending email change
#[instrument(skip_all)]
pub async fn confirm_email(
    service: Extension<Arc<UserService>>,
    Json(payload): Json<ConfirmEmailRequest>,
) -> AuthResult<Json<MessageResponse>> {
    service.confirm_email_change(&payload.token).await?;
    Ok(Json(MessageResponse::new("email updated")))
}

// axum handler for the paginated user list. The fault policy may drop the
// read; that surfaces as `users: null` and clients retry.
#[instrument(skip_all)]
pub async fn list_users(
    service: Extension<Arc<UserService>>,
    headers: HeaderMap,
    Query(query): Query<ListUsersQuery>,
) -> AuthResult<Json<ListUsersResponse>> {
    authenticate(&service, &headers).await?;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let page = service.fetch_page(limit, query.cursor).await?;
    let response = match page {
        Some(page) => ListUsersResponse {
            users: Some(page.users),
            next_cursor: page.next_cursor,
        },
        None => ListUsersResponse {
            users: None,
            next_cursor: None,
        },
    };
    Ok(Json(response))
}
