use std::sync::Arc;

use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::Json,
};
use tracing::instrument;

use crate::api::types::{
    ForgotPasswordRequest, LoginRequest, LoginResponse, MessageResponse, RegisterRequest,
    RegisterResponse, SetPasswordRequest, UpdatePasswordRequest,
};
use crate::auth::service::CaptchaProof;
use crate::auth::{AuthResult, UserService};

use super::authenticate;

// axum handler for register
#[instrument(skip_all)]
pub async fn register(
    service: Extension<Arc<UserService>>,
    Json(payload): Json<RegisterRequest>,
) -> AuthResult<(StatusCode, Json<RegisterResponse>)> {
    let captcha = CaptchaProof {
        challenge_id: payload.captcha_id,
        answer: payload.captcha_answer,
    };
    let registration = service
        .register(&payload.name, &payload.email, &captcha)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            id: registration.user_id,
            token: registration.verification_token,
        }),
    ))
}

// axum handler for set-password (first password and reset alike)
#[instrument(skip_all)]
pub async fn set_password(
    service: Extension<Arc<UserService>>,
    Json(payload): Json<SetPasswordRequest>,
) -> AuthResult<Json<MessageResponse>> {
    service
        .set_password(&payload.token, &payload.password, &payload.confirm_password)
        .await?;
    Ok(Json(MessageResponse::new("password set")))
}

// axum handler for login
#[instrument(skip_all)]
pub async fn login(
    service: Extension<Arc<UserService>>,
    Json(payload): Json<LoginRequest>,
) -> AuthResult<Json<LoginResponse>> {
    let captcha = CaptchaProof {
        challenge_id: payload.captcha_id,
        answer: payload.captcha_answer,
    };
    let login = service
        .login(&payload.email, &payload.password, &captcha)
        .await?;
    Ok(Json(LoginResponse { token: login.token }))
}

// axum handler for logout
#[instrument(skip_all)]
pub async fn logout(
    service: Extension<Arc<UserService>>,
    headers: HeaderMap,
) -> AuthResult<Json<MessageResponse>> {
    let claims = authenticate(&service, &headers).await?;
    service.logout(claims.sub, &claims.jti).await?;
    Ok(Json(MessageResponse::new("logged out")))
}

// axum handler for forgot-password
#[instrument(skip_all)]
pub async fn forgot_password(
    service: Extension<Arc<UserService>>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> AuthResult<(StatusCode, Json<MessageResponse>)> {
    service.forgot_password(&payload.email).await?;
    // Same response whether or not the email exists.
    Ok((
        StatusCode::ACCEPTED,
        Json(MessageResponse::new(
            "if the email exists, a reset link has been sent",
        )),
    ))
}

// axum handler for update-password (authenticated password change)
#[instrument(skip_all)]
pub async fn update_password(
    service: Extension<Arc<UserService>>,
    headers: HeaderMap,
    Json(payload): Json<UpdatePasswordRequest>,
) -> AuthResult<Json<MessageResponse>> {
    let claims = authenticate(&service, &headers).await?;
    service
        .change_password(
            claims.sub,
            &payload.old_password,
            &payload.new_password,
            &payload.confirm_password,
            &claims.jti,
        )
        .await?;
    Ok(Json(MessageResponse::new("password updated")))
}
