use std::sync::Arc;

use axum::{extract::Extension, response::Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::{AuthResult, UserService};

// axum handler for captcha challenges
pub async fn captcha(service: Extension<Arc<UserService>>) -> AuthResult<Json<Value>> {
    let challenge = service.captcha().challenge().await?;
    Ok(Json(json!({
        "captcha_id": challenge.challenge_id,
        "puzzle": challenge.puzzle,
    })))
}

#[derive(Debug, Deserialize)]
pub struct VerifyCaptchaRequest {
    pub captcha_id: String,
    pub answer: i64,
}

// axum handler for standalone captcha verification. Consumes the
// challenge either way; a verified challenge cannot be presented again.
pub async fn verify_captcha(
    service: Extension<Arc<UserService>>,
    Json(payload): Json<VerifyCaptchaRequest>,
) -> AuthResult<Json<Value>> {
    service
        .captcha()
        .verify(&payload.captcha_id, payload.answer)
        .await?;
    Ok(Json(json!({ "message": "captcha accepted" })))
}
