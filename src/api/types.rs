//! Request and response bodies.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::listing::UserSummary;

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub name: String,
    pub email: String,
    pub captcha_id: String,
    pub captcha_answer: i64,
}

#[derive(Debug, Serialize)]
pub struct RegisterResponse {
    pub id: Uuid,
    /// Also delivered by email; returned so first-party frontends can
    /// complete the flow without waiting for delivery.
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct SetPasswordRequest {
    pub token: String,
    pub password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
    pub captcha_id: String,
    pub captcha_answer: i64,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ForgotPasswordRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePasswordRequest {
    pub old_password: String,
    pub new_password: String,
    pub confirm_password: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateUserRequest {
    pub name: Option<String>,
    pub email: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmEmailRequest {
    pub token: String,
}

#[derive(Debug, Deserialize)]
pub struct ChangeThemeRequest {
    pub theme: String,
}

#[derive(Debug, Deserialize)]
pub struct AddThemeRequest {
    pub name: String,
    pub hex: String,
}

#[derive(Debug, Serialize)]
pub struct ThemeResponse {
    pub theme: String,
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub limit: Option<usize>,
    pub cursor: Option<Uuid>,
}

/// One page of users. `users` is `null` when the fault policy dropped the
/// read; clients treat that as a transient miss and retry.
#[derive(Debug, Serialize)]
pub struct ListUsersResponse {
    pub users: Option<Vec<UserSummary>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<Uuid>,
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}
