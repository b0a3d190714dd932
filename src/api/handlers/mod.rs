pub mod auth;
pub use self::auth::{
    forgot_password, login, logout, register, set_password, update_password,
};

pub mod captcha;
pub use self::captcha::{captcha, verify_captcha};

pub mod health;
pub use self::health::health;

pub mod theme;
pub use self::theme::{add_custom_theme, change_theme, delete_custom_theme};

pub mod users;
pub use self::users::{confirm_email, delete_me, list_users, me, update_user};

// common functions for the handlers
use axum::http::{header, HeaderMap};

use crate::auth::session::SessionClaims;
use crate::auth::{AuthError, AuthResult, UserService};

pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Resolve the caller from the Authorization header. Every failure mode
/// collapses to `Authentication`.
pub async fn authenticate(
    service: &UserService,
    headers: &HeaderMap,
) -> AuthResult<SessionClaims> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(AuthError::Authentication);
    };
    service.sessions().validate(token).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );
        assert_eq!(extract_bearer_token(&headers), Some("abc.def.ghi"));

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic zzz"));
        assert_eq!(extract_bearer_token(&headers), None);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&headers), None);
    }
}
