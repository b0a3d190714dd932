//! Credential and session lifecycle engine.

pub mod captcha;
pub mod config;
pub mod error;
pub mod listing;
pub mod password;
pub mod service;
pub mod session;
pub mod theme;
pub mod token;

pub use config::AppConfig;
pub use error::{AuthError, AuthResult};
pub use service::UserService;
