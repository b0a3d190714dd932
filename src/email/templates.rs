//! Outbound email bodies for the credential flows.
//!
//! Links always carry the raw token in the query string; the backend only
//! ever stores the hash, so a link is the single copy of the secret.

use super::EmailMessage;

fn link(frontend_base_url: &str, path: &str, token: &str) -> String {
    let base = frontend_base_url.trim_end_matches('/');
    format!("{base}/{path}?token={token}")
}

fn button(href: &str, label: &str) -> String {
    format!(
        "<a href=\"{href}\" style=\"display:inline-block;padding:10px 20px;\
         font-size:16px;color:white;background-color:#2679f3;\
         text-decoration:none;border-radius:5px;\">{label}</a>"
    )
}

/// Registration: set-your-password link, 24h expiry.
#[must_use]
pub fn verification_email(frontend_base_url: &str, name: &str, token: &str, to: &str) -> EmailMessage {
    let href = link(frontend_base_url, "set-password", token);
    let html = format!(
        "<p>Hi {name},</p>\
         <p>Thanks for registering! Click the button below to set your password and complete registration:</p>\
         {}\
         <p>This link will expire in 24 hours.</p>",
        button(&href, "Set My Password")
    );
    EmailMessage {
        to: to.to_string(),
        subject: "Complete Your Registration - Set Your Password".to_string(),
        html,
    }
}

/// Password reset link, 1h expiry.
#[must_use]
pub fn reset_email(frontend_base_url: &str, token: &str, to: &str) -> EmailMessage {
    let href = link(frontend_base_url, "set-password", token);
    let html = format!(
        "<p>You requested to reset your password. Click the button below to set a new password:</p>\
         {}\
         <p>This link will expire in 1 hour.</p>\
         <p>If you did not request a password reset, you can safely ignore this email.</p>",
        button(&href, "Reset My Password")
    );
    EmailMessage {
        to: to.to_string(),
        subject: "Reset Your Password".to_string(),
        html,
    }
}

/// Email-change confirmation, sent to the NEW address, 1h expiry.
#[must_use]
pub fn email_change_email(frontend_base_url: &str, token: &str, to: &str) -> EmailMessage {
    let href = link(frontend_base_url, "verify-email", token);
    let html = format!(
        "<p>You requested to change your email. Click below to confirm this address:</p>\
         {}\
         <p>This link will expire in 1 hour.</p>\
         <p>If you did not request this change, ignore this email.</p>\
         <p>After confirmation, log in next time with your new email.</p>",
        button(&href, "Confirm Email")
    );
    EmailMessage {
        to: to.to_string(),
        subject: "Confirm your new email".to_string(),
        html,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn links_embed_the_token_once() {
        let message = verification_email("https://panel.example/", "Alice", "tok123", "a@x.com");
        assert_eq!(message.to, "a@x.com");
        assert!(message
            .html
            .contains("https://panel.example/set-password?token=tok123"));
        assert_eq!(message.html.matches("tok123").count(), 1);
    }

    #[test]
    fn change_email_goes_to_the_new_address() {
        let message = email_change_email("https://panel.example", "tok456", "new@x.com");
        assert_eq!(message.to, "new@x.com");
        assert!(message
            .html
            .contains("https://panel.example/verify-email?token=tok456"));
    }
}
