use std::sync::Arc;

use anyhow::Result;
use secrecy::SecretString;
use tracing::{info, warn};
use url::Url;

use crate::api;
use crate::auth::listing::CoinFlipFaults;
use crate::auth::password::Argon2Hasher;
use crate::auth::{AppConfig, UserService};
use crate::cli::actions::Action;
use crate::email::{EmailSender, HttpEmailSender, LogEmailSender};
use crate::store::postgres::PgStore;

/// Handle the server action
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server {
        port,
        dsn,
        frontend_url,
        jwt_secret,
        fault_rate,
        email_url,
        email_api_key,
        email_from,
    } = action;

    let store = PgStore::connect(&dsn).await?;
    let mailer = build_mailer(email_url, email_api_key, email_from)?;

    let service = Arc::new(UserService::new(
        Arc::new(store.clone()),
        Arc::new(store),
        Arc::new(Argon2Hasher),
        mailer,
        Arc::new(CoinFlipFaults::new(fault_rate)),
        &jwt_secret,
        AppConfig::new(frontend_url),
    ));

    spawn_token_purge(Arc::clone(&service));

    api::serve(port, service).await
}

/// Hourly hygiene pass over expired tokens. Reads already treat expired
/// tokens as absent, so this only reclaims storage.
fn spawn_token_purge(service: Arc<UserService>) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(std::time::Duration::from_secs(60 * 60));
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match service.purge_expired_tokens().await {
                Ok(purged) if purged > 0 => info!(purged, "purged expired tokens"),
                Ok(_) => {}
                Err(err) => warn!("token purge failed: {err}"),
            }
        }
    });
}

fn build_mailer(
    email_url: Option<String>,
    email_api_key: Option<SecretString>,
    email_from: String,
) -> Result<Arc<dyn EmailSender>> {
    match (email_url, email_api_key) {
        (Some(url), Some(api_key)) => {
            let endpoint = Url::parse(&url)?;
            Ok(Arc::new(HttpEmailSender::new(endpoint, api_key, email_from)?))
        }
        _ => Ok(Arc::new(LogEmailSender)),
    }
}
