pub mod server;

use secrecy::SecretString;

#[derive(Debug)]
pub enum Action {
    Server {
        port: u16,
        dsn: String,
        frontend_url: String,
        jwt_secret: SecretString,
        fault_rate: f64,
        email_url: Option<String>,
        email_api_key: Option<SecretString>,
        email_from: String,
    },
}
