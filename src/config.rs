use secrecy::Secret;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,

    // Token signing. Admin and station tokens use independent secrets so a
    // leaked station secret cannot forge admin privilege.
    pub admin_session_secret: Secret<String>,
    pub station_session_secret: Secret<String>,

    // Signed scan-code references embedded in badges/QR codes
    pub scan_ref_secret: Secret<String>,

    // Global legacy admin key (superadmin fallback credential)
    pub admin_api_key: Option<Secret<String>>,

    // Outbound check-in webhook (no-op notifier when unset)
    pub webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self, config::ConfigError> {
        // Load .env file if it exists (for local development)
        let _ = dotenvy::dotenv();

        let config = config::Config::builder()
            .add_source(config::Environment::default().separator("__"))
            .build()?;

        Ok(Self {
            database_url: config.get("database_url")?,
            host: config.get("host").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: config.get("port")?,

            admin_session_secret: Secret::new(config.get("admin_session_secret")?),
            station_session_secret: Secret::new(config.get("station_session_secret")?),
            scan_ref_secret: Secret::new(config.get("scan_ref_secret")?),

            admin_api_key: config
                .get::<String>("admin_api_key")
                .ok()
                .map(Secret::new),

            webhook_url: config.get("webhook_url").ok(),
        })
    }
}
