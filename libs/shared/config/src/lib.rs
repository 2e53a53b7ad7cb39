use std::env;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub jwt_secret: String,
    pub database_url: String,
    pub database_max_connections: u32,
    pub server_port: u16,
    pub seed_data_path: Option<String>,
    pub cancellation_window_hours: i64,
    pub max_patient_edits: u32,
    pub lock_timeout_ms: u64,
    pub email_api_url: String,
    pub email_api_key: String,
    pub email_from: String,
    pub sms_provider: String,
    pub tweetsms_api_key: String,
    pub tweetsms_sender: String,
    pub tweetsms_base_url: String,
    pub sms_country_code: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            jwt_secret: String::new(),
            database_url: String::new(),
            database_max_connections: 10,
            server_port: 3000,
            seed_data_path: None,
            cancellation_window_hours: 2,
            max_patient_edits: 2,
            lock_timeout_ms: 5000,
            email_api_url: String::new(),
            email_api_key: String::new(),
            email_from: String::new(),
            sms_provider: String::new(),
            tweetsms_api_key: String::new(),
            tweetsms_sender: String::new(),
            tweetsms_base_url: "https://tweetsms.ps/api.php".to_string(),
            sms_country_code: "970".to_string(),
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let config = Self {
            jwt_secret: env::var("JWT_SECRET")
                .unwrap_or_else(|_| {
                    warn!("JWT_SECRET not set, using empty value");
                    String::new()
                }),
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| {
                    warn!("DATABASE_URL not set, using empty value");
                    String::new()
                }),
            database_max_connections: parse_or_default(
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            ),
            server_port: parse_or_default("SERVER_PORT", defaults.server_port),
            seed_data_path: env::var("SEED_DATA_PATH").ok().filter(|p| !p.is_empty()),
            cancellation_window_hours: parse_or_default(
                "CANCELLATION_WINDOW_HOURS",
                defaults.cancellation_window_hours,
            ),
            max_patient_edits: parse_or_default("MAX_PATIENT_EDITS", defaults.max_patient_edits),
            lock_timeout_ms: parse_or_default("LOCK_TIMEOUT_MS", defaults.lock_timeout_ms),
            email_api_url: env::var("EMAIL_API_URL")
                .unwrap_or_else(|_| {
                    warn!("EMAIL_API_URL not set, email notifications disabled");
                    String::new()
                }),
            email_api_key: env::var("EMAIL_API_KEY").unwrap_or_default(),
            email_from: env::var("DEFAULT_FROM_EMAIL").unwrap_or_default(),
            sms_provider: env::var("SMS_PROVIDER")
                .unwrap_or_else(|_| {
                    warn!("SMS_PROVIDER not set, SMS notifications disabled");
                    String::new()
                }),
            tweetsms_api_key: env::var("TWEETSMS_API_KEY").unwrap_or_default(),
            tweetsms_sender: env::var("TWEETSMS_SENDER").unwrap_or_default(),
            tweetsms_base_url: env::var("TWEETSMS_BASE_URL")
                .unwrap_or_else(|_| defaults.tweetsms_base_url.clone()),
            sms_country_code: env::var("SMS_COUNTRY_CODE")
                .unwrap_or_else(|_| defaults.sms_country_code.clone()),
        };

        if !config.is_configured() {
            warn!("Application not fully configured - missing environment variables");
        }

        config
    }

    pub fn is_configured(&self) -> bool {
        !self.jwt_secret.is_empty() && !self.database_url.is_empty()
    }

    pub fn is_email_configured(&self) -> bool {
        !self.email_api_url.is_empty()
            && !self.email_api_key.is_empty()
            && !self.email_from.is_empty()
    }

    /// SMS is only attempted when the TweetsMS provider is selected and every
    /// credential it needs is present.
    pub fn is_sms_configured(&self) -> bool {
        self.sms_provider.eq_ignore_ascii_case("TWEETSMS")
            && !self.tweetsms_api_key.is_empty()
            && !self.tweetsms_sender.is_empty()
    }
}

fn parse_or_default<T>(key: &str, default: T) -> T
where
    T: FromStr + Copy + std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            warn!("{} has invalid value {:?}, using default {}", key, raw, default);
            default
        }),
        Err(_) => default,
    }
}
