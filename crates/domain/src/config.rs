//! Environment-driven configuration structures shared by all binaries.

use std::{collections::HashMap, env, fmt, time::Duration};

use thiserror::Error;

use crate::model::{Currency, IxpId};

/// API-specific configuration (HTTP bind + shared database) so the HTTP
/// surface does not depend on monitor-only environment variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    database_url: String,
    api_bind_address: String,
    api_unix_socket: Option<String>,
    internal_bind_address: Option<String>,
    internal_unix_socket: Option<String>,
}

impl ApiConfig {
    /// Loads only the environment variables required by the API binary.
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        Ok(Self {
            database_url: get_required_var("DATABASE_URL")?,
            api_bind_address: get_required_var("API_BIND_ADDRESS")?,
            api_unix_socket: get_optional_var("API_UNIX_SOCKET"),
            internal_bind_address: get_optional_var("API_INTERNAL_BIND_ADDRESS"),
            internal_unix_socket: get_optional_var("API_INTERNAL_UNIX_SOCKET"),
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn api_bind_address(&self) -> &str {
        &self.api_bind_address
    }

    pub fn api_unix_socket(&self) -> Option<&str> {
        self.api_unix_socket.as_deref()
    }

    pub fn internal_bind_address(&self) -> Option<&str> {
        self.internal_bind_address.as_deref()
    }

    pub fn internal_unix_socket(&self) -> Option<&str> {
        self.internal_unix_socket.as_deref()
    }

    pub fn has_internal_listener(&self) -> bool {
        self.internal_bind_address.is_some() || self.internal_unix_socket.is_some()
    }
}

/// Knobs for the payment ledger: accepted currencies, the rejection budget
/// before an order is failed, and how gateway calls are bounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerConfig {
    currencies: Vec<Currency>,
    max_rejections: u32,
    gateway_timeout: Duration,
    retry_attempts: u32,
    checkout_urls: HashMap<Currency, String>,
}

impl LedgerConfig {
    pub const DEFAULT_CURRENCIES: &'static str = "INR,USD";
    pub const DEFAULT_MAX_REJECTIONS: u32 = 3;
    pub const DEFAULT_GATEWAY_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(currencies: Vec<Currency>) -> Self {
        Self {
            currencies,
            max_rejections: Self::DEFAULT_MAX_REJECTIONS,
            gateway_timeout: Self::DEFAULT_GATEWAY_TIMEOUT,
            retry_attempts: 1,
            checkout_urls: HashMap::new(),
        }
    }

    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        let raw_currencies = get_optional_var("LEDGER_CURRENCIES")
            .unwrap_or_else(|| Self::DEFAULT_CURRENCIES.to_string());
        let currencies = parse_currency_list("LEDGER_CURRENCIES", &raw_currencies)?;
        if currencies.is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "LEDGER_CURRENCIES",
                reason: "at least one currency is required".into(),
            });
        }

        let checkout_urls = match get_optional_var("LEDGER_CHECKOUT_URLS") {
            Some(raw) => parse_checkout_urls(&raw)?,
            None => HashMap::new(),
        };

        Ok(Self {
            currencies,
            max_rejections: get_number_or(
                "LEDGER_MAX_REJECTIONS",
                Self::DEFAULT_MAX_REJECTIONS as u64,
            )?
            .clamp(1, u32::MAX as u64) as u32,
            gateway_timeout: Duration::from_millis(get_number_or(
                "LEDGER_GATEWAY_TIMEOUT_MS",
                Self::DEFAULT_GATEWAY_TIMEOUT.as_millis() as u64,
            )?),
            retry_attempts: get_number_or("LEDGER_RETRY_ATTEMPTS", 1)?.clamp(1, 10) as u32,
            checkout_urls,
        })
    }

    pub fn with_max_rejections(mut self, max_rejections: u32) -> Self {
        self.max_rejections = max_rejections.max(1);
        self
    }

    pub fn with_gateway_timeout(mut self, timeout: Duration) -> Self {
        self.gateway_timeout = timeout;
        self
    }

    pub fn with_retry_attempts(mut self, attempts: u32) -> Self {
        self.retry_attempts = attempts.max(1);
        self
    }

    pub fn with_checkout_url(mut self, currency: Currency, url: impl Into<String>) -> Self {
        self.checkout_urls.insert(currency, url.into());
        self
    }

    /// Resolves `code` against the allow-list, case-insensitively.
    pub fn accepted_currency(&self, code: &str) -> Option<Currency> {
        let candidate = Currency::parse(code).ok()?;
        self.currencies
            .iter()
            .find(|allowed| **allowed == candidate)
            .cloned()
    }

    pub fn currencies(&self) -> &[Currency] {
        &self.currencies
    }

    pub fn max_rejections(&self) -> u32 {
        self.max_rejections
    }

    pub fn gateway_timeout(&self) -> Duration {
        self.gateway_timeout
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }

    pub fn checkout_url(&self, currency: &Currency) -> Option<&str> {
        self.checkout_urls.get(currency).map(String::as_str)
    }
}

/// Credentials and endpoint for the remote payment gateway.
#[derive(Clone, PartialEq, Eq)]
pub struct GatewayConfig {
    base_url: String,
    key_id: String,
    key_secret: String,
    timeout: Duration,
}

impl GatewayConfig {
    pub fn new(
        base_url: impl Into<String>,
        key_id: impl Into<String>,
        key_secret: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            timeout,
        }
    }

    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;

        Ok(Self {
            base_url: get_required_var("GATEWAY_BASE_URL")?,
            key_id: get_required_var("GATEWAY_KEY_ID")?,
            key_secret: get_required_var("GATEWAY_KEY_SECRET")?,
            timeout: Duration::from_millis(get_number_or("GATEWAY_TIMEOUT_MS", 10_000)?),
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }

    pub fn key_id(&self) -> &str {
        &self.key_id
    }

    pub fn key_secret(&self) -> &str {
        &self.key_secret
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("key_id", &self.key_id)
            .field("key_secret", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// Health polling configuration shared by the monitor binary and the API
/// process when it hosts the monitor in-process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    health_base_url: String,
    ixps: Vec<IxpId>,
    poll_interval: Duration,
    request_timeout: Duration,
    concurrency: usize,
    retry_attempts: u32,
}

impl MonitorConfig {
    pub fn new(health_base_url: impl Into<String>, ixps: Vec<IxpId>) -> Self {
        Self {
            health_base_url: health_base_url.into(),
            ixps,
            poll_interval: Duration::from_secs(60),
            request_timeout: Duration::from_secs(5),
            concurrency: 8,
            retry_attempts: 1,
        }
    }

    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;
        let health_base_url = get_required_var("MONITOR_HEALTH_BASE_URL")?;
        Self::load_with_base(health_base_url)
    }

    /// Returns `Ok(None)` when no health endpoint is configured.
    pub fn load_if_configured() -> Result<Option<Self>, ConfigError> {
        hydrate_env_file()?;
        match get_optional_var("MONITOR_HEALTH_BASE_URL") {
            Some(base) => Self::load_with_base(base).map(Some),
            None => Ok(None),
        }
    }

    fn load_with_base(health_base_url: String) -> Result<Self, ConfigError> {
        let ixps = match get_optional_var("MONITOR_IXPS") {
            Some(raw) => parse_ixp_list(&raw)?,
            None => Vec::new(),
        };

        Ok(Self {
            health_base_url,
            ixps,
            poll_interval: Duration::from_secs(
                get_number_or("MONITOR_POLL_INTERVAL_SECS", 60)?.max(1),
            ),
            request_timeout: Duration::from_millis(get_number_or("MONITOR_TIMEOUT_MS", 5_000)?),
            concurrency: get_number_or("MONITOR_CONCURRENCY", 8)?.clamp(1, 256) as usize,
            retry_attempts: get_number_or("MONITOR_RETRY_ATTEMPTS", 1)?.clamp(1, 10) as u32,
        })
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn health_base_url(&self) -> &str {
        self.health_base_url.trim_end_matches('/')
    }

    pub fn ixps(&self) -> &[IxpId] {
        &self.ixps
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    pub fn retry_attempts(&self) -> u32 {
        self.retry_attempts
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdmissionConfig {
    lease: Option<Duration>,
}

impl AdmissionConfig {
    pub fn load_from_env() -> Result<Self, ConfigError> {
        hydrate_env_file()?;
        let lease = match get_optional_var("ADMISSION_LEASE_SECS") {
            Some(raw) => Some(Duration::from_secs(raw.parse().map_err(|source| {
                ConfigError::InvalidNumber {
                    key: "ADMISSION_LEASE_SECS",
                    source,
                }
            })?)),
            None => None,
        };
        Ok(Self { lease })
    }

    pub fn with_lease(lease: Duration) -> Self {
        Self { lease: Some(lease) }
    }

    pub fn lease(&self) -> Option<Duration> {
        self.lease
    }
}

fn get_required_var(key: &'static str) -> Result<String, ConfigError> {
    match env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                Err(ConfigError::MissingVar { key })
            } else {
                Ok(trimmed.to_string())
            }
        }
        Err(_) => Err(ConfigError::MissingVar { key }),
    }
}

fn get_optional_var(key: &'static str) -> Option<String> {
    env::var(key).ok().and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn get_number_or(key: &'static str, default: u64) -> Result<u64, ConfigError> {
    match get_optional_var(key) {
        Some(raw) => raw
            .parse()
            .map_err(|source| ConfigError::InvalidNumber { key, source }),
        None => Ok(default),
    }
}

fn parse_currency_list(key: &'static str, raw: &str) -> Result<Vec<Currency>, ConfigError> {
    let mut currencies = Vec::new();
    for code in raw.split(',').map(str::trim).filter(|code| !code.is_empty()) {
        let currency = Currency::parse(code).map_err(|err| ConfigError::InvalidValue {
            key,
            reason: err.to_string(),
        })?;
        if !currencies.contains(&currency) {
            currencies.push(currency);
        }
    }
    Ok(currencies)
}

fn parse_checkout_urls(raw: &str) -> Result<HashMap<Currency, String>, ConfigError> {
    let mut urls = HashMap::new();
    for pair in raw.split(',').map(str::trim).filter(|pair| !pair.is_empty()) {
        let Some((code, url)) = pair.split_once('=') else {
            return Err(ConfigError::InvalidValue {
                key: "LEDGER_CHECKOUT_URLS",
                reason: format!("expected CUR=url, got `{pair}`"),
            });
        };
        let currency = Currency::parse(code).map_err(|err| ConfigError::InvalidValue {
            key: "LEDGER_CHECKOUT_URLS",
            reason: err.to_string(),
        })?;
        urls.insert(currency, url.trim().to_string());
    }
    Ok(urls)
}

fn parse_ixp_list(raw: &str) -> Result<Vec<IxpId>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| {
            IxpId::parse(id).map_err(|err| ConfigError::InvalidValue {
                key: "MONITOR_IXPS",
                reason: err.to_string(),
            })
        })
        .collect()
}

pub fn hydrate_env_file() -> Result<(), ConfigError> {
    if env::var_os("IXP_GATE_SKIP_DOTENV").is_some() {
        return Ok(());
    }
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => return Err(ConfigError::Dotenv { source: err }),
    }

    Ok(())
}

/// Errors emitted when `.env` hydration or environment parsing fails.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required environment variable `{key}`")]
    MissingVar { key: &'static str },
    #[error("invalid integer in `{key}`: {source}")]
    InvalidNumber {
        key: &'static str,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("invalid value in `{key}`: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("failed to load .env file: {source}")]
    Dotenv {
        #[from]
        source: dotenvy::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_GUARD: Mutex<()> = Mutex::new(());

    fn set_env() {
        std::env::set_var("IXP_GATE_SKIP_DOTENV", "1");
        std::env::set_var("DATABASE_URL", "sqlite://test.db");
        std::env::set_var("API_BIND_ADDRESS", "127.0.0.1:8080");
        std::env::remove_var("API_UNIX_SOCKET");
        std::env::remove_var("API_INTERNAL_BIND_ADDRESS");
        std::env::remove_var("API_INTERNAL_UNIX_SOCKET");
        std::env::remove_var("LEDGER_CURRENCIES");
        std::env::remove_var("LEDGER_MAX_REJECTIONS");
        std::env::remove_var("LEDGER_CHECKOUT_URLS");
        std::env::remove_var("MONITOR_HEALTH_BASE_URL");
        std::env::remove_var("MONITOR_IXPS");
        std::env::remove_var("ADMISSION_LEASE_SECS");
    }

    #[test]
    fn api_config_supports_unix_and_internal_listeners() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("API_UNIX_SOCKET", "/tmp/api.sock");
        std::env::set_var("API_INTERNAL_BIND_ADDRESS", "127.0.0.1:9090");
        std::env::set_var("API_INTERNAL_UNIX_SOCKET", "/tmp/api-internal.sock");

        let config = ApiConfig::load_from_env().expect("config loads");
        assert_eq!(config.api_unix_socket(), Some("/tmp/api.sock"));
        assert_eq!(config.internal_bind_address(), Some("127.0.0.1:9090"));
        assert_eq!(
            config.internal_unix_socket(),
            Some("/tmp/api-internal.sock")
        );
        assert!(config.has_internal_listener());

        set_env();
    }

    #[test]
    fn required_env_vars_are_trimmed() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("DATABASE_URL", "  sqlite://trim.db  ");
        std::env::set_var("API_BIND_ADDRESS", " 127.0.0.1:8081 ");

        let config = ApiConfig::load_from_env().expect("config loads");
        assert_eq!(config.database_url(), "sqlite://trim.db");
        assert_eq!(config.api_bind_address(), "127.0.0.1:8081");

        set_env();
    }

    #[test]
    fn empty_required_env_var_is_treated_as_missing() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("DATABASE_URL", "   ");

        let err = ApiConfig::load_from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingVar {
                key: "DATABASE_URL"
            }
        ));

        set_env();
    }

    #[test]
    fn ledger_config_defaults_to_inr_and_usd() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();

        let config = LedgerConfig::load_from_env().expect("config loads");
        assert_eq!(config.currencies().len(), 2);
        assert_eq!(
            config.accepted_currency("usd").map(|c| c.to_string()),
            Some("USD".to_string())
        );
        assert!(config.accepted_currency("XYZ").is_none());
        assert_eq!(config.max_rejections(), 3);
        assert_eq!(config.retry_attempts(), 1);
    }

    #[test]
    fn ledger_config_reads_checkout_urls() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        std::env::set_var("LEDGER_CURRENCIES", "eur, inr");
        std::env::set_var(
            "LEDGER_CHECKOUT_URLS",
            "INR=https://pay.example/inr, EUR=https://pay.example/eur",
        );
        std::env::set_var("LEDGER_MAX_REJECTIONS", "5");

        let config = LedgerConfig::load_from_env().expect("config loads");
        let eur = Currency::parse("EUR").unwrap();
        assert_eq!(config.checkout_url(&eur), Some("https://pay.example/eur"));
        assert_eq!(config.max_rejections(), 5);
        assert!(config.accepted_currency("USD").is_none());

        std::env::set_var("LEDGER_CHECKOUT_URLS", "INR");
        assert!(matches!(
            LedgerConfig::load_from_env().unwrap_err(),
            ConfigError::InvalidValue {
                key: "LEDGER_CHECKOUT_URLS",
                ..
            }
        ));

        set_env();
    }

    #[test]
    fn monitor_config_is_optional() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        assert!(MonitorConfig::load_if_configured().unwrap().is_none());

        std::env::set_var("MONITOR_HEALTH_BASE_URL", "http://ixp_api/");
        std::env::set_var("MONITOR_IXPS", "ams-ix, de-cix,,linx");
        let config = MonitorConfig::load_if_configured()
            .unwrap()
            .expect("monitor configured");
        assert_eq!(config.health_base_url(), "http://ixp_api");
        assert_eq!(config.ixps().len(), 3);
        assert_eq!(config.concurrency(), 8);

        set_env();
    }

    #[test]
    fn admission_lease_parses_seconds() {
        let _guard = ENV_GUARD.lock().unwrap();
        set_env();
        assert_eq!(AdmissionConfig::load_from_env().unwrap().lease(), None);

        std::env::set_var("ADMISSION_LEASE_SECS", "900");
        assert_eq!(
            AdmissionConfig::load_from_env().unwrap().lease(),
            Some(Duration::from_secs(900))
        );

        std::env::set_var("ADMISSION_LEASE_SECS", "soon");
        assert!(AdmissionConfig::load_from_env().is_err());

        set_env();
    }

    #[test]
    fn gateway_config_redacts_secret() {
        let config = GatewayConfig::new(
            "https://api.gateway.test/",
            "key_live",
            "super-secret",
            Duration::from_secs(3),
        );
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert_eq!(config.base_url(), "https://api.gateway.test");
    }
}
