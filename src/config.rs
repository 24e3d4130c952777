use std::collections::HashMap;
use std::env;
use std::time::Duration;

use crate::error::AppError;
use crate::spatial::honeycomb::ZoneSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    /// Shared secret expected in `x-internal-secret` on /internal routes and
    /// attached to outbound calls to the business layer.
    pub internal_api_secret: String,
    /// Base URL of the business-application collaborator.
    pub internal_api_url: String,
    /// Per-request timeout on outbound calls to the business layer. Keep
    /// below `assignment_lock_ttl`.
    pub backend_timeout: Duration,
    /// Secret embedded in client bearer tokens by the trusted issuer.
    pub auth_secret: String,
    /// Optional key gating /health and /metrics.
    pub metrics_api_key: Option<String>,
    pub offer_deadline: Duration,
    pub sweep_interval: Duration,
    pub disconnect_grace: Duration,
    pub assignment_lock_ttl: Duration,
    pub search_radius_km: f64,
    pub cascade_radius_multiplier: f64,
    pub max_cascades: u32,
    pub h3_resolution: u8,
    pub honeycomb_k_ring: u32,
    pub honeycomb_enabled: bool,
    /// Per-zone overrides of k-ring/enablement, e.g.
    /// `{"downtown":{"k_ring":2},"suburbs":{"enabled":false}}`.
    pub honeycomb_zones: HashMap<String, ZoneSettings>,
    pub location_rate_per_sec: u32,
    pub accept_rate_per_sec: u32,
    pub ping_rate_per_sec: u32,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            internal_api_secret: env::var("INTERNAL_API_SECRET")
                .unwrap_or_else(|_| "dev-internal-secret".to_string()),
            internal_api_url: env::var("INTERNAL_API_URL")
                .unwrap_or_else(|_| "http://localhost:8000".to_string()),
            backend_timeout: Duration::from_secs(parse_or_default("BACKEND_TIMEOUT_SECS", 5)?),
            auth_secret: env::var("AUTH_SECRET").unwrap_or_else(|_| "dev-auth-secret".to_string()),
            metrics_api_key: env::var("METRICS_API_KEY").ok(),
            offer_deadline: Duration::from_secs(parse_or_default("OFFER_DEADLINE_SECS", 15)?),
            sweep_interval: Duration::from_secs(parse_or_default("SWEEP_INTERVAL_SECS", 3)?),
            disconnect_grace: Duration::from_secs(parse_or_default("DISCONNECT_GRACE_SECS", 30)?),
            assignment_lock_ttl: Duration::from_secs(parse_or_default(
                "ASSIGNMENT_LOCK_TTL_SECS",
                10,
            )?),
            search_radius_km: parse_or_default("SEARCH_RADIUS_KM", 5.0)?,
            cascade_radius_multiplier: parse_or_default("CASCADE_RADIUS_MULTIPLIER", 2.0)?,
            max_cascades: parse_or_default("MAX_CASCADES", 1)?,
            h3_resolution: parse_or_default("H3_RESOLUTION", 8)?,
            honeycomb_k_ring: parse_or_default("HONEYCOMB_K_RING", 1)?,
            honeycomb_enabled: parse_or_default("HONEYCOMB_ENABLED", true)?,
            honeycomb_zones: match env::var("HONEYCOMB_ZONES") {
                Ok(raw) => serde_json::from_str(&raw)
                    .map_err(|err| AppError::Internal(format!("invalid HONEYCOMB_ZONES: {err}")))?,
                Err(_) => HashMap::new(),
            },
            location_rate_per_sec: parse_or_default("LOCATION_RATE_PER_SEC", 5)?,
            accept_rate_per_sec: parse_or_default("ACCEPT_RATE_PER_SEC", 2)?,
            ping_rate_per_sec: parse_or_default("PING_RATE_PER_SEC", 1)?,
        })
    }
}

impl Default for Config {
    /// Test-friendly defaults; production reads from the environment.
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            event_buffer_size: 1024,
            internal_api_secret: "dev-internal-secret".to_string(),
            internal_api_url: "http://localhost:8000".to_string(),
            backend_timeout: Duration::from_secs(5),
            auth_secret: "dev-auth-secret".to_string(),
            metrics_api_key: None,
            offer_deadline: Duration::from_secs(15),
            sweep_interval: Duration::from_secs(3),
            disconnect_grace: Duration::from_secs(30),
            assignment_lock_ttl: Duration::from_secs(10),
            search_radius_km: 5.0,
            cascade_radius_multiplier: 2.0,
            max_cascades: 1,
            h3_resolution: 8,
            honeycomb_k_ring: 1,
            honeycomb_enabled: true,
            honeycomb_zones: HashMap::new(),
            location_rate_per_sec: 5,
            accept_rate_per_sec: 2,
            ping_rate_per_sec: 1,
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
