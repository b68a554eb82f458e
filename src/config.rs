use std::env;
use std::time::Duration;

use crate::error::DispatchError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub delivery_queue_size: usize,
    pub event_buffer_size: usize,
    /// First courier search radius around the pickup point, in km.
    pub initial_radius_km: f64,
    /// Radius used for the single widening retry when the first search is empty.
    pub widened_radius_km: f64,
    pub route_service_url: String,
    pub route_retry_attempts: u32,
    pub route_retry_base_delay: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, DispatchError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            delivery_queue_size: parse_or_default("DELIVERY_QUEUE_SIZE", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            initial_radius_km: parse_or_default("INITIAL_RADIUS_KM", 10.0)?,
            widened_radius_km: parse_or_default("WIDENED_RADIUS_KM", 20.0)?,
            route_service_url: env::var("ROUTE_SERVICE_URL")
                .unwrap_or_else(|_| "http://route-optimizer-service:8085".to_string()),
            route_retry_attempts: parse_or_default("ROUTE_RETRY_ATTEMPTS", 3)?,
            route_retry_base_delay: Duration::from_millis(parse_or_default(
                "ROUTE_RETRY_BASE_DELAY_MS",
                1000,
            )?),
        })
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, DispatchError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| DispatchError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
