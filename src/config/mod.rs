//! # Configuration Module
//!
//! This module handles loading and validating configuration from
//! environment variables. All settings are centralized here.
//!
//! ## Usage
//!
//! ```rust,ignore
//! let config = AppConfig::from_env()?;
//! println!("Billing day: {}", config.billing_day);
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `SERVER_HOST` | HTTP server host | `127.0.0.1` |
//! | `SERVER_PORT` | HTTP server port | `8080` |
//! | `TOKEN_MINUTES` | Minutes on a freshly minted token | `60` |
//! | `TREASURY_UNIT_PRICE_CENTS` | Primary sale price per token | `1999` |
//! | `PLATFORM_FEE_CENTS` | Flat fee recorded on each trade | `0` |
//! | `MAX_TOKENS_PER_USER_YEAR` | Primary purchase cap per user and year | `20` |
//! | `BILLING_DAY` | Weekday on which calls are metered | `friday` |
//! | `BILLING_TIMEZONE` | IANA timezone for the billing day | `Europe/Bratislava` |
//! | `FORCE_BILLABLE` | Treat every moment as billable (testing) | `false` |
//! | `CHARGE_INTERVAL_SECS` | Billing tick period | `60` |
//! | `SWEEP_INTERVAL_SECS` | Reservation sweep period | `300` |
//! | `MAX_RESERVATION_SECS` | Reservation age the sweeper tolerates | `7200` |
//! | `ICE_STUN_URLS` | Comma-separated STUN/TURN URLs for WebRTC clients | Google STUN |

use std::env;

use chrono::Weekday;
use chrono_tz::Tz;
use thiserror::Error;

/// Errors that can occur when loading configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A required environment variable is missing
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// Failed to parse a value
    #[error("Failed to parse {0}: {1}")]
    ParseError(String, String),
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    // ==========================================
    // SERVER SETTINGS
    // ==========================================
    /// HTTP server host address.
    pub server_host: String,

    /// HTTP server port number.
    pub server_port: u16,

    // ==========================================
    // TOKEN & MARKET SETTINGS
    // ==========================================
    /// Minutes on a freshly minted token. Only tokens still holding
    /// this full allotment are listable on the marketplace.
    pub token_minutes: i64,

    /// Primary sale price per token, in cents.
    pub treasury_unit_price_cents: i64,

    /// Flat platform fee recorded on every trade, in cents.
    pub platform_fee_cents: i64,

    /// How many tokens of one issue year a user may hold through
    /// primary purchases.
    pub max_tokens_per_user_year: i64,

    // ==========================================
    // BILLING SETTINGS
    // ==========================================
    /// Weekday on which call minutes are metered.
    pub billing_day: Weekday,

    /// IANA timezone the billing day is evaluated in.
    pub billing_timezone: Tz,

    /// Bill every moment regardless of the calendar. Testing override.
    pub force_billable: bool,

    /// Billing tick period in seconds. One minute in production;
    /// shorter only for local experiments.
    pub charge_interval_secs: u64,

    // ==========================================
    // RECONCILIATION SETTINGS
    // ==========================================
    /// How often the reservation sweeper runs, in seconds.
    pub sweep_interval_secs: u64,

    /// Age past which a reservation counts as orphaned even while its
    /// call still looks active, in seconds.
    pub max_reservation_secs: i64,

    // ==========================================
    // SIGNALING SETTINGS
    // ==========================================
    /// STUN/TURN server URLs handed to WebRTC clients.
    pub ice_stun_urls: Vec<String>,
}

impl AppConfig {
    /// Load configuration from environment variables.
    ///
    /// Use `dotenvy::dotenv()` before calling this to load from a
    /// `.env` file.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            server_host: get_env_or_default("SERVER_HOST", "127.0.0.1"),
            server_port: parse_env("SERVER_PORT", "8080")?,

            token_minutes: parse_env("TOKEN_MINUTES", "60")?,
            treasury_unit_price_cents: parse_env("TREASURY_UNIT_PRICE_CENTS", "1999")?,
            platform_fee_cents: parse_env("PLATFORM_FEE_CENTS", "0")?,
            max_tokens_per_user_year: parse_env("MAX_TOKENS_PER_USER_YEAR", "20")?,

            billing_day: get_env_or_default("BILLING_DAY", "friday")
                .parse()
                .map_err(|_| {
                    ConfigError::ParseError(
                        "BILLING_DAY".to_string(),
                        "expected a weekday name".to_string(),
                    )
                })?,
            billing_timezone: get_env_or_default("BILLING_TIMEZONE", "Europe/Bratislava")
                .parse::<Tz>()
                .map_err(|e| {
                    ConfigError::ParseError("BILLING_TIMEZONE".to_string(), e.to_string())
                })?,
            force_billable: get_env_or_default("FORCE_BILLABLE", "false")
                .eq_ignore_ascii_case("true"),
            charge_interval_secs: parse_env("CHARGE_INTERVAL_SECS", "60")?,

            sweep_interval_secs: parse_env("SWEEP_INTERVAL_SECS", "300")?,
            max_reservation_secs: parse_env("MAX_RESERVATION_SECS", "7200")?,

            ice_stun_urls: get_env_or_default("ICE_STUN_URLS", "stun:stun.l.google.com:19302")
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
        })
    }

    /// Default configuration for tests: production values, no
    /// environment access.
    pub fn for_tests() -> Self {
        Self {
            server_host: "127.0.0.1".to_string(),
            server_port: 8080,
            token_minutes: 60,
            treasury_unit_price_cents: 1999,
            platform_fee_cents: 0,
            max_tokens_per_user_year: 20,
            billing_day: Weekday::Fri,
            billing_timezone: chrono_tz::Europe::Bratislava,
            force_billable: false,
            charge_interval_secs: 60,
            sweep_interval_secs: 300,
            max_reservation_secs: 7200,
            ice_stun_urls: vec!["stun:stun.l.google.com:19302".to_string()],
        }
    }
}

/// Get an environment variable with a default value.
fn get_env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Get an environment variable with a default and parse it.
fn parse_env<T: std::str::FromStr>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    get_env_or_default(key, default)
        .parse()
        .map_err(|e: T::Err| ConfigError::ParseError(key.to_string(), e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_env_or_default() {
        // Should return default when not set
        let value = get_env_or_default("NONEXISTENT_VAR_12345", "default_value");
        assert_eq!(value, "default_value");
    }

    #[test]
    fn weekday_names_parse() {
        assert_eq!("friday".parse::<Weekday>().unwrap(), Weekday::Fri);
        assert_eq!("Mon".parse::<Weekday>().unwrap(), Weekday::Mon);
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::for_tests();
        assert_eq!(config.token_minutes, 60);
        assert_eq!(config.billing_day, Weekday::Fri);
        assert_eq!(config.billing_timezone, chrono_tz::Europe::Bratislava);
        assert!(!config.force_billable);
    }
}
