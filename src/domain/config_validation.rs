//! Configuration validation.
//!
//! Checks every desk setting before anything is constructed, then converts
//! the INI values into a typed [`DeskConfig`].

use crate::domain::calendar::{DEFAULT_CLOSE_MINUTE, DEFAULT_OPEN_MINUTE, DefaultHours, TradingWindow, parse_hhmm};
use crate::domain::desk::DeskConfig;
use crate::domain::error::DeskError;
use crate::domain::money::Money;
use crate::domain::price_oracle::PriceConfig;
use crate::ports::config_port::ConfigPort;

pub fn validate_desk_config(config: &dyn ConfigPort) -> Result<(), DeskError> {
    validate_sqlite(config)?;
    default_hours(config)?;
    price_config(config)?;
    Ok(())
}

/// Validates, then builds the typed desk configuration.
pub fn build_desk_config(config: &dyn ConfigPort) -> Result<DeskConfig, DeskError> {
    validate_desk_config(config)?;
    Ok(DeskConfig {
        default_hours: default_hours(config)?,
        prices: price_config(config)?,
        tick_only_when_open: config.get_bool("prices", "tick_only_when_open", false),
    })
}

fn invalid(section: &str, key: &str, reason: impl Into<String>) -> DeskError {
    DeskError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason: reason.into(),
    }
}

fn validate_sqlite(config: &dyn ConfigPort) -> Result<(), DeskError> {
    if config.get_int("sqlite", "pool_size", 4) < 1 {
        return Err(invalid("sqlite", "pool_size", "pool_size must be at least 1"));
    }
    if config.get_int("sqlite", "busy_retries", 5) < 0 {
        return Err(invalid("sqlite", "busy_retries", "busy_retries must be non-negative"));
    }
    if config.get_int("sqlite", "busy_timeout_ms", 250) < 0 {
        return Err(invalid(
            "sqlite",
            "busy_timeout_ms",
            "busy_timeout_ms must be non-negative",
        ));
    }
    Ok(())
}

fn default_hours(config: &dyn ConfigPort) -> Result<DefaultHours, DeskError> {
    let policy = config
        .get_string("calendar", "default_policy")
        .unwrap_or_else(|| "weekdays".to_string());
    match policy.trim().to_lowercase().as_str() {
        "weekdays" => {
            let open = read_time(config, "default_open", DEFAULT_OPEN_MINUTE)?;
            let close = read_time(config, "default_close", DEFAULT_CLOSE_MINUTE)?;
            let window = TradingWindow::new(open, close)
                .map_err(|e| invalid("calendar", "default_close", e.to_string()))?;
            Ok(DefaultHours::Weekdays(window))
        }
        "always_open" => Ok(DefaultHours::AlwaysOpen),
        "closed" => Ok(DefaultHours::Closed),
        other => Err(invalid(
            "calendar",
            "default_policy",
            format!("unknown policy {other:?}, expected weekdays, always_open or closed"),
        )),
    }
}

fn read_time(config: &dyn ConfigPort, key: &str, default: u16) -> Result<u16, DeskError> {
    match config.get_trimmed("calendar", key) {
        Some(raw) => parse_hhmm(&raw).map_err(|_| invalid("calendar", key, "expected HH:MM")),
        None => Ok(default),
    }
}

fn read_money(config: &dyn ConfigPort, key: &str, default: Money) -> Result<Money, DeskError> {
    match config.get_trimmed("prices", key) {
        Some(raw) => raw
            .parse::<Money>()
            .map_err(|e| invalid("prices", key, e.to_string())),
        None => Ok(default),
    }
}

fn price_config(config: &dyn ConfigPort) -> Result<PriceConfig, DeskError> {
    let defaults = PriceConfig::default();

    let threshold_pct = config.get_double("prices", "threshold_pct", defaults.threshold * 100.0);
    if !(threshold_pct > 0.0 && threshold_pct < 100.0) {
        return Err(invalid(
            "prices",
            "threshold_pct",
            "threshold_pct must be between 0 and 100",
        ));
    }

    let min_initial = read_money(config, "min_initial", defaults.min_initial)?;
    let max_initial = read_money(config, "max_initial", defaults.max_initial)?;
    if !min_initial.is_positive() {
        return Err(invalid("prices", "min_initial", "min_initial must be positive"));
    }
    if max_initial < min_initial {
        return Err(invalid(
            "prices",
            "max_initial",
            "max_initial must not be below min_initial",
        ));
    }

    let seed = config
        .get_trimmed("prices", "seed")
        .map(|raw| {
            raw.parse::<u64>()
                .map_err(|_| invalid("prices", "seed", "seed must be an unsigned integer"))
        })
        .transpose()?;

    Ok(PriceConfig {
        threshold: threshold_pct / 100.0,
        min_initial,
        max_initial,
        seed,
    })
}
