//! Tradable instruments held by the desk.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use super::error::DeskError;
use super::money::Money;

pub const MAX_SYMBOL_LEN: usize = 10;

#[derive(Debug, Clone, PartialEq)]
pub struct Instrument {
    pub symbol: String,
    pub display_name: String,
    pub quantity_on_hand: i64,
    /// `None` until priced; orders against it fail with `PriceUnavailable`.
    pub current_price: Option<Money>,
    pub updated_at: NaiveDateTime,
}

impl Instrument {
    /// The execution price, if the instrument has a usable one.
    pub fn tradable_price(&self) -> Option<Money> {
        self.current_price.filter(|p| p.is_positive())
    }
}

/// One row of catalog input, from the seed list or a CSV import.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub symbol: String,
    pub name: String,
    pub quantity: i64,
    #[serde(default)]
    pub price: Option<Money>,
}

/// Field-wise edit of an existing instrument. `None` leaves a field alone.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentUpdate {
    pub display_name: Option<String>,
    pub quantity_on_hand: Option<i64>,
    pub current_price: Option<Money>,
}

/// Name and price as published to price-polling clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PriceQuote {
    pub name: String,
    pub price: Money,
}

/// Case-insensitive input, canonical upper-case storage.
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_ascii_uppercase()
}

/// Checks a symbol before it is written into the catalog.
pub fn validate_symbol(raw: &str) -> Result<String, DeskError> {
    let symbol = normalize_symbol(raw);
    let reject = |reason: &str| DeskError::InvalidSymbol {
        symbol: raw.to_string(),
        reason: reason.to_string(),
    };
    if symbol.is_empty() {
        return Err(reject("empty"));
    }
    if symbol.len() > MAX_SYMBOL_LEN {
        return Err(reject("longer than 10 characters"));
    }
    if !symbol
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-')
    {
        return Err(reject("only letters, digits, '.' and '-' are allowed"));
    }
    Ok(symbol)
}

pub fn validate_display_name(name: &str) -> Result<String, DeskError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(DeskError::InvalidSymbol {
            symbol: name.to_string(),
            reason: "display name must not be empty".to_string(),
        });
    }
    Ok(trimmed.to_string())
}

pub fn validate_inventory(quantity: i64) -> Result<i64, DeskError> {
    if quantity < 0 {
        return Err(DeskError::InvalidQuantity {
            reason: format!("inventory cannot be negative (got {quantity})"),
        });
    }
    Ok(quantity)
}

/// The catalog a fresh desk starts with.
pub fn default_catalog() -> Vec<CatalogEntry> {
    [
        ("NVDA", "NVIDIA Corp", 18_911),
        ("INTC", "Intel Corp", 3_743),
        ("AMD", "Advanced Micro Devices Inc", 23_556),
        ("AMZN", "Amazon.com Inc", 22_522),
    ]
    .into_iter()
    .map(|(symbol, name, cents)| CatalogEntry {
        symbol: symbol.to_string(),
        name: name.to_string(),
        quantity: 500,
        price: Some(Money::from_cents(cents)),
    })
    .collect()
}
