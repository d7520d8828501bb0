//! Executed orders and the positions derived from them.
//!
//! Positions are never stored. A participant's holding in a symbol is the
//! signed sum of its order records, recomputed on demand.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use super::error::DeskError;
use super::money::Money;
use super::participant::ParticipantId;

pub type OrderId = i64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn as_str(self) -> &'static str {
        match self {
            Side::Buy => "buy",
            Side::Sell => "sell",
        }
    }

    /// Contribution of `quantity` shares on this side to a position.
    pub fn signed(self, quantity: i64) -> i64 {
        match self {
            Side::Buy => quantity,
            Side::Sell => -quantity,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Side {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "buy" => Ok(Side::Buy),
            "sell" => Ok(Side::Sell),
            other => Err(format!("unknown order side {other:?}")),
        }
    }
}

/// Immutable audit entry for one executed trade.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderRecord {
    pub id: OrderId,
    pub participant: ParticipantId,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub total_amount: Money,
    pub created_at: NaiveDateTime,
}

impl OrderRecord {
    pub fn price_per_share(&self) -> Money {
        Money::from_cents(self.total_amount.cents() / self.quantity.max(1))
    }
}

/// An order about to be appended; id and timestamp are assigned by the store.
#[derive(Debug, Clone, PartialEq)]
pub struct NewOrder {
    pub participant: ParticipantId,
    pub symbol: String,
    pub side: Side,
    pub quantity: i64,
    pub total_amount: Money,
    pub requested_at: NaiveDateTime,
}

pub fn validate_quantity(quantity: i64) -> Result<i64, DeskError> {
    if quantity <= 0 {
        return Err(DeskError::InvalidQuantity {
            reason: format!("quantity must be a positive whole number (got {quantity})"),
        });
    }
    Ok(quantity)
}

/// Parses a share count typed by a user. Fractional input is rejected.
pub fn parse_quantity(raw: &str) -> Result<i64, DeskError> {
    let trimmed = raw.trim();
    let quantity: i64 = trimmed.parse().map_err(|_| DeskError::InvalidQuantity {
        reason: format!("{trimmed:?} is not a whole number of shares"),
    })?;
    validate_quantity(quantity)
}

/// Σ buys − Σ sells for `symbol` over `records`. Order of records is irrelevant.
pub fn position_from_records<'a, I>(records: I, participant: ParticipantId, symbol: &str) -> i64
where
    I: IntoIterator<Item = &'a OrderRecord>,
{
    records
        .into_iter()
        .filter(|r| r.participant == participant && r.symbol == symbol)
        .map(|r| r.side.signed(r.quantity))
        .sum()
}

/// Every non-zero holding of one participant, keyed by symbol.
pub fn positions_from_records<'a, I>(
    records: I,
    participant: ParticipantId,
) -> BTreeMap<String, i64>
where
    I: IntoIterator<Item = &'a OrderRecord>,
{
    let mut positions = BTreeMap::new();
    for record in records.into_iter().filter(|r| r.participant == participant) {
        *positions.entry(record.symbol.clone()).or_insert(0) += record.side.signed(record.quantity);
    }
    positions.retain(|_, qty| *qty != 0);
    positions
}

/// A negative position means the sell-side check was bypassed somewhere.
pub fn check_position(
    participant: ParticipantId,
    symbol: &str,
    position: i64,
) -> Result<i64, DeskError> {
    if position < 0 {
        return Err(DeskError::InvariantViolation {
            reason: format!(
                "participant {participant} has negative position {position} in {symbol}"
            ),
        });
    }
    Ok(position)
}
