//! Per-participant cash wallet.

use chrono::NaiveDateTime;

use super::error::DeskError;
use super::money::Money;
use super::participant::ParticipantId;

#[derive(Debug, Clone, PartialEq)]
pub struct Ledger {
    pub participant: ParticipantId,
    pub cash_balance: Money,
    pub updated_at: NaiveDateTime,
}

impl Ledger {
    pub fn open(participant: ParticipantId, now: NaiveDateTime) -> Self {
        Ledger {
            participant,
            cash_balance: Money::ZERO,
            updated_at: now,
        }
    }

    pub fn credit(&mut self, amount: Money, now: NaiveDateTime) -> Result<(), DeskError> {
        self.cash_balance =
            self.cash_balance
                .checked_add(amount)
                .ok_or_else(|| DeskError::InvalidAmount {
                    reason: format!("balance would overflow adding {amount}"),
                })?;
        self.updated_at = now;
        Ok(())
    }

    /// Fails with `InsufficientFunds` rather than letting the balance go negative.
    pub fn debit(&mut self, amount: Money, now: NaiveDateTime) -> Result<(), DeskError> {
        if self.cash_balance < amount {
            return Err(DeskError::InsufficientFunds {
                required: amount,
                available: self.cash_balance,
            });
        }
        self.cash_balance = self.cash_balance - amount;
        self.updated_at = now;
        Ok(())
    }
}

/// Deposit and withdrawal amounts must be strictly positive.
pub fn validate_amount(amount: Money) -> Result<Money, DeskError> {
    if !amount.is_positive() {
        return Err(DeskError::InvalidAmount {
            reason: format!("amount must be greater than zero (got {amount})"),
        });
    }
    Ok(amount)
}

/// Parses user input such as `"250.50"` into a positive amount.
pub fn parse_amount(raw: &str) -> Result<Money, DeskError> {
    let amount: Money = raw.parse().map_err(|e: super::money::ParseMoneyError| {
        DeskError::InvalidAmount {
            reason: e.to_string(),
        }
    })?;
    validate_amount(amount)
}
