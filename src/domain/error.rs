//! Domain error types.
//!
//! Every rejected operation maps to exactly one variant so a caller can render
//! a precise message. None of these are fatal to the process.

use super::money::Money;
use super::participant::ParticipantId;

/// Top-level error type for tradedesk.
#[derive(Debug, thiserror::Error)]
pub enum DeskError {
    #[error("market is closed")]
    MarketClosed,

    #[error("unknown symbol {symbol}")]
    UnknownSymbol { symbol: String },

    #[error("price unavailable for {symbol}")]
    PriceUnavailable { symbol: String },

    #[error("not enough {symbol} in inventory: requested {requested}, available {available}")]
    InsufficientInventory {
        symbol: String,
        requested: i64,
        available: i64,
    },

    #[error("insufficient funds: order costs {required}, wallet holds {available}")]
    InsufficientFunds { required: Money, available: Money },

    #[error("participant {participant} has no wallet; deposit funds first")]
    NoLedger { participant: ParticipantId },

    #[error("participant holds {held} shares of {symbol}, cannot sell {requested}")]
    InsufficientPosition {
        symbol: String,
        requested: i64,
        held: i64,
    },

    #[error("invalid quantity: {reason}")]
    InvalidQuantity { reason: String },

    #[error("invalid amount: {reason}")]
    InvalidAmount { reason: String },

    #[error("persistence error: {reason}")]
    Persistence { reason: String },

    #[error("unknown participant {participant}")]
    UnknownParticipant { participant: ParticipantId },

    #[error("participant {participant} is not allowed to {action}")]
    NotAuthorized {
        participant: ParticipantId,
        action: String,
    },

    #[error("invalid schedule: {reason}")]
    InvalidSchedule { reason: String },

    #[error("invalid price threshold {value}: must be between 0 and 1")]
    InvalidThreshold { value: f64 },

    #[error("invalid symbol {symbol:?}: {reason}")]
    InvalidSymbol { symbol: String, reason: String },

    #[error("instrument {symbol} already exists")]
    DuplicateInstrument { symbol: String },

    #[error("instrument {symbol} is referenced by order history")]
    InstrumentInUse { symbol: String },

    #[error("invalid username {username:?}: {reason}")]
    InvalidUsername { username: String, reason: String },

    #[error("username {username} is already registered")]
    DuplicateParticipant { username: String },

    #[error("invariant violated: {reason}")]
    InvariantViolation { reason: String },

    #[error("config parse error in {file}: {reason}")]
    ConfigParse { file: String, reason: String },

    #[error("missing config key [{section}] {key}")]
    ConfigMissing { section: String, key: String },

    #[error("invalid config value [{section}] {key}: {reason}")]
    ConfigInvalid {
        section: String,
        key: String,
        reason: String,
    },

    #[error("malformed CSV: {reason}")]
    CsvFormat { reason: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl DeskError {
    pub fn persistence(reason: impl std::fmt::Display) -> Self {
        DeskError::Persistence {
            reason: reason.to_string(),
        }
    }
}

impl From<&DeskError> for std::process::ExitCode {
    fn from(err: &DeskError) -> Self {
        let code: u8 = match err {
            DeskError::Io(_) | DeskError::CsvFormat { .. } => 1,
            DeskError::ConfigParse { .. }
            | DeskError::ConfigMissing { .. }
            | DeskError::ConfigInvalid { .. } => 2,
            DeskError::Persistence { .. } => 3,
            DeskError::NotAuthorized { .. } => 5,
            DeskError::InvariantViolation { .. } => 6,
            _ => 4,
        };
        std::process::ExitCode::from(code)
    }
}
