//! Core domain types and logic.

pub mod calendar;
pub mod config_validation;
pub mod desk;
pub mod error;
pub mod instrument;
pub mod ledger;
pub mod money;
pub mod order;
pub mod participant;
pub mod price_oracle;
