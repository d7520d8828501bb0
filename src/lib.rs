//! tradedesk: a single-venue trading desk.
//!
//! Participants hold a cash wallet and trade instruments against the desk's
//! own inventory at synthetic prices, gated by a weekly market calendar with
//! holiday exceptions. Positions are derived from the append-only order log.
//!
//! Hexagonal architecture: domain logic in [`domain`], port traits in [`ports`],
//! concrete implementations in [`adapters`].

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod logging;
pub mod ports;
