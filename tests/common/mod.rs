#![allow(dead_code)]

use chrono::{NaiveDate, NaiveDateTime};
use std::sync::Arc;
use tradedesk::adapters::clock::FixedClock;
use tradedesk::adapters::memory_store::MemoryStore;
use tradedesk::domain::desk::{DeskConfig, TradingDesk};
use tradedesk::domain::instrument::default_catalog;
use tradedesk::domain::money::Money;
use tradedesk::domain::participant::{Identity, ParticipantId, Role};
use tradedesk::domain::price_oracle::PriceConfig;
use tradedesk::ports::store_port::DeskStore;

pub type MemoryDesk = TradingDesk<MemoryStore, Arc<FixedClock>>;

pub fn at(y: i32, m: u32, d: u32, hh: u32, mm: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(y, m, d)
        .unwrap()
        .and_hms_opt(hh, mm, 0)
        .unwrap()
}

/// 2024-03-04 is a Monday.
pub fn monday(hh: u32, mm: u32) -> NaiveDateTime {
    at(2024, 3, 4, hh, mm)
}

pub fn saturday(hh: u32, mm: u32) -> NaiveDateTime {
    at(2024, 3, 9, hh, mm)
}

pub fn money(raw: &str) -> Money {
    raw.parse().unwrap()
}

pub fn seeded_config() -> DeskConfig {
    DeskConfig {
        prices: PriceConfig {
            seed: Some(7),
            ..PriceConfig::default()
        },
        ..DeskConfig::default()
    }
}

/// A desk over `store` with the default catalog, one operator and one trader.
pub struct Fixture<S> {
    pub desk: TradingDesk<S, Arc<FixedClock>>,
    pub clock: Arc<FixedClock>,
    pub operator: Identity,
    pub alice: ParticipantId,
}

pub fn fixture_with<S: DeskStore>(store: S, config: DeskConfig) -> Fixture<S> {
    let clock = Arc::new(FixedClock::new(monday(10, 0)));
    let desk = TradingDesk::new(store, Arc::clone(&clock), config);
    desk.seed_catalog(&default_catalog()).unwrap();
    let operator = desk
        .register_participant("ops", Role::Operator)
        .unwrap()
        .identity();
    let alice = desk.register_participant("alice", Role::Trader).unwrap().id;
    Fixture {
        desk,
        clock,
        operator,
        alice,
    }
}

pub fn fixture() -> Fixture<MemoryStore> {
    fixture_with(MemoryStore::new(), seeded_config())
}
