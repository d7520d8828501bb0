//! Desk-level integration tests over the in-memory store.
//!
//! Tests cover:
//! - Order execution and every rejection path, with state checked after each
//! - Market hours: defaults, overrides, holidays
//! - Wallet deposits and withdrawals
//! - Price ticks, snapshots and reprices
//! - Operator-only catalog and calendar management
//! - Conservation of shares and cash over random order sequences

mod common;

use chrono::Duration;
use common::*;
use tradedesk::domain::calendar::{DefaultHours, HoursSource, TradingWindow};
use tradedesk::domain::desk::DeskConfig;
use tradedesk::domain::error::DeskError;
use tradedesk::domain::instrument::{CatalogEntry, Instrument, InstrumentUpdate};
use tradedesk::domain::money::Money;
use tradedesk::domain::order::{Side, parse_quantity};
use tradedesk::domain::participant::Role;
use tradedesk::ports::clock_port::Clock;
use tradedesk::ports::store_port::DeskStore;

mod orders {
    use super::*;

    #[test]
    fn nvda_buy_then_oversell_leaves_state_untouched() {
        let f = fixture();
        f.desk.deposit(f.alice, money("10000.00")).unwrap();

        let exec = f.desk.place_order(f.alice, "NVDA", Side::Buy, 10).unwrap();
        assert_eq!(exec.order.total_amount, money("1891.10"));
        assert_eq!(exec.cash_balance, money("8108.90"));
        assert_eq!(exec.quantity_on_hand, 490);
        assert_eq!(exec.position, 10);
        assert_eq!(f.desk.position_of(f.alice, "NVDA").unwrap(), 10);

        let err = f
            .desk
            .place_order(f.alice, "NVDA", Side::Sell, 15)
            .unwrap_err();
        assert!(matches!(
            err,
            DeskError::InsufficientPosition {
                requested: 15,
                held: 10,
                ..
            }
        ));

        let ledger = f.desk.ledger_of(f.alice).unwrap().unwrap();
        assert_eq!(ledger.cash_balance, money("8108.90"));
        let nvda = find(&f.desk.list_instruments().unwrap(), "NVDA");
        assert_eq!(nvda.quantity_on_hand, 490);
        assert_eq!(f.desk.order_history_of(f.alice).unwrap().len(), 1);
    }

    #[test]
    fn partial_sell_credits_wallet_and_restocks() {
        let f = fixture();
        f.desk.deposit(f.alice, money("10000.00")).unwrap();
        f.desk.place_order(f.alice, "NVDA", Side::Buy, 10).unwrap();

        let exec = f.desk.place_order(f.alice, "nvda", Side::Sell, 4).unwrap();
        assert_eq!(exec.order.symbol, "NVDA");
        assert_eq!(exec.order.total_amount, money("756.44"));
        assert_eq!(exec.cash_balance, money("8865.34"));
        assert_eq!(exec.quantity_on_hand, 494);
        assert_eq!(exec.position, 6);
    }

    #[test]
    fn buy_beyond_inventory_is_rejected() {
        let f = fixture();
        f.desk.deposit(f.alice, money("1000000.00")).unwrap();
        let err = f
            .desk
            .place_order(f.alice, "INTC", Side::Buy, 501)
            .unwrap_err();
        assert!(matches!(
            err,
            DeskError::InsufficientInventory {
                requested: 501,
                available: 500,
                ..
            }
        ));
        assert_eq!(
            f.desk.ledger_of(f.alice).unwrap().unwrap().cash_balance,
            money("1000000.00")
        );
        assert_eq!(
            find(&f.desk.list_instruments().unwrap(), "INTC").quantity_on_hand,
            500
        );
        assert!(f.desk.order_history_of(f.alice).unwrap().is_empty());
    }

    #[test]
    fn buy_without_wallet_is_rejected() {
        let f = fixture();
        let err = f
            .desk
            .place_order(f.alice, "AMD", Side::Buy, 1)
            .unwrap_err();
        assert!(matches!(err, DeskError::NoLedger { .. }));
        assert!(f.desk.ledger_of(f.alice).unwrap().is_none());
    }

    #[test]
    fn buy_beyond_cash_is_rejected() {
        let f = fixture();
        f.desk.deposit(f.alice, money("100.00")).unwrap();
        let err = f
            .desk
            .place_order(f.alice, "NVDA", Side::Buy, 1)
            .unwrap_err();
        match err {
            DeskError::InsufficientFunds {
                required,
                available,
            } => {
                assert_eq!(required, money("189.11"));
                assert_eq!(available, money("100.00"));
            }
            other => panic!("expected InsufficientFunds, got: {other}"),
        }
        assert_eq!(
            find(&f.desk.list_instruments().unwrap(), "NVDA").quantity_on_hand,
            500
        );
    }

    #[test]
    fn exact_balance_buy_empties_wallet() {
        let f = fixture();
        f.desk.deposit(f.alice, money("378.22")).unwrap();
        let exec = f.desk.place_order(f.alice, "NVDA", Side::Buy, 2).unwrap();
        assert_eq!(exec.cash_balance, Money::ZERO);
    }

    #[test]
    fn unknown_symbol_and_participant() {
        let f = fixture();
        f.desk.deposit(f.alice, money("100.00")).unwrap();
        assert!(matches!(
            f.desk.place_order(f.alice, "TSLA", Side::Buy, 1),
            Err(DeskError::UnknownSymbol { .. })
        ));
        assert!(matches!(
            f.desk.place_order(999, "NVDA", Side::Buy, 1),
            Err(DeskError::UnknownParticipant { participant: 999 })
        ));
    }

    #[test]
    fn non_positive_and_fractional_quantities() {
        let f = fixture();
        f.desk.deposit(f.alice, money("100.00")).unwrap();
        for qty in [0, -3] {
            assert!(matches!(
                f.desk.place_order(f.alice, "INTC", Side::Buy, qty),
                Err(DeskError::InvalidQuantity { .. })
            ));
        }
        assert!(matches!(
            parse_quantity("2.5"),
            Err(DeskError::InvalidQuantity { .. })
        ));
    }

    #[test]
    fn unpriced_instrument_cannot_trade() {
        let f = fixture();
        f.desk.deposit(f.alice, money("100.00")).unwrap();
        f.desk
            .store()
            .transact(|tx| {
                tx.insert_instrument(&Instrument {
                    symbol: "NEW".into(),
                    display_name: "Newly Listed".into(),
                    quantity_on_hand: 10,
                    current_price: None,
                    updated_at: monday(9, 0),
                })
            })
            .unwrap();
        assert!(matches!(
            f.desk.place_order(f.alice, "NEW", Side::Buy, 1),
            Err(DeskError::PriceUnavailable { .. })
        ));
    }

    #[test]
    fn history_is_chronological_and_timestamps_never_regress() {
        let f = fixture();
        f.desk.deposit(f.alice, money("10000.00")).unwrap();
        f.desk.place_order(f.alice, "INTC", Side::Buy, 3).unwrap();
        f.clock.set(monday(9, 30));
        f.desk.place_order(f.alice, "AMD", Side::Buy, 1).unwrap();

        let history = f.desk.order_history_of(f.alice).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].symbol, "INTC");
        assert!(history[1].created_at >= history[0].created_at);
    }

    #[test]
    fn portfolio_values_holdings_at_current_prices() {
        let f = fixture();
        f.desk.deposit(f.alice, money("5000.00")).unwrap();
        f.desk.place_order(f.alice, "INTC", Side::Buy, 10).unwrap();
        f.desk.place_order(f.alice, "AMD", Side::Buy, 2).unwrap();
        f.desk.place_order(f.alice, "AMD", Side::Sell, 2).unwrap();

        let portfolio = f.desk.portfolio_of(f.alice).unwrap();
        assert_eq!(portfolio.cash_balance, Some(money("4625.70")));
        assert_eq!(portfolio.holdings.len(), 1);
        assert_eq!(portfolio.holdings[0].symbol, "INTC");
        assert_eq!(portfolio.holdings[0].market_value, money("374.30"));
        assert_eq!(portfolio.market_value, money("374.30"));
        assert_eq!(portfolio.total_value, money("5000.00"));
    }

    #[test]
    fn portfolio_reports_value_overflow() {
        let f = fixture();
        f.desk.deposit(f.alice, money("5000.00")).unwrap();
        f.desk.place_order(f.alice, "NVDA", Side::Buy, 2).unwrap();
        f.desk
            .update_instrument(
                &f.operator,
                "NVDA",
                &InstrumentUpdate {
                    current_price: Some(Money::from_cents(i64::MAX)),
                    ..InstrumentUpdate::default()
                },
            )
            .unwrap();

        let err = f.desk.portfolio_of(f.alice).unwrap_err();
        assert!(matches!(err, DeskError::InvalidAmount { .. }), "{err}");
    }
}

mod market_hours {
    use super::*;

    #[test]
    fn weekday_window_is_inclusive() {
        let f = fixture();
        for (time, open) in [
            (monday(8, 59), false),
            (monday(9, 0), true),
            (monday(17, 0), true),
            (monday(17, 1), false),
            (saturday(12, 0), false),
        ] {
            assert_eq!(f.desk.is_market_open(time).unwrap(), open, "at {time}");
        }
    }

    #[test]
    fn closed_market_rejects_orders_without_side_effects() {
        let f = fixture();
        f.desk.deposit(f.alice, money("1000.00")).unwrap();
        f.clock.set(saturday(11, 0));
        assert!(matches!(
            f.desk.place_order(f.alice, "INTC", Side::Buy, 1),
            Err(DeskError::MarketClosed)
        ));
        assert!(f.desk.order_history_of(f.alice).unwrap().is_empty());
    }

    #[test]
    fn holiday_closes_an_ordinary_weekday() {
        let f = fixture();
        let date = monday(0, 0).date();
        assert!(f.desk.add_exception(&f.operator, date, "Founders Day").unwrap());
        assert!(!f.desk.add_exception(&f.operator, date, "again").unwrap());

        assert!(!f.desk.is_market_open(monday(12, 0)).unwrap());
        let exceptions = f.desk.exceptions().unwrap();
        assert_eq!(exceptions.len(), 1);
        assert_eq!(exceptions[0].reason, "Founders Day");

        f.clock.advance(Duration::days(1));
        assert!(f.desk.is_market_open_now().unwrap());
    }

    #[test]
    fn weekend_override_opens_saturday() {
        let f = fixture();
        f.desk
            .set_schedule_entry(&f.operator, 5, 10 * 60, 12 * 60, true)
            .unwrap();
        f.desk.deposit(f.alice, money("100.00")).unwrap();
        f.clock.set(saturday(11, 0));
        f.desk.place_order(f.alice, "INTC", Side::Buy, 1).unwrap();
        assert!(!f.desk.is_market_open(saturday(12, 1)).unwrap());
    }

    #[test]
    fn disabled_override_closes_then_clearing_restores_default() {
        let f = fixture();
        f.desk.set_schedule_entry(&f.operator, 0, 0, 0, false).unwrap();
        assert!(!f.desk.is_market_open(monday(10, 0)).unwrap());

        let hours = f.desk.weekly_hours().unwrap();
        assert_eq!(hours[0].window, None);
        assert_eq!(hours[0].source, HoursSource::Override);
        assert_eq!(hours[1].source, HoursSource::Default);

        f.desk.clear_schedule_entry(&f.operator, 0).unwrap();
        assert!(f.desk.is_market_open(monday(10, 0)).unwrap());
    }

    #[test]
    fn malformed_schedules_rejected() {
        let f = fixture();
        for (weekday, open, close) in [(7, 540, 1020), (0, 1020, 540), (0, 0, 1440)] {
            assert!(matches!(
                f.desk.set_schedule_entry(&f.operator, weekday, open, close, true),
                Err(DeskError::InvalidSchedule { .. })
            ));
        }
    }

    #[test]
    fn always_open_policy_trades_on_sunday() {
        let f = fixture_with(
            tradedesk::adapters::memory_store::MemoryStore::new(),
            DeskConfig {
                default_hours: DefaultHours::AlwaysOpen,
                ..seeded_config()
            },
        );
        assert!(f.desk.is_market_open(at(2024, 3, 10, 23, 59)).unwrap());
        assert_eq!(
            f.desk.weekly_hours().unwrap()[6].window,
            Some(TradingWindow::whole_day())
        );
    }
}

mod wallets {
    use super::*;

    #[test]
    fn deposit_then_withdraw() {
        let f = fixture();
        f.desk.deposit(f.alice, money("50.00")).unwrap();
        let ledger = f.desk.withdraw(f.alice, money("20.25")).unwrap();
        assert_eq!(ledger.cash_balance, money("29.75"));
    }

    #[test]
    fn non_positive_amounts_rejected() {
        let f = fixture();
        for amount in ["0", "-5.00"] {
            assert!(matches!(
                f.desk.deposit(f.alice, money(amount)),
                Err(DeskError::InvalidAmount { .. })
            ));
        }
    }

    #[test]
    fn overdraw_and_missing_wallet_rejected() {
        let f = fixture();
        assert!(matches!(
            f.desk.withdraw(f.alice, money("1.00")),
            Err(DeskError::NoLedger { .. })
        ));
        f.desk.deposit(f.alice, money("10.00")).unwrap();
        assert!(matches!(
            f.desk.withdraw(f.alice, money("10.01")),
            Err(DeskError::InsufficientFunds { .. })
        ));
        assert_eq!(
            f.desk.ledger_of(f.alice).unwrap().unwrap().cash_balance,
            money("10.00")
        );
    }
}

mod prices {
    use super::*;

    #[test]
    fn tick_moves_each_price_within_band() {
        let f = fixture();
        let before = f.desk.price_snapshot().unwrap();
        let after = f.desk.tick_all_prices(Some(0.02)).unwrap();
        assert_eq!(before.len(), after.len());
        for (symbol, old) in &before {
            let new = after[symbol].price.cents() as f64;
            let old = old.price.cents() as f64;
            assert!(new >= (old * 0.98).floor(), "{symbol} fell too far");
            assert!(new <= (old * 1.02).ceil(), "{symbol} rose too far");
        }
        assert_eq!(f.desk.price_snapshot().unwrap(), after);
    }

    #[test]
    fn invalid_threshold_rejected() {
        let f = fixture();
        for bad in [0.0, 1.0, -0.2] {
            assert!(matches!(
                f.desk.tick_all_prices(Some(bad)),
                Err(DeskError::InvalidThreshold { .. })
            ));
        }
    }

    #[test]
    fn ticks_can_be_limited_to_market_hours() {
        let f = fixture_with(
            tradedesk::adapters::memory_store::MemoryStore::new(),
            DeskConfig {
                tick_only_when_open: true,
                ..seeded_config()
            },
        );
        f.clock.set(saturday(10, 0));
        let before = f.desk.price_snapshot().unwrap();
        assert_eq!(f.desk.tick_all_prices(None).unwrap(), before);
    }

    #[test]
    fn reprice_draws_from_initial_range() {
        let f = fixture();
        let quotes = f.desk.reprice_catalog(&f.operator).unwrap();
        assert_eq!(quotes.len(), 4);
        for quote in quotes.values() {
            assert!(quote.price >= money("1.00") && quote.price <= money("1000.00"));
        }
    }
}

mod operator_controls {
    use super::*;

    #[test]
    fn traders_are_refused() {
        let f = fixture();
        let trader = f.desk.identity(f.alice).unwrap();
        let date = monday(0, 0).date();
        assert!(matches!(
            f.desk.add_exception(&trader, date, "nope"),
            Err(DeskError::NotAuthorized { .. })
        ));
        assert!(matches!(
            f.desk.set_schedule_entry(&trader, 0, 0, 60, true),
            Err(DeskError::NotAuthorized { .. })
        ));
        assert!(matches!(
            f.desk.reprice_catalog(&trader),
            Err(DeskError::NotAuthorized { .. })
        ));
        assert!(f.desk.exceptions().unwrap().is_empty());
    }

    #[test]
    fn promotion_grants_operator_rights() {
        let f = fixture();
        f.desk.set_role(&f.operator, f.alice, Role::Operator).unwrap();
        let alice = f.desk.identity(f.alice).unwrap();
        assert!(alice.is_operator());
        assert!(f
            .desk
            .add_exception(&alice, monday(0, 0).date(), "")
            .unwrap());
    }

    #[test]
    fn duplicate_usernames_rejected() {
        let f = fixture();
        assert!(matches!(
            f.desk.register_participant(" alice ", Role::Trader),
            Err(DeskError::DuplicateParticipant { .. })
        ));
    }

    #[test]
    fn catalog_lifecycle() {
        let f = fixture();
        let added = f
            .desk
            .add_instrument(
                &f.operator,
                &CatalogEntry {
                    symbol: "msft".into(),
                    name: "Microsoft Corp".into(),
                    quantity: 25,
                    price: None,
                },
            )
            .unwrap();
        assert_eq!(added.symbol, "MSFT");
        assert!(added.current_price.is_some());

        assert!(matches!(
            f.desk.add_instrument(
                &f.operator,
                &CatalogEntry {
                    symbol: "MSFT".into(),
                    name: "Other".into(),
                    quantity: 1,
                    price: None,
                },
            ),
            Err(DeskError::DuplicateInstrument { .. })
        ));

        let updated = f
            .desk
            .update_instrument(
                &f.operator,
                "MSFT",
                &InstrumentUpdate {
                    current_price: Some(money("410.00")),
                    ..InstrumentUpdate::default()
                },
            )
            .unwrap();
        assert_eq!(updated.current_price, Some(money("410.00")));
        assert_eq!(updated.display_name, "Microsoft Corp");

        f.desk.remove_instrument(&f.operator, "msft").unwrap();
        assert_eq!(f.desk.list_instruments().unwrap().len(), 4);
    }

    #[test]
    fn traded_instrument_cannot_be_removed() {
        let f = fixture();
        f.desk.deposit(f.alice, money("100.00")).unwrap();
        f.desk.place_order(f.alice, "INTC", Side::Buy, 1).unwrap();
        assert!(matches!(
            f.desk.remove_instrument(&f.operator, "INTC"),
            Err(DeskError::InstrumentInUse { .. })
        ));
    }

    #[test]
    fn seeding_only_fills_an_empty_catalog() {
        let f = fixture();
        assert_eq!(
            f.desk
                .seed_catalog(&tradedesk::domain::instrument::default_catalog())
                .unwrap(),
            0
        );
    }

    #[test]
    fn import_is_all_or_nothing() {
        let f = fixture();
        let entries = vec![
            CatalogEntry {
                symbol: "INTC".into(),
                name: "Intel Corp".into(),
                quantity: 900,
                price: None,
            },
            CatalogEntry {
                symbol: "BAD SYMBOL".into(),
                name: "Broken".into(),
                quantity: 1,
                price: None,
            },
        ];
        assert!(f.desk.import_catalog(&f.operator, &entries).is_err());
        assert_eq!(
            find(&f.desk.list_instruments().unwrap(), "INTC").quantity_on_hand,
            500
        );

        let summary = f.desk.import_catalog(&f.operator, &entries[..1]).unwrap();
        assert_eq!((summary.added, summary.updated), (0, 1));
        assert_eq!(
            find(&f.desk.list_instruments().unwrap(), "INTC").quantity_on_hand,
            900
        );
    }
}

mod conservation {
    use super::*;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    const SYMBOLS: [&str; 4] = ["NVDA", "INTC", "AMD", "AMZN"];

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn shares_and_cash_are_conserved(
            ops in prop::collection::vec((0usize..2, 0usize..4, any::<bool>(), 1i64..60), 1..60)
        ) {
            let f = fixture();
            let bob = f.desk.register_participant("bob", Role::Trader).unwrap().id;
            let traders = [f.alice, bob];
            let deposit = money("20000.00");
            for t in traders {
                f.desk.deposit(t, deposit).unwrap();
            }

            for (who, sym, buy, qty) in ops {
                let side = if buy { Side::Buy } else { Side::Sell };
                let _ = f.desk.place_order(traders[who], SYMBOLS[sym], side, qty);
            }

            let inventory: BTreeMap<String, i64> = f
                .desk
                .list_instruments()
                .unwrap()
                .into_iter()
                .map(|i| (i.symbol, i.quantity_on_hand))
                .collect();

            for symbol in SYMBOLS {
                let held: i64 = traders
                    .iter()
                    .map(|t| f.desk.position_of(*t, symbol).unwrap())
                    .sum();
                prop_assert!(inventory[symbol] >= 0);
                prop_assert_eq!(inventory[symbol] + held, 500, "{} not conserved", symbol);
            }

            for t in traders {
                let flows: i64 = f
                    .desk
                    .order_history_of(t)
                    .unwrap()
                    .iter()
                    .map(|o| match o.side {
                        Side::Buy => -o.total_amount.cents(),
                        Side::Sell => o.total_amount.cents(),
                    })
                    .sum();
                let cash = f.desk.ledger_of(t).unwrap().unwrap().cash_balance;
                prop_assert!(!cash.is_negative());
                prop_assert_eq!(cash.cents(), deposit.cents() + flows);
            }
        }
    }
}

fn find(instruments: &[Instrument], symbol: &str) -> Instrument {
    instruments
        .iter()
        .find(|i| i.symbol == symbol)
        .cloned()
        .unwrap_or_else(|| panic!("{symbol} missing from catalog"))
}

#[test]
fn clock_is_pinned_to_monday_morning() {
    let f = fixture();
    assert_eq!(f.clock.now(), monday(10, 0));
    assert_eq!(f.desk.clock().now(), monday(10, 0));
}
