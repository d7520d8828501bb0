//! The trading desk: order execution, wallets, catalog, prices and market hours.
//!
//! Every mutating operation runs as a single [`DeskStore::transact`] unit, so
//! the validate-then-apply sequence of an order sees one consistent snapshot
//! and either all of its effects land or none do. Lookups run through
//! [`DeskStore::read`] and never wait on a writer.

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

use super::calendar::{
    CalendarException, DayHours, DefaultHours, MarketCalendar, ScheduleEntry, validate_weekday,
    weekday_index,
};
use super::error::DeskError;
use super::instrument::{
    CatalogEntry, Instrument, InstrumentUpdate, PriceQuote, normalize_symbol,
    validate_display_name, validate_inventory, validate_symbol,
};
use super::ledger::{Ledger, validate_amount};
use super::money::Money;
use super::order::{
    NewOrder, OrderRecord, Side, check_position, positions_from_records, validate_quantity,
};
use super::participant::{Identity, Participant, ParticipantId, Role};
use super::price_oracle::{PriceConfig, PriceOracle, validate_threshold};
use crate::ports::clock_port::Clock;
use crate::ports::store_port::{DeskRead, DeskStore, DeskTx};

#[derive(Debug, Clone, PartialEq, Default)]
pub struct DeskConfig {
    pub default_hours: DefaultHours,
    pub prices: PriceConfig,
    /// When set, price ticks outside market hours leave prices unchanged.
    pub tick_only_when_open: bool,
}

/// Outcome of an accepted order.
#[derive(Debug, Clone, PartialEq)]
pub struct Execution {
    pub order: OrderRecord,
    pub cash_balance: Money,
    pub quantity_on_hand: i64,
    pub position: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Holding {
    pub symbol: String,
    pub quantity: i64,
    pub price: Option<Money>,
    pub market_value: Money,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Portfolio {
    pub participant: ParticipantId,
    /// `None` until the participant first deposits or sells.
    pub cash_balance: Option<Money>,
    pub holdings: Vec<Holding>,
    /// Sum of the holdings' market values.
    pub market_value: Money,
    /// Cash plus market value.
    pub total_value: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportSummary {
    pub added: usize,
    pub updated: usize,
}

pub struct TradingDesk<S, C> {
    store: S,
    clock: C,
    calendar: MarketCalendar,
    oracle: PriceOracle,
    tick_only_when_open: bool,
}

impl<S: DeskStore, C: Clock> TradingDesk<S, C> {
    pub fn new(store: S, clock: C, config: DeskConfig) -> Self {
        TradingDesk {
            store,
            clock,
            calendar: MarketCalendar::new(config.default_hours),
            oracle: PriceOracle::new(config.prices),
            tick_only_when_open: config.tick_only_when_open,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn calendar(&self) -> &MarketCalendar {
        &self.calendar
    }

    pub fn register_participant(&self, username: &str, role: Role) -> Result<Participant, DeskError> {
        let username = username.trim();
        if username.is_empty() {
            return Err(DeskError::InvalidUsername {
                username: username.to_string(),
                reason: "must not be empty".into(),
            });
        }
        let participant = self.store.transact(|tx| {
            if tx.participant_by_username(username)?.is_some() {
                return Err(DeskError::DuplicateParticipant {
                    username: username.to_string(),
                });
            }
            tx.insert_participant(username, role)
        })?;
        info!(participant = participant.id, username, %role, "participant registered");
        Ok(participant)
    }

    /// Identity and role of a registered participant, for the capability check.
    pub fn identity(&self, participant: ParticipantId) -> Result<Identity, DeskError> {
        self.store
            .read(|tx| require_participant(tx, participant))
            .map(|p| p.identity())
    }

    pub fn set_role(
        &self,
        actor: &Identity,
        participant: ParticipantId,
        role: Role,
    ) -> Result<Participant, DeskError> {
        actor.require_operator("change participant roles")?;
        let updated = self.store.transact(|tx| {
            let mut target = require_participant(tx, participant)?;
            tx.set_role(participant, role)?;
            target.role = role;
            Ok(target)
        })?;
        info!(actor = actor.participant, participant, %role, "role changed");
        Ok(updated)
    }

    /// Adds cash, opening the wallet on first deposit.
    pub fn deposit(&self, participant: ParticipantId, amount: Money) -> Result<Ledger, DeskError> {
        let amount = validate_amount(amount)?;
        let now = self.clock.now();
        let ledger = self.store.transact(|tx| {
            require_participant(tx, participant)?;
            let mut ledger = tx
                .ledger(participant)?
                .unwrap_or_else(|| Ledger::open(participant, now));
            ledger.credit(amount, now)?;
            tx.put_ledger(&ledger)?;
            Ok(ledger)
        })?;
        info!(participant, %amount, balance = %ledger.cash_balance, "deposit");
        Ok(ledger)
    }

    pub fn withdraw(&self, participant: ParticipantId, amount: Money) -> Result<Ledger, DeskError> {
        let amount = validate_amount(amount)?;
        let now = self.clock.now();
        let result = self.store.transact(|tx| {
            require_participant(tx, participant)?;
            let mut ledger = tx
                .ledger(participant)?
                .ok_or(DeskError::NoLedger { participant })?;
            ledger.debit(amount, now)?;
            tx.put_ledger(&ledger)?;
            Ok(ledger)
        });
        match &result {
            Ok(ledger) => info!(participant, %amount, balance = %ledger.cash_balance, "withdrawal"),
            Err(e) => warn!(participant, %amount, error = %e, "withdrawal rejected"),
        }
        result
    }

    pub fn ledger_of(&self, participant: ParticipantId) -> Result<Option<Ledger>, DeskError> {
        self.store.read(|tx| tx.ledger(participant))
    }

    /// Validates and executes one order against the desk's inventory.
    ///
    /// Checks, in order: quantity, participant, market hours, symbol, price,
    /// then inventory/wallet for a buy or the derived position for a sell.
    /// The wallet, the instrument and the order log are written in the same
    /// unit of work; a failure at any point leaves all three untouched.
    pub fn place_order(
        &self,
        participant: ParticipantId,
        symbol: &str,
        side: Side,
        quantity: i64,
    ) -> Result<Execution, DeskError> {
        let symbol = normalize_symbol(symbol);
        let result = validate_quantity(quantity).and_then(|quantity| {
            let now = self.clock.now();
            self.store
                .transact(|tx| self.execute(tx, participant, &symbol, side, quantity, now))
        });

        match &result {
            Ok(exec) => info!(
                order = exec.order.id,
                participant,
                symbol = %symbol,
                %side,
                quantity,
                total = %exec.order.total_amount,
                balance = %exec.cash_balance,
                "order executed"
            ),
            Err(e @ DeskError::InvariantViolation { .. }) => {
                error!(participant, symbol = %symbol, %side, quantity, error = %e, "order aborted")
            }
            Err(e) => warn!(participant, symbol = %symbol, %side, quantity, error = %e, "order rejected"),
        }
        result
    }

    fn execute(
        &self,
        tx: &mut dyn DeskTx,
        participant: ParticipantId,
        symbol: &str,
        side: Side,
        quantity: i64,
        now: NaiveDateTime,
    ) -> Result<Execution, DeskError> {
        require_participant(tx, participant)?;
        if !self.open_in(tx, now)? {
            return Err(DeskError::MarketClosed);
        }

        let mut instrument = tx
            .instrument(symbol)?
            .ok_or_else(|| DeskError::UnknownSymbol {
                symbol: symbol.to_string(),
            })?;
        let price = instrument
            .tradable_price()
            .ok_or_else(|| DeskError::PriceUnavailable {
                symbol: symbol.to_string(),
            })?;
        let total_amount =
            price
                .checked_mul_qty(quantity)
                .ok_or_else(|| DeskError::InvalidQuantity {
                    reason: format!("{quantity} × {price} overflows"),
                })?;
        let held = check_position(participant, symbol, tx.position(participant, symbol)?)?;

        let ledger = match side {
            Side::Buy => {
                if instrument.quantity_on_hand < quantity {
                    return Err(DeskError::InsufficientInventory {
                        symbol: symbol.to_string(),
                        requested: quantity,
                        available: instrument.quantity_on_hand,
                    });
                }
                let mut ledger = tx
                    .ledger(participant)?
                    .ok_or(DeskError::NoLedger { participant })?;
                ledger.debit(total_amount, now)?;
                instrument.quantity_on_hand -= quantity;
                ledger
            }
            Side::Sell => {
                if quantity > held {
                    return Err(DeskError::InsufficientPosition {
                        symbol: symbol.to_string(),
                        requested: quantity,
                        held,
                    });
                }
                let mut ledger = tx
                    .ledger(participant)?
                    .unwrap_or_else(|| Ledger::open(participant, now));
                ledger.credit(total_amount, now)?;
                instrument.quantity_on_hand = instrument
                    .quantity_on_hand
                    .checked_add(quantity)
                    .ok_or_else(|| DeskError::InvalidQuantity {
                        reason: format!("inventory of {symbol} would overflow"),
                    })?;
                ledger
            }
        };
        instrument.updated_at = now;

        tx.put_ledger(&ledger)?;
        tx.put_instrument(&instrument)?;
        let order = tx.append_order(&NewOrder {
            participant,
            symbol: symbol.to_string(),
            side,
            quantity,
            total_amount,
            requested_at: now,
        })?;

        Ok(Execution {
            order,
            cash_balance: ledger.cash_balance,
            quantity_on_hand: instrument.quantity_on_hand,
            position: held + side.signed(quantity),
        })
    }

    pub fn order_history_of(&self, participant: ParticipantId) -> Result<Vec<OrderRecord>, DeskError> {
        self.store.read(|tx| tx.orders_of(participant))
    }

    /// Net shares held, derived from the order log.
    pub fn position_of(&self, participant: ParticipantId, symbol: &str) -> Result<i64, DeskError> {
        let symbol = normalize_symbol(symbol);
        let position = self.store.read(|tx| tx.position(participant, &symbol))?;
        check_position(participant, &symbol, position).inspect_err(|e| error!(error = %e))
    }

    pub fn portfolio_of(&self, participant: ParticipantId) -> Result<Portfolio, DeskError> {
        self.store.read(|tx| {
            require_participant(tx, participant)?;
            let cash_balance = tx.ledger(participant)?.map(|l| l.cash_balance);

            let orders = tx.orders_of(participant)?;

            let mut holdings = Vec::new();
            let mut market_value = Money::ZERO;
            for (symbol, quantity) in positions_from_records(&orders, participant) {
                check_position(participant, &symbol, quantity)?;
                let price = tx.instrument(&symbol)?.and_then(|i| i.tradable_price());
                let value = match price {
                    Some(p) => p
                        .checked_mul_qty(quantity)
                        .ok_or_else(|| value_overflow(&symbol))?,
                    None => Money::ZERO,
                };
                market_value = market_value
                    .checked_add(value)
                    .ok_or_else(|| value_overflow(&symbol))?;
                holdings.push(Holding {
                    symbol,
                    quantity,
                    price,
                    market_value: value,
                });
            }
            let total_value = cash_balance
                .unwrap_or(Money::ZERO)
                .checked_add(market_value)
                .ok_or_else(|| value_overflow("cash"))?;

            Ok(Portfolio {
                participant,
                cash_balance,
                holdings,
                market_value,
                total_value,
            })
        })
    }

    pub fn list_instruments(&self) -> Result<Vec<Instrument>, DeskError> {
        self.store.read(|tx| tx.instruments())
    }

    /// Loads `entries` into an empty catalog. Returns how many were inserted;
    /// a catalog that already has instruments is left alone.
    pub fn seed_catalog(&self, entries: &[CatalogEntry]) -> Result<usize, DeskError> {
        let now = self.clock.now();
        let prepared = entries
            .iter()
            .map(|e| self.prepare_entry(e, now))
            .collect::<Result<Vec<_>, _>>()?;

        let inserted = self.store.transact(|tx| {
            if !tx.instruments()?.is_empty() {
                return Ok(0);
            }
            for instrument in &prepared {
                tx.insert_instrument(instrument)?;
            }
            Ok(prepared.len())
        })?;
        if inserted > 0 {
            info!(inserted, "catalog seeded");
        }
        Ok(inserted)
    }

    /// Adds new symbols and overwrites existing ones, all or nothing.
    pub fn import_catalog(
        &self,
        actor: &Identity,
        entries: &[CatalogEntry],
    ) -> Result<ImportSummary, DeskError> {
        actor.require_operator("import the catalog")?;
        let now = self.clock.now();
        let prepared = entries
            .iter()
            .map(|e| self.prepare_entry(e, now))
            .collect::<Result<Vec<_>, _>>()?;

        let summary = self.store.transact(|tx| {
            let mut summary = ImportSummary::default();
            for instrument in &prepared {
                ensure_name_free(tx, &instrument.display_name, Some(&instrument.symbol))?;
                if tx.instrument(&instrument.symbol)?.is_some() {
                    tx.put_instrument(instrument)?;
                    summary.updated += 1;
                } else {
                    tx.insert_instrument(instrument)?;
                    summary.added += 1;
                }
            }
            Ok(summary)
        })?;
        info!(
            actor = actor.participant,
            added = summary.added,
            updated = summary.updated,
            "catalog imported"
        );
        Ok(summary)
    }

    pub fn add_instrument(
        &self,
        actor: &Identity,
        entry: &CatalogEntry,
    ) -> Result<Instrument, DeskError> {
        actor.require_operator("add instruments")?;
        let instrument = self.prepare_entry(entry, self.clock.now())?;
        self.store.transact(|tx| {
            if tx.instrument(&instrument.symbol)?.is_some() {
                return Err(DeskError::DuplicateInstrument {
                    symbol: instrument.symbol.clone(),
                });
            }
            ensure_name_free(tx, &instrument.display_name, None)?;
            tx.insert_instrument(&instrument)
        })?;
        info!(actor = actor.participant, symbol = %instrument.symbol, "instrument added");
        Ok(instrument)
    }

    pub fn update_instrument(
        &self,
        actor: &Identity,
        symbol: &str,
        update: &InstrumentUpdate,
    ) -> Result<Instrument, DeskError> {
        actor.require_operator("edit instruments")?;
        let symbol = normalize_symbol(symbol);
        let name = update
            .display_name
            .as_deref()
            .map(validate_display_name)
            .transpose()?;
        let quantity = update.quantity_on_hand.map(validate_inventory).transpose()?;
        let price = update.current_price.map(validate_price).transpose()?;
        let now = self.clock.now();

        let instrument = self.store.transact(|tx| {
            let mut instrument = tx
                .instrument(&symbol)?
                .ok_or_else(|| DeskError::UnknownSymbol {
                    symbol: symbol.clone(),
                })?;
            if let Some(name) = &name {
                ensure_name_free(tx, name, Some(&symbol))?;
                instrument.display_name = name.clone();
            }
            if let Some(quantity) = quantity {
                instrument.quantity_on_hand = quantity;
            }
            if let Some(price) = price {
                instrument.current_price = Some(price);
            }
            instrument.updated_at = now;
            tx.put_instrument(&instrument)?;
            Ok(instrument)
        })?;
        info!(actor = actor.participant, symbol = %symbol, "instrument updated");
        Ok(instrument)
    }

    /// Only instruments that never traded can be removed; the order log keeps
    /// referring to a symbol once it has been traded.
    pub fn remove_instrument(&self, actor: &Identity, symbol: &str) -> Result<(), DeskError> {
        actor.require_operator("remove instruments")?;
        let symbol = normalize_symbol(symbol);
        self.store.transact(|tx| {
            if tx.instrument(&symbol)?.is_none() {
                return Err(DeskError::UnknownSymbol {
                    symbol: symbol.clone(),
                });
            }
            if tx.symbol_has_orders(&symbol)? {
                return Err(DeskError::InstrumentInUse {
                    symbol: symbol.clone(),
                });
            }
            tx.delete_instrument(&symbol)
        })?;
        info!(actor = actor.participant, symbol = %symbol, "instrument removed");
        Ok(())
    }

    fn prepare_entry(&self, entry: &CatalogEntry, now: NaiveDateTime) -> Result<Instrument, DeskError> {
        let price = match entry.price {
            Some(p) => validate_price(p)?,
            None => self.oracle.initial_price(),
        };
        Ok(Instrument {
            symbol: validate_symbol(&entry.symbol)?,
            display_name: validate_display_name(&entry.name)?,
            quantity_on_hand: validate_inventory(entry.quantity)?,
            current_price: Some(price),
            updated_at: now,
        })
    }

    /// Moves every priced instrument one step of the threshold walk and
    /// returns the new `{symbol → {name, price}}` map. `threshold` overrides
    /// the configured fraction for this call.
    pub fn tick_all_prices(
        &self,
        threshold: Option<f64>,
    ) -> Result<BTreeMap<String, PriceQuote>, DeskError> {
        let threshold = validate_threshold(threshold.unwrap_or(self.oracle.config().threshold))?;
        let now = self.clock.now();
        let mut ticked = false;
        let quotes = self.store.transact(|tx| {
            if self.tick_only_when_open && !self.open_in(tx, now)? {
                return snapshot(tx);
            }
            ticked = true;
            let mut quotes = BTreeMap::new();
            for mut instrument in tx.instruments()? {
                let Some(current) = instrument.tradable_price() else {
                    continue;
                };
                let next = self.oracle.tick_with(current, threshold);
                instrument.current_price = Some(next);
                instrument.updated_at = now;
                tx.put_instrument(&instrument)?;
                quotes.insert(
                    instrument.symbol,
                    PriceQuote {
                        name: instrument.display_name,
                        price: next,
                    },
                );
            }
            Ok(quotes)
        })?;
        if ticked {
            info!(instruments = quotes.len(), threshold, "prices ticked");
        }
        Ok(quotes)
    }

    /// Current `{symbol → {name, price}}` without moving anything.
    pub fn price_snapshot(&self) -> Result<BTreeMap<String, PriceQuote>, DeskError> {
        self.store.read(|tx| snapshot(tx))
    }

    /// Replaces every price with a fresh draw from the initial range.
    pub fn reprice_catalog(
        &self,
        actor: &Identity,
    ) -> Result<BTreeMap<String, PriceQuote>, DeskError> {
        actor.require_operator("reprice the catalog")?;
        let now = self.clock.now();
        let quotes = self.store.transact(|tx| {
            for mut instrument in tx.instruments()? {
                instrument.current_price = Some(self.oracle.initial_price());
                instrument.updated_at = now;
                tx.put_instrument(&instrument)?;
            }
            snapshot(tx)
        })?;
        info!(actor = actor.participant, instruments = quotes.len(), "catalog repriced");
        Ok(quotes)
    }

    pub fn is_market_open(&self, now: NaiveDateTime) -> Result<bool, DeskError> {
        self.store.read(|tx| self.open_in(tx, now))
    }

    pub fn is_market_open_now(&self) -> Result<bool, DeskError> {
        self.is_market_open(self.clock.now())
    }

    fn open_in<R: DeskRead + ?Sized>(
        &self,
        tx: &R,
        now: NaiveDateTime,
    ) -> Result<bool, DeskError> {
        let entry = tx.schedule_entry(weekday_index(now.weekday()))?;
        let exception = tx.is_exception(now.date())?;
        Ok(self.calendar.is_open(now, entry.as_ref(), exception))
    }

    /// Writes the override for one weekday. Writing `enabled = false` closes
    /// the day and discards its hours.
    pub fn set_schedule_entry(
        &self,
        actor: &Identity,
        weekday: u8,
        open_minute: u16,
        close_minute: u16,
        enabled: bool,
    ) -> Result<ScheduleEntry, DeskError> {
        actor.require_operator("edit market hours")?;
        let entry = ScheduleEntry::new(weekday, open_minute, close_minute, enabled)?;
        self.store.transact(|tx| tx.put_schedule_entry(&entry))?;
        info!(
            actor = actor.participant,
            weekday,
            open_minute = entry.open_minute,
            close_minute = entry.close_minute,
            enabled,
            "schedule entry written"
        );
        Ok(entry)
    }

    /// Drops the override so the weekday follows the default policy again.
    pub fn clear_schedule_entry(&self, actor: &Identity, weekday: u8) -> Result<(), DeskError> {
        actor.require_operator("edit market hours")?;
        let weekday = validate_weekday(weekday)?;
        self.store.transact(|tx| tx.delete_schedule_entry(weekday))?;
        info!(actor = actor.participant, weekday, "schedule entry cleared");
        Ok(())
    }

    pub fn weekly_hours(&self) -> Result<Vec<DayHours>, DeskError> {
        let entries = self.store.read(|tx| tx.schedule())?;
        Ok(self.calendar.weekly_hours(&entries))
    }

    /// Marks `date` as non-trading. Returns `false` if it already was; that
    /// is not an error and the stored reason is kept.
    pub fn add_exception(
        &self,
        actor: &Identity,
        date: NaiveDate,
        reason: &str,
    ) -> Result<bool, DeskError> {
        actor.require_operator("add market holidays")?;
        let exception = CalendarException {
            holiday_date: date,
            reason: reason.trim().to_string(),
        };
        let added = self.store.transact(|tx| tx.insert_exception(&exception))?;
        if added {
            info!(actor = actor.participant, %date, reason = %exception.reason, "market holiday added");
        }
        Ok(added)
    }

    pub fn exceptions(&self) -> Result<Vec<CalendarException>, DeskError> {
        self.store.read(|tx| tx.exceptions())
    }
}

fn require_participant<R: DeskRead + ?Sized>(
    tx: &R,
    participant: ParticipantId,
) -> Result<Participant, DeskError> {
    tx.participant(participant)?
        .ok_or(DeskError::UnknownParticipant { participant })
}

fn value_overflow(what: &str) -> DeskError {
    DeskError::InvalidAmount {
        reason: format!("portfolio value overflows at {what}"),
    }
}

fn validate_price(price: Money) -> Result<Money, DeskError> {
    if !price.is_positive() {
        return Err(DeskError::InvalidAmount {
            reason: format!("price must be positive (got {price})"),
        });
    }
    Ok(price)
}

/// Display names are unique across the catalog. `except` is the symbol being
/// edited, whose own name does not count as a clash.
fn ensure_name_free<R: DeskRead + ?Sized>(
    tx: &R,
    name: &str,
    except: Option<&str>,
) -> Result<(), DeskError> {
    let clash = tx
        .instruments()?
        .into_iter()
        .any(|i| i.display_name == name && Some(i.symbol.as_str()) != except);
    if clash {
        return Err(DeskError::DuplicateInstrument {
            symbol: name.to_string(),
        });
    }
    Ok(())
}

fn snapshot<R: DeskRead + ?Sized>(tx: &R) -> Result<BTreeMap<String, PriceQuote>, DeskError> {
    Ok(tx
        .instruments()?
        .into_iter()
        .filter_map(|i| {
            let price = i.tradable_price()?;
            Some((
                i.symbol,
                PriceQuote {
                    name: i.display_name,
                    price,
                },
            ))
        })
        .collect())
}
