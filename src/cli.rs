//! CLI definition and dispatch.

use chrono::{NaiveDate, NaiveDateTime};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use crate::adapters::clock::SystemClock;
use crate::adapters::csv_catalog::{read_catalog_file, write_order_history};
use crate::adapters::file_config_adapter::FileConfigAdapter;
use crate::domain::calendar::{format_hhmm, parse_hhmm, parse_weekday, weekday_name};
use crate::domain::config_validation::build_desk_config;
use crate::domain::desk::{DeskConfig, TradingDesk};
use crate::domain::error::DeskError;
use crate::domain::instrument::{CatalogEntry, InstrumentUpdate, PriceQuote, default_catalog};
use crate::domain::ledger::parse_amount;
use crate::domain::order::{Side, parse_quantity};
use crate::domain::participant::{ParticipantId, Role};
use crate::logging;
use crate::ports::clock_port::Clock;
use crate::ports::store_port::DeskStore;

#[derive(Parser, Debug)]
#[command(name = "tradedesk", about = "Single-venue trading desk: wallets, orders and market hours")]
pub struct Cli {
    /// INI configuration file
    #[arg(short, long)]
    pub config: PathBuf,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Create the schema and seed the default catalog into an empty desk
    Init {
        #[arg(long)]
        no_seed: bool,
    },
    /// Register a participant
    Register {
        username: String,
        #[arg(long, default_value = "trader")]
        role: Role,
    },
    /// Change a participant's role (operator only)
    SetRole {
        #[arg(long = "as", value_name = "ID")]
        actor: ParticipantId,
        participant: ParticipantId,
        role: Role,
    },
    /// Add cash to a wallet
    Deposit {
        participant: ParticipantId,
        amount: String,
    },
    /// Take cash out of a wallet
    Withdraw {
        participant: ParticipantId,
        amount: String,
    },
    /// Buy shares from the desk
    Buy {
        participant: ParticipantId,
        symbol: String,
        quantity: String,
    },
    /// Sell shares back to the desk
    Sell {
        participant: ParticipantId,
        symbol: String,
        quantity: String,
    },
    /// List the catalog with inventory and prices
    Instruments,
    /// Show current prices
    Prices,
    /// Move every price one random step
    Tick {
        /// Override the configured step size, in percent
        #[arg(long)]
        threshold_pct: Option<f64>,
    },
    /// Redraw every price from the initial range (operator only)
    Reprice {
        #[arg(long = "as", value_name = "ID")]
        actor: ParticipantId,
    },
    /// Report whether the market is open
    MarketStatus {
        /// Local time to check instead of now, as `YYYY-MM-DD HH:MM`
        #[arg(long, value_parser = parse_timestamp)]
        at: Option<NaiveDateTime>,
    },
    /// Show effective trading hours for each weekday
    Hours,
    /// Override one weekday's hours (operator only)
    SetHours {
        #[arg(long = "as", value_name = "ID")]
        actor: ParticipantId,
        weekday: String,
        #[arg(long)]
        open: Option<String>,
        #[arg(long)]
        close: Option<String>,
        /// Close the market all day
        #[arg(long, conflicts_with_all = ["open", "close"])]
        closed: bool,
    },
    /// Remove a weekday override (operator only)
    ClearHours {
        #[arg(long = "as", value_name = "ID")]
        actor: ParticipantId,
        weekday: String,
    },
    /// Close the market on a date (operator only)
    AddHoliday {
        #[arg(long = "as", value_name = "ID")]
        actor: ParticipantId,
        date: NaiveDate,
        #[arg(default_value = "")]
        reason: String,
    },
    /// List market holidays
    Holidays,
    /// Add an instrument to the catalog (operator only)
    AddInstrument {
        #[arg(long = "as", value_name = "ID")]
        actor: ParticipantId,
        symbol: String,
        name: String,
        quantity: i64,
        #[arg(long)]
        price: Option<String>,
    },
    /// Edit an instrument (operator only)
    UpdateInstrument {
        #[arg(long = "as", value_name = "ID")]
        actor: ParticipantId,
        symbol: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        quantity: Option<i64>,
        #[arg(long)]
        price: Option<String>,
    },
    /// Remove an instrument that has never traded (operator only)
    RemoveInstrument {
        #[arg(long = "as", value_name = "ID")]
        actor: ParticipantId,
        symbol: String,
    },
    /// Load instruments from a `symbol,name,quantity,price` CSV (operator only)
    ImportCatalog {
        #[arg(long = "as", value_name = "ID")]
        actor: ParticipantId,
        file: PathBuf,
    },
    /// Show a participant's order history
    History {
        participant: ParticipantId,
        /// Emit CSV instead of a table
        #[arg(long)]
        csv: bool,
    },
    /// Show cash, holdings and their current value
    Portfolio { participant: ParticipantId },
}

fn parse_timestamp(raw: &str) -> Result<NaiveDateTime, String> {
    NaiveDateTime::parse_from_str(raw.trim(), "%Y-%m-%d %H:%M")
        .map_err(|e| format!("expected YYYY-MM-DD HH:MM: {e}"))
}

pub fn run(cli: Cli) -> ExitCode {
    let config = match load_config(&cli.config) {
        Ok(c) => c,
        Err(code) => return code,
    };

    if let Err(e) = logging::init(&config) {
        eprintln!("error: {e}");
        return (&e).into();
    }

    let desk_config = match build_desk_config(&config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let store = match open_store(&config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("error: {e}");
            return (&e).into();
        }
    };

    let desk = TradingDesk::new(store, SystemClock, desk_config);
    let stdout = io::stdout();
    match execute(&desk, cli.command, &mut stdout.lock()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            (&e).into()
        }
    }
}

pub fn load_config(path: &PathBuf) -> Result<FileConfigAdapter, ExitCode> {
    FileConfigAdapter::from_file(path).map_err(|err| {
        eprintln!("error: {err}");
        ExitCode::from(&err)
    })
}

#[cfg(feature = "sqlite")]
fn open_store(
    config: &FileConfigAdapter,
) -> Result<crate::adapters::sqlite_store::SqliteStore, DeskError> {
    let store = crate::adapters::sqlite_store::SqliteStore::from_config(config)?;
    store.initialize_schema()?;
    Ok(store)
}

#[cfg(not(feature = "sqlite"))]
fn open_store(
    _config: &FileConfigAdapter,
) -> Result<crate::adapters::memory_store::MemoryStore, DeskError> {
    eprintln!("warning: built without the sqlite feature; state is discarded on exit");
    Ok(crate::adapters::memory_store::MemoryStore::new())
}

/// Builds a desk over `store` from an already-loaded configuration.
pub fn build_desk<S: DeskStore, C: Clock>(
    config: &FileConfigAdapter,
    store: S,
    clock: C,
) -> Result<TradingDesk<S, C>, DeskError> {
    let desk_config: DeskConfig = build_desk_config(config)?;
    Ok(TradingDesk::new(store, clock, desk_config))
}

/// Runs one command against `desk`, writing results to `out`.
pub fn execute<S: DeskStore, C: Clock>(
    desk: &TradingDesk<S, C>,
    command: Command,
    out: &mut dyn Write,
) -> Result<(), DeskError> {
    match command {
        Command::Init { no_seed } => {
            let inserted = if no_seed {
                0
            } else {
                desk.seed_catalog(&default_catalog())?
            };
            writeln!(out, "desk ready; {inserted} instruments seeded")?;
        }
        Command::Register { username, role } => {
            let p = desk.register_participant(&username, role)?;
            writeln!(out, "registered participant {} ({}, {})", p.id, p.username, p.role)?;
        }
        Command::SetRole {
            actor,
            participant,
            role,
        } => {
            let actor = desk.identity(actor)?;
            let p = desk.set_role(&actor, participant, role)?;
            writeln!(out, "participant {} is now {}", p.id, p.role)?;
        }
        Command::Deposit {
            participant,
            amount,
        } => {
            let ledger = desk.deposit(participant, parse_amount(&amount)?)?;
            writeln!(out, "balance: {}", ledger.cash_balance)?;
        }
        Command::Withdraw {
            participant,
            amount,
        } => {
            let ledger = desk.withdraw(participant, parse_amount(&amount)?)?;
            writeln!(out, "balance: {}", ledger.cash_balance)?;
        }
        Command::Buy {
            participant,
            symbol,
            quantity,
        } => place(desk, participant, &symbol, Side::Buy, &quantity, out)?,
        Command::Sell {
            participant,
            symbol,
            quantity,
        } => place(desk, participant, &symbol, Side::Sell, &quantity, out)?,
        Command::Instruments => {
            let instruments = desk.list_instruments()?;
            if instruments.is_empty() {
                eprintln!("catalog is empty");
            }
            for i in &instruments {
                let price = i
                    .current_price
                    .map_or_else(|| "-".to_string(), |p| p.to_string());
                writeln!(
                    out,
                    "{:<10} {:<30} {:>8} {:>12}",
                    i.symbol, i.display_name, i.quantity_on_hand, price
                )?;
            }
        }
        Command::Prices => print_quotes(&desk.price_snapshot()?, out)?,
        Command::Tick { threshold_pct } => {
            let quotes = desk.tick_all_prices(threshold_pct.map(|pct| pct / 100.0))?;
            print_quotes(&quotes, out)?;
        }
        Command::Reprice { actor } => {
            let actor = desk.identity(actor)?;
            print_quotes(&desk.reprice_catalog(&actor)?, out)?;
        }
        Command::MarketStatus { at } => {
            let now = at.unwrap_or_else(|| desk.clock().now());
            let state = if desk.is_market_open(now)? {
                "open"
            } else {
                "closed"
            };
            writeln!(out, "market is {state} at {}", now.format("%Y-%m-%d %H:%M"))?;
        }
        Command::Hours => {
            for day in desk.weekly_hours()? {
                writeln!(out, "{day}")?;
            }
        }
        Command::SetHours {
            actor,
            weekday,
            open,
            close,
            closed,
        } => {
            let actor = desk.identity(actor)?;
            let weekday = parse_weekday(&weekday)?;
            let entry = if closed {
                desk.set_schedule_entry(&actor, weekday, 0, 0, false)?
            } else {
                let (Some(open), Some(close)) = (open, close) else {
                    return Err(DeskError::InvalidSchedule {
                        reason: "--open and --close are required unless --closed is given".into(),
                    });
                };
                desk.set_schedule_entry(&actor, weekday, parse_hhmm(&open)?, parse_hhmm(&close)?, true)?
            };
            if entry.enabled {
                writeln!(
                    out,
                    "{} {}-{}",
                    weekday_name(weekday),
                    format_hhmm(entry.open_minute),
                    format_hhmm(entry.close_minute)
                )?;
            } else {
                writeln!(out, "{} closed", weekday_name(weekday))?;
            }
        }
        Command::ClearHours { actor, weekday } => {
            let actor = desk.identity(actor)?;
            let weekday = parse_weekday(&weekday)?;
            desk.clear_schedule_entry(&actor, weekday)?;
            writeln!(out, "{} follows the default hours", weekday_name(weekday))?;
        }
        Command::AddHoliday {
            actor,
            date,
            reason,
        } => {
            let actor = desk.identity(actor)?;
            if desk.add_exception(&actor, date, &reason)? {
                writeln!(out, "market closed on {date}")?;
            } else {
                writeln!(out, "{date} was already a holiday")?;
            }
        }
        Command::Holidays => {
            for exception in desk.exceptions()? {
                writeln!(out, "{}  {}", exception.holiday_date, exception.reason)?;
            }
        }
        Command::AddInstrument {
            actor,
            symbol,
            name,
            quantity,
            price,
        } => {
            let actor = desk.identity(actor)?;
            let entry = CatalogEntry {
                symbol,
                name,
                quantity,
                price: price.as_deref().map(parse_amount).transpose()?,
            };
            let instrument = desk.add_instrument(&actor, &entry)?;
            writeln!(
                out,
                "added {} ({}), {} on hand",
                instrument.symbol, instrument.display_name, instrument.quantity_on_hand
            )?;
        }
        Command::UpdateInstrument {
            actor,
            symbol,
            name,
            quantity,
            price,
        } => {
            let actor = desk.identity(actor)?;
            let update = InstrumentUpdate {
                display_name: name,
                quantity_on_hand: quantity,
                current_price: price.as_deref().map(parse_amount).transpose()?,
            };
            let instrument = desk.update_instrument(&actor, &symbol, &update)?;
            writeln!(out, "updated {}", instrument.symbol)?;
        }
        Command::RemoveInstrument { actor, symbol } => {
            let actor = desk.identity(actor)?;
            desk.remove_instrument(&actor, &symbol)?;
            writeln!(out, "removed {}", symbol.trim().to_ascii_uppercase())?;
        }
        Command::ImportCatalog { actor, file } => {
            let actor = desk.identity(actor)?;
            let entries = read_catalog_file(&file)?;
            let summary = desk.import_catalog(&actor, &entries)?;
            writeln!(
                out,
                "imported {}: {} added, {} updated",
                file.display(),
                summary.added,
                summary.updated
            )?;
        }
        Command::History { participant, csv } => {
            let orders = desk.order_history_of(participant)?;
            if csv {
                write_order_history(&mut *out, &orders)?;
            } else {
                for o in &orders {
                    writeln!(
                        out,
                        "{:>6} {} {:<4} {:>6} {:<10} @ {:>10} = {:>12}",
                        o.id,
                        o.created_at.format("%Y-%m-%d %H:%M:%S"),
                        o.side,
                        o.quantity,
                        o.symbol,
                        o.price_per_share(),
                        o.total_amount
                    )?;
                }
            }
        }
        Command::Portfolio { participant } => {
            let portfolio = desk.portfolio_of(participant)?;
            match portfolio.cash_balance {
                Some(cash) => writeln!(out, "cash: {cash}")?,
                None => writeln!(out, "cash: no wallet")?,
            }
            for h in &portfolio.holdings {
                let price = h.price.map_or_else(|| "-".to_string(), |p| p.to_string());
                writeln!(
                    out,
                    "{:<10} {:>8} @ {:>10} = {:>12}",
                    h.symbol, h.quantity, price, h.market_value
                )?;
            }
            writeln!(out, "holdings: {}", portfolio.market_value)?;
            writeln!(out, "total: {}", portfolio.total_value)?;
        }
    }
    Ok(())
}

fn place<S: DeskStore, C: Clock>(
    desk: &TradingDesk<S, C>,
    participant: ParticipantId,
    symbol: &str,
    side: Side,
    quantity: &str,
    out: &mut dyn Write,
) -> Result<(), DeskError> {
    let quantity = parse_quantity(quantity)?;
    let exec = desk.place_order(participant, symbol, side, quantity)?;
    writeln!(
        out,
        "order {}: {} {} {} @ {} = {}; balance {}; position {}",
        exec.order.id,
        exec.order.side,
        exec.order.quantity,
        exec.order.symbol,
        exec.order.price_per_share(),
        exec.order.total_amount,
        exec.cash_balance,
        exec.position
    )?;
    Ok(())
}

fn print_quotes(
    quotes: &std::collections::BTreeMap<String, PriceQuote>,
    out: &mut dyn Write,
) -> Result<(), DeskError> {
    for (symbol, quote) in quotes {
        writeln!(out, "{:<10} {:<30} {:>12}", symbol, quote.name, quote.price)?;
    }
    Ok(())
}
