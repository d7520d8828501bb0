//! SQLite-backed [`DeskStore`].
//!
//! Each read-write unit is a `BEGIN IMMEDIATE` transaction on a pooled
//! connection, so writers are serialized by SQLite itself across threads and
//! processes. Contention on `BEGIN` is retried a bounded number of times and
//! then reported as [`DeskError::Persistence`]. Read-only units use a deferred
//! transaction, which takes only a shared lock and so keeps working while
//! another connection holds the write reservation.
//!
//! Storage formats: money as integer cents, dates as `YYYY-MM-DD`, timestamps
//! as `YYYY-MM-DD HH:MM:SS.ffffff` (fixed width, so text order is time order).

use std::thread;
use std::time::Duration;

use chrono::{NaiveDate, NaiveDateTime};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior, params};
use tracing::{debug, warn};

use crate::domain::calendar::{CalendarException, ScheduleEntry};
use crate::domain::error::DeskError;
use crate::domain::instrument::Instrument;
use crate::domain::ledger::Ledger;
use crate::domain::money::Money;
use crate::domain::order::{NewOrder, OrderRecord, Side};
use crate::domain::participant::{Participant, ParticipantId, Role};
use crate::ports::config_port::ConfigPort;
use crate::ports::store_port::{DeskRead, DeskStore, DeskTx};

const DATE_FORMAT: &str = "%Y-%m-%d";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";
const RETRY_BACKOFF: Duration = Duration::from_millis(20);

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS participants (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    username TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL CHECK (role IN ('trader', 'operator'))
);
CREATE TABLE IF NOT EXISTS ledgers (
    participant_id INTEGER PRIMARY KEY REFERENCES participants(id),
    cash_cents INTEGER NOT NULL CHECK (cash_cents >= 0),
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS instruments (
    symbol TEXT PRIMARY KEY,
    display_name TEXT NOT NULL UNIQUE,
    quantity_on_hand INTEGER NOT NULL CHECK (quantity_on_hand >= 0),
    price_cents INTEGER,
    updated_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS orders (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    participant_id INTEGER NOT NULL REFERENCES participants(id),
    symbol TEXT NOT NULL REFERENCES instruments(symbol),
    side TEXT NOT NULL CHECK (side IN ('buy', 'sell')),
    quantity INTEGER NOT NULL CHECK (quantity > 0),
    total_cents INTEGER NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_orders_participant_symbol ON orders(participant_id, symbol);
CREATE INDEX IF NOT EXISTS idx_orders_created_at ON orders(created_at);
CREATE TABLE IF NOT EXISTS market_schedule (
    weekday INTEGER PRIMARY KEY CHECK (weekday BETWEEN 0 AND 6),
    open_minute INTEGER NOT NULL,
    close_minute INTEGER NOT NULL,
    enabled INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS calendar_exceptions (
    holiday_date TEXT PRIMARY KEY,
    reason TEXT NOT NULL
);";

/// Pool and lock-contention settings, read from the `[sqlite]` section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqliteSettings {
    pub pool_size: u32,
    pub busy_retries: u32,
    pub busy_timeout: Duration,
}

impl Default for SqliteSettings {
    fn default() -> Self {
        SqliteSettings {
            pool_size: 4,
            busy_retries: 5,
            busy_timeout: Duration::from_millis(250),
        }
    }
}

impl SqliteSettings {
    pub fn from_config(config: &dyn ConfigPort) -> Self {
        let defaults = SqliteSettings::default();
        SqliteSettings {
            pool_size: config
                .get_int("sqlite", "pool_size", defaults.pool_size as i64)
                .max(1) as u32,
            busy_retries: config
                .get_int("sqlite", "busy_retries", defaults.busy_retries as i64)
                .max(0) as u32,
            busy_timeout: Duration::from_millis(
                config
                    .get_int(
                        "sqlite",
                        "busy_timeout_ms",
                        defaults.busy_timeout.as_millis() as i64,
                    )
                    .max(0) as u64,
            ),
        }
    }
}

pub struct SqliteStore {
    pool: Pool<SqliteConnectionManager>,
    busy_retries: u32,
}

impl SqliteStore {
    pub fn from_config(config: &dyn ConfigPort) -> Result<Self, DeskError> {
        let db_path = config
            .get_trimmed("sqlite", "path")
            .ok_or_else(|| DeskError::ConfigMissing {
                section: "sqlite".into(),
                key: "path".into(),
            })?;
        Self::open(&db_path, SqliteSettings::from_config(config))
    }

    pub fn open(path: &str, settings: SqliteSettings) -> Result<Self, DeskError> {
        let busy_timeout = settings.busy_timeout;
        let manager = SqliteConnectionManager::file(path)
            .with_init(move |conn| configure_connection(conn, busy_timeout));
        let pool = Pool::builder()
            .max_size(settings.pool_size)
            .build(manager)
            .map_err(|e: r2d2::Error| DeskError::Persistence {
                reason: e.to_string(),
            })?;

        debug!(path, pool_size = settings.pool_size, "sqlite store opened");
        Ok(Self {
            pool,
            busy_retries: settings.busy_retries,
        })
    }

    /// A private in-memory database. The pool holds a single connection so
    /// every unit of work sees the same data.
    pub fn in_memory() -> Result<Self, DeskError> {
        let busy_timeout = SqliteSettings::default().busy_timeout;
        let manager = SqliteConnectionManager::memory()
            .with_init(move |conn| configure_connection(conn, busy_timeout));
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e: r2d2::Error| DeskError::Persistence {
                reason: e.to_string(),
            })?;

        Ok(Self {
            pool,
            busy_retries: 0,
        })
    }

    /// Creates missing tables. Safe to call on every start.
    pub fn initialize_schema(&self) -> Result<(), DeskError> {
        let conn = self
            .pool
            .get()
            .map_err(|e: r2d2::Error| DeskError::Persistence {
                reason: e.to_string(),
            })?;

        conn.execute_batch(SCHEMA)
            .map_err(|e: rusqlite::Error| DeskError::Persistence {
                reason: e.to_string(),
            })?;

        Ok(())
    }
}

fn configure_connection(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    conn.pragma_update(None, "foreign_keys", true)?;
    Ok(())
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if e.code == ErrorCode::DatabaseBusy || e.code == ErrorCode::DatabaseLocked
    )
}

impl DeskStore for SqliteStore {
    fn transact<T, F>(&self, work: F) -> Result<T, DeskError>
    where
        F: FnOnce(&mut dyn DeskTx) -> Result<T, DeskError>,
    {
        let mut conn = self
            .pool
            .get()
            .map_err(|e: r2d2::Error| DeskError::Persistence {
                reason: e.to_string(),
            })?;

        let mut attempt = 0;
        let tx = loop {
            match conn.transaction_with_behavior(TransactionBehavior::Immediate) {
                Ok(tx) => break tx,
                Err(e) if is_busy(&e) && attempt < self.busy_retries => {
                    attempt += 1;
                    warn!(attempt, retries = self.busy_retries, "database busy, retrying");
                    thread::sleep(RETRY_BACKOFF * attempt);
                }
                Err(e) => {
                    return Err(DeskError::Persistence {
                        reason: e.to_string(),
                    });
                }
            }
        };

        // Dropping `tx` without committing rolls the unit back.
        let value = work(&mut SqliteTx { conn: &tx })?;

        tx.commit()
            .map_err(|e: rusqlite::Error| DeskError::Persistence {
                reason: e.to_string(),
            })?;
        Ok(value)
    }

    fn read<T, F>(&self, work: F) -> Result<T, DeskError>
    where
        F: FnOnce(&dyn DeskRead) -> Result<T, DeskError>,
    {
        let mut conn = self
            .pool
            .get()
            .map_err(|e: r2d2::Error| DeskError::Persistence {
                reason: e.to_string(),
            })?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Deferred)
            .map_err(db_err)?;

        let value = work(&SqliteTx { conn: &tx })?;

        tx.commit().map_err(db_err)?;
        Ok(value)
    }
}

struct SqliteTx<'c> {
    conn: &'c Connection,
}

fn db_err(e: rusqlite::Error) -> DeskError {
    DeskError::Persistence {
        reason: e.to_string(),
    }
}

fn conversion_error(
    idx: usize,
    err: impl Into<Box<dyn std::error::Error + Send + Sync>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, err.into())
}

fn timestamp_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDateTime> {
    let raw: String = row.get(idx)?;
    NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn date_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(|e| conversion_error(idx, e))
}

fn format_timestamp(ts: NaiveDateTime) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn participant_from_row(row: &Row<'_>) -> rusqlite::Result<Participant> {
    let role: String = row.get(2)?;
    Ok(Participant {
        id: row.get(0)?,
        username: row.get(1)?,
        role: role.parse::<Role>().map_err(|e| conversion_error(2, e))?,
    })
}

fn instrument_from_row(row: &Row<'_>) -> rusqlite::Result<Instrument> {
    Ok(Instrument {
        symbol: row.get(0)?,
        display_name: row.get(1)?,
        quantity_on_hand: row.get(2)?,
        current_price: row.get::<_, Option<i64>>(3)?.map(Money::from_cents),
        updated_at: timestamp_at(row, 4)?,
    })
}

fn order_from_row(row: &Row<'_>) -> rusqlite::Result<OrderRecord> {
    let side: String = row.get(3)?;
    Ok(OrderRecord {
        id: row.get(0)?,
        participant: row.get(1)?,
        symbol: row.get(2)?,
        side: side.parse::<Side>().map_err(|e| conversion_error(3, e))?,
        quantity: row.get(4)?,
        total_amount: Money::from_cents(row.get(5)?),
        created_at: timestamp_at(row, 6)?,
    })
}

fn schedule_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduleEntry> {
    Ok(ScheduleEntry {
        weekday: row.get(0)?,
        open_minute: row.get(1)?,
        close_minute: row.get(2)?,
        enabled: row.get(3)?,
    })
}

impl SqliteTx<'_> {
    fn query_all<T>(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
        map: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
    ) -> Result<Vec<T>, DeskError> {
        let mut stmt = self.conn.prepare_cached(sql).map_err(db_err)?;
        let rows = stmt.query_map(params, map).map_err(db_err)?;
        rows.collect::<rusqlite::Result<Vec<T>>>().map_err(db_err)
    }
}

impl DeskRead for SqliteTx<'_> {
    fn participant(&self, id: ParticipantId) -> Result<Option<Participant>, DeskError> {
        self.conn
            .query_row(
                "SELECT id, username, role FROM participants WHERE id = ?1",
                params![id],
                participant_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    fn participant_by_username(&self, username: &str) -> Result<Option<Participant>, DeskError> {
        self.conn
            .query_row(
                "SELECT id, username, role FROM participants WHERE username = ?1",
                params![username],
                participant_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    fn ledger(&self, participant: ParticipantId) -> Result<Option<Ledger>, DeskError> {
        self.conn
            .query_row(
                "SELECT participant_id, cash_cents, updated_at FROM ledgers WHERE participant_id = ?1",
                params![participant],
                |row| {
                    Ok(Ledger {
                        participant: row.get(0)?,
                        cash_balance: Money::from_cents(row.get(1)?),
                        updated_at: timestamp_at(row, 2)?,
                    })
                },
            )
            .optional()
            .map_err(db_err)
    }

    fn instrument(&self, symbol: &str) -> Result<Option<Instrument>, DeskError> {
        self.conn
            .query_row(
                "SELECT symbol, display_name, quantity_on_hand, price_cents, updated_at
                 FROM instruments WHERE symbol = ?1",
                params![symbol],
                instrument_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    fn instruments(&self) -> Result<Vec<Instrument>, DeskError> {
        self.query_all(
            "SELECT symbol, display_name, quantity_on_hand, price_cents, updated_at
             FROM instruments ORDER BY symbol",
            [],
            instrument_from_row,
        )
    }

    fn orders_of(&self, participant: ParticipantId) -> Result<Vec<OrderRecord>, DeskError> {
        self.query_all(
            "SELECT id, participant_id, symbol, side, quantity, total_cents, created_at
             FROM orders WHERE participant_id = ?1 ORDER BY created_at, id",
            params![participant],
            order_from_row,
        )
    }

    fn position(&self, participant: ParticipantId, symbol: &str) -> Result<i64, DeskError> {
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(CASE side WHEN 'buy' THEN quantity ELSE -quantity END), 0)
                 FROM orders WHERE participant_id = ?1 AND symbol = ?2",
                params![participant, symbol],
                |row| row.get(0),
            )
            .map_err(db_err)
    }

    fn symbol_has_orders(&self, symbol: &str) -> Result<bool, DeskError> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM orders WHERE symbol = ?1)",
                params![symbol],
                |row| row.get(0),
            )
            .map_err(db_err)
    }

    fn schedule_entry(&self, weekday: u8) -> Result<Option<ScheduleEntry>, DeskError> {
        self.conn
            .query_row(
                "SELECT weekday, open_minute, close_minute, enabled
                 FROM market_schedule WHERE weekday = ?1",
                params![weekday],
                schedule_from_row,
            )
            .optional()
            .map_err(db_err)
    }

    fn schedule(&self) -> Result<Vec<ScheduleEntry>, DeskError> {
        self.query_all(
            "SELECT weekday, open_minute, close_minute, enabled
             FROM market_schedule ORDER BY weekday",
            [],
            schedule_from_row,
        )
    }

    fn is_exception(&self, date: NaiveDate) -> Result<bool, DeskError> {
        self.conn
            .query_row(
                "SELECT EXISTS(SELECT 1 FROM calendar_exceptions WHERE holiday_date = ?1)",
                params![format_date(date)],
                |row| row.get(0),
            )
            .map_err(db_err)
    }

    fn exceptions(&self) -> Result<Vec<CalendarException>, DeskError> {
        self.query_all(
            "SELECT holiday_date, reason FROM calendar_exceptions ORDER BY holiday_date",
            [],
            |row| {
                Ok(CalendarException {
                    holiday_date: date_at(row, 0)?,
                    reason: row.get(1)?,
                })
            },
        )
    }
}

impl DeskTx for SqliteTx<'_> {
    fn insert_participant(&mut self, username: &str, role: Role) -> Result<Participant, DeskError> {
        self.conn
            .execute(
                "INSERT INTO participants (username, role) VALUES (?1, ?2)",
                params![username, role.as_str()],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
                    DeskError::DuplicateParticipant {
                        username: username.to_string(),
                    }
                }
                other => db_err(other),
            })?;
        Ok(Participant {
            id: self.conn.last_insert_rowid(),
            username: username.to_string(),
            role,
        })
    }

    fn set_role(&mut self, id: ParticipantId, role: Role) -> Result<(), DeskError> {
        let changed = self
            .conn
            .execute(
                "UPDATE participants SET role = ?2 WHERE id = ?1",
                params![id, role.as_str()],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(DeskError::UnknownParticipant { participant: id });
        }
        Ok(())
    }

    fn put_ledger(&mut self, ledger: &Ledger) -> Result<(), DeskError> {
        self.conn
            .execute(
                "INSERT INTO ledgers (participant_id, cash_cents, updated_at) VALUES (?1, ?2, ?3)
                 ON CONFLICT(participant_id) DO UPDATE SET
                     cash_cents = excluded.cash_cents,
                     updated_at = excluded.updated_at",
                params![
                    ledger.participant,
                    ledger.cash_balance.cents(),
                    format_timestamp(ledger.updated_at)
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn insert_instrument(&mut self, instrument: &Instrument) -> Result<(), DeskError> {
        self.conn
            .execute(
                "INSERT INTO instruments (symbol, display_name, quantity_on_hand, price_cents, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    instrument.symbol,
                    instrument.display_name,
                    instrument.quantity_on_hand,
                    instrument.current_price.map(Money::cents),
                    format_timestamp(instrument.updated_at)
                ],
            )
            .map_err(|e| match e {
                rusqlite::Error::SqliteFailure(f, _) if f.code == ErrorCode::ConstraintViolation => {
                    DeskError::DuplicateInstrument {
                        symbol: instrument.symbol.clone(),
                    }
                }
                other => db_err(other),
            })?;
        Ok(())
    }

    fn put_instrument(&mut self, instrument: &Instrument) -> Result<(), DeskError> {
        let changed = self
            .conn
            .execute(
                "UPDATE instruments
                 SET display_name = ?2, quantity_on_hand = ?3, price_cents = ?4, updated_at = ?5
                 WHERE symbol = ?1",
                params![
                    instrument.symbol,
                    instrument.display_name,
                    instrument.quantity_on_hand,
                    instrument.current_price.map(Money::cents),
                    format_timestamp(instrument.updated_at)
                ],
            )
            .map_err(db_err)?;
        if changed == 0 {
            return Err(DeskError::UnknownSymbol {
                symbol: instrument.symbol.clone(),
            });
        }
        Ok(())
    }

    fn delete_instrument(&mut self, symbol: &str) -> Result<(), DeskError> {
        self.conn
            .execute("DELETE FROM instruments WHERE symbol = ?1", params![symbol])
            .map_err(db_err)?;
        Ok(())
    }

    fn append_order(&mut self, order: &NewOrder) -> Result<OrderRecord, DeskError> {
        let latest: Option<String> = self
            .conn
            .query_row("SELECT MAX(created_at) FROM orders", [], |row| row.get(0))
            .map_err(db_err)?;
        let latest = latest
            .map(|raw| NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT))
            .transpose()
            .map_err(DeskError::persistence)?;
        let created_at = latest.map_or(order.requested_at, |last| last.max(order.requested_at));

        self.conn
            .execute(
                "INSERT INTO orders (participant_id, symbol, side, quantity, total_cents, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    order.participant,
                    order.symbol,
                    order.side.as_str(),
                    order.quantity,
                    order.total_amount.cents(),
                    format_timestamp(created_at)
                ],
            )
            .map_err(db_err)?;

        Ok(OrderRecord {
            id: self.conn.last_insert_rowid(),
            participant: order.participant,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            total_amount: order.total_amount,
            created_at,
        })
    }

    fn put_schedule_entry(&mut self, entry: &ScheduleEntry) -> Result<(), DeskError> {
        self.conn
            .execute(
                "INSERT INTO market_schedule (weekday, open_minute, close_minute, enabled)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(weekday) DO UPDATE SET
                     open_minute = excluded.open_minute,
                     close_minute = excluded.close_minute,
                     enabled = excluded.enabled",
                params![
                    entry.weekday,
                    entry.open_minute,
                    entry.close_minute,
                    entry.enabled
                ],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn delete_schedule_entry(&mut self, weekday: u8) -> Result<(), DeskError> {
        self.conn
            .execute(
                "DELETE FROM market_schedule WHERE weekday = ?1",
                params![weekday],
            )
            .map_err(db_err)?;
        Ok(())
    }

    fn insert_exception(&mut self, exception: &CalendarException) -> Result<bool, DeskError> {
        let inserted = self
            .conn
            .execute(
                "INSERT INTO calendar_exceptions (holiday_date, reason) VALUES (?1, ?2)
                 ON CONFLICT(holiday_date) DO NOTHING",
                params![format_date(exception.holiday_date), exception.reason],
            )
            .map_err(db_err)?;
        Ok(inserted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct EmptyConfig;

    impl ConfigPort for EmptyConfig {
        fn get_string(&self, _section: &str, _key: &str) -> Option<String> {
            None
        }
        fn get_int(&self, _section: &str, _key: &str, default: i64) -> i64 {
            default
        }
        fn get_double(&self, _section: &str, _key: &str, default: f64) -> f64 {
            default
        }
        fn get_bool(&self, _section: &str, _key: &str, default: bool) -> bool {
            default
        }
    }

    fn ts(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 4)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    fn store() -> SqliteStore {
        let store = SqliteStore::in_memory().unwrap();
        store.initialize_schema().unwrap();
        store
    }

    fn nvda(at: NaiveDateTime) -> Instrument {
        Instrument {
            symbol: "NVDA".into(),
            display_name: "NVIDIA Corp".into(),
            quantity_on_hand: 500,
            current_price: Some(Money::from_cents(18_911)),
            updated_at: at,
        }
    }

    fn buy(participant: ParticipantId, quantity: i64, at: NaiveDateTime) -> NewOrder {
        NewOrder {
            participant,
            symbol: "NVDA".into(),
            side: Side::Buy,
            quantity,
            total_amount: Money::from_cents(quantity * 18_911),
            requested_at: at,
        }
    }

    #[test]
    fn from_config_missing_path() {
        let config = EmptyConfig;
        let result = SqliteStore::from_config(&config);
        match result {
            Err(DeskError::ConfigMissing { section, key }) => {
                assert_eq!(section, "sqlite");
                assert_eq!(key, "path");
            }
            Err(other) => panic!("expected ConfigMissing, got: {other}"),
            Ok(_) => panic!("expected error, got Ok"),
        }
    }

    #[test]
    fn settings_default_when_unset() {
        assert_eq!(
            SqliteSettings::from_config(&EmptyConfig),
            SqliteSettings::default()
        );
    }

    #[test]
    fn schema_initialization_is_repeatable() {
        let store = store();
        store.initialize_schema().unwrap();
    }

    #[test]
    fn values_survive_a_round_trip() {
        let store = store();
        let at = NaiveDateTime::parse_from_str("2024-03-04 10:15:30.123456", TIMESTAMP_FORMAT)
            .unwrap();

        let (alice, order) = store
            .transact(|tx| {
                let alice = tx.insert_participant("alice", Role::Trader)?;
                let mut ledger = Ledger::open(alice.id, at);
                ledger.credit(Money::from_cents(1_000_000), at)?;
                tx.put_ledger(&ledger)?;
                tx.insert_instrument(&nvda(at))?;
                let order = tx.append_order(&buy(alice.id, 10, at))?;
                Ok((alice, order))
            })
            .unwrap();

        store
            .read(|tx| {
                assert_eq!(tx.participant(alice.id)?, Some(alice.clone()));
                assert_eq!(tx.participant_by_username("alice")?, Some(alice.clone()));
                let ledger = tx.ledger(alice.id)?.unwrap();
                assert_eq!(ledger.cash_balance, Money::from_cents(1_000_000));
                assert_eq!(ledger.updated_at, at);
                assert_eq!(tx.instrument("NVDA")?, Some(nvda(at)));
                assert_eq!(tx.orders_of(alice.id)?, vec![order.clone()]);
                assert_eq!(tx.position(alice.id, "NVDA")?, 10);
                assert!(tx.symbol_has_orders("NVDA")?);
                assert!(!tx.symbol_has_orders("AMD")?);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn created_at_is_monotonic() {
        let store = store();
        let (first, second) = store
            .transact(|tx| {
                let p = tx.insert_participant("bob", Role::Trader)?;
                tx.insert_instrument(&nvda(ts(9, 0)))?;
                let first = tx.append_order(&buy(p.id, 1, ts(11, 0)))?;
                let second = tx.append_order(&buy(p.id, 1, ts(10, 0)))?;
                Ok((first, second))
            })
            .unwrap();
        assert!(second.id > first.id);
        assert_eq!(second.created_at, ts(11, 0));
    }

    #[test]
    fn failed_statement_rolls_back_the_whole_unit() {
        let store = store();
        {
            let conn = store.pool.get().unwrap();
            conn.execute_batch(
                "CREATE TRIGGER refuse_orders BEFORE INSERT ON orders
                 BEGIN SELECT RAISE(ABORT, 'order log unavailable'); END;",
            )
            .unwrap();
        }
        let alice = store
            .transact(|tx| {
                let alice = tx.insert_participant("alice", Role::Trader)?;
                tx.insert_instrument(&nvda(ts(9, 0)))?;
                Ok(alice)
            })
            .unwrap();

        let err = store
            .transact(|tx| {
                let mut ledger = Ledger::open(alice.id, ts(10, 0));
                ledger.credit(Money::from_cents(500_000), ts(10, 0))?;
                tx.put_ledger(&ledger)?;
                let mut instrument = tx.instrument("NVDA")?.unwrap();
                instrument.quantity_on_hand -= 10;
                tx.put_instrument(&instrument)?;
                tx.append_order(&buy(alice.id, 10, ts(10, 0)))
            })
            .unwrap_err();
        assert!(matches!(err, DeskError::Persistence { .. }));

        store
            .read(|tx| {
                assert!(tx.ledger(alice.id)?.is_none());
                assert_eq!(tx.instrument("NVDA")?.unwrap().quantity_on_hand, 500);
                assert!(tx.orders_of(alice.id)?.is_empty());
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn exceptions_are_idempotent() {
        let store = store();
        let date = NaiveDate::from_ymd_opt(2024, 12, 25).unwrap();
        let results = store
            .transact(|tx| {
                let first = tx.insert_exception(&CalendarException {
                    holiday_date: date,
                    reason: "Christmas".into(),
                })?;
                let second = tx.insert_exception(&CalendarException {
                    holiday_date: date,
                    reason: "duplicate".into(),
                })?;
                Ok((first, second, tx.is_exception(date)?, tx.exceptions()?))
            })
            .unwrap();
        assert!(results.0);
        assert!(!results.1);
        assert!(results.2);
        assert_eq!(results.3.len(), 1);
        assert_eq!(results.3[0].reason, "Christmas");
    }

    #[test]
    fn schedule_entries_upsert_and_delete() {
        let store = store();
        store
            .transact(|tx| {
                tx.put_schedule_entry(&ScheduleEntry::new(0, 600, 900, true)?)?;
                tx.put_schedule_entry(&ScheduleEntry::new(0, 0, 0, false)?)?;
                tx.put_schedule_entry(&ScheduleEntry::new(2, 540, 1020, true)?)?;
                Ok(())
            })
            .unwrap();

        let (monday, all) = store
            .read(|tx| Ok((tx.schedule_entry(0)?, tx.schedule()?)))
            .unwrap();
        assert_eq!(monday, Some(ScheduleEntry::new(0, 0, 0, false).unwrap()));
        assert_eq!(all.len(), 2);

        store.transact(|tx| tx.delete_schedule_entry(0)).unwrap();
        assert_eq!(store.read(|tx| tx.schedule_entry(0)).unwrap(), None);
    }

    #[test]
    fn busy_database_blocks_writers_but_not_readers() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("desk.db");
        let path = path.to_str().unwrap();
        let store = SqliteStore::open(
            path,
            SqliteSettings {
                pool_size: 1,
                busy_retries: 1,
                busy_timeout: Duration::from_millis(10),
            },
        )
        .unwrap();
        store.initialize_schema().unwrap();

        let blocker = Connection::open(path).unwrap();
        blocker.execute_batch("BEGIN IMMEDIATE").unwrap();

        let err = store.transact(|tx| tx.instruments()).unwrap_err();
        assert!(matches!(err, DeskError::Persistence { .. }));
        assert!(store.read(|tx| tx.instruments()).unwrap().is_empty());
        assert_eq!(store.read(|tx| tx.schedule_entry(0)).unwrap(), None);

        blocker.execute_batch("COMMIT").unwrap();
        assert!(store.transact(|tx| tx.instruments()).unwrap().is_empty());
    }
}
