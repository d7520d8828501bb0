//! Durable store port.
//!
//! Writes happen inside [`DeskStore::transact`]. Whatever the closure does
//! through its [`DeskTx`] is committed together when it returns `Ok`, and
//! discarded together when it returns `Err`. Pure lookups go through
//! [`DeskStore::read`], which never contends with a writer for its lock.

use chrono::NaiveDate;

use crate::domain::calendar::{CalendarException, ScheduleEntry};
use crate::domain::error::DeskError;
use crate::domain::instrument::Instrument;
use crate::domain::ledger::Ledger;
use crate::domain::order::{NewOrder, OrderRecord};
use crate::domain::participant::{Participant, ParticipantId, Role};

pub trait DeskStore: Send + Sync {
    /// Runs `work` as one atomic read-write unit.
    fn transact<T, F>(&self, work: F) -> Result<T, DeskError>
    where
        F: FnOnce(&mut dyn DeskTx) -> Result<T, DeskError>;

    /// Runs `work` against a consistent snapshot without taking the writer's
    /// lock, so lookups proceed while another unit of work is in flight.
    fn read<T, F>(&self, work: F) -> Result<T, DeskError>
    where
        F: FnOnce(&dyn DeskRead) -> Result<T, DeskError>;
}

/// Lookups available to both read-only and read-write units.
pub trait DeskRead {
    fn participant(&self, id: ParticipantId) -> Result<Option<Participant>, DeskError>;
    fn participant_by_username(&self, username: &str) -> Result<Option<Participant>, DeskError>;

    fn ledger(&self, participant: ParticipantId) -> Result<Option<Ledger>, DeskError>;

    fn instrument(&self, symbol: &str) -> Result<Option<Instrument>, DeskError>;
    fn instruments(&self) -> Result<Vec<Instrument>, DeskError>;

    fn orders_of(&self, participant: ParticipantId) -> Result<Vec<OrderRecord>, DeskError>;
    fn position(&self, participant: ParticipantId, symbol: &str) -> Result<i64, DeskError>;
    fn symbol_has_orders(&self, symbol: &str) -> Result<bool, DeskError>;

    fn schedule_entry(&self, weekday: u8) -> Result<Option<ScheduleEntry>, DeskError>;
    fn schedule(&self) -> Result<Vec<ScheduleEntry>, DeskError>;
    fn is_exception(&self, date: NaiveDate) -> Result<bool, DeskError>;
    fn exceptions(&self) -> Result<Vec<CalendarException>, DeskError>;
}

/// Writes available inside one atomic unit of work.
pub trait DeskTx: DeskRead {
    // Participants
    fn insert_participant(&mut self, username: &str, role: Role)
    -> Result<Participant, DeskError>;
    fn set_role(&mut self, id: ParticipantId, role: Role) -> Result<(), DeskError>;

    // Ledgers
    fn put_ledger(&mut self, ledger: &Ledger) -> Result<(), DeskError>;

    // Instruments
    fn insert_instrument(&mut self, instrument: &Instrument) -> Result<(), DeskError>;
    /// Overwrites name, quantity, price and timestamp of an existing symbol.
    fn put_instrument(&mut self, instrument: &Instrument) -> Result<(), DeskError>;
    fn delete_instrument(&mut self, symbol: &str) -> Result<(), DeskError>;

    // Order history
    /// Appends and returns the stored record with its id and a `created_at`
    /// no earlier than any previously stored order.
    fn append_order(&mut self, order: &NewOrder) -> Result<OrderRecord, DeskError>;

    // Calendar
    fn put_schedule_entry(&mut self, entry: &ScheduleEntry) -> Result<(), DeskError>;
    fn delete_schedule_entry(&mut self, weekday: u8) -> Result<(), DeskError>;
    /// Returns `false` when the date was already present; the existing reason is kept.
    fn insert_exception(&mut self, exception: &CalendarException) -> Result<bool, DeskError>;
}
