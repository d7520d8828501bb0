//! In-memory [`DeskStore`] for tests and throwaway desks.
//!
//! One read-write lock guards the whole state. Read-write units hold it
//! exclusively and run one at a time; before each, a checkpoint of every
//! mutable table is taken and restored if the unit fails. Read-only units
//! share the lock and skip the checkpoint.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::domain::calendar::{CalendarException, ScheduleEntry};
use crate::domain::error::DeskError;
use crate::domain::instrument::Instrument;
use crate::domain::ledger::Ledger;
use crate::domain::order::{NewOrder, OrderRecord, position_from_records};
use crate::domain::participant::{Participant, ParticipantId, Role};
use crate::ports::store_port::{DeskRead, DeskStore, DeskTx};

#[derive(Debug, Default, Clone)]
struct Tables {
    participants: BTreeMap<ParticipantId, Participant>,
    next_participant: ParticipantId,
    ledgers: BTreeMap<ParticipantId, Ledger>,
    instruments: BTreeMap<String, Instrument>,
    schedule: BTreeMap<u8, ScheduleEntry>,
    exceptions: BTreeMap<NaiveDate, CalendarException>,
}

#[derive(Debug, Default)]
struct State {
    tables: Tables,
    /// Append-only; rollback truncates to the checkpointed length.
    orders: Vec<OrderRecord>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails once a unit of work has panicked mid-write.
    fn write_lock(&self) -> Result<RwLockWriteGuard<'_, State>, DeskError> {
        self.state.write().map_err(|_| poisoned())
    }

    fn read_lock(&self) -> Result<RwLockReadGuard<'_, State>, DeskError> {
        self.state.read().map_err(|_| poisoned())
    }
}

impl DeskStore for MemoryStore {
    fn transact<T, F>(&self, work: F) -> Result<T, DeskError>
    where
        F: FnOnce(&mut dyn DeskTx) -> Result<T, DeskError>,
    {
        let mut state = self.write_lock()?;
        let checkpoint = state.tables.clone();
        let order_count = state.orders.len();

        let result = work(&mut *state);
        if result.is_err() {
            state.tables = checkpoint;
            state.orders.truncate(order_count);
        }
        result
    }

    fn read<T, F>(&self, work: F) -> Result<T, DeskError>
    where
        F: FnOnce(&dyn DeskRead) -> Result<T, DeskError>,
    {
        let state = self.read_lock()?;
        work(&*state)
    }
}

fn poisoned() -> DeskError {
    DeskError::persistence("memory store poisoned by an earlier panic")
}

impl DeskRead for State {
    fn participant(&self, id: ParticipantId) -> Result<Option<Participant>, DeskError> {
        Ok(self.tables.participants.get(&id).cloned())
    }

    fn participant_by_username(&self, username: &str) -> Result<Option<Participant>, DeskError> {
        Ok(self
            .tables
            .participants
            .values()
            .find(|p| p.username == username)
            .cloned())
    }

    fn ledger(&self, participant: ParticipantId) -> Result<Option<Ledger>, DeskError> {
        Ok(self.tables.ledgers.get(&participant).cloned())
    }

    fn instrument(&self, symbol: &str) -> Result<Option<Instrument>, DeskError> {
        Ok(self.tables.instruments.get(symbol).cloned())
    }

    fn instruments(&self) -> Result<Vec<Instrument>, DeskError> {
        Ok(self.tables.instruments.values().cloned().collect())
    }

    fn orders_of(&self, participant: ParticipantId) -> Result<Vec<OrderRecord>, DeskError> {
        Ok(self
            .orders
            .iter()
            .filter(|o| o.participant == participant)
            .cloned()
            .collect())
    }

    fn position(&self, participant: ParticipantId, symbol: &str) -> Result<i64, DeskError> {
        Ok(position_from_records(&self.orders, participant, symbol))
    }

    fn symbol_has_orders(&self, symbol: &str) -> Result<bool, DeskError> {
        Ok(self.orders.iter().any(|o| o.symbol == symbol))
    }

    fn schedule_entry(&self, weekday: u8) -> Result<Option<ScheduleEntry>, DeskError> {
        Ok(self.tables.schedule.get(&weekday).copied())
    }

    fn schedule(&self) -> Result<Vec<ScheduleEntry>, DeskError> {
        Ok(self.tables.schedule.values().copied().collect())
    }

    fn is_exception(&self, date: NaiveDate) -> Result<bool, DeskError> {
        Ok(self.tables.exceptions.contains_key(&date))
    }

    fn exceptions(&self) -> Result<Vec<CalendarException>, DeskError> {
        Ok(self.tables.exceptions.values().cloned().collect())
    }
}

impl DeskTx for State {
    fn insert_participant(&mut self, username: &str, role: Role) -> Result<Participant, DeskError> {
        if self
            .tables
            .participants
            .values()
            .any(|p| p.username == username)
        {
            return Err(DeskError::DuplicateParticipant {
                username: username.to_string(),
            });
        }
        self.tables.next_participant += 1;
        let participant = Participant {
            id: self.tables.next_participant,
            username: username.to_string(),
            role,
        };
        self.tables
            .participants
            .insert(participant.id, participant.clone());
        Ok(participant)
    }

    fn set_role(&mut self, id: ParticipantId, role: Role) -> Result<(), DeskError> {
        let participant = self
            .tables
            .participants
            .get_mut(&id)
            .ok_or(DeskError::UnknownParticipant { participant: id })?;
        participant.role = role;
        Ok(())
    }

    fn put_ledger(&mut self, ledger: &Ledger) -> Result<(), DeskError> {
        self.tables.ledgers.insert(ledger.participant, ledger.clone());
        Ok(())
    }

    fn insert_instrument(&mut self, instrument: &Instrument) -> Result<(), DeskError> {
        if self.tables.instruments.contains_key(&instrument.symbol) {
            return Err(DeskError::DuplicateInstrument {
                symbol: instrument.symbol.clone(),
            });
        }
        self.tables
            .instruments
            .insert(instrument.symbol.clone(), instrument.clone());
        Ok(())
    }

    fn put_instrument(&mut self, instrument: &Instrument) -> Result<(), DeskError> {
        match self.tables.instruments.get_mut(&instrument.symbol) {
            Some(slot) => {
                *slot = instrument.clone();
                Ok(())
            }
            None => Err(DeskError::UnknownSymbol {
                symbol: instrument.symbol.clone(),
            }),
        }
    }

    fn delete_instrument(&mut self, symbol: &str) -> Result<(), DeskError> {
        self.tables.instruments.remove(symbol);
        Ok(())
    }

    fn append_order(&mut self, order: &NewOrder) -> Result<OrderRecord, DeskError> {
        let created_at = latest_created_at(&self.orders)
            .map_or(order.requested_at, |last| last.max(order.requested_at));
        let record = OrderRecord {
            id: self.orders.len() as i64 + 1,
            participant: order.participant,
            symbol: order.symbol.clone(),
            side: order.side,
            quantity: order.quantity,
            total_amount: order.total_amount,
            created_at,
        };
        self.orders.push(record.clone());
        Ok(record)
    }

    fn put_schedule_entry(&mut self, entry: &ScheduleEntry) -> Result<(), DeskError> {
        self.tables.schedule.insert(entry.weekday, *entry);
        Ok(())
    }

    fn delete_schedule_entry(&mut self, weekday: u8) -> Result<(), DeskError> {
        self.tables.schedule.remove(&weekday);
        Ok(())
    }

    fn insert_exception(&mut self, exception: &CalendarException) -> Result<bool, DeskError> {
        if self.tables.exceptions.contains_key(&exception.holiday_date) {
            return Ok(false);
        }
        self.tables
            .exceptions
            .insert(exception.holiday_date, exception.clone());
        Ok(true)
    }
}

fn latest_created_at(orders: &[OrderRecord]) -> Option<NaiveDateTime> {
    orders.last().map(|o| o.created_at)
}
