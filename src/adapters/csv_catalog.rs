//! CSV catalog import and order-history export.
//!
//! Catalog files carry a `symbol,name,quantity,price` header; `price` may be
//! blank or absent, in which case the desk draws an initial price.

use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::domain::error::DeskError;
use crate::domain::instrument::CatalogEntry;
use crate::domain::money::Money;
use crate::domain::order::{OrderId, OrderRecord, Side};
use crate::domain::participant::ParticipantId;

pub fn read_catalog<R: Read>(reader: R) -> Result<Vec<CatalogEntry>, DeskError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader);

    let mut entries = Vec::new();
    for result in rdr.deserialize() {
        let entry: CatalogEntry = result.map_err(|e| DeskError::CsvFormat {
            reason: e.to_string(),
        })?;
        entries.push(entry);
    }
    Ok(entries)
}

pub fn read_catalog_file<P: AsRef<Path>>(path: P) -> Result<Vec<CatalogEntry>, DeskError> {
    let file = File::open(path.as_ref()).map_err(|e| {
        DeskError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read {}: {}", path.as_ref().display(), e),
        ))
    })?;
    read_catalog(file)
}

#[derive(Serialize)]
struct HistoryRow<'a> {
    id: OrderId,
    participant: ParticipantId,
    symbol: &'a str,
    side: Side,
    quantity: i64,
    price_per_share: Money,
    total_amount: Money,
    #[serde(serialize_with = "serialize_timestamp")]
    created_at: NaiveDateTime,
}

fn serialize_timestamp<S: serde::Serializer>(
    ts: &NaiveDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&ts.format("%Y-%m-%d %H:%M:%S"))
}

/// Writes one row per order, oldest first as given.
pub fn write_order_history<W: Write>(writer: W, orders: &[OrderRecord]) -> Result<(), DeskError> {
    let mut wtr = csv::Writer::from_writer(writer);
    for order in orders {
        wtr.serialize(HistoryRow {
            id: order.id,
            participant: order.participant,
            symbol: &order.symbol,
            side: order.side,
            quantity: order.quantity,
            price_per_share: order.price_per_share(),
            total_amount: order.total_amount,
            created_at: order.created_at,
        })
        .map_err(|e| DeskError::CsvFormat {
            reason: e.to_string(),
        })?;
    }
    wtr.flush()?;
    Ok(())
}
