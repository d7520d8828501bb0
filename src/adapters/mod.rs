//! Concrete adapter implementations for ports.

pub mod clock;
pub mod csv_catalog;
pub mod file_config_adapter;
pub mod memory_store;
#[cfg(feature = "sqlite")]
pub mod sqlite_store;
