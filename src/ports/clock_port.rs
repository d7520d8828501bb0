//! Wall-clock port.

use chrono::NaiveDateTime;

/// Local market time. Injected so tests can pin "now".
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}
