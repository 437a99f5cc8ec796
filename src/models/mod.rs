//! # Data Models
//!
//! SeaORM entities backing the stores, plus conversions between rows and
//! domain entities. Enumerations are stored as their string codes.

use chrono::{DateTime, FixedOffset, Utc};

pub mod alarm;
pub mod reading;
pub mod scada_connection;

pub use alarm::Entity as AlarmEntity;
pub use reading::Entity as ReadingEntity;
pub use scada_connection::Entity as ScadaConnectionEntity;

pub(crate) fn to_db_time(dt: DateTime<Utc>) -> DateTime<FixedOffset> {
    dt.fixed_offset()
}

pub(crate) fn from_db_time(dt: DateTime<FixedOffset>) -> DateTime<Utc> {
    dt.with_timezone(&Utc)
}
