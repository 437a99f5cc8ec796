//! # Domain
//!
//! Entities of the monitoring core. Constructors enforce invariants and every
//! mutation goes through an explicit method; nothing here performs I/O.

pub mod alarm;
pub mod connection;
pub mod reading;

pub use alarm::{
    Alarm, AlarmEvent, AlarmPriority, AlarmSeverity, AlarmSlot, AlarmState, AlarmType,
    MAX_MESSAGE_LENGTH, NewAlarm, Occurrence, compare_priority, transition,
};
pub use connection::{
    ConnectionStatus, ConnectionUpdate, Endpoint, NewConnection, ScadaConnection, SecurityMode,
};
pub use reading::{DataType, RawReading, Reading, ReadingQuality, ReadingValue, classify};
