//! Database migrations for the fieldwatch monitoring core.
//!
//! Schema for SCADA connections, time-series readings and alarms.

pub use sea_orm_migration::prelude::*;

mod m2025_01_10_000100_create_scada_connections;
mod m2025_01_10_000200_create_readings;
mod m2025_01_10_000300_create_alarms;
mod m2025_01_10_000400_add_alarm_slot_guard;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_10_000100_create_scada_connections::Migration),
            Box::new(m2025_01_10_000200_create_readings::Migration),
            Box::new(m2025_01_10_000300_create_alarms::Migration),
            Box::new(m2025_01_10_000400_add_alarm_slot_guard::Migration),
        ]
    }
}
