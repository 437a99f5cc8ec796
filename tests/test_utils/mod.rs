//! Test utilities for database testing.
//!
//! This module provides utilities for setting up in-memory SQLite databases
//! with migrations, plus builders for connections and stores.

#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fieldwatch::crypto::CryptoKey;
use fieldwatch::domain::{
    Alarm, AlarmSeverity, AlarmSlot, AlarmState, AlarmType, Endpoint, NewAlarm, NewConnection,
    Occurrence, ScadaConnection,
};
use fieldwatch::error::MonitorError;
use fieldwatch::repositories::{
    AlarmCommand, AlarmFilter, AlarmRepository, AlarmStore, ConnectionRepository,
    ConnectionStore, ReadingRepository, StoreResult,
};
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection, DbErr};
use uuid::Uuid;

/// Sets up an in-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Sets up an in-memory SQLite database with all migrations applied and returns an Arc.
pub async fn setup_test_db_arc() -> Result<Arc<DatabaseConnection>> {
    Ok(Arc::new(setup_test_db().await?))
}

/// Fixed 32-byte key for sealing endpoint passwords in tests.
pub fn test_crypto_key() -> CryptoKey {
    CryptoKey::new(vec![7u8; 32]).expect("32-byte test key")
}

/// The three SeaORM stores sharing one database.
pub struct TestStores {
    pub db: Arc<DatabaseConnection>,
    pub connections: Arc<ConnectionRepository>,
    pub readings: Arc<ReadingRepository>,
    pub alarms: Arc<AlarmRepository>,
}

pub async fn setup_stores() -> Result<TestStores> {
    let db = setup_test_db_arc().await?;
    Ok(TestStores {
        connections: Arc::new(ConnectionRepository::new(db.clone(), test_crypto_key())),
        readings: Arc::new(ReadingRepository::new(db.clone())),
        alarms: Arc::new(AlarmRepository::new(db.clone())),
        db,
    })
}

/// Input for an enabled connection polling every 5 seconds.
pub fn new_connection(tenant_id: Uuid, well_id: Uuid) -> NewConnection {
    NewConnection {
        tenant_id,
        well_id,
        name: "Wellhead RTU".to_string(),
        endpoint: Endpoint::insecure("opc.tcp://10.0.0.12:4840"),
        poll_interval_seconds: 5,
        enabled: true,
        created_by: Uuid::new_v4(),
    }
}

/// Creates and saves an enabled connection for a fresh well.
pub async fn insert_connection(
    store: &ConnectionRepository,
    tenant_id: Uuid,
) -> Result<ScadaConnection> {
    let connection = ScadaConnection::create(new_connection(tenant_id, Uuid::new_v4()), Utc::now())?;
    store.save(&connection).await?;
    Ok(connection)
}

/// Alarm store that fails to record one alarm type and delegates the rest.
pub struct FlakyAlarmStore {
    inner: Arc<AlarmRepository>,
    failing: AlarmType,
}

impl FlakyAlarmStore {
    pub fn new(inner: Arc<AlarmRepository>, failing: AlarmType) -> Self {
        Self { inner, failing }
    }
}

#[async_trait]
impl AlarmStore for FlakyAlarmStore {
    async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<Option<Alarm>> {
        self.inner.find_by_id(tenant_id, id).await
    }

    async fn find_active(&self, filter: &AlarmFilter) -> StoreResult<Vec<Alarm>> {
        self.inner.find_active(filter).await
    }

    async fn find_by_state(&self, tenant_id: Uuid, state: AlarmState) -> StoreResult<Vec<Alarm>> {
        self.inner.find_by_state(tenant_id, state).await
    }

    async fn find_existing_alarm(&self, slot: &AlarmSlot) -> StoreResult<Option<Alarm>> {
        self.inner.find_existing_alarm(slot).await
    }

    async fn record_occurrence(
        &self,
        fired: &NewAlarm,
        now: DateTime<Utc>,
    ) -> StoreResult<Occurrence> {
        if fired.slot.alarm_type == self.failing {
            return Err(MonitorError::Store(DbErr::Custom(
                "disk I/O error".to_string(),
            )));
        }
        self.inner.record_occurrence(fired, now).await
    }

    async fn transition(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        command: AlarmCommand,
        now: DateTime<Utc>,
    ) -> StoreResult<Alarm> {
        self.inner.transition(tenant_id, id, command, now).await
    }

    async fn save(&self, alarm: &Alarm) -> StoreResult<()> {
        self.inner.save(alarm).await
    }

    async fn count_active_by_severity(
        &self,
        tenant_id: Uuid,
    ) -> StoreResult<Vec<(AlarmSeverity, u64)>> {
        self.inner.count_active_by_severity(tenant_id).await
    }

    async fn count_active_for_well(&self, tenant_id: Uuid, well_id: Uuid) -> StoreResult<u64> {
        self.inner.count_active_for_well(tenant_id, well_id).await
    }

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<()> {
        self.inner.delete(tenant_id, id).await
    }
}
