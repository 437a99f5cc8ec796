//! # Repository Layer
//!
//! Store contracts consumed by the monitoring core and their SeaORM
//! implementations. Every query is tenant-scoped except
//! [`ConnectionStore::find_enabled`], which feeds the poll supervisor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    Alarm, AlarmSeverity, AlarmSlot, AlarmState, NewAlarm, Occurrence, Reading, ScadaConnection,
};
use crate::error::MonitorError;

pub mod alarm;
pub mod connection;
pub mod reading;

pub use alarm::AlarmRepository;
pub use connection::ConnectionRepository;
pub use reading::ReadingRepository;

pub type StoreResult<T> = Result<T, MonitorError>;

/// Persistence for [`ScadaConnection`].
#[async_trait]
pub trait ConnectionStore: Send + Sync {
    async fn find_by_well_id(
        &self,
        tenant_id: Uuid,
        well_id: Uuid,
    ) -> StoreResult<Vec<ScadaConnection>>;

    async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<Option<ScadaConnection>>;

    async fn find_all(&self, tenant_id: Uuid) -> StoreResult<Vec<ScadaConnection>>;

    /// Enabled connections across all tenants.
    async fn find_enabled(&self) -> StoreResult<Vec<ScadaConnection>>;

    /// Inserts or replaces the full record.
    async fn save(&self, connection: &ScadaConnection) -> StoreResult<()>;

    /// Writes only the health columns (status, last connected, last error).
    ///
    /// The write applies only while the stored row is still enabled and at
    /// the same `config_revision` as `connection`. Returns `false` when the
    /// row was deleted, disabled or reconfigured since it was read.
    async fn update_status(&self, connection: &ScadaConnection) -> StoreResult<bool>;

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<()>;
}

/// Filters for [`ReadingStore::find_with_filters`]. Results are newest first.
#[derive(Debug, Clone)]
pub struct ReadingFilter {
    pub tenant_id: Uuid,
    pub well_id: Option<Uuid>,
    pub connection_id: Option<Uuid>,
    pub tag_name: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub limit: u64,
    pub offset: u64,
}

impl ReadingFilter {
    pub const DEFAULT_LIMIT: u64 = 100;

    pub fn for_tenant(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            well_id: None,
            connection_id: None,
            tag_name: None,
            start_time: None,
            end_time: None,
            limit: Self::DEFAULT_LIMIT,
            offset: 0,
        }
    }
}

/// Append-only persistence for [`Reading`].
#[async_trait]
pub trait ReadingStore: Send + Sync {
    async fn create(&self, reading: &Reading) -> StoreResult<()>;

    async fn create_batch(&self, readings: &[Reading]) -> StoreResult<u64>;

    async fn find_with_filters(&self, filter: &ReadingFilter) -> StoreResult<Vec<Reading>>;

    async fn find_latest_by_tag(
        &self,
        tenant_id: Uuid,
        well_id: Uuid,
        tag_name: &str,
    ) -> StoreResult<Option<Reading>>;

    /// Deletes readings with a timestamp before `cutoff`; returns rows removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> StoreResult<u64>;
}

/// Filters for [`AlarmStore::find_active`].
#[derive(Debug, Clone, Default)]
pub struct AlarmFilter {
    pub tenant_id: Uuid,
    pub well_id: Option<Uuid>,
    pub connection_id: Option<Uuid>,
    pub severity: Option<AlarmSeverity>,
    pub limit: Option<u64>,
    pub offset: u64,
}

impl AlarmFilter {
    pub fn for_tenant(tenant_id: Uuid) -> Self {
        Self {
            tenant_id,
            ..Default::default()
        }
    }
}

/// Operator commands applied through [`AlarmStore::transition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmCommand {
    Acknowledge { user_id: Uuid },
    Clear,
}

/// Persistence for [`Alarm`].
#[async_trait]
pub trait AlarmStore: Send + Sync {
    async fn find_by_id(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<Option<Alarm>>;

    /// Open alarms (active or acknowledged) in priority order.
    async fn find_active(&self, filter: &AlarmFilter) -> StoreResult<Vec<Alarm>>;

    async fn find_by_state(&self, tenant_id: Uuid, state: AlarmState) -> StoreResult<Vec<Alarm>>;

    /// The slot's alarm if it is not cleared.
    async fn find_existing_alarm(&self, slot: &AlarmSlot) -> StoreResult<Option<Alarm>>;

    /// Creates or retriggers the slot's alarm as one atomic step.
    async fn record_occurrence(
        &self,
        fired: &NewAlarm,
        now: DateTime<Utc>,
    ) -> StoreResult<Occurrence>;

    /// Reads, transitions and writes one alarm as one atomic step.
    async fn transition(
        &self,
        tenant_id: Uuid,
        id: Uuid,
        command: AlarmCommand,
        now: DateTime<Utc>,
    ) -> StoreResult<Alarm>;

    /// Inserts or replaces the full record.
    async fn save(&self, alarm: &Alarm) -> StoreResult<()>;

    async fn count_active_by_severity(
        &self,
        tenant_id: Uuid,
    ) -> StoreResult<Vec<(AlarmSeverity, u64)>>;

    async fn count_active_for_well(&self, tenant_id: Uuid, well_id: Uuid) -> StoreResult<u64>;

    async fn delete(&self, tenant_id: Uuid, id: Uuid) -> StoreResult<()>;
}
