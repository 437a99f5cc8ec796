//! Alarm entity model
//!
//! One row per alarm slot `(tenant_id, well_id, connection_id, tag_name,
//! alarm_type)`, enforced by the `idx_alarms_slot` unique index.

use sea_orm::Set;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{from_db_time, to_db_time};
use crate::domain::{Alarm, AlarmSlot};
use crate::error::MonitorError;

/// Name of the unique index guarding alarm slots.
pub const SLOT_UNIQUE_INDEX: &str = "idx_alarms_slot";

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "alarms")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub well_id: Uuid,

    pub connection_id: Uuid,

    pub tag_name: String,

    /// `HIGH`, `LOW`, `HIGH_HIGH`, `LOW_LOW`, `FAULT`, `COMM_LOSS`, `BAD_QUALITY`, `STALE`, `CUSTOM`
    pub alarm_type: String,

    /// `CRITICAL`, `WARNING` or `INFORMATIONAL`
    pub severity: String,

    /// `ACTIVE`, `ACKNOWLEDGED` or `CLEARED`
    pub state: String,

    pub message: String,

    pub value: Option<f64>,

    pub threshold: Option<f64>,

    /// Occurrences since the slot was first seen (>= 1)
    pub trigger_count: i32,

    pub first_triggered_at: DateTimeWithTimeZone,

    pub last_triggered_at: DateTimeWithTimeZone,

    pub acknowledged_at: Option<DateTimeWithTimeZone>,

    pub acknowledged_by: Option<Uuid>,

    pub cleared_at: Option<DateTimeWithTimeZone>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub metadata: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

impl From<&Alarm> for ActiveModel {
    fn from(alarm: &Alarm) -> Self {
        ActiveModel {
            id: Set(alarm.id),
            tenant_id: Set(alarm.slot.tenant_id),
            well_id: Set(alarm.slot.well_id),
            connection_id: Set(alarm.slot.connection_id),
            tag_name: Set(alarm.slot.tag_name.clone()),
            alarm_type: Set(alarm.slot.alarm_type.as_str().to_string()),
            severity: Set(alarm.severity.as_str().to_string()),
            state: Set(alarm.state.as_str().to_string()),
            message: Set(alarm.message.clone()),
            value: Set(alarm.value),
            threshold: Set(alarm.threshold),
            trigger_count: Set(i32::try_from(alarm.trigger_count).unwrap_or(i32::MAX)),
            first_triggered_at: Set(to_db_time(alarm.first_triggered_at)),
            last_triggered_at: Set(to_db_time(alarm.last_triggered_at)),
            acknowledged_at: Set(alarm.acknowledged_at.map(to_db_time)),
            acknowledged_by: Set(alarm.acknowledged_by),
            cleared_at: Set(alarm.cleared_at.map(to_db_time)),
            metadata: Set(alarm.metadata.clone()),
            created_at: Set(to_db_time(alarm.created_at)),
            updated_at: Set(to_db_time(alarm.updated_at)),
        }
    }
}

impl TryFrom<Model> for Alarm {
    type Error = MonitorError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let id = model.id;
        let corrupt = |reason: String| MonitorError::corrupt("alarm", id, reason);

        let alarm_type = model
            .alarm_type
            .parse()
            .map_err(|err| corrupt(format!("{err}")))?;
        let severity = model
            .severity
            .parse()
            .map_err(|err| corrupt(format!("{err}")))?;
        let state = model
            .state
            .parse()
            .map_err(|err| corrupt(format!("{err}")))?;
        let trigger_count = u32::try_from(model.trigger_count)
            .ok()
            .filter(|count| *count >= 1)
            .ok_or_else(|| corrupt(format!("trigger_count {}", model.trigger_count)))?;

        Ok(Alarm {
            id,
            slot: AlarmSlot {
                tenant_id: model.tenant_id,
                well_id: model.well_id,
                connection_id: model.connection_id,
                tag_name: model.tag_name,
                alarm_type,
            },
            severity,
            state,
            message: model.message,
            value: model.value,
            threshold: model.threshold,
            trigger_count,
            first_triggered_at: from_db_time(model.first_triggered_at),
            last_triggered_at: from_db_time(model.last_triggered_at),
            acknowledged_at: model.acknowledged_at.map(from_db_time),
            acknowledged_by: model.acknowledged_by,
            cleared_at: model.cleared_at.map(from_db_time),
            metadata: model.metadata,
            created_at: from_db_time(model.created_at),
            updated_at: from_db_time(model.updated_at),
        })
    }
}
