//! Reading entity model
//!
//! Append-only time-series samples. The typed value is stored as JSON so that
//! numeric, string and boolean samples share a column.

use sea_orm::Set;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use super::{from_db_time, to_db_time};
use crate::domain::{Reading, ReadingValue};
use crate::error::{MonitorError, ValidationError};

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "readings")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub tenant_id: Uuid,

    pub well_id: Uuid,

    pub connection_id: Uuid,

    pub tag_name: String,

    /// JSON number, string or boolean
    #[sea_orm(column_type = "JsonBinary")]
    pub value: JsonValue,

    /// `number`, `string` or `boolean`
    pub data_type: String,

    /// `GOOD`, `BAD`, `UNCERTAIN` or `OUT_OF_RANGE`
    pub quality: String,

    /// Device timestamp of the sample
    pub timestamp: DateTimeWithTimeZone,

    pub unit: Option<String>,

    pub min_value: Option<f64>,

    pub max_value: Option<f64>,

    #[sea_orm(column_type = "JsonBinary", nullable)]
    pub metadata: Option<JsonValue>,

    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}

/// Encodes a typed value for the JSON column. Non-finite numbers have no JSON
/// form and are refused rather than written as `null`.
pub fn encode_value(value: &ReadingValue) -> Result<JsonValue, ValidationError> {
    match value {
        ReadingValue::Number(number) => serde_json::Number::from_f64(*number)
            .map(JsonValue::Number)
            .ok_or(ValidationError::NotFinite {
                field: "value",
                value: *number,
            }),
        ReadingValue::Boolean(flag) => Ok(JsonValue::Bool(*flag)),
        ReadingValue::Text(text) => Ok(JsonValue::String(text.clone())),
    }
}

impl TryFrom<&Reading> for ActiveModel {
    type Error = MonitorError;

    fn try_from(reading: &Reading) -> Result<Self, Self::Error> {
        Ok(ActiveModel {
            id: Set(reading.id),
            tenant_id: Set(reading.tenant_id),
            well_id: Set(reading.well_id),
            connection_id: Set(reading.connection_id),
            tag_name: Set(reading.tag_name.clone()),
            value: Set(encode_value(&reading.value)?),
            data_type: Set(reading.data_type.as_str().to_string()),
            quality: Set(reading.quality.as_str().to_string()),
            timestamp: Set(to_db_time(reading.timestamp)),
            unit: Set(reading.unit.clone()),
            min_value: Set(reading.min_value),
            max_value: Set(reading.max_value),
            metadata: Set(reading.metadata.clone()),
            created_at: Set(to_db_time(reading.created_at)),
        })
    }
}

impl TryFrom<Model> for Reading {
    type Error = MonitorError;

    fn try_from(model: Model) -> Result<Self, Self::Error> {
        let id = model.id;
        let corrupt = |reason: String| MonitorError::corrupt("reading", id, reason);

        let value: ReadingValue = serde_json::from_value(model.value.clone())
            .map_err(|err| corrupt(format!("value: {err}")))?;
        let data_type = model
            .data_type
            .parse()
            .map_err(|err| corrupt(format!("{err}")))?;
        let quality = model
            .quality
            .parse()
            .map_err(|err| corrupt(format!("{err}")))?;

        Ok(Reading {
            id,
            tenant_id: model.tenant_id,
            well_id: model.well_id,
            connection_id: model.connection_id,
            tag_name: model.tag_name,
            value,
            data_type,
            quality,
            timestamp: from_db_time(model.timestamp),
            unit: model.unit,
            min_value: model.min_value,
            max_value: model.max_value,
            metadata: model.metadata,
            created_at: from_db_time(model.created_at),
        })
    }
}
