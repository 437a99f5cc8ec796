//! Reading classification.
//!
//! [`classify`] turns a decoded tag value into an immutable [`Reading`] with an
//! inferred data type and a quality verdict. Quality is decided once, here,
//! and never changes afterwards.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::ValidationError;

pub const MAX_TAG_NAME_LENGTH: usize = 100;

/// A decoded tag value as delivered by the device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ReadingValue {
    Number(f64),
    Boolean(bool),
    Text(String),
}

impl ReadingValue {
    pub fn data_type(&self) -> DataType {
        match self {
            ReadingValue::Number(_) => DataType::Number,
            ReadingValue::Boolean(_) => DataType::Boolean,
            ReadingValue::Text(_) => DataType::String,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ReadingValue::Number(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ReadingValue::Boolean(value) => Some(*value),
            _ => None,
        }
    }
}

impl From<f64> for ReadingValue {
    fn from(value: f64) -> Self {
        ReadingValue::Number(value)
    }
}

impl From<bool> for ReadingValue {
    fn from(value: bool) -> Self {
        ReadingValue::Boolean(value)
    }
}

impl From<&str> for ReadingValue {
    fn from(value: &str) -> Self {
        ReadingValue::Text(value.to_string())
    }
}

impl fmt::Display for ReadingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadingValue::Number(value) => write!(f, "{value}"),
            ReadingValue::Boolean(value) => write!(f, "{value}"),
            ReadingValue::Text(value) => f.write_str(value),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Number,
    String,
    Boolean,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Number => "number",
            DataType::String => "string",
            DataType::Boolean => "boolean",
        }
    }
}

impl FromStr for DataType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "number" => Ok(DataType::Number),
            "string" => Ok(DataType::String),
            "boolean" => Ok(DataType::Boolean),
            other => Err(ValidationError::UnknownVariant {
                field: "data_type",
                value: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReadingQuality {
    Good,
    Bad,
    Uncertain,
    OutOfRange,
}

impl ReadingQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingQuality::Good => "GOOD",
            ReadingQuality::Bad => "BAD",
            ReadingQuality::Uncertain => "UNCERTAIN",
            ReadingQuality::OutOfRange => "OUT_OF_RANGE",
        }
    }
}

impl fmt::Display for ReadingQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingQuality {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "GOOD" => Ok(ReadingQuality::Good),
            "BAD" => Ok(ReadingQuality::Bad),
            "UNCERTAIN" => Ok(ReadingQuality::Uncertain),
            "OUT_OF_RANGE" => Ok(ReadingQuality::OutOfRange),
            other => Err(ValidationError::UnknownVariant {
                field: "quality",
                value: other.to_string(),
            }),
        }
    }
}

/// Input to [`classify`].
#[derive(Debug, Clone)]
pub struct RawReading {
    pub tenant_id: Uuid,
    pub well_id: Uuid,
    pub connection_id: Uuid,
    pub tag_name: String,
    pub value: ReadingValue,
    /// Device timestamp; `now` is used when absent.
    pub timestamp: Option<DateTime<Utc>>,
    /// Quality reported by the device, taking precedence over range detection.
    pub quality: Option<ReadingQuality>,
    pub unit: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub metadata: Option<JsonValue>,
}

impl RawReading {
    pub fn new(
        tenant_id: Uuid,
        well_id: Uuid,
        connection_id: Uuid,
        tag_name: impl Into<String>,
        value: impl Into<ReadingValue>,
    ) -> Self {
        Self {
            tenant_id,
            well_id,
            connection_id,
            tag_name: tag_name.into(),
            value: value.into(),
            timestamp: None,
            quality: None,
            unit: None,
            min_value: None,
            max_value: None,
            metadata: None,
        }
    }

    pub fn with_range(mut self, min: f64, max: f64) -> Self {
        self.min_value = Some(min);
        self.max_value = Some(max);
        self
    }

    pub fn with_quality(mut self, quality: ReadingQuality) -> Self {
        self.quality = Some(quality);
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub(crate) id: Uuid,
    pub(crate) tenant_id: Uuid,
    pub(crate) well_id: Uuid,
    pub(crate) connection_id: Uuid,
    pub(crate) tag_name: String,
    pub(crate) value: ReadingValue,
    pub(crate) data_type: DataType,
    pub(crate) quality: ReadingQuality,
    pub(crate) timestamp: DateTime<Utc>,
    pub(crate) unit: Option<String>,
    pub(crate) min_value: Option<f64>,
    pub(crate) max_value: Option<f64>,
    pub(crate) metadata: Option<JsonValue>,
    pub(crate) created_at: DateTime<Utc>,
}

/// Classifies a raw value into a [`Reading`].
///
/// The data type follows the value variant without coercion. Quality is
/// `GOOD` unless the value is numeric, both bounds are present and the value
/// lies outside `[min, max]`, in which case it is `OUT_OF_RANGE`. A quality
/// supplied by the caller always wins.
///
/// NaN and infinite numbers, as values or bounds, are rejected: they have no
/// JSON representation and could not be read back once stored.
pub fn classify(raw: RawReading, now: DateTime<Utc>) -> Result<Reading, ValidationError> {
    for (field, id) in [
        ("tenant_id", raw.tenant_id),
        ("well_id", raw.well_id),
        ("connection_id", raw.connection_id),
    ] {
        if id.is_nil() {
            return Err(ValidationError::Required { field });
        }
    }

    let tag_name = raw.tag_name.trim();
    let tag_len = tag_name.chars().count();
    if tag_len == 0 {
        return Err(ValidationError::Required { field: "tag_name" });
    }
    if tag_len > MAX_TAG_NAME_LENGTH {
        return Err(ValidationError::Length {
            field: "tag_name",
            min: 1,
            max: MAX_TAG_NAME_LENGTH,
            actual: tag_len,
        });
    }

    if let Some(value) = raw.value.as_f64()
        && !value.is_finite()
    {
        return Err(ValidationError::NotFinite {
            field: "value",
            value,
        });
    }
    for (field, bound) in [("min_value", raw.min_value), ("max_value", raw.max_value)] {
        if let Some(bound) = bound
            && !bound.is_finite()
        {
            return Err(ValidationError::NotFinite {
                field,
                value: bound,
            });
        }
    }

    if let (Some(min), Some(max)) = (raw.min_value, raw.max_value)
        && min >= max
    {
        return Err(ValidationError::InvertedRange { min, max });
    }

    let data_type = raw.value.data_type();
    let quality = raw
        .quality
        .unwrap_or_else(|| detect_quality(&raw.value, raw.min_value, raw.max_value));

    Ok(Reading {
        id: Uuid::new_v4(),
        tenant_id: raw.tenant_id,
        well_id: raw.well_id,
        connection_id: raw.connection_id,
        tag_name: tag_name.to_string(),
        value: raw.value,
        data_type,
        quality,
        timestamp: raw.timestamp.unwrap_or(now),
        unit: raw.unit,
        min_value: raw.min_value,
        max_value: raw.max_value,
        metadata: raw.metadata,
        created_at: now,
    })
}

fn detect_quality(value: &ReadingValue, min: Option<f64>, max: Option<f64>) -> ReadingQuality {
    match (value.as_f64(), min, max) {
        (Some(v), Some(min), Some(max)) if v < min || v > max => ReadingQuality::OutOfRange,
        _ => ReadingQuality::Good,
    }
}

impl Reading {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn well_id(&self) -> Uuid {
        self.well_id
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }

    pub fn tag_name(&self) -> &str {
        &self.tag_name
    }

    pub fn value(&self) -> &ReadingValue {
        &self.value
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn quality(&self) -> ReadingQuality {
        self.quality
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn unit(&self) -> Option<&str> {
        self.unit.as_deref()
    }

    pub fn min_value(&self) -> Option<f64> {
        self.min_value
    }

    pub fn max_value(&self) -> Option<f64> {
        self.max_value
    }

    pub fn metadata(&self) -> Option<&JsonValue> {
        self.metadata.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn numeric_value(&self) -> Option<f64> {
        self.value.as_f64()
    }

    /// True unless the value is numeric and outside a fully declared range.
    pub fn is_in_range(&self) -> bool {
        detect_quality(&self.value, self.min_value, self.max_value) != ReadingQuality::OutOfRange
    }

    /// True when the sample is older than `threshold` at `now`.
    pub fn is_stale(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        now - self.timestamp > threshold
    }

    /// Difference from `previous`; `None` unless both values are numeric.
    pub fn calculate_change(&self, previous: &Reading) -> Option<f64> {
        Some(self.numeric_value()? - previous.numeric_value()?)
    }

    /// Percentage change from `previous`; `None` when either value is
    /// non-numeric or the previous value is zero.
    pub fn calculate_percentage_change(&self, previous: &Reading) -> Option<f64> {
        let current = self.numeric_value()?;
        let prior = previous.numeric_value()?;
        if prior == 0.0 {
            return None;
        }
        Some((current - prior) / prior * 100.0)
    }
}
