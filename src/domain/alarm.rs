//! Alarm lifecycle.
//!
//! Every lifecycle move goes through [`transition`], which holds the whole
//! state table including the rule that critical alarms must be acknowledged
//! before they can be cleared. [`Alarm`] methods apply the timestamp and
//! counter side effects once the transition is allowed.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::{StateConflictError, ValidationError};

pub const MAX_MESSAGE_LENGTH: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmType {
    High,
    Low,
    HighHigh,
    LowLow,
    Fault,
    CommLoss,
    BadQuality,
    Stale,
    Custom,
}

impl AlarmType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmType::High => "HIGH",
            AlarmType::Low => "LOW",
            AlarmType::HighHigh => "HIGH_HIGH",
            AlarmType::LowLow => "LOW_LOW",
            AlarmType::Fault => "FAULT",
            AlarmType::CommLoss => "COMM_LOSS",
            AlarmType::BadQuality => "BAD_QUALITY",
            AlarmType::Stale => "STALE",
            AlarmType::Custom => "CUSTOM",
        }
    }
}

impl FromStr for AlarmType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "HIGH" => Ok(AlarmType::High),
            "LOW" => Ok(AlarmType::Low),
            "HIGH_HIGH" => Ok(AlarmType::HighHigh),
            "LOW_LOW" => Ok(AlarmType::LowLow),
            "FAULT" => Ok(AlarmType::Fault),
            "COMM_LOSS" => Ok(AlarmType::CommLoss),
            "BAD_QUALITY" => Ok(AlarmType::BadQuality),
            "STALE" => Ok(AlarmType::Stale),
            "CUSTOM" => Ok(AlarmType::Custom),
            other => Err(ValidationError::UnknownVariant {
                field: "alarm_type",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for AlarmType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmSeverity {
    Critical,
    Warning,
    Informational,
}

impl AlarmSeverity {
    pub const ALL: [AlarmSeverity; 3] = [
        AlarmSeverity::Critical,
        AlarmSeverity::Warning,
        AlarmSeverity::Informational,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmSeverity::Critical => "CRITICAL",
            AlarmSeverity::Warning => "WARNING",
            AlarmSeverity::Informational => "INFORMATIONAL",
        }
    }

    /// Position in priority order; lower sorts first.
    pub fn rank(&self) -> u8 {
        match self {
            AlarmSeverity::Critical => 0,
            AlarmSeverity::Warning => 1,
            AlarmSeverity::Informational => 2,
        }
    }
}

impl FromStr for AlarmSeverity {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CRITICAL" => Ok(AlarmSeverity::Critical),
            "WARNING" => Ok(AlarmSeverity::Warning),
            "INFORMATIONAL" => Ok(AlarmSeverity::Informational),
            other => Err(ValidationError::UnknownVariant {
                field: "severity",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for AlarmSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlarmState {
    Active,
    Acknowledged,
    Cleared,
}

impl AlarmState {
    /// States an operator still has to act on.
    pub const OPEN: [AlarmState; 2] = [AlarmState::Active, AlarmState::Acknowledged];

    pub fn as_str(&self) -> &'static str {
        match self {
            AlarmState::Active => "ACTIVE",
            AlarmState::Acknowledged => "ACKNOWLEDGED",
            AlarmState::Cleared => "CLEARED",
        }
    }

    pub fn rank(&self) -> u8 {
        match self {
            AlarmState::Active => 0,
            AlarmState::Acknowledged => 1,
            AlarmState::Cleared => 2,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, AlarmState::Cleared)
    }
}

impl FromStr for AlarmState {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ACTIVE" => Ok(AlarmState::Active),
            "ACKNOWLEDGED" => Ok(AlarmState::Acknowledged),
            "CLEARED" => Ok(AlarmState::Cleared),
            other => Err(ValidationError::UnknownVariant {
                field: "state",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle events an alarm can receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmEvent {
    Retrigger,
    Acknowledge,
    Clear,
}

/// The alarm state table.
pub fn transition(
    current: AlarmState,
    severity: AlarmSeverity,
    event: AlarmEvent,
) -> Result<AlarmState, StateConflictError> {
    use AlarmEvent::*;
    use AlarmState::*;

    match (current, event) {
        (_, Retrigger) => Ok(Active),
        (Active, Acknowledge) => Ok(Acknowledged),
        (Acknowledged, Acknowledge) => Err(StateConflictError::AlreadyAcknowledged),
        (Cleared, Acknowledge) => Err(StateConflictError::CannotAcknowledgeCleared),
        (Active, Clear) if severity == AlarmSeverity::Critical => {
            Err(StateConflictError::MustAcknowledgeFirst)
        }
        (Active | Acknowledged, Clear) => Ok(Cleared),
        (Cleared, Clear) => Err(StateConflictError::AlreadyCleared),
    }
}

/// Identity an alarm occupies; repeated occurrences reuse the same row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AlarmSlot {
    pub tenant_id: Uuid,
    pub well_id: Uuid,
    pub connection_id: Uuid,
    pub tag_name: String,
    pub alarm_type: AlarmType,
}

impl fmt::Display for AlarmSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}/{}",
            self.tenant_id, self.well_id, self.connection_id, self.tag_name, self.alarm_type
        )
    }
}

/// Sort key: severity first, then state. Lower is more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AlarmPriority {
    pub severity_rank: u8,
    pub state_rank: u8,
}

/// Input for [`Alarm::create`].
#[derive(Debug, Clone)]
pub struct NewAlarm {
    pub slot: AlarmSlot,
    pub severity: AlarmSeverity,
    pub message: String,
    pub value: Option<f64>,
    pub threshold: Option<f64>,
    pub metadata: Option<JsonValue>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Alarm {
    pub(crate) id: Uuid,
    pub(crate) slot: AlarmSlot,
    pub(crate) severity: AlarmSeverity,
    pub(crate) state: AlarmState,
    pub(crate) message: String,
    pub(crate) value: Option<f64>,
    pub(crate) threshold: Option<f64>,
    pub(crate) trigger_count: u32,
    pub(crate) first_triggered_at: DateTime<Utc>,
    pub(crate) last_triggered_at: DateTime<Utc>,
    pub(crate) acknowledged_at: Option<DateTime<Utc>>,
    pub(crate) acknowledged_by: Option<Uuid>,
    pub(crate) cleared_at: Option<DateTime<Utc>>,
    pub(crate) metadata: Option<JsonValue>,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl Alarm {
    /// Opens a new alarm for a slot seen for the first time.
    pub fn create(new: NewAlarm, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        for (field, id) in [
            ("tenant_id", new.slot.tenant_id),
            ("well_id", new.slot.well_id),
            ("connection_id", new.slot.connection_id),
        ] {
            if id.is_nil() {
                return Err(ValidationError::Required { field });
            }
        }
        if new.slot.tag_name.trim().is_empty() {
            return Err(ValidationError::Required { field: "tag_name" });
        }

        let message = new.message.trim();
        let message_len = message.chars().count();
        if message_len == 0 {
            return Err(ValidationError::Required { field: "message" });
        }
        if message_len > MAX_MESSAGE_LENGTH {
            return Err(ValidationError::Length {
                field: "message",
                min: 1,
                max: MAX_MESSAGE_LENGTH,
                actual: message_len,
            });
        }

        Ok(Self {
            id: Uuid::new_v4(),
            slot: new.slot,
            severity: new.severity,
            state: AlarmState::Active,
            message: message.to_string(),
            value: new.value,
            threshold: new.threshold,
            trigger_count: 1,
            first_triggered_at: now,
            last_triggered_at: now,
            acknowledged_at: None,
            acknowledged_by: None,
            cleared_at: None,
            metadata: new.metadata,
            created_at: now,
            updated_at: now,
        })
    }

    /// Records another occurrence of the slot's condition.
    ///
    /// A cleared alarm reopens and loses its `cleared_at`. An acknowledged
    /// alarm reopens but keeps `acknowledged_at`/`acknowledged_by` as history,
    /// so clearing a critical alarm again needs a fresh acknowledgment.
    pub fn retrigger(&mut self, value: Option<f64>, now: DateTime<Utc>) {
        // Retrigger is accepted from every state.
        let next = transition(self.state, self.severity, AlarmEvent::Retrigger)
            .unwrap_or(AlarmState::Active);
        if self.state == AlarmState::Cleared {
            self.cleared_at = None;
        }
        self.state = next;
        self.trigger_count = self.trigger_count.saturating_add(1);
        self.last_triggered_at = now;
        if value.is_some() {
            self.value = value;
        }
        self.updated_at = now;
    }

    pub fn acknowledge(
        &mut self,
        user_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), StateConflictError> {
        self.state = transition(self.state, self.severity, AlarmEvent::Acknowledge)?;
        self.acknowledged_at = Some(now);
        self.acknowledged_by = Some(user_id);
        self.updated_at = now;
        Ok(())
    }

    pub fn clear(&mut self, now: DateTime<Utc>) -> Result<(), StateConflictError> {
        self.state = transition(self.state, self.severity, AlarmEvent::Clear)?;
        self.cleared_at = Some(now);
        self.updated_at = now;
        Ok(())
    }

    pub fn priority(&self) -> AlarmPriority {
        AlarmPriority {
            severity_rank: self.severity.rank(),
            state_rank: self.state.rank(),
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }

    pub fn time_since_last_trigger(&self, now: DateTime<Utc>) -> Duration {
        now - self.last_triggered_at
    }

    pub fn time_to_acknowledgment(&self) -> Option<Duration> {
        self.acknowledged_at
            .map(|acknowledged| acknowledged - self.first_triggered_at)
    }

    /// Open alarms: time since first trigger. Cleared alarms: first trigger to clear.
    pub fn duration(&self, now: DateTime<Utc>) -> Duration {
        match (self.state, self.cleared_at) {
            (AlarmState::Cleared, Some(cleared)) => cleared - self.first_triggered_at,
            _ => now - self.first_triggered_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn slot(&self) -> &AlarmSlot {
        &self.slot
    }

    pub fn tenant_id(&self) -> Uuid {
        self.slot.tenant_id
    }

    pub fn well_id(&self) -> Uuid {
        self.slot.well_id
    }

    pub fn connection_id(&self) -> Uuid {
        self.slot.connection_id
    }

    pub fn tag_name(&self) -> &str {
        &self.slot.tag_name
    }

    pub fn alarm_type(&self) -> AlarmType {
        self.slot.alarm_type
    }

    pub fn severity(&self) -> AlarmSeverity {
        self.severity
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn value(&self) -> Option<f64> {
        self.value
    }

    pub fn threshold(&self) -> Option<f64> {
        self.threshold
    }

    pub fn trigger_count(&self) -> u32 {
        self.trigger_count
    }

    pub fn first_triggered_at(&self) -> DateTime<Utc> {
        self.first_triggered_at
    }

    pub fn last_triggered_at(&self) -> DateTime<Utc> {
        self.last_triggered_at
    }

    pub fn acknowledged_at(&self) -> Option<DateTime<Utc>> {
        self.acknowledged_at
    }

    pub fn acknowledged_by(&self) -> Option<Uuid> {
        self.acknowledged_by
    }

    pub fn cleared_at(&self) -> Option<DateTime<Utc>> {
        self.cleared_at
    }

    pub fn metadata(&self) -> Option<&JsonValue> {
        self.metadata.as_ref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }
}

/// Outcome of merging a fired condition into its slot.
#[derive(Debug, Clone, PartialEq)]
pub enum Occurrence {
    Created(Alarm),
    Retriggered(Alarm),
}

impl Occurrence {
    /// Creates the slot's alarm, or retriggers `existing` with the new value.
    pub fn merge(
        existing: Option<Alarm>,
        fired: &NewAlarm,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        match existing {
            Some(mut alarm) => {
                alarm.retrigger(fired.value, now);
                Ok(Occurrence::Retriggered(alarm))
            }
            None => Alarm::create(fired.clone(), now).map(Occurrence::Created),
        }
    }

    pub fn alarm(&self) -> &Alarm {
        match self {
            Occurrence::Created(alarm) | Occurrence::Retriggered(alarm) => alarm,
        }
    }

    pub fn into_alarm(self) -> Alarm {
        match self {
            Occurrence::Created(alarm) | Occurrence::Retriggered(alarm) => alarm,
        }
    }

    pub fn is_created(&self) -> bool {
        matches!(self, Occurrence::Created(_))
    }
}

/// Orders alarms by priority, breaking ties with the most recent trigger first.
pub fn compare_priority(a: &Alarm, b: &Alarm) -> Ordering {
    a.priority()
        .cmp(&b.priority())
        .then_with(|| b.last_triggered_at.cmp(&a.last_triggered_at))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(alarm_type: AlarmType) -> AlarmSlot {
        AlarmSlot {
            tenant_id: Uuid::new_v4(),
            well_id: Uuid::new_v4(),
            connection_id: Uuid::new_v4(),
            tag_name: "pressure".to_string(),
            alarm_type,
        }
    }

    fn alarm(severity: AlarmSeverity, now: DateTime<Utc>) -> Alarm {
        Alarm::create(
            NewAlarm {
                slot: slot(AlarmType::High),
                severity,
                message: "pressure above limit".to_string(),
                value: Some(175.0),
                threshold: Some(150.0),
                metadata: None,
            },
            now,
        )
        .expect("valid alarm")
    }

    #[test]
    fn transition_table() {
        use AlarmEvent::*;
        use AlarmSeverity::*;
        use AlarmState::*;

        for state in [Active, Acknowledged, Cleared] {
            assert_eq!(transition(state, Critical, Retrigger), Ok(Active));
        }
        assert_eq!(transition(Active, Warning, Acknowledge), Ok(Acknowledged));
        assert_eq!(
            transition(Acknowledged, Warning, Acknowledge),
            Err(StateConflictError::AlreadyAcknowledged)
        );
        assert_eq!(
            transition(Cleared, Warning, Acknowledge),
            Err(StateConflictError::CannotAcknowledgeCleared)
        );
        assert_eq!(transition(Active, Warning, Clear), Ok(Cleared));
        assert_eq!(
            transition(Active, Critical, Clear),
            Err(StateConflictError::MustAcknowledgeFirst)
        );
        assert_eq!(transition(Acknowledged, Critical, Clear), Ok(Cleared));
        assert_eq!(
            transition(Cleared, Informational, Clear),
            Err(StateConflictError::AlreadyCleared)
        );
    }

    #[test]
    fn create_validates_input() {
        let now = Utc::now();
        let base = NewAlarm {
            slot: slot(AlarmType::Low),
            severity: AlarmSeverity::Warning,
            message: "low".into(),
            value: None,
            threshold: None,
            metadata: None,
        };

        let created = Alarm::create(base.clone(), now).unwrap();
        assert_eq!(created.state(), AlarmState::Active);
        assert_eq!(created.trigger_count(), 1);
        assert_eq!(created.first_triggered_at(), created.last_triggered_at());
        assert!(created.acknowledged_at().is_none() && created.cleared_at().is_none());

        let empty = NewAlarm {
            message: "  ".into(),
            ..base.clone()
        };
        assert_eq!(
            Alarm::create(empty, now).unwrap_err(),
            ValidationError::Required { field: "message" }
        );

        let long = NewAlarm {
            message: "x".repeat(501),
            ..base.clone()
        };
        assert!(matches!(
            Alarm::create(long, now).unwrap_err(),
            ValidationError::Length { actual: 501, .. }
        ));

        let mut nil_well = base.clone();
        nil_well.slot.well_id = Uuid::nil();
        assert_eq!(
            Alarm::create(nil_well, now).unwrap_err(),
            ValidationError::Required { field: "well_id" }
        );

        let mut no_tag = base;
        no_tag.slot.tag_name = String::new();
        assert_eq!(
            Alarm::create(no_tag, now).unwrap_err(),
            ValidationError::Required { field: "tag_name" }
        );
    }

    #[test]
    fn trigger_count_grows_by_one_per_retrigger() {
        let now = Utc::now();
        let mut alarm = alarm(AlarmSeverity::Warning, now);
        for n in 1..=5 {
            alarm.retrigger(None, now + Duration::seconds(n));
        }
        assert_eq!(alarm.trigger_count(), 6);
        assert_eq!(alarm.last_triggered_at(), now + Duration::seconds(5));
        assert_eq!(alarm.value(), Some(175.0));
        assert!(alarm.first_triggered_at() <= alarm.last_triggered_at());
    }

    #[test]
    fn retrigger_reopens_cleared_alarm() {
        let now = Utc::now();
        let mut alarm = alarm(AlarmSeverity::Warning, now);
        alarm.clear(now).unwrap();
        assert!(alarm.cleared_at().is_some());

        alarm.retrigger(Some(180.0), now + Duration::seconds(10));
        assert_eq!(alarm.state(), AlarmState::Active);
        assert!(alarm.cleared_at().is_none());
        assert_eq!(alarm.value(), Some(180.0));
    }

    #[test]
    fn retrigger_keeps_acknowledgment_history() {
        let now = Utc::now();
        let operator = Uuid::new_v4();
        let mut alarm = alarm(AlarmSeverity::Critical, now);
        alarm.acknowledge(operator, now).unwrap();

        alarm.retrigger(None, now + Duration::seconds(10));
        assert_eq!(alarm.state(), AlarmState::Active);
        assert_eq!(alarm.acknowledged_by(), Some(operator));
        assert_eq!(alarm.acknowledged_at(), Some(now));

        assert_eq!(
            alarm.clear(now + Duration::seconds(11)),
            Err(StateConflictError::MustAcknowledgeFirst)
        );
    }

    #[test]
    fn critical_alarm_must_be_acknowledged_before_clearing() {
        let now = Utc::now();
        let mut alarm = alarm(AlarmSeverity::Critical, now);

        assert_eq!(alarm.clear(now), Err(StateConflictError::MustAcknowledgeFirst));
        assert_eq!(alarm.state(), AlarmState::Active);

        alarm.acknowledge(Uuid::new_v4(), now).unwrap();
        alarm.clear(now + Duration::seconds(1)).unwrap();
        assert_eq!(alarm.state(), AlarmState::Cleared);

        assert_eq!(alarm.clear(now), Err(StateConflictError::AlreadyCleared));
        assert_eq!(
            alarm.acknowledge(Uuid::new_v4(), now),
            Err(StateConflictError::CannotAcknowledgeCleared)
        );
    }

    #[test]
    fn priority_orders_severity_then_state_then_recency() {
        let now = Utc::now();
        let critical_active = alarm(AlarmSeverity::Critical, now);
        let warning_active = alarm(AlarmSeverity::Warning, now);
        let mut critical_acked = alarm(AlarmSeverity::Critical, now);
        critical_acked.acknowledge(Uuid::new_v4(), now).unwrap();

        let mut sorted = vec![
            warning_active.clone(),
            critical_acked.clone(),
            critical_active.clone(),
        ];
        sorted.sort_by(compare_priority);
        assert_eq!(
            sorted.iter().map(Alarm::id).collect::<Vec<_>>(),
            vec![critical_active.id(), critical_acked.id(), warning_active.id()]
        );

        let older = alarm(AlarmSeverity::Warning, now - Duration::minutes(5));
        let newer = alarm(AlarmSeverity::Warning, now);
        assert_eq!(compare_priority(&newer, &older), Ordering::Less);
    }

    #[test]
    fn merge_creates_then_retriggers() {
        let now = Utc::now();
        let fired = NewAlarm {
            slot: slot(AlarmType::High),
            severity: AlarmSeverity::Warning,
            message: "pressure above limit".into(),
            value: Some(175.0),
            threshold: Some(150.0),
            metadata: None,
        };

        let first = Occurrence::merge(None, &fired, now).unwrap();
        assert!(first.is_created());

        let again = NewAlarm {
            value: Some(180.0),
            ..fired
        };
        let second =
            Occurrence::merge(Some(first.into_alarm()), &again, now + Duration::seconds(5))
                .unwrap();
        assert!(!second.is_created());
        assert_eq!(second.alarm().trigger_count(), 2);
        assert_eq!(second.alarm().value(), Some(180.0));
        assert_eq!(second.alarm().state(), AlarmState::Active);
    }

    #[test]
    fn derived_durations() {
        let start = Utc::now();
        let mut alarm = alarm(AlarmSeverity::Warning, start);
        let now = start + Duration::minutes(10);

        assert_eq!(alarm.age(now), Duration::minutes(10));
        assert_eq!(alarm.time_to_acknowledgment(), None);
        assert_eq!(alarm.duration(now), Duration::minutes(10));

        alarm.retrigger(None, start + Duration::minutes(4));
        assert_eq!(alarm.time_since_last_trigger(now), Duration::minutes(6));

        alarm
            .acknowledge(Uuid::new_v4(), start + Duration::minutes(2))
            .unwrap();
        assert_eq!(alarm.time_to_acknowledgment(), Some(Duration::minutes(2)));

        alarm.clear(start + Duration::minutes(7)).unwrap();
        assert_eq!(alarm.duration(now), Duration::minutes(7));
    }
}
