//! Condition rules evaluated against classified readings.
//!
//! A rule that fires produces a [`NewAlarm`] addressed to its alarm slot. The
//! engine decides whether that creates or retriggers an alarm.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;

use crate::domain::{
    AlarmSeverity, AlarmSlot, AlarmType, MAX_MESSAGE_LENGTH, NewAlarm, Reading, ReadingQuality,
};

/// What a rule checks.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Numeric limit. `HIGH`/`HIGH_HIGH` fire above it, `LOW`/`LOW_LOW` below.
    Threshold { alarm_type: AlarmType, limit: f64 },
    /// Fires on `OUT_OF_RANGE` quality.
    OutOfRange,
    /// Fires on `BAD` quality.
    BadQuality,
    /// Fires when the sample is older than `threshold`.
    Stale { threshold: Duration },
    /// Fires when a boolean tag reads `true`.
    Fault,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionRule {
    /// Tag the rule applies to; `None` applies it to every tag.
    pub tag_name: Option<String>,
    pub severity: AlarmSeverity,
    pub condition: Condition,
}

impl ConditionRule {
    pub fn new(severity: AlarmSeverity, condition: Condition) -> Self {
        Self {
            tag_name: None,
            severity,
            condition,
        }
    }

    pub fn for_tag(mut self, tag_name: impl Into<String>) -> Self {
        self.tag_name = Some(tag_name.into());
        self
    }

    fn applies_to(&self, reading: &Reading) -> bool {
        self.tag_name
            .as_deref()
            .is_none_or(|tag| tag == reading.tag_name())
    }

    /// The alarm this rule raises for `reading`, if it fires.
    pub fn evaluate(&self, reading: &Reading, now: DateTime<Utc>) -> Option<NewAlarm> {
        if !self.applies_to(reading) {
            return None;
        }

        let tag = reading.tag_name();
        let value = reading.numeric_value();

        let (alarm_type, threshold, message) = match &self.condition {
            Condition::Threshold { alarm_type, limit } => {
                let v = value?;
                let fired = match alarm_type {
                    AlarmType::High | AlarmType::HighHigh => v > *limit,
                    AlarmType::Low | AlarmType::LowLow => v < *limit,
                    _ => false,
                };
                if !fired {
                    return None;
                }
                let (v, limit_text) = (compact(v), compact(*limit));
                let direction = match alarm_type {
                    AlarmType::High | AlarmType::HighHigh => "above",
                    _ => "below",
                };
                (
                    *alarm_type,
                    Some(*limit),
                    format!("{tag} {direction} {alarm_type} limit {limit_text} (value {v})"),
                )
            }
            Condition::OutOfRange => {
                if reading.quality() != ReadingQuality::OutOfRange {
                    return None;
                }
                match (value, reading.min_value(), reading.max_value()) {
                    (Some(v), _, Some(max)) if v > max => (
                        AlarmType::High,
                        Some(max),
                        format!("{tag} above range maximum {} (value {})", compact(max), compact(v)),
                    ),
                    (Some(v), Some(min), _) if v < min => (
                        AlarmType::Low,
                        Some(min),
                        format!("{tag} below range minimum {} (value {})", compact(min), compact(v)),
                    ),
                    _ => (
                        AlarmType::Custom,
                        None,
                        format!("{tag} reported out of range by device"),
                    ),
                }
            }
            Condition::BadQuality => {
                if reading.quality() != ReadingQuality::Bad {
                    return None;
                }
                (AlarmType::BadQuality, None, format!("{tag} reported bad quality"))
            }
            Condition::Stale { threshold } => {
                if !reading.is_stale(*threshold, now) {
                    return None;
                }
                let age = now - reading.timestamp();
                (
                    AlarmType::Stale,
                    None,
                    format!("{tag} has not updated for {}s", age.num_seconds()),
                )
            }
            Condition::Fault => {
                if reading.value().as_bool() != Some(true) {
                    return None;
                }
                (AlarmType::Fault, None, format!("{tag} fault active"))
            }
        };

        Some(NewAlarm {
            slot: AlarmSlot {
                tenant_id: reading.tenant_id(),
                well_id: reading.well_id(),
                connection_id: reading.connection_id(),
                tag_name: tag.to_string(),
                alarm_type,
            },
            severity: self.severity,
            message: fit_message(message),
            value,
            threshold,
            metadata: Some(json!({
                "reading_id": reading.id(),
                "quality": reading.quality().as_str(),
                "timestamp": reading.timestamp(),
            })),
        })
    }
}

/// Plain notation for everyday magnitudes, scientific notation otherwise.
fn compact(value: f64) -> String {
    let magnitude = value.abs();
    if magnitude != 0.0 && !(1e-3..1e9).contains(&magnitude) {
        format!("{value:e}")
    } else {
        format!("{value}")
    }
}

/// Cuts `message` to the alarm message limit, marking the cut with an ellipsis.
fn fit_message(message: String) -> String {
    if message.chars().count() <= MAX_MESSAGE_LENGTH {
        return message;
    }
    let mut fitted: String = message.chars().take(MAX_MESSAGE_LENGTH - 1).collect();
    fitted.push('…');
    fitted
}

/// Ordered list of rules. Earlier rules win when two fire for the same slot.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleSet {
    rules: Vec<ConditionRule>,
}

impl RuleSet {
    pub fn new(rules: Vec<ConditionRule>) -> Self {
        Self { rules }
    }

    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn with_rule(mut self, rule: ConditionRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[ConditionRule] {
        &self.rules
    }

    /// Fired conditions for `reading`, at most one per alarm slot.
    pub fn evaluate(&self, reading: &Reading, now: DateTime<Utc>) -> Vec<NewAlarm> {
        let mut seen = HashSet::new();
        self.rules
            .iter()
            .filter_map(|rule| rule.evaluate(reading, now))
            .filter(|fired| seen.insert(fired.slot.alarm_type))
            .collect()
    }
}

impl Default for RuleSet {
    fn default() -> Self {
        Self::new(vec![
            ConditionRule::new(AlarmSeverity::Warning, Condition::OutOfRange),
            ConditionRule::new(AlarmSeverity::Warning, Condition::BadQuality),
        ])
    }
}
