//! # Alarm Engine
//!
//! Turns fired conditions into alarm occurrences and applies operator
//! commands. Writes to one alarm slot are serialized in-process by a keyed
//! async mutex, and the store makes each lookup-and-merge atomic on top of
//! that. Every successful mutation is published on a broadcast channel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use chrono::{DateTime, Utc};
use metrics::counter;
use serde::Serialize;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::conditions::RuleSet;
use crate::config::MonitorConfig;
use crate::domain::{Alarm, AlarmSlot, NewAlarm, Occurrence, Reading};
use crate::error::MonitorError;
use crate::repositories::{AlarmCommand, AlarmStore};

/// Default capacity of the notification channel.
pub const DEFAULT_NOTIFICATION_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    Created,
    Retriggered,
    Acknowledged,
    Cleared,
}

/// A committed alarm change, delivered to subscribers after the store write.
#[derive(Debug, Clone)]
pub struct AlarmNotification {
    pub kind: NotificationKind,
    pub alarm: Alarm,
}

/// Result of evaluating one reading.
#[derive(Debug, Default)]
pub struct Evaluation {
    pub occurrences: Vec<Occurrence>,
    /// Conditions that fired but could not be recorded.
    pub failures: Vec<(AlarmSlot, MonitorError)>,
}

impl Evaluation {
    /// The first failure that came from a collaborator rather than from the
    /// fired condition itself.
    pub fn collaborator_failure(&self) -> Option<&MonitorError> {
        self.failures
            .iter()
            .map(|(_, err)| err)
            .find(|err| err.is_collaborator_failure())
    }
}

/// Serializes work per alarm slot within this process.
#[derive(Debug, Default)]
struct SlotLocks {
    slots: StdMutex<HashMap<AlarmSlot, Arc<Mutex<()>>>>,
}

impl SlotLocks {
    fn acquire(&self, slot: &AlarmSlot) -> Arc<Mutex<()>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(slot.clone()).or_default().clone()
    }

    /// Drops the slot's entry once no task holds or waits on it.
    fn release(&self, slot: &AlarmSlot, lock: Arc<Mutex<()>>) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        drop(lock);
        if slots
            .get(slot)
            .is_some_and(|entry| Arc::strong_count(entry) == 1)
        {
            slots.remove(slot);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

pub struct AlarmEngine {
    store: Arc<dyn AlarmStore>,
    slot_locks: SlotLocks,
    notifier: broadcast::Sender<AlarmNotification>,
}

impl AlarmEngine {
    pub fn new(store: Arc<dyn AlarmStore>) -> Self {
        Self::with_capacity(store, DEFAULT_NOTIFICATION_CAPACITY)
    }

    /// Sizes the notification channel from `monitor_config.notification_channel_capacity`.
    pub fn from_config(store: Arc<dyn AlarmStore>, monitor_config: &MonitorConfig) -> Self {
        Self::with_capacity(store, monitor_config.notification_channel_capacity)
    }

    pub fn with_capacity(store: Arc<dyn AlarmStore>, notification_capacity: usize) -> Self {
        let (notifier, _) = broadcast::channel(notification_capacity.max(1));
        Self {
            store,
            slot_locks: SlotLocks::default(),
            notifier,
        }
    }

    /// Receives every committed alarm change from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<AlarmNotification> {
        self.notifier.subscribe()
    }

    /// Records one occurrence of a fired condition.
    #[instrument(skip_all, fields(slot = %fired.slot, severity = %fired.severity))]
    pub async fn on_condition(&self, fired: NewAlarm) -> Result<Occurrence, MonitorError> {
        self.on_condition_at(fired, Utc::now()).await
    }

    pub(crate) async fn on_condition_at(
        &self,
        fired: NewAlarm,
        now: DateTime<Utc>,
    ) -> Result<Occurrence, MonitorError> {
        let lock = self.slot_locks.acquire(&fired.slot);
        let result = {
            let _guard = lock.lock().await;
            self.store.record_occurrence(&fired, now).await
        };
        self.slot_locks.release(&fired.slot, lock);
        let occurrence = result?;

        let alarm = occurrence.alarm();
        let (kind, metric) = match &occurrence {
            Occurrence::Created(_) => (NotificationKind::Created, "alarms_created_total"),
            Occurrence::Retriggered(_) => {
                (NotificationKind::Retriggered, "alarms_retriggered_total")
            }
        };
        counter!(
            metric,
            "severity" => alarm.severity().as_str(),
            "alarm_type" => alarm.alarm_type().as_str()
        )
        .increment(1);
        if occurrence.is_created() {
            info!(alarm_id = %alarm.id(), "Alarm raised");
        } else {
            debug!(
                alarm_id = %alarm.id(),
                trigger_count = alarm.trigger_count(),
                "Alarm retriggered"
            );
        }

        self.publish(kind, alarm.clone());
        Ok(occurrence)
    }

    /// Runs `rules` against `reading` and records every condition that fires.
    ///
    /// A condition that cannot be recorded does not stop the others; its slot
    /// and error are returned in [`Evaluation::failures`].
    pub async fn evaluate(
        &self,
        reading: &Reading,
        rules: &RuleSet,
        now: DateTime<Utc>,
    ) -> Evaluation {
        let mut evaluation = Evaluation::default();
        for fired in rules.evaluate(reading, now) {
            let slot = fired.slot.clone();
            match self.on_condition_at(fired, now).await {
                Ok(occurrence) => evaluation.occurrences.push(occurrence),
                Err(err) => {
                    counter!("alarm_condition_failures_total", "code" => err.error_code())
                        .increment(1);
                    warn!(slot = %slot, error = %err, "Fired condition not recorded");
                    evaluation.failures.push((slot, err));
                }
            }
        }
        evaluation
    }

    #[instrument(skip(self))]
    pub async fn acknowledge(
        &self,
        tenant_id: Uuid,
        alarm_id: Uuid,
        user_id: Uuid,
    ) -> Result<Alarm, MonitorError> {
        let alarm = self
            .store
            .transition(
                tenant_id,
                alarm_id,
                AlarmCommand::Acknowledge { user_id },
                Utc::now(),
            )
            .await?;
        counter!("alarms_acknowledged_total", "severity" => alarm.severity().as_str()).increment(1);
        info!(alarm_id = %alarm_id, "Alarm acknowledged");
        self.publish(NotificationKind::Acknowledged, alarm.clone());
        Ok(alarm)
    }

    #[instrument(skip(self))]
    pub async fn clear(&self, tenant_id: Uuid, alarm_id: Uuid) -> Result<Alarm, MonitorError> {
        let alarm = self
            .store
            .transition(tenant_id, alarm_id, AlarmCommand::Clear, Utc::now())
            .await?;
        counter!("alarms_cleared_total", "severity" => alarm.severity().as_str()).increment(1);
        info!(alarm_id = %alarm_id, "Alarm cleared");
        self.publish(NotificationKind::Cleared, alarm.clone());
        Ok(alarm)
    }

    fn publish(&self, kind: NotificationKind, alarm: Alarm) {
        // Sending only fails when nobody is subscribed.
        let _ = self.notifier.send(AlarmNotification { kind, alarm });
    }
}
