mod test_utils;

use std::sync::Arc;

use chrono::{Duration, Utc};
use fieldwatch::conditions::{Condition, ConditionRule, RuleSet};
use fieldwatch::domain::{
    AlarmSeverity, AlarmSlot, AlarmState, AlarmType, NewAlarm, RawReading, ReadingQuality,
    classify,
};
use fieldwatch::config::MonitorConfig;
use fieldwatch::engine::{AlarmEngine, NotificationKind};
use fieldwatch::error::{MonitorError, StateConflictError};
use fieldwatch::repositories::{AlarmFilter, AlarmStore};
use uuid::Uuid;

use test_utils::{FlakyAlarmStore, setup_stores};

fn fired(slot: &AlarmSlot, severity: AlarmSeverity, value: f64) -> NewAlarm {
    NewAlarm {
        slot: slot.clone(),
        severity,
        message: format!("{} tripped", slot.tag_name),
        value: Some(value),
        threshold: Some(150.0),
        metadata: None,
    }
}

fn slot(tenant_id: Uuid, tag: &str, alarm_type: AlarmType) -> AlarmSlot {
    AlarmSlot {
        tenant_id,
        well_id: Uuid::new_v4(),
        connection_id: Uuid::new_v4(),
        tag_name: tag.to_string(),
        alarm_type,
    }
}

#[tokio::test]
async fn out_of_range_reading_raises_then_retriggers_one_alarm() {
    let stores = setup_stores().await.unwrap();
    let engine = AlarmEngine::new(stores.alarms.clone());
    let rules = RuleSet::default();
    let (tenant_id, well_id, connection_id) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let now = Utc::now();

    let first = classify(
        RawReading::new(tenant_id, well_id, connection_id, "pressure", 175.0).with_range(0.0, 150.0),
        now,
    )
    .unwrap();
    assert_eq!(first.quality(), ReadingQuality::OutOfRange);

    let evaluation = engine.evaluate(&first, &rules, now).await;
    assert!(evaluation.failures.is_empty());
    let occurrences = evaluation.occurrences;
    assert_eq!(occurrences.len(), 1);
    assert!(occurrences[0].is_created());
    let created = occurrences[0].alarm().clone();
    assert_eq!(created.severity(), AlarmSeverity::Warning);
    assert_eq!(created.trigger_count(), 1);
    assert_eq!(created.state(), AlarmState::Active);

    let later = now + Duration::seconds(5);
    let second = classify(
        RawReading::new(tenant_id, well_id, connection_id, "pressure", 180.0).with_range(0.0, 150.0),
        later,
    )
    .unwrap();
    let occurrences = engine.evaluate(&second, &rules, later).await.occurrences;
    assert_eq!(occurrences.len(), 1);
    assert!(!occurrences[0].is_created());

    let stored = stores
        .alarms
        .find_by_id(tenant_id, created.id())
        .await
        .unwrap()
        .expect("alarm persisted");
    assert_eq!(stored.trigger_count(), 2);
    assert_eq!(stored.value(), Some(180.0));
    assert_eq!(stored.state(), AlarmState::Active);
    assert_eq!(stored.first_triggered_at(), now);
    assert_eq!(stored.last_triggered_at(), later);

    assert_eq!(
        stores
            .alarms
            .find_active(&AlarmFilter::for_tenant(tenant_id))
            .await
            .unwrap()
            .len(),
        1
    );
}

#[tokio::test]
async fn failing_condition_does_not_drop_the_others() {
    let stores = setup_stores().await.unwrap();
    let engine = AlarmEngine::new(Arc::new(FlakyAlarmStore::new(
        stores.alarms.clone(),
        AlarmType::HighHigh,
    )));
    let rules = RuleSet::default().with_rule(ConditionRule::new(
        AlarmSeverity::Critical,
        Condition::Threshold {
            alarm_type: AlarmType::HighHigh,
            limit: 170.0,
        },
    ));
    let tenant_id = Uuid::new_v4();
    let now = Utc::now();
    let reading = classify(
        RawReading::new(tenant_id, Uuid::new_v4(), Uuid::new_v4(), "pressure", 175.0)
            .with_range(0.0, 150.0),
        now,
    )
    .unwrap();

    let evaluation = engine.evaluate(&reading, &rules, now).await;
    assert_eq!(evaluation.occurrences.len(), 1);
    assert_eq!(
        evaluation.occurrences[0].alarm().alarm_type(),
        AlarmType::High
    );
    assert_eq!(evaluation.failures.len(), 1);
    assert_eq!(evaluation.failures[0].0.alarm_type, AlarmType::HighHigh);
    assert!(matches!(
        evaluation.collaborator_failure(),
        Some(MonitorError::Store(_))
    ));

    assert_eq!(
        stores
            .alarms
            .count_active_for_well(tenant_id, reading.well_id())
            .await
            .unwrap(),
        1
    );
}

#[tokio::test]
async fn notification_capacity_comes_from_config() {
    let stores = setup_stores().await.unwrap();
    let config = MonitorConfig {
        notification_channel_capacity: 2,
        ..MonitorConfig::default()
    };
    let engine = AlarmEngine::from_config(stores.alarms.clone(), &config);
    let mut notifications = engine.subscribe();
    let tenant_id = Uuid::new_v4();

    for tag in ["p1", "p2", "p3"] {
        engine
            .on_condition(fired(&slot(tenant_id, tag, AlarmType::High), AlarmSeverity::Warning, 160.0))
            .await
            .unwrap();
    }

    // The oldest of three notifications fell out of a two-slot channel.
    assert!(matches!(
        notifications.recv().await,
        Err(tokio::sync::broadcast::error::RecvError::Lagged(1))
    ));
    assert_eq!(notifications.recv().await.unwrap().alarm.tag_name(), "p2");
}

#[tokio::test]
async fn in_range_reading_raises_nothing() {
    let stores = setup_stores().await.unwrap();
    let engine = AlarmEngine::new(stores.alarms.clone());
    let tenant_id = Uuid::new_v4();
    let reading = classify(
        RawReading::new(tenant_id, Uuid::new_v4(), Uuid::new_v4(), "pressure", 120.0)
            .with_range(0.0, 150.0),
        Utc::now(),
    )
    .unwrap();

    let evaluation = engine
        .evaluate(&reading, &RuleSet::default(), Utc::now())
        .await;
    assert!(evaluation.occurrences.is_empty());
    assert!(evaluation.failures.is_empty());
    assert_eq!(
        stores
            .alarms
            .count_active_for_well(tenant_id, reading.well_id())
            .await
            .unwrap(),
        0
    );
}

#[tokio::test]
async fn critical_alarm_must_be_acknowledged_before_clear() {
    let stores = setup_stores().await.unwrap();
    let engine = AlarmEngine::new(stores.alarms.clone());
    let tenant_id = Uuid::new_v4();
    let slot = slot(tenant_id, "casing_pressure", AlarmType::HighHigh);

    let alarm = engine
        .on_condition(fired(&slot, AlarmSeverity::Critical, 210.0))
        .await
        .unwrap()
        .into_alarm();

    let err = engine.clear(tenant_id, alarm.id()).await.unwrap_err();
    assert!(matches!(
        err,
        MonitorError::Conflict(StateConflictError::MustAcknowledgeFirst)
    ));
    assert_eq!(err.error_code(), "MUST_ACKNOWLEDGE_FIRST");
    let unchanged = stores
        .alarms
        .find_by_id(tenant_id, alarm.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(unchanged.state(), AlarmState::Active);

    let operator = Uuid::new_v4();
    let acknowledged = engine
        .acknowledge(tenant_id, alarm.id(), operator)
        .await
        .unwrap();
    assert_eq!(acknowledged.state(), AlarmState::Acknowledged);
    assert_eq!(acknowledged.acknowledged_by(), Some(operator));

    let err = engine
        .acknowledge(tenant_id, alarm.id(), operator)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        MonitorError::Conflict(StateConflictError::AlreadyAcknowledged)
    ));

    let cleared = engine.clear(tenant_id, alarm.id()).await.unwrap();
    assert_eq!(cleared.state(), AlarmState::Cleared);
    assert!(cleared.cleared_at().is_some());
    assert!(
        stores
            .alarms
            .find_existing_alarm(&slot)
            .await
            .unwrap()
            .is_none()
    );

    let err = engine.clear(tenant_id, alarm.id()).await.unwrap_err();
    assert!(matches!(
        err,
        MonitorError::Conflict(StateConflictError::AlreadyCleared)
    ));
}

#[tokio::test]
async fn retrigger_after_acknowledgment_keeps_history() {
    let stores = setup_stores().await.unwrap();
    let engine = AlarmEngine::new(stores.alarms.clone());
    let tenant_id = Uuid::new_v4();
    let slot = slot(tenant_id, "flow_rate", AlarmType::Low);
    let operator = Uuid::new_v4();

    let alarm = engine
        .on_condition(fired(&slot, AlarmSeverity::Critical, 2.0))
        .await
        .unwrap()
        .into_alarm();
    engine
        .acknowledge(tenant_id, alarm.id(), operator)
        .await
        .unwrap();

    let retriggered = engine
        .on_condition(fired(&slot, AlarmSeverity::Critical, 1.5))
        .await
        .unwrap();
    assert!(!retriggered.is_created());
    let alarm = retriggered.into_alarm();
    assert_eq!(alarm.state(), AlarmState::Active);
    assert_eq!(alarm.acknowledged_by(), Some(operator));
    assert_eq!(alarm.trigger_count(), 2);

    let err = engine.clear(tenant_id, alarm.id()).await.unwrap_err();
    assert!(matches!(
        err,
        MonitorError::Conflict(StateConflictError::MustAcknowledgeFirst)
    ));
}

#[tokio::test]
async fn cleared_alarm_is_reopened_in_place() {
    let stores = setup_stores().await.unwrap();
    let engine = AlarmEngine::new(stores.alarms.clone());
    let tenant_id = Uuid::new_v4();
    let slot = slot(tenant_id, "tank_level", AlarmType::High);

    let first = engine
        .on_condition(fired(&slot, AlarmSeverity::Warning, 9.1))
        .await
        .unwrap()
        .into_alarm();
    engine.clear(tenant_id, first.id()).await.unwrap();

    let reopened = engine
        .on_condition(fired(&slot, AlarmSeverity::Warning, 9.4))
        .await
        .unwrap()
        .into_alarm();
    assert_eq!(reopened.id(), first.id());
    assert_eq!(reopened.state(), AlarmState::Active);
    assert_eq!(reopened.trigger_count(), 2);
    assert!(reopened.cleared_at().is_none());
}

#[tokio::test]
async fn concurrent_occurrences_for_one_slot_are_all_counted() {
    let stores = setup_stores().await.unwrap();
    let engine = Arc::new(AlarmEngine::new(stores.alarms.clone()));
    let tenant_id = Uuid::new_v4();
    let slot = slot(tenant_id, "pressure", AlarmType::High);

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let engine = engine.clone();
            let fired = fired(&slot, AlarmSeverity::Warning, 160.0 + i as f64);
            tokio::spawn(async move { engine.on_condition(fired).await })
        })
        .collect();

    let mut created = 0;
    for task in tasks {
        if task.await.unwrap().unwrap().is_created() {
            created += 1;
        }
    }
    assert_eq!(created, 1);

    let alarm = stores
        .alarms
        .find_existing_alarm(&slot)
        .await
        .unwrap()
        .expect("slot has an alarm");
    assert_eq!(alarm.trigger_count(), 10);
    assert_eq!(
        stores.alarms.count_active_for_well(tenant_id, slot.well_id).await.unwrap(),
        1
    );
}

#[tokio::test]
async fn separate_engines_share_one_slot_row() {
    let stores = setup_stores().await.unwrap();
    let tenant_id = Uuid::new_v4();
    let slot = slot(tenant_id, "pressure", AlarmType::High);

    // Two engines model two processes: only the store serializes them.
    let a = AlarmEngine::new(stores.alarms.clone());
    let b = AlarmEngine::new(stores.alarms.clone());
    let (first, second) = tokio::join!(
        a.on_condition(fired(&slot, AlarmSeverity::Warning, 151.0)),
        b.on_condition(fired(&slot, AlarmSeverity::Warning, 152.0)),
    );
    let first = first.unwrap();
    let second = second.unwrap();
    assert_ne!(first.is_created(), second.is_created());
    assert_eq!(first.alarm().id(), second.alarm().id());

    let stored = stores
        .alarms
        .find_existing_alarm(&slot)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.trigger_count(), 2);
}

#[tokio::test]
async fn active_alarms_come_back_in_priority_order() {
    let stores = setup_stores().await.unwrap();
    let engine = AlarmEngine::new(stores.alarms.clone());
    let tenant_id = Uuid::new_v4();

    let warning = engine
        .on_condition(fired(&slot(tenant_id, "a", AlarmType::High), AlarmSeverity::Warning, 1.0))
        .await
        .unwrap()
        .into_alarm();
    let critical_acked = engine
        .on_condition(fired(&slot(tenant_id, "b", AlarmType::High), AlarmSeverity::Critical, 1.0))
        .await
        .unwrap()
        .into_alarm();
    engine
        .acknowledge(tenant_id, critical_acked.id(), Uuid::new_v4())
        .await
        .unwrap();
    let critical = engine
        .on_condition(fired(&slot(tenant_id, "c", AlarmType::High), AlarmSeverity::Critical, 1.0))
        .await
        .unwrap()
        .into_alarm();
    let info = engine
        .on_condition(fired(
            &slot(tenant_id, "d", AlarmType::Stale),
            AlarmSeverity::Informational,
            1.0,
        ))
        .await
        .unwrap()
        .into_alarm();
    engine.clear(tenant_id, info.id()).await.unwrap();

    let active = stores
        .alarms
        .find_active(&AlarmFilter::for_tenant(tenant_id))
        .await
        .unwrap();
    let ids: Vec<Uuid> = active.iter().map(|alarm| alarm.id()).collect();
    assert_eq!(ids, vec![critical.id(), critical_acked.id(), warning.id()]);

    let limited = stores
        .alarms
        .find_active(&AlarmFilter {
            limit: Some(1),
            offset: 1,
            ..AlarmFilter::for_tenant(tenant_id)
        })
        .await
        .unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id(), critical_acked.id());

    let tail = stores
        .alarms
        .find_active(&AlarmFilter {
            offset: 2,
            ..AlarmFilter::for_tenant(tenant_id)
        })
        .await
        .unwrap();
    let tail_ids: Vec<Uuid> = tail.iter().map(|alarm| alarm.id()).collect();
    assert_eq!(tail_ids, vec![warning.id()]);

    let only_warnings = stores
        .alarms
        .find_active(&AlarmFilter {
            severity: Some(AlarmSeverity::Warning),
            ..AlarmFilter::for_tenant(tenant_id)
        })
        .await
        .unwrap();
    assert_eq!(only_warnings.len(), 1);

    let counts = stores
        .alarms
        .count_active_by_severity(tenant_id)
        .await
        .unwrap();
    assert_eq!(
        counts,
        vec![
            (AlarmSeverity::Critical, 2),
            (AlarmSeverity::Warning, 1),
            (AlarmSeverity::Informational, 0),
        ]
    );

    let cleared = stores
        .alarms
        .find_by_state(tenant_id, AlarmState::Cleared)
        .await
        .unwrap();
    assert_eq!(cleared.len(), 1);
    assert_eq!(cleared[0].id(), info.id());
}

#[tokio::test]
async fn commands_on_other_tenants_alarm_are_not_found() {
    let stores = setup_stores().await.unwrap();
    let engine = AlarmEngine::new(stores.alarms.clone());
    let tenant_id = Uuid::new_v4();
    let alarm = engine
        .on_condition(fired(&slot(tenant_id, "a", AlarmType::High), AlarmSeverity::Warning, 1.0))
        .await
        .unwrap()
        .into_alarm();

    let err = engine
        .acknowledge(Uuid::new_v4(), alarm.id(), Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, MonitorError::NotFound { entity: "alarm", .. }));

    let err = stores
        .alarms
        .delete(Uuid::new_v4(), alarm.id())
        .await
        .unwrap_err();
    assert!(matches!(err, MonitorError::NotFound { .. }));
    stores.alarms.delete(tenant_id, alarm.id()).await.unwrap();
    assert!(
        stores
            .alarms
            .find_by_id(tenant_id, alarm.id())
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
async fn save_upserts_full_record() {
    let stores = setup_stores().await.unwrap();
    let engine = AlarmEngine::new(stores.alarms.clone());
    let tenant_id = Uuid::new_v4();
    let mut alarm = engine
        .on_condition(fired(&slot(tenant_id, "a", AlarmType::High), AlarmSeverity::Warning, 1.0))
        .await
        .unwrap()
        .into_alarm();

    alarm.retrigger(Some(3.0), Utc::now());
    stores.alarms.save(&alarm).await.unwrap();

    let stored = stores
        .alarms
        .find_by_id(tenant_id, alarm.id())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored.trigger_count(), 2);
    assert_eq!(stored.value(), Some(3.0));
}

#[tokio::test]
async fn subscribers_see_every_committed_change() {
    let stores = setup_stores().await.unwrap();
    let engine = AlarmEngine::new(stores.alarms.clone());
    let mut events = engine.subscribe();
    let tenant_id = Uuid::new_v4();
    let slot = slot(tenant_id, "pressure", AlarmType::High);

    let alarm = engine
        .on_condition(fired(&slot, AlarmSeverity::Warning, 160.0))
        .await
        .unwrap()
        .into_alarm();
    engine
        .on_condition(fired(&slot, AlarmSeverity::Warning, 170.0))
        .await
        .unwrap();
    engine
        .acknowledge(tenant_id, alarm.id(), Uuid::new_v4())
        .await
        .unwrap();
    engine.clear(tenant_id, alarm.id()).await.unwrap();
    // Rejected commands publish nothing.
    assert!(engine.clear(tenant_id, alarm.id()).await.is_err());

    let mut kinds = Vec::new();
    while let Ok(notification) = events.try_recv() {
        assert_eq!(notification.alarm.id(), alarm.id());
        kinds.push(notification.kind);
    }
    assert_eq!(
        kinds,
        vec![
            NotificationKind::Created,
            NotificationKind::Retriggered,
            NotificationKind::Acknowledged,
            NotificationKind::Cleared,
        ]
    );
}
