//! Connection health tracking for well-to-device links.
//!
//! A [`ScadaConnection`] records the outcome of every poll attempt and answers
//! whether the link is currently healthy. It performs no retries; the poller
//! owns retry cadence and this type only records what happened.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{StateConflictError, ValidationError};

/// Staleness threshold used by health queries when the caller has no override.
pub const DEFAULT_STALENESS_THRESHOLD_MS: i64 = 60_000;

pub const MIN_POLL_INTERVAL_SECONDS: u32 = 1;
pub const MAX_POLL_INTERVAL_SECONDS: u32 = 300;
pub const MIN_NAME_LENGTH: usize = 3;
pub const MAX_NAME_LENGTH: usize = 100;

pub fn default_staleness_threshold() -> Duration {
    Duration::milliseconds(DEFAULT_STALENESS_THRESHOLD_MS)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Inactive,
    Connecting,
    Active,
    Error,
}

impl ConnectionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::Inactive => "inactive",
            ConnectionStatus::Connecting => "connecting",
            ConnectionStatus::Active => "active",
            ConnectionStatus::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "inactive" => Ok(ConnectionStatus::Inactive),
            "connecting" => Ok(ConnectionStatus::Connecting),
            "active" => Ok(ConnectionStatus::Active),
            "error" => Ok(ConnectionStatus::Error),
            other => Err(ValidationError::UnknownVariant {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// OPC-UA message security mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SecurityMode {
    #[default]
    None,
    Sign,
    SignAndEncrypt,
}

impl SecurityMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SecurityMode::None => "None",
            SecurityMode::Sign => "Sign",
            SecurityMode::SignAndEncrypt => "SignAndEncrypt",
        }
    }
}

impl FromStr for SecurityMode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "None" => Ok(SecurityMode::None),
            "Sign" => Ok(SecurityMode::Sign),
            "SignAndEncrypt" => Ok(SecurityMode::SignAndEncrypt),
            other => Err(ValidationError::UnknownVariant {
                field: "security_mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Where and how to reach the field device.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub url: String,
    pub security_mode: SecurityMode,
    pub security_policy: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Endpoint {
    /// An unauthenticated endpoint with no message security.
    pub fn insecure(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            security_mode: SecurityMode::None,
            security_policy: "None".to_string(),
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    fn validate(&self) -> Result<(), ValidationError> {
        if self.url.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "endpoint_url",
            });
        }
        url::Url::parse(&self.url).map_err(|err| ValidationError::InvalidEndpoint {
            value: self.url.clone(),
            reason: err.to_string(),
        })?;
        Ok(())
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("url", &self.url)
            .field("security_mode", &self.security_mode)
            .field("security_policy", &self.security_policy)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Input for [`ScadaConnection::create`].
#[derive(Debug, Clone)]
pub struct NewConnection {
    pub tenant_id: Uuid,
    pub well_id: Uuid,
    pub name: String,
    pub endpoint: Endpoint,
    pub poll_interval_seconds: u32,
    pub enabled: bool,
    pub created_by: Uuid,
}

/// Partial configuration change applied by [`ScadaConnection::update`].
#[derive(Debug, Clone, Default)]
pub struct ConnectionUpdate {
    pub name: Option<String>,
    pub endpoint: Option<Endpoint>,
    pub poll_interval_seconds: Option<u32>,
    pub enabled: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScadaConnection {
    pub(crate) id: Uuid,
    pub(crate) tenant_id: Uuid,
    pub(crate) well_id: Uuid,
    pub(crate) name: String,
    pub(crate) endpoint: Endpoint,
    pub(crate) poll_interval_seconds: u32,
    pub(crate) status: ConnectionStatus,
    pub(crate) last_connected_at: Option<DateTime<Utc>>,
    pub(crate) last_error_message: Option<String>,
    pub(crate) is_enabled: bool,
    pub(crate) config_revision: i64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
    pub(crate) created_by: Uuid,
    pub(crate) updated_by: Uuid,
}

impl ScadaConnection {
    /// Validates `new` and returns an inactive connection.
    pub fn create(new: NewConnection, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        require_id("tenant_id", new.tenant_id)?;
        require_id("well_id", new.well_id)?;
        validate_name(&new.name)?;
        validate_poll_interval(new.poll_interval_seconds)?;
        new.endpoint.validate()?;

        Ok(Self {
            id: Uuid::new_v4(),
            tenant_id: new.tenant_id,
            well_id: new.well_id,
            name: new.name.trim().to_string(),
            endpoint: new.endpoint,
            poll_interval_seconds: new.poll_interval_seconds,
            status: ConnectionStatus::Inactive,
            last_connected_at: None,
            last_error_message: None,
            is_enabled: new.enabled,
            config_revision: 1,
            created_at: now,
            updated_at: now,
            created_by: new.created_by,
            updated_by: new.created_by,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn tenant_id(&self) -> Uuid {
        self.tenant_id
    }

    pub fn well_id(&self) -> Uuid {
        self.well_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn poll_interval_seconds(&self) -> u32 {
        self.poll_interval_seconds
    }

    pub fn poll_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(u64::from(self.poll_interval_seconds))
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn last_connected_at(&self) -> Option<DateTime<Utc>> {
        self.last_connected_at
    }

    pub fn last_error_message(&self) -> Option<&str> {
        self.last_error_message.as_deref()
    }

    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    /// Incremented by every operator change (`enable`, `disable`, `update`).
    /// Health marks do not change it.
    pub fn config_revision(&self) -> i64 {
        self.config_revision
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn created_by(&self) -> Uuid {
        self.created_by
    }

    pub fn updated_by(&self) -> Uuid {
        self.updated_by
    }

    pub fn mark_connecting(&mut self, now: DateTime<Utc>) {
        self.status = ConnectionStatus::Connecting;
        self.updated_at = now;
    }

    pub fn mark_connected(&mut self, now: DateTime<Utc>) {
        self.status = ConnectionStatus::Active;
        self.last_connected_at = Some(now);
        self.last_error_message = None;
        self.updated_at = now;
    }

    /// Records a failed attempt. `last_connected_at` keeps the last good poll.
    pub fn mark_error(&mut self, message: impl Into<String>, now: DateTime<Utc>) {
        self.status = ConnectionStatus::Error;
        self.last_error_message = Some(message.into());
        self.updated_at = now;
    }

    pub fn enable(&mut self, actor: Uuid, now: DateTime<Utc>) -> Result<(), StateConflictError> {
        if self.is_enabled {
            return Err(StateConflictError::AlreadyInState { state: "enabled" });
        }
        self.is_enabled = true;
        self.touch(actor, now);
        Ok(())
    }

    /// Disables polling and forces the status back to inactive.
    pub fn disable(&mut self, actor: Uuid, now: DateTime<Utc>) -> Result<(), StateConflictError> {
        if !self.is_enabled {
            return Err(StateConflictError::AlreadyInState { state: "disabled" });
        }
        self.is_enabled = false;
        self.status = ConnectionStatus::Inactive;
        self.touch(actor, now);
        Ok(())
    }

    /// True when enabled, active, and last connected less than `threshold` ago.
    pub fn is_healthy(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        if !self.is_enabled || self.status != ConnectionStatus::Active {
            return false;
        }
        match self.last_connected_at {
            Some(last) => now - last < threshold,
            None => false,
        }
    }

    /// Applies a partial change. Nothing is mutated unless every field validates.
    ///
    /// A changed endpoint invalidates prior connection evidence: the status
    /// returns to inactive and `last_connected_at`/`last_error_message` are
    /// cleared.
    pub fn update(
        &mut self,
        change: ConnectionUpdate,
        actor: Uuid,
        now: DateTime<Utc>,
    ) -> Result<(), ValidationError> {
        if let Some(name) = &change.name {
            validate_name(name)?;
        }
        if let Some(interval) = change.poll_interval_seconds {
            validate_poll_interval(interval)?;
        }
        if let Some(endpoint) = &change.endpoint {
            endpoint.validate()?;
        }

        if let Some(name) = change.name {
            self.name = name.trim().to_string();
        }
        if let Some(interval) = change.poll_interval_seconds {
            self.poll_interval_seconds = interval;
        }
        if let Some(enabled) = change.enabled {
            self.is_enabled = enabled;
        }
        if let Some(endpoint) = change.endpoint
            && endpoint != self.endpoint
        {
            self.endpoint = endpoint;
            self.status = ConnectionStatus::Inactive;
            self.last_connected_at = None;
            self.last_error_message = None;
        }

        self.touch(actor, now);
        Ok(())
    }

    fn touch(&mut self, actor: Uuid, now: DateTime<Utc>) {
        self.updated_by = actor;
        self.updated_at = now;
        self.config_revision += 1;
    }
}

fn require_id(field: &'static str, id: Uuid) -> Result<(), ValidationError> {
    if id.is_nil() {
        return Err(ValidationError::Required { field });
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), ValidationError> {
    let actual = name.trim().chars().count();
    if !(MIN_NAME_LENGTH..=MAX_NAME_LENGTH).contains(&actual) {
        return Err(ValidationError::Length {
            field: "name",
            min: MIN_NAME_LENGTH,
            max: MAX_NAME_LENGTH,
            actual,
        });
    }
    Ok(())
}

fn validate_poll_interval(seconds: u32) -> Result<(), ValidationError> {
    if !(MIN_POLL_INTERVAL_SECONDS..=MAX_POLL_INTERVAL_SECONDS).contains(&seconds) {
        return Err(ValidationError::OutOfBounds {
            field: "poll_interval_seconds",
            min: i64::from(MIN_POLL_INTERVAL_SECONDS),
            max: i64::from(MAX_POLL_INTERVAL_SECONDS),
            actual: i64::from(seconds),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_connection() -> NewConnection {
        NewConnection {
            tenant_id: Uuid::new_v4(),
            well_id: Uuid::new_v4(),
            name: "Pad 7 RTU".to_string(),
            endpoint: Endpoint::insecure("opc.tcp://10.0.0.7:4840"),
            poll_interval_seconds: 5,
            enabled: true,
            created_by: Uuid::new_v4(),
        }
    }

    fn connected_at(at: DateTime<Utc>) -> ScadaConnection {
        let mut conn = ScadaConnection::create(new_connection(), at).expect("valid connection");
        conn.mark_connecting(at);
        conn.mark_connected(at);
        conn
    }

    #[test]
    fn create_starts_inactive_and_validates_bounds() {
        let now = Utc::now();
        let conn = ScadaConnection::create(new_connection(), now).unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Inactive);
        assert!(conn.last_connected_at().is_none());

        for interval in [0, 301] {
            let err = ScadaConnection::create(
                NewConnection {
                    poll_interval_seconds: interval,
                    ..new_connection()
                },
                now,
            )
            .unwrap_err();
            assert!(matches!(err, ValidationError::OutOfBounds { .. }));
        }

        let err = ScadaConnection::create(
            NewConnection {
                name: "ab".into(),
                ..new_connection()
            },
            now,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::Length { actual: 2, .. }));

        let err = ScadaConnection::create(
            NewConnection {
                endpoint: Endpoint::insecure("not a url"),
                ..new_connection()
            },
            now,
        )
        .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidEndpoint { .. }));
    }

    #[test]
    fn operator_changes_bump_revision_and_health_marks_do_not() {
        let now = Utc::now();
        let mut conn = connected_at(now);
        assert_eq!(conn.config_revision(), 1);

        conn.mark_error("read timeout", now);
        assert_eq!(conn.config_revision(), 1);

        conn.disable(Uuid::new_v4(), now).unwrap();
        conn.enable(Uuid::new_v4(), now).unwrap();
        conn.update(ConnectionUpdate::default(), Uuid::new_v4(), now)
            .unwrap();
        assert_eq!(conn.config_revision(), 4);
    }

    #[test]
    fn health_respects_staleness_threshold() {
        let now = Utc::now();
        let threshold = default_staleness_threshold();

        let fresh = connected_at(now - Duration::seconds(59));
        assert!(fresh.is_healthy(threshold, now));

        let stale = connected_at(now - Duration::seconds(61));
        assert!(!stale.is_healthy(threshold, now));

        let boundary = connected_at(now - Duration::seconds(60));
        assert!(!boundary.is_healthy(threshold, now));
    }

    #[test]
    fn health_requires_enabled_active_and_a_connection() {
        let now = Utc::now();
        let threshold = default_staleness_threshold();

        let never = ScadaConnection::create(new_connection(), now).unwrap();
        assert!(!never.is_healthy(threshold, now));

        let mut errored = connected_at(now);
        errored.mark_error("read timeout", now);
        assert!(!errored.is_healthy(threshold, now));
        assert_eq!(errored.last_connected_at(), Some(now));
        assert_eq!(errored.last_error_message(), Some("read timeout"));

        let mut disabled = connected_at(now);
        disabled.disable(Uuid::new_v4(), now).unwrap();
        assert!(!disabled.is_healthy(threshold, now));
    }

    #[test]
    fn mark_connected_clears_previous_error() {
        let now = Utc::now();
        let mut conn = ScadaConnection::create(new_connection(), now).unwrap();
        conn.mark_error("refused", now);
        conn.mark_connected(now + Duration::seconds(5));

        assert_eq!(conn.status(), ConnectionStatus::Active);
        assert!(conn.last_error_message().is_none());
        assert_eq!(conn.last_connected_at(), Some(now + Duration::seconds(5)));
    }

    #[test]
    fn enable_and_disable_are_guarded() {
        let now = Utc::now();
        let actor = Uuid::new_v4();
        let mut conn = connected_at(now);

        assert_eq!(
            conn.enable(actor, now),
            Err(StateConflictError::AlreadyInState { state: "enabled" })
        );

        conn.disable(actor, now).unwrap();
        assert_eq!(conn.status(), ConnectionStatus::Inactive);
        assert_eq!(conn.updated_by(), actor);
        assert_eq!(
            conn.disable(actor, now),
            Err(StateConflictError::AlreadyInState { state: "disabled" })
        );

        conn.enable(actor, now).unwrap();
        assert!(conn.is_enabled());
    }

    #[test]
    fn endpoint_change_resets_connection_evidence() {
        let now = Utc::now();
        let mut conn = connected_at(now);
        conn.mark_error("stale session", now);

        conn.update(
            ConnectionUpdate {
                endpoint: Some(Endpoint::insecure("opc.tcp://10.0.0.8:4840")),
                ..Default::default()
            },
            Uuid::new_v4(),
            now,
        )
        .unwrap();

        assert_eq!(conn.status(), ConnectionStatus::Inactive);
        assert!(conn.last_connected_at().is_none());
        assert!(conn.last_error_message().is_none());
        assert_eq!(conn.endpoint().url, "opc.tcp://10.0.0.8:4840");
    }

    #[test]
    fn non_endpoint_update_keeps_status() {
        let now = Utc::now();
        let mut conn = connected_at(now);

        conn.update(
            ConnectionUpdate {
                name: Some("Pad 7 RTU (north)".into()),
                poll_interval_seconds: Some(30),
                enabled: Some(false),
                ..Default::default()
            },
            Uuid::new_v4(),
            now,
        )
        .unwrap();

        assert_eq!(conn.status(), ConnectionStatus::Active);
        assert_eq!(conn.poll_interval_seconds(), 30);
        assert_eq!(conn.name(), "Pad 7 RTU (north)");
        assert!(!conn.is_enabled());
        assert_eq!(conn.last_connected_at(), Some(now));
    }

    #[test]
    fn invalid_update_is_not_partially_applied() {
        let now = Utc::now();
        let mut conn = connected_at(now);
        let before = conn.clone();

        let err = conn
            .update(
                ConnectionUpdate {
                    name: Some("Renamed RTU".into()),
                    poll_interval_seconds: Some(0),
                    ..Default::default()
                },
                Uuid::new_v4(),
                now + Duration::seconds(1),
            )
            .unwrap_err();

        assert!(matches!(err, ValidationError::OutOfBounds { .. }));
        assert_eq!(conn, before);
    }

    #[test]
    fn endpoint_debug_redacts_password() {
        let endpoint = Endpoint::insecure("opc.tcp://rtu:4840").with_credentials("op", "s3cret");
        let rendered = format!("{endpoint:?}");
        assert!(!rendered.contains("s3cret"));
        assert!(rendered.contains("[REDACTED]"));
    }
}
