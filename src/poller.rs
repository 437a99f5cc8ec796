//! # Connection Poller
//!
//! One [`ConnectionPoller`] loop per enabled connection reads tag samples from
//! a [`TagSource`], classifies and persists them, feeds them to the alarm
//! engine and records connection health. Polls of one connection never
//! overlap. [`PollSupervisor`] keeps the set of loops in line with the
//! connection store.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use metrics::{counter, gauge, histogram};
use rand::Rng;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::conditions::RuleSet;
use crate::config::MonitorConfig;
use crate::domain::{
    ConnectionStatus, Endpoint, RawReading, Reading, ReadingQuality, ReadingValue,
    ScadaConnection, classify,
};
use crate::engine::AlarmEngine;
use crate::error::MonitorError;
use crate::health::PollHealth;
use crate::repositories::{ConnectionStore, ReadingStore};
use crate::validation::DataValidator;

/// One value read from the device.
#[derive(Debug, Clone, PartialEq)]
pub struct TagSample {
    pub tag_name: String,
    pub value: ReadingValue,
    /// Device timestamp, if the device reports one.
    pub timestamp: Option<DateTime<Utc>>,
    /// Device-reported quality, if any.
    pub quality: Option<ReadingQuality>,
    pub unit: Option<String>,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
}

impl TagSample {
    pub fn new(tag_name: impl Into<String>, value: impl Into<ReadingValue>) -> Self {
        Self {
            tag_name: tag_name.into(),
            value: value.into(),
            timestamp: None,
            quality: None,
            unit: None,
            min_value: None,
            max_value: None,
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

    fn into_raw(self, connection: &ScadaConnection) -> RawReading {
        RawReading {
            tenant_id: connection.tenant_id(),
            well_id: connection.well_id(),
            connection_id: connection.id(),
            tag_name: self.tag_name,
            value: self.value,
            timestamp: self.timestamp,
            quality: self.quality,
            unit: self.unit,
            min_value: self.min_value,
            max_value: self.max_value,
            metadata: None,
        }
    }
}

/// Failure reading from a device, categorized for health reporting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("connection failed: {0}")]
    ConnectionFailed(String),
    #[error("not connected: {0}")]
    NotConnected(String),
    #[error("authentication failed: {0}")]
    Authentication(String),
    #[error("read timed out after {0:?}")]
    Timeout(StdDuration),
    #[error("read failed: {0}")]
    ReadFailed(String),
}

impl SourceError {
    pub fn category(&self) -> &'static str {
        match self {
            SourceError::ConnectionFailed(_) => "connection_failed",
            SourceError::NotConnected(_) => "not_connected",
            SourceError::Authentication(_) => "authentication",
            SourceError::Timeout(_) => "timeout",
            SourceError::ReadFailed(_) => "read_failed",
        }
    }

    /// Whether the next scheduled poll can reasonably succeed without an
    /// operator changing the endpoint.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SourceError::Authentication(_))
    }
}

/// Reads current tag values from a field device.
#[async_trait]
pub trait TagSource: Send + Sync {
    async fn read_tags(&self, connection: &ScadaConnection) -> Result<Vec<TagSample>, SourceError>;
}

/// Result of a single poll.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    Polled {
        readings: u64,
        rejected: usize,
        alarms: usize,
        /// Fired conditions that could not be recorded.
        failed: usize,
    },
    /// The source failed; the connection was marked as errored.
    Failed(SourceError),
    /// The connection was disabled or reconfigured while the poll ran; its
    /// results were discarded.
    Superseded,
    /// The connection was deleted or disabled; the loop should end.
    Stopped,
}

/// Collaborators shared by every poll loop.
#[derive(Clone)]
pub struct PollerDeps {
    pub connections: Arc<dyn ConnectionStore>,
    pub readings: Arc<dyn ReadingStore>,
    pub engine: Arc<AlarmEngine>,
    pub source: Arc<dyn TagSource>,
    pub rules: Arc<RuleSet>,
    pub config: MonitorConfig,
}

pub struct ConnectionPoller {
    deps: PollerDeps,
    tenant_id: Uuid,
    connection_id: Uuid,
    interval: StdDuration,
    validator: DataValidator,
}

impl ConnectionPoller {
    pub fn new(deps: PollerDeps, connection: &ScadaConnection) -> Self {
        let validator = DataValidator::new(deps.config.anomaly_settings());
        Self {
            deps,
            tenant_id: connection.tenant_id(),
            connection_id: connection.id(),
            interval: connection.poll_interval(),
            validator,
        }
    }

    /// Persists the connection's health. `false` means an operator changed
    /// the connection since it was loaded and the write was dropped.
    async fn save_status(&self, connection: &ScadaConnection) -> Result<bool, MonitorError> {
        let written = self.deps.connections.update_status(connection).await?;
        if !written {
            info!("Connection changed during poll; discarding results");
            counter!("polls_superseded_total").increment(1);
        }
        Ok(written)
    }

    /// Polls the connection once.
    #[instrument(skip(self), fields(connection_id = %self.connection_id))]
    pub async fn poll_once(&self) -> Result<PollOutcome, MonitorError> {
        let Some(mut connection) = self
            .deps
            .connections
            .find_by_id(self.tenant_id, self.connection_id)
            .await?
        else {
            info!("Connection no longer exists; stopping poll loop");
            return Ok(PollOutcome::Stopped);
        };
        if !connection.is_enabled() {
            info!("Connection disabled; stopping poll loop");
            return Ok(PollOutcome::Stopped);
        }

        if connection.status() != ConnectionStatus::Active {
            connection.mark_connecting(Utc::now());
            if !self.save_status(&connection).await? {
                return Ok(PollOutcome::Superseded);
            }
        }

        let timeout = self.deps.config.poll_timeout();
        let started = Instant::now();
        let read = tokio::time::timeout(timeout, self.deps.source.read_tags(&connection))
            .await
            .unwrap_or(Err(SourceError::Timeout(timeout)));
        histogram!("poll_duration_ms").record(started.elapsed().as_secs_f64() * 1_000.0);

        let samples = match read {
            Ok(samples) => samples,
            Err(err) => {
                warn!(
                    category = err.category(),
                    retryable = err.is_retryable(),
                    error = %err,
                    "Poll failed"
                );
                counter!("poll_failures_total", "category" => err.category()).increment(1);
                connection.mark_error(err.to_string(), Utc::now());
                if !self.save_status(&connection).await? {
                    return Ok(PollOutcome::Superseded);
                }
                return Ok(PollOutcome::Failed(err));
            }
        };

        let now = Utc::now();
        connection.mark_connected(now);
        if !self.save_status(&connection).await? {
            return Ok(PollOutcome::Superseded);
        }

        let mut readings: Vec<Reading> = Vec::with_capacity(samples.len());
        let mut rejected = 0;
        for sample in samples {
            let tag_name = sample.tag_name.clone();
            let mut raw = sample.into_raw(&connection);
            if self.validator.inspect(&mut raw).is_some() {
                counter!("readings_anomalous_total").increment(1);
            }
            match classify(raw, now) {
                Ok(reading) => readings.push(reading),
                Err(err) => {
                    rejected += 1;
                    warn!(tag_name = %tag_name, error = %err, "Rejected tag sample");
                }
            }
        }

        let persisted = self.deps.readings.create_batch(&readings).await?;
        counter!("readings_persisted_total").increment(persisted);
        if rejected > 0 {
            counter!("readings_rejected_total").increment(rejected as u64);
        }

        // Every reading is evaluated even when an earlier one failed; a
        // collaborator failure is surfaced once the batch is done.
        let mut alarms = 0;
        let mut failed = 0;
        let mut collaborator_failure = None;
        for reading in &readings {
            let mut evaluation = self
                .deps
                .engine
                .evaluate(reading, &self.deps.rules, now)
                .await;
            alarms += evaluation.occurrences.len();
            failed += evaluation.failures.len();
            if collaborator_failure.is_none()
                && let Some(index) = evaluation
                    .failures
                    .iter()
                    .position(|(_, err)| err.is_collaborator_failure())
            {
                collaborator_failure = Some(evaluation.failures.swap_remove(index).1);
            }
        }

        debug!(readings = persisted, rejected, alarms, failed, "Poll complete");
        if let Some(err) = collaborator_failure {
            return Err(err);
        }
        Ok(PollOutcome::Polled {
            readings: persisted,
            rejected,
            alarms,
            failed,
        })
    }

    /// Polls on the connection's interval until shutdown or until the
    /// connection goes away. The first poll is delayed by a random share of
    /// the interval so loops started together spread out.
    ///
    /// Source failures back off exponentially and can open a circuit
    /// breaker; see [`PollHealth`]. When the retry limit is reached the loop
    /// idles until cancelled, so the supervisor only starts a fresh loop once
    /// the connection's endpoint or interval changes.
    #[instrument(skip_all, fields(connection_id = %self.connection_id))]
    pub async fn run(self, shutdown: CancellationToken) {
        let jitter = compute_start_jitter(
            self.interval,
            self.deps.config.poll_start_jitter_pct,
            &mut rand::thread_rng(),
        );
        debug!(jitter_ms = jitter.as_millis() as u64, "Starting poll loop");

        let mut health = PollHealth::new(self.deps.config.reconnect_policy());
        let mut delay = jitter;
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!("Poll loop shutdown requested");
                    break;
                }
                _ = sleep(delay) => {
                    if !health.can_attempt(Instant::now()) {
                        delay = health.next_delay(self.interval, Instant::now());
                        continue;
                    }
                    match self.poll_once().await {
                        Ok(PollOutcome::Stopped) => break,
                        Ok(PollOutcome::Polled { .. }) => health.record_success(),
                        Ok(PollOutcome::Failed(err)) => {
                            health.record_failure(&err, Instant::now());
                        }
                        Ok(PollOutcome::Superseded) => {}
                        Err(err) => {
                            error!(error = ?err, "Poll attempt failed");
                        }
                    }
                    debug!(
                        uptime_pct = health.uptime_percentage(),
                        consecutive_failures = health.consecutive_failures(),
                        "Poll health"
                    );
                    if health.is_max_retries_reached() {
                        error!(
                            attempts = health.consecutive_failures(),
                            "Giving up on connection until it is reconfigured"
                        );
                        counter!("poll_loops_exhausted_total").increment(1);
                        shutdown.cancelled().await;
                        break;
                    }
                    delay = health.next_delay(self.interval, Instant::now());
                }
            }
        }

        debug!("Poll loop stopped");
    }
}

fn compute_start_jitter<R: Rng + ?Sized>(
    interval: StdDuration,
    jitter_pct: f64,
    rng: &mut R,
) -> StdDuration {
    let pct = jitter_pct.clamp(0.0, 1.0);
    if pct == 0.0 {
        return StdDuration::ZERO;
    }
    interval.mul_f64(rng.gen_range(0.0..=pct))
}

/// What a running loop was started with; a change restarts the loop.
#[derive(Debug, Clone, PartialEq, Eq)]
struct LoopFingerprint {
    endpoint: Endpoint,
    poll_interval_seconds: u32,
}

impl LoopFingerprint {
    fn of(connection: &ScadaConnection) -> Self {
        Self {
            endpoint: connection.endpoint().clone(),
            poll_interval_seconds: connection.poll_interval_seconds(),
        }
    }
}

struct RunningLoop {
    fingerprint: LoopFingerprint,
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Counts from one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ReconcileStats {
    pub started: usize,
    pub restarted: usize,
    pub stopped: usize,
    pub running: usize,
}

/// Starts, restarts and stops poll loops to match the enabled connections.
pub struct PollSupervisor {
    deps: PollerDeps,
    loops: HashMap<Uuid, RunningLoop>,
}

impl PollSupervisor {
    pub fn new(deps: PollerDeps) -> Self {
        Self {
            deps,
            loops: HashMap::new(),
        }
    }

    /// Reconciles every `connection_refresh_seconds` until shutdown, then
    /// cancels and awaits all loops.
    #[instrument(skip_all)]
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!("Starting poll supervisor");
        let refresh = self.deps.config.connection_refresh();
        let mut delay = StdDuration::ZERO;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Poll supervisor shutdown requested");
                    break;
                }
                _ = sleep(delay) => {
                    if let Err(err) = self.reconcile(&shutdown).await {
                        error!(error = ?err, "Poll loop reconciliation failed");
                    }
                    delay = refresh;
                }
            }
        }

        self.stop_all().await;
        info!("Poll supervisor stopped");
    }

    /// One reconciliation pass against `find_enabled()`.
    pub async fn reconcile(
        &mut self,
        shutdown: &CancellationToken,
    ) -> Result<ReconcileStats, MonitorError> {
        let enabled = self.deps.connections.find_enabled().await?;
        let mut stats = ReconcileStats::default();

        let wanted: HashSet<Uuid> = enabled.iter().map(ScadaConnection::id).collect();

        let gone: Vec<Uuid> = self
            .loops
            .keys()
            .filter(|id| !wanted.contains(id))
            .copied()
            .collect();
        for id in gone {
            if let Some(running) = self.loops.remove(&id) {
                running.token.cancel();
                stats.stopped += 1;
                debug!(connection_id = %id, "Stopped poll loop");
            }
        }

        for connection in enabled.iter() {
            let fingerprint = LoopFingerprint::of(connection);
            let current = self.loops.get(&connection.id()).map(|running| {
                running.fingerprint == fingerprint && !running.handle.is_finished()
            });
            match current {
                Some(true) => continue,
                Some(false) => {
                    if let Some(previous) = self.loops.remove(&connection.id()) {
                        previous.token.cancel();
                    }
                    stats.restarted += 1;
                    debug!(connection_id = %connection.id(), "Restarting poll loop");
                }
                None => {
                    stats.started += 1;
                    debug!(connection_id = %connection.id(), "Starting poll loop");
                }
            }

            let token = shutdown.child_token();
            let poller = ConnectionPoller::new(self.deps.clone(), connection);
            let handle = tokio::spawn(poller.run(token.clone()));
            self.loops.insert(
                connection.id(),
                RunningLoop {
                    fingerprint,
                    token,
                    handle,
                },
            );
        }

        stats.running = self.loops.len();
        gauge!("poll_loops_running").set(stats.running as f64);
        Ok(stats)
    }

    pub fn running(&self) -> usize {
        self.loops.len()
    }

    async fn stop_all(&mut self) {
        for (_, running) in self.loops.drain() {
            running.token.cancel();
            if let Err(err) = running.handle.await {
                error!(error = ?err, "Poll loop panicked");
            }
        }
        gauge!("poll_loops_running").set(0.0);
    }
}
