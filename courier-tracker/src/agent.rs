use std::sync::Arc;

use courier_core::{ParcelId, PositionSample, RoutePoint, SessionId, UpdateInterval};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::battery::{BatteryLevel, BatterySource, NoBattery};
use crate::client::SyncClient;
use crate::config::TrackingConfig;
use crate::error::{PositionError, Severity, SyncError, TrackerError};
use crate::notice::{Notice, NoticeId, Notices};
use crate::route::RouteHistory;
use crate::session::{TrackingSession, TrackingStats};
use crate::source::{Permission, PositionOptions, PositionSource, WatchHandle, cancel_watch};
use crate::uplink::{Delivery, Outgoing, Uplink};

/// Where the agent is in its session lifecycle.
#[derive(Debug, Clone, PartialEq)]
pub enum Phase {
    Idle,
    Starting,
    Active,
    Stopping,
    /// The last attempt failed. Holds the triggering error until an explicit
    /// start or stop clears it.
    Faulted(TrackerError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartTrigger {
    Manual,
    AutoResume,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started(SessionId),
    /// A session is already starting or running; nothing was done.
    AlreadyRunning,
}

#[derive(Debug, Clone, PartialEq)]
pub enum StopOutcome {
    Stopped(Option<TrackingStats>),
    ClearedFault,
    AlreadyIdle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    Disabled,
    AlreadyAttempted,
    NotIdle,
    ServerOffline,
    Resumed(SessionId),
}

/// Something that happened outside the agent and needs a transition.
#[derive(Debug)]
pub enum Event {
    Fix(PositionSample),
    WatchError(PositionError),
    /// The source stopped delivering without being cancelled.
    WatchClosed,
    Delivered(Delivery),
}

/// Serializable agent state, tagged by `state`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum AgentStatus {
    Idle,
    Starting,
    Active,
    Stopping,
    Faulted { kind: &'static str, message: String },
}

impl From<&Phase> for AgentStatus {
    fn from(phase: &Phase) -> Self {
        match phase {
            Phase::Idle => AgentStatus::Idle,
            Phase::Starting => AgentStatus::Starting,
            Phase::Active => AgentStatus::Active,
            Phase::Stopping => AgentStatus::Stopping,
            Phase::Faulted(err) => AgentStatus::Faulted {
                kind: err.kind(),
                message: err.to_string(),
            },
        }
    }
}

/// Everything a host surface needs to render the tracker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerSnapshot {
    pub status: AgentStatus,
    pub interval: UpdateInterval,
    pub parcel: Option<ParcelId>,
    pub stats: Option<TrackingStats>,
    pub last_position: Option<PositionSample>,
    pub route: Vec<RoutePoint>,
    pub notices: Vec<Notice>,
    pub watching: bool,
}

/// The location tracking state machine.
///
/// Owns the watch handle, the uplink and all session state. Every effect goes
/// through `&mut self`, so whoever drives the agent serializes transitions.
pub struct TrackingAgent<P, C> {
    source: P,
    client: Arc<C>,
    battery_source: Box<dyn BatterySource>,
    config: TrackingConfig,
    phase: Phase,
    session: Option<TrackingSession>,
    watch: Option<WatchHandle>,
    uplink: Option<Uplink>,
    battery: Option<BatteryLevel>,
    route: RouteHistory,
    notices: Notices,
    parcel: Option<ParcelId>,
    interval: UpdateInterval,
    last_position: Option<PositionSample>,
    resume_attempted: bool,
}

impl<P: PositionSource, C: SyncClient> TrackingAgent<P, C> {
    pub fn new(source: P, client: Arc<C>, config: TrackingConfig) -> Self {
        Self {
            source,
            client,
            battery_source: Box::new(NoBattery),
            route: RouteHistory::with_capacity(config.route_capacity),
            interval: config.interval,
            config,
            phase: Phase::Idle,
            session: None,
            watch: None,
            uplink: None,
            battery: None,
            notices: Notices::default(),
            parcel: None,
            last_position: None,
            resume_attempted: false,
        }
    }

    pub fn with_battery(mut self, battery: impl BatterySource) -> Self {
        self.battery_source = Box::new(battery);
        self
    }

    pub fn phase(&self) -> &Phase {
        &self.phase
    }

    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    pub fn session(&self) -> Option<&TrackingSession> {
        self.session.as_ref()
    }

    pub fn route(&self) -> &RouteHistory {
        &self.route
    }

    pub fn notices(&self) -> &Notices {
        &self.notices
    }

    pub fn interval(&self) -> UpdateInterval {
        self.interval
    }

    pub fn parcel(&self) -> Option<ParcelId> {
        self.parcel
    }

    pub fn has_watch(&self) -> bool {
        self.watch.is_some()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            status: AgentStatus::from(&self.phase),
            interval: self.interval,
            parcel: self.parcel,
            stats: self
                .session
                .as_ref()
                .map(|s| s.stats(jiff::Timestamp::now())),
            last_position: self.last_position.clone(),
            route: self.route.to_vec(),
            notices: self.notices.to_vec(),
            watching: self.watch.is_some(),
        }
    }

    /// Wait for the next watch item or uplink outcome. Pending forever while
    /// neither exists.
    pub async fn next_event(&mut self) -> Event {
        let watch = self.watch.as_mut();
        let uplink = self.uplink.as_mut();

        tokio::select! {
            item = recv_watch(watch) => match item {
                Some(Ok(sample)) => Event::Fix(sample),
                Some(Err(err)) => Event::WatchError(err),
                None => Event::WatchClosed,
            },
            Some(delivery) = next_delivery(uplink) => Event::Delivered(delivery),
        }
    }

    pub async fn handle(&mut self, event: Event) {
        match event {
            Event::Fix(sample) => self.on_fix(sample),
            Event::WatchError(err) => self.on_watch_error(err).await,
            Event::WatchClosed => self.on_watch_closed().await,
            Event::Delivered(delivery) => self.on_delivery(delivery).await,
        }
    }

    /// Begin a session. A no-op while one is starting or running.
    pub async fn start(&mut self, trigger: StartTrigger) -> Result<StartOutcome, TrackerError> {
        match &self.phase {
            Phase::Starting | Phase::Active | Phase::Stopping => {
                debug!(?trigger, "Start ignored, session already running");
                return Ok(StartOutcome::AlreadyRunning);
            }
            Phase::Faulted(err) => {
                info!(error = %err, "Clearing previous fault before starting");
                self.phase = Phase::Idle;
            }
            Phase::Idle => {}
        }

        if let Err(err) = self.check_preconditions() {
            error!(error = %err, ?trigger, "Cannot start tracking");
            self.fault(err.clone());
            return Err(err);
        }

        let id = SessionId::new();
        self.phase = Phase::Starting;
        info!(session_id = %id, ?trigger, interval_secs = self.interval.as_secs(), "Starting tracking session");

        match self.establish(id).await {
            Ok(()) => {
                self.phase = Phase::Active;
                info!(session_id = %id, "Tracking session active");
                Ok(StartOutcome::Started(id))
            }
            Err(err) => Err(self.abort_start(err).await),
        }
    }

    /// End the current session, or clear a fault.
    pub async fn stop(&mut self) -> StopOutcome {
        match self.phase {
            Phase::Faulted(_) => {
                info!("Fault cleared");
                self.phase = Phase::Idle;
                StopOutcome::ClearedFault
            }
            Phase::Idle => {
                cancel_watch(&mut self.watch);
                self.go_offline().await;
                StopOutcome::AlreadyIdle
            }
            Phase::Starting | Phase::Active | Phase::Stopping => {
                StopOutcome::Stopped(self.shutdown(true).await)
            }
        }
    }

    /// Resume tracking if the backend still lists the driver as online.
    ///
    /// An automatic attempt runs at most once until
    /// [`rearm_auto_resume`](Self::rearm_auto_resume), counted from the first
    /// status query that gets an answer; a failed resume is not retried. A
    /// manual request from the host always asks the backend.
    pub async fn resume_if_online(
        &mut self,
        trigger: StartTrigger,
    ) -> Result<ResumeOutcome, TrackerError> {
        if !self.config.auto_resume {
            return Ok(ResumeOutcome::Disabled);
        }
        if trigger == StartTrigger::AutoResume && self.resume_attempted {
            return Ok(ResumeOutcome::AlreadyAttempted);
        }
        if self.phase != Phase::Idle {
            return Ok(ResumeOutcome::NotIdle);
        }

        let online = match self.client.online_status().await {
            Ok(online) => online,
            Err(e) => {
                let err = TrackerError::from(e);
                warn!(error = %err, "Could not read driver status from backend");
                self.notices.raise(err.severity(), err.to_string());
                return Err(err);
            }
        };
        if trigger == StartTrigger::AutoResume {
            self.resume_attempted = true;
        }

        if !online {
            debug!("Backend reports driver offline, not resuming");
            return Ok(ResumeOutcome::ServerOffline);
        }

        info!(?trigger, "Backend still reports the driver online, resuming tracking");
        match self.start(trigger).await? {
            StartOutcome::Started(id) => Ok(ResumeOutcome::Resumed(id)),
            StartOutcome::AlreadyRunning => Ok(ResumeOutcome::NotIdle),
        }
    }

    /// Allow one more auto-resume, e.g. after a new login.
    pub fn rearm_auto_resume(&mut self) {
        self.resume_attempted = false;
    }

    pub fn set_interval(&mut self, interval: UpdateInterval) -> Result<(), TrackerError> {
        match self.phase {
            Phase::Idle | Phase::Faulted(_) => {
                info!(interval_secs = interval.as_secs(), "Update interval changed");
                self.interval = interval;
                Ok(())
            }
            _ => Err(TrackerError::IntervalLocked),
        }
    }

    /// Set or clear the parcel attached to outgoing samples. Returns the
    /// previous one.
    pub fn set_active_parcel(&mut self, parcel: Option<ParcelId>) -> Option<ParcelId> {
        match parcel {
            Some(id) => info!(parcel_id = %id, "Active parcel set"),
            None => info!("Active parcel cleared"),
        }
        std::mem::replace(&mut self.parcel, parcel)
    }

    pub fn dismiss_notice(&mut self, id: NoticeId) -> bool {
        self.notices.dismiss(id)
    }

    /// Release everything before the agent goes away. The watch is always
    /// cancelled; a running session is stopped when `offline_on_shutdown` is
    /// set.
    pub async fn teardown(&mut self) {
        cancel_watch(&mut self.watch);

        let running = matches!(
            self.phase,
            Phase::Starting | Phase::Active | Phase::Stopping
        );
        if running && self.config.offline_on_shutdown {
            self.shutdown(true).await;
            return;
        }

        if let Some(uplink) = self.uplink.take() {
            uplink.close().await;
        }
        self.battery = None;
        if let Some(session) = self.session.take() {
            info!(session_id = %session.id(), "Session dropped without going offline");
        }
        if running {
            self.phase = Phase::Idle;
        }
    }

    fn check_preconditions(&self) -> Result<(), TrackerError> {
        if !self.source.is_supported() {
            return Err(TrackerError::CapabilityUnsupported);
        }
        if self.source.permission() == Permission::Denied {
            return Err(TrackerError::PermissionDenied);
        }
        Ok(())
    }

    async fn establish(&mut self, id: SessionId) -> Result<(), TrackerError> {
        let fix = self.acquire(self.config.initial_fix_options()).await?;
        fix.validate()?;

        self.watch = Some(self.source.watch_position(self.config.watch_options())?);

        if self.config.battery {
            self.battery = self.battery_source.subscribe();
            if self.battery.is_none() {
                debug!("Battery level unavailable");
            }
        }

        let fix = self.with_battery_level(fix);
        let mut session = TrackingSession::new(id, jiff::Timestamp::now());
        session.record(&fix);
        self.route.clear();
        self.route.push(RoutePoint::from(&fix));
        self.last_position = Some(fix.clone());
        self.session = Some(session);

        match self.client.send_location(&fix, self.parcel).await {
            Ok(_) => {}
            Err(SyncError::Unauthorized) => return Err(SyncError::Unauthorized.into()),
            Err(e) => {
                warn!(error = %e, "Initial location update failed");
                self.notices
                    .raise(Severity::Transient, format!("Location update failed: {e}"));
            }
        }

        self.client
            .set_online_status(true, Some(self.interval))
            .await?;

        self.uplink = Some(Uplink::spawn(self.client.clone(), id));
        Ok(())
    }

    async fn abort_start(&mut self, err: TrackerError) -> TrackerError {
        error!(error = %err, "Failed to start tracking");
        cancel_watch(&mut self.watch);
        if let Some(uplink) = self.uplink.take() {
            uplink.close().await;
        }
        self.battery = None;
        self.session = None;
        self.go_offline().await;
        self.fault(err.clone());
        err
    }

    async fn acquire(&self, options: PositionOptions) -> Result<PositionSample, PositionError> {
        tokio::time::timeout(options.timeout, self.source.current_position(options))
            .await
            .unwrap_or(Err(PositionError::Timeout))
    }

    fn with_battery_level(&self, sample: PositionSample) -> PositionSample {
        let level = self.battery.as_ref().and_then(|rx| *rx.borrow());
        match level {
            Some(level) => sample.with_battery(Some(level)),
            None => sample,
        }
    }

    fn on_fix(&mut self, sample: PositionSample) {
        if self.phase != Phase::Active {
            debug!("Fix outside an active session, ignoring");
            return;
        }
        if let Err(e) = sample.validate() {
            warn!(error = %e, "Dropping invalid fix");
            return;
        }

        let sample = self.with_battery_level(sample);
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let credited_km = session.record(&sample);
        debug!(
            updates_sent = session.updates_sent(),
            credited_km,
            total_distance_km = session.total_distance_km(),
            "Fix recorded"
        );

        self.route.push(RoutePoint::from(&sample));
        self.last_position = Some(sample.clone());

        if let Some(uplink) = &self.uplink {
            uplink.publish(Outgoing {
                sample,
                parcel: self.parcel,
            });
        }
    }

    async fn on_watch_error(&mut self, error: PositionError) {
        if self.phase != Phase::Active {
            return;
        }

        let err = TrackerError::from(error);
        let severity = err.severity();
        if severity == Severity::Transient && !self.config.stop_on_transient_watch_error {
            warn!(error = %err, "Watch reported a transient error, keeping session");
            self.notices.raise(severity, err.to_string());
            return;
        }

        warn!(error = %err, "Watch reported an error, ending session");
        self.notices.raise(severity, err.to_string());
        self.shutdown(true).await;
    }

    async fn on_watch_closed(&mut self) {
        // The slot may hold a handle whose source went away.
        cancel_watch(&mut self.watch);
        if self.phase != Phase::Active {
            return;
        }
        warn!("Position source stopped delivering, ending session");
        self.notices
            .raise(Severity::Transient, "Location updates stopped");
        self.shutdown(true).await;
    }

    async fn on_delivery(&mut self, delivery: Delivery) {
        let current = self.session.as_ref().map(TrackingSession::id);
        if current != Some(delivery.session) {
            debug!(session_id = %delivery.session, "Outcome from an ended session, ignoring");
            return;
        }

        match delivery.result {
            Ok(ack) => debug!(ack_id = ?ack.id, captured_at = %delivery.captured_at, "Location delivered"),
            Err(SyncError::Unauthorized) => {
                self.fault_session(SyncError::Unauthorized.into()).await;
            }
            Err(e) => {
                warn!(error = %e, "Location update failed, next fix supersedes it");
                self.notices
                    .raise(Severity::Transient, format!("Location update failed: {e}"));
            }
        }
    }

    async fn fault_session(&mut self, err: TrackerError) {
        error!(error = %err, "Session ended by fatal error");
        self.shutdown(false).await;
        self.fault(err);
    }

    /// Stop sequence. Leaves the agent `Idle`.
    async fn shutdown(&mut self, send_final: bool) -> Option<TrackingStats> {
        self.phase = Phase::Stopping;

        if let Some(id) = cancel_watch(&mut self.watch) {
            debug!(watch_id = id.0, "Watch cancelled");
        }
        if let Some(uplink) = self.uplink.take() {
            uplink.close().await;
        }

        if send_final {
            self.send_final_fix().await;
        }
        self.go_offline().await;

        self.battery = None;
        let stats = self
            .session
            .take()
            .map(|s| s.stats(jiff::Timestamp::now()));
        self.phase = Phase::Idle;

        if let Some(stats) = &stats {
            info!(
                session_id = %stats.session_id,
                updates_sent = stats.updates_sent,
                total_distance_km = stats.total_distance_km,
                elapsed_secs = stats.elapsed_secs,
                "Tracking session ended"
            );
        }
        stats
    }

    async fn send_final_fix(&mut self) {
        let fix = match self.acquire(PositionOptions::final_fix()).await {
            Ok(fix) => fix,
            Err(e) => {
                warn!(error = %e, "No final fix, skipping last update");
                return;
            }
        };
        if let Err(e) = fix.validate() {
            warn!(error = %e, "Final fix invalid, skipping last update");
            return;
        }

        let fix = self.with_battery_level(fix);
        match self.client.send_location(&fix, self.parcel).await {
            Ok(_) => {
                self.last_position = Some(fix);
                debug!("Final location sent");
            }
            Err(e) => warn!(error = %e, "Final location update failed"),
        }
    }

    async fn go_offline(&self) {
        match self.client.set_online_status(false, None).await {
            Ok(_) => info!("Driver marked offline"),
            Err(e) => warn!(error = %e, "Failed to mark driver offline"),
        }
    }

    fn fault(&mut self, err: TrackerError) {
        self.notices.raise(err.severity(), err.to_string());
        self.phase = Phase::Faulted(err);
    }
}

async fn recv_watch(
    watch: Option<&mut WatchHandle>,
) -> Option<Result<PositionSample, PositionError>> {
    match watch {
        Some(watch) => watch.recv().await,
        None => std::future::pending().await,
    }
}

async fn next_delivery(uplink: Option<&mut Uplink>) -> Option<Delivery> {
    match uplink {
        Some(uplink) => uplink.next_delivery().await,
        None => std::future::pending().await,
    }
}
