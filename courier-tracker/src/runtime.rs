use courier_core::{ParcelId, UpdateInterval};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::agent::{
    ResumeOutcome, StartOutcome, StartTrigger, StopOutcome, TrackerSnapshot, TrackingAgent,
};
use crate::auth::{AuthContext, BearerToken};
use crate::client::SyncClient;
use crate::error::TrackerError;
use crate::notice::NoticeId;
use crate::source::PositionSource;

const COMMAND_BUFFER: usize = 32;

/// Requests from the host, answered over a oneshot.
#[derive(Debug)]
pub enum Command {
    Start {
        reply: oneshot::Sender<Result<StartOutcome, TrackerError>>,
    },
    Stop {
        reply: oneshot::Sender<StopOutcome>,
    },
    ResumeIfOnline {
        reply: oneshot::Sender<Result<ResumeOutcome, TrackerError>>,
    },
    SetParcel {
        parcel: Option<ParcelId>,
        reply: oneshot::Sender<Option<ParcelId>>,
    },
    SetInterval {
        interval: UpdateInterval,
        reply: oneshot::Sender<Result<(), TrackerError>>,
    },
    DismissNotice {
        id: NoticeId,
        reply: oneshot::Sender<bool>,
    },
}

#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error("tracker is no longer running")]
    Closed,
    #[error(transparent)]
    Tracker(#[from] TrackerError),
}

/// Task that owns a [`TrackingAgent`] and serializes everything that touches it.
pub struct Tracker;

impl Tracker {
    /// Move the agent into its own task.
    ///
    /// On startup the task tries one auto-resume. A new login on `auth`
    /// re-arms and retries it. Cancelling `cancel` tears the agent down.
    pub fn spawn<P, C>(
        agent: TrackingAgent<P, C>,
        auth: &AuthContext,
        cancel: CancellationToken,
    ) -> (TrackerHandle, JoinHandle<()>)
    where
        P: PositionSource,
        C: SyncClient,
    {
        let (commands_tx, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshots_tx, snapshots_rx) = watch::channel(agent.snapshot());
        let logins = auth.subscribe();

        let task = tokio::spawn(run_tracker(
            agent,
            commands_rx,
            snapshots_tx,
            logins,
            cancel,
        ));

        let handle = TrackerHandle {
            commands: commands_tx,
            snapshots: snapshots_rx,
        };
        (handle, task)
    }
}

#[instrument(name = "tracker", skip_all)]
async fn run_tracker<P, C>(
    mut agent: TrackingAgent<P, C>,
    mut commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<TrackerSnapshot>,
    mut logins: watch::Receiver<Option<BearerToken>>,
    cancel: CancellationToken,
) where
    P: PositionSource,
    C: SyncClient,
{
    info!("Tracker started");

    try_resume(&mut agent).await;
    snapshots.send_replace(agent.snapshot());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("Tracker shutting down");
                break;
            }
            command = commands.recv() => {
                let Some(command) = command else {
                    info!("All tracker handles dropped, shutting down");
                    break;
                };
                execute(&mut agent, command).await;
            }
            event = agent.next_event() => {
                agent.handle(event).await;
            }
            Ok(()) = logins.changed() => {
                let logged_in = logins.borrow_and_update().is_some();
                if logged_in {
                    info!("New login, re-arming auto-resume");
                    agent.rearm_auto_resume();
                    try_resume(&mut agent).await;
                }
            }
        }

        snapshots.send_replace(agent.snapshot());
    }

    agent.teardown().await;
    snapshots.send_replace(agent.snapshot());
    info!("Tracker stopped");
}

async fn try_resume<P: PositionSource, C: SyncClient>(agent: &mut TrackingAgent<P, C>) {
    match agent.resume_if_online(StartTrigger::AutoResume).await {
        Ok(ResumeOutcome::Resumed(session_id)) => {
            info!(%session_id, "Tracking resumed automatically");
        }
        Ok(outcome) => debug!(?outcome, "No auto-resume"),
        Err(e) => warn!(error = %e, "Auto-resume failed"),
    }
}

async fn execute<P: PositionSource, C: SyncClient>(
    agent: &mut TrackingAgent<P, C>,
    command: Command,
) {
    // A dropped reply receiver only means the caller stopped waiting.
    match command {
        Command::Start { reply } => {
            let _ = reply.send(agent.start(StartTrigger::Manual).await);
        }
        Command::Stop { reply } => {
            let _ = reply.send(agent.stop().await);
        }
        Command::ResumeIfOnline { reply } => {
            let _ = reply.send(agent.resume_if_online(StartTrigger::Manual).await);
        }
        Command::SetParcel { parcel, reply } => {
            let _ = reply.send(agent.set_active_parcel(parcel));
        }
        Command::SetInterval { interval, reply } => {
            let _ = reply.send(agent.set_interval(interval));
        }
        Command::DismissNotice { id, reply } => {
            let _ = reply.send(agent.dismiss_notice(id));
        }
    }
}

/// Cloneable front end to a running [`Tracker`].
#[derive(Clone)]
pub struct TrackerHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<TrackerSnapshot>,
}

impl TrackerHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, HandleError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(command(tx))
            .await
            .map_err(|_| HandleError::Closed)?;
        rx.await.map_err(|_| HandleError::Closed)
    }

    pub async fn start(&self) -> Result<StartOutcome, HandleError> {
        Ok(self.request(|reply| Command::Start { reply }).await??)
    }

    pub async fn stop(&self) -> Result<StopOutcome, HandleError> {
        self.request(|reply| Command::Stop { reply }).await
    }

    pub async fn resume_if_online(&self) -> Result<ResumeOutcome, HandleError> {
        Ok(self
            .request(|reply| Command::ResumeIfOnline { reply })
            .await??)
    }

    pub async fn set_parcel(&self, parcel: Option<ParcelId>) -> Result<Option<ParcelId>, HandleError> {
        self.request(|reply| Command::SetParcel { parcel, reply })
            .await
    }

    pub async fn set_interval(&self, interval: UpdateInterval) -> Result<(), HandleError> {
        Ok(self
            .request(|reply| Command::SetInterval { interval, reply })
            .await??)
    }

    pub async fn dismiss_notice(&self, id: NoticeId) -> Result<bool, HandleError> {
        self.request(|reply| Command::DismissNotice { id, reply })
            .await
    }

    /// Latest published state.
    pub fn snapshot(&self) -> TrackerSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<TrackerSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for(
        &self,
        predicate: impl FnMut(&TrackerSnapshot) -> bool,
    ) -> Result<TrackerSnapshot, HandleError> {
        let mut rx = self.snapshots.clone();
        let snapshot = rx
            .wait_for(predicate)
            .await
            .map_err(|_| HandleError::Closed)?;
        Ok(snapshot.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use courier_core::PositionSample;

    use super::*;
    use crate::agent::AgentStatus;
    use crate::client::mock::MockSyncClient;
    use crate::config::TrackingConfig;
    use crate::error::SyncError;
    use crate::source::feed::FeedSource;

    fn fix(lat: f64, lng: f64) -> PositionSample {
        PositionSample::new(lat, lng, jiff::Timestamp::now()).with_accuracy(10.0)
    }

    fn spawn(
        config: TrackingConfig,
        client: &MockSyncClient,
        feed: &FeedSource,
        auth: &AuthContext,
    ) -> (TrackerHandle, JoinHandle<()>, CancellationToken) {
        let agent = TrackingAgent::new(feed.clone(), Arc::new(client.clone()), config);
        let cancel = CancellationToken::new();
        let (handle, task) = Tracker::spawn(agent, auth, cancel.clone());
        (handle, task, cancel)
    }

    async fn wait_for(
        handle: &TrackerHandle,
        predicate: impl FnMut(&TrackerSnapshot) -> bool,
    ) -> TrackerSnapshot {
        tokio::time::timeout(Duration::from_secs(2), handle.wait_for(predicate))
            .await
            .expect("snapshot within timeout")
            .unwrap()
    }

    #[tokio::test]
    async fn commands_drive_the_agent() {
        let client = MockSyncClient::new();
        let feed = FeedSource::new();
        let auth = AuthContext::new(Some("token".into()));
        let (handle, task, cancel) = spawn(TrackingConfig::minimal(), &client, &feed, &auth);

        handle.set_interval(UpdateInterval::Sixty).await.unwrap();
        feed.queue_current(Ok(fix(-1.2921, 36.8219)));
        feed.push(fix(-1.2921, 36.8219));
        assert!(matches!(
            handle.start().await.unwrap(),
            StartOutcome::Started(_)
        ));
        assert!(matches!(
            handle.set_interval(UpdateInterval::Ten).await,
            Err(HandleError::Tracker(TrackerError::IntervalLocked))
        ));

        feed.push(fix(-1.2925, 36.8225));
        let snapshot = wait_for(&handle, |s| s.route.len() == 2).await;
        assert_eq!(snapshot.status, AgentStatus::Active);
        assert_eq!(snapshot.interval, UpdateInterval::Sixty);

        assert!(matches!(
            handle.stop().await.unwrap(),
            StopOutcome::Stopped(Some(_))
        ));
        wait_for(&handle, |s| s.status == AgentStatus::Idle).await;
        assert_eq!(client.offline_calls(), 1);

        cancel.cancel();
        task.await.unwrap();
        assert!(matches!(handle.stop().await, Err(HandleError::Closed)));
    }

    #[tokio::test]
    async fn resumes_on_load_when_server_reports_online() {
        let client = MockSyncClient::new().with_server_online(true);
        let feed = FeedSource::new();
        feed.queue_current(Ok(fix(-1.2921, 36.8219)));
        let auth = AuthContext::new(Some("token".into()));
        let (handle, _task, _cancel) = spawn(TrackingConfig::default(), &client, &feed, &auth);

        let snapshot = wait_for(&handle, |s| s.status == AgentStatus::Active).await;
        assert_eq!(snapshot.stats.unwrap().updates_sent, 1);
        assert_eq!(client.location_count(), 1);
        assert_eq!(feed.registrations(), 1);
    }

    #[tokio::test]
    async fn host_resume_recovers_from_failed_startup_query() {
        let client = MockSyncClient::new().with_server_online(true);
        client.fail_next_query(SyncError::Network("connection refused".into()));
        let feed = FeedSource::new();
        feed.queue_current(Ok(fix(-1.2921, 36.8219)));
        let auth = AuthContext::new(Some("token".into()));
        let (handle, _task, _cancel) = spawn(TrackingConfig::default(), &client, &feed, &auth);

        let outcome = handle.resume_if_online().await.unwrap();
        assert!(matches!(outcome, ResumeOutcome::Resumed(_)));
        assert_eq!(client.status_queries(), 2);
        wait_for(&handle, |s| s.status == AgentStatus::Active).await;
    }

    #[tokio::test]
    async fn new_login_rearms_auto_resume() {
        let client = MockSyncClient::new();
        let feed = FeedSource::new();
        let auth = AuthContext::anonymous();
        let (handle, _task, _cancel) = spawn(TrackingConfig::default(), &client, &feed, &auth);

        // first attempt finds the driver offline
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(client.status_queries(), 1);
        assert_eq!(handle.snapshot().status, AgentStatus::Idle);

        client.set_server_online(true);
        feed.queue_current(Ok(fix(-1.2921, 36.8219)));
        auth.set_token("fresh");

        wait_for(&handle, |s| s.status == AgentStatus::Active).await;
        assert_eq!(client.status_queries(), 2);
    }

    #[tokio::test]
    async fn cancellation_tears_down_session() {
        let client = MockSyncClient::new();
        let feed = FeedSource::new();
        let auth = AuthContext::new(Some("token".into()));
        let (handle, task, cancel) = spawn(TrackingConfig::minimal(), &client, &feed, &auth);

        feed.queue_current(Ok(fix(-1.2921, 36.8219)));
        feed.push(fix(-1.2921, 36.8219));
        handle.start().await.unwrap();

        cancel.cancel();
        task.await.unwrap();
        assert_eq!(feed.active_watches(), 0);
        assert_eq!(client.offline_calls(), 1);
        assert_eq!(handle.snapshot().status, AgentStatus::Idle);
    }
}
