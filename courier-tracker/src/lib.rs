pub mod agent;
pub mod api;
pub mod auth;
pub mod battery;
pub mod client;
pub mod config;
pub mod error;
pub mod notice;
pub mod route;
pub mod runtime;
pub mod session;
pub mod source;
pub mod uplink;

pub use agent::{
    AgentStatus, Event, Phase, ResumeOutcome, StartOutcome, StartTrigger, StopOutcome,
    TrackerSnapshot, TrackingAgent,
};
pub use auth::{AuthContext, BearerToken};
pub use battery::{BatteryFeed, BatterySource, NoBattery, SysfsBattery};
pub use client::SyncClient;
pub use client::http::BackendClient;
pub use client::mock::MockSyncClient;
pub use config::{BackendConfig, BatteryConfig, Config, ServerConfig, SourceConfig, TrackingConfig};
pub use error::{PositionError, Severity, SyncError, TrackerError};
pub use notice::{Notice, NoticeId};
pub use route::RouteHistory;
pub use runtime::{HandleError, Tracker, TrackerHandle};
pub use session::{TrackingSession, TrackingStats};
pub use source::feed::FeedSource;
pub use source::simulated::SimulatedSource;
pub use source::{PositionOptions, PositionSource, WatchHandle};
