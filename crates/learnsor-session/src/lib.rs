//! Learnsor Session Controller
//!
//! Serves hints about a piece of selected code in ordered levels, gating each
//! level behind a minimum dwell time, and exposes the controller over HTTP
//! and WebSocket.

pub mod access;
pub mod admission;
pub mod api;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod levels;
pub mod router;
pub mod session;
pub mod websocket;

pub use access::{check_level_access, remaining_wait_secs, AccessGrant};
pub use admission::{AdmissionPermit, RequestAdmission};
pub use api::{create_router, AppState, ErrorResponse, HealthResponse, LevelsResponse};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, WorkerConfig, CONFIG_FILE_NAME};
pub use controller::{ControllerOptions, DisclosureController, FollowUpResponse, LevelResponse};
pub use error::{DisclosureError, LearnsorError, Result};
pub use events::{DisclosureEvent, EventBroadcaster, DEFAULT_EVENT_CAPACITY};
pub use levels::{default_levels, Level, LevelRegistry};
pub use router::{extract_tier, PLACEHOLDER_TEXT};
pub use session::{
    FollowUpRecord, LevelProgress, SessionContext, SessionSnapshot, SessionState, MAX_FOLLOW_UPS,
};
pub use websocket::ClientCommand;
