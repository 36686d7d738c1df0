// Authentication module
// Manages the session token lifecycle, persistence and refresh

mod client;
mod clock;
mod device;
mod manager;
mod storage;
mod types;
mod watcher;

pub use client::AuthClient;
pub use clock::{Clock, ManualClock, SystemClock};
pub use device::DeviceInfo;
pub use manager::{SessionManager, DEFAULT_REFRESH_THRESHOLD_SECS, MAX_REFRESH_THRESHOLD_SECS};
pub use storage::{LEGACY_TOKEN_KEY, SESSION_KEY};
pub use types::{AuthResponse, RefreshOutcome, SessionToken, SessionUser, StoredSession};
pub use watcher::{SessionStatus, SessionWatcher, DEFAULT_CHECK_INTERVAL_SECS};
