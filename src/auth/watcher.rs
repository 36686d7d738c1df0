// Background session re-validation
// Checks the session on an interval and on demand, publishing transitions

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::manager::SessionManager;

/// Default interval between session checks, in seconds
pub const DEFAULT_CHECK_INTERVAL_SECS: u64 = 60;

/// Session state as seen by the watcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionStatus {
    /// A usable session exists
    Authenticated { expires_at: DateTime<Utc> },

    /// A session exists but must be refreshed before use
    Expired { expires_at: DateTime<Utc> },

    /// No usable session; the user must authenticate again
    SignedOut,
}

impl SessionStatus {
    fn of(manager: &SessionManager) -> Self {
        match manager.expires_at() {
            None => SessionStatus::SignedOut,
            Some(expires_at) if manager.is_authenticated() => {
                SessionStatus::Authenticated { expires_at }
            }
            Some(expires_at) => SessionStatus::Expired { expires_at },
        }
    }
}

/// Handle to a running watcher task
pub struct SessionWatcher {
    status: watch::Receiver<SessionStatus>,
    nudge: Arc<Notify>,
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SessionWatcher {
    /// Spawn the watcher on the current runtime
    pub fn spawn(manager: SessionManager, interval: Duration) -> Self {
        let (tx, rx) = watch::channel(SessionStatus::of(&manager));
        let nudge = Arc::new(Notify::new());
        let shutdown = Arc::new(Notify::new());

        let task = tokio::spawn(run(manager, interval, tx, nudge.clone(), shutdown.clone()));

        Self {
            status: rx,
            nudge,
            shutdown,
            task,
        }
    }

    /// Latest published status
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Receiver for status transitions
    pub fn subscribe(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Check right away (e.g. the client came back to the foreground)
    pub fn nudge(&self) {
        self.nudge.notify_one();
    }

    /// Stop the task and wait for it to finish
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            tracing::warn!("Session watcher ended abnormally: {}", e);
        }
    }
}

async fn run(
    manager: SessionManager,
    interval: Duration,
    tx: watch::Sender<SessionStatus>,
    nudge: Arc<Notify>,
    shutdown: Arc<Notify>,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    tracing::debug!("Session watcher started (interval: {:?})", interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = nudge.notified() => {
                tracing::debug!("Session check requested");
            }
            _ = shutdown.notified() => break,
        }

        let status = match manager.get_valid_access_token().await {
            Some(_) => SessionStatus::of(&manager),
            None => SessionStatus::SignedOut,
        };

        tx.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            match &status {
                SessionStatus::SignedOut => {
                    tracing::warn!("Session ended, re-authentication required")
                }
                SessionStatus::Authenticated { expires_at } => {
                    tracing::info!("Session valid until {}", expires_at.to_rfc3339())
                }
                SessionStatus::Expired { expires_at } => {
                    tracing::debug!("Session expired at {}", expires_at.to_rfc3339())
                }
            }
            *current = status.clone();
            true
        });
    }

    tracing::debug!("Session watcher stopped");
}
