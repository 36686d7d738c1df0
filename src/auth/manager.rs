use chrono::{DateTime, Duration, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, OnceLock, PoisonError, RwLock};
use std::sync::{RwLockReadGuard, RwLockWriteGuard};

use crate::error::Result;
use crate::store::KeyValueStore;

use super::client::AuthClient;
use super::clock::{Clock, SystemClock};
use super::device::DeviceInfo;
use super::storage;
use super::types::{token_preview, AuthResponse, RefreshOutcome, SessionToken, SessionUser};

/// Default safety margin before the server-side expiry, in seconds
pub const DEFAULT_REFRESH_THRESHOLD_SECS: u64 = 10;

/// Largest accepted safety margin (one day), in seconds
pub const MAX_REFRESH_THRESHOLD_SECS: u64 = 86_400;

type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

struct SessionState {
    token: Option<SessionToken>,

    /// Bumped on every replacement or removal, so an in-flight refresh can
    /// tell whether the session it started from is still current
    generation: u64,
}

struct Inner {
    state: RwLock<SessionState>,

    /// In-flight refresh shared by every concurrent caller
    pending: Mutex<Option<PendingRefresh>>,

    store: Arc<dyn KeyValueStore>,
    client: AuthClient,
    clock: Arc<dyn Clock>,
    device: OnceLock<DeviceInfo>,
    refresh_threshold: Duration,
}

/// Session token manager.
///
/// Owns the single current session for one store. Cheap to clone; clones
/// share state. Read and refresh methods never fail: problems surface as
/// `None`, `false` or a [`RefreshOutcome`].
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Create a manager using the wall clock, loading any persisted session
    pub fn new(store: Arc<dyn KeyValueStore>, client: AuthClient, refresh_threshold: u64) -> Self {
        Self::with_clock(store, client, refresh_threshold, Arc::new(SystemClock))
    }

    /// Create a manager with an explicit time source
    pub fn with_clock(
        store: Arc<dyn KeyValueStore>,
        client: AuthClient,
        refresh_threshold: u64,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let token = storage::load_session(&*store);
        if token.is_some() {
            tracing::info!("Restored persisted session");
        }

        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(SessionState {
                    token,
                    generation: 0,
                }),
                pending: Mutex::new(None),
                store,
                client,
                clock,
                device: OnceLock::new(),
                refresh_threshold: threshold_duration(refresh_threshold),
            }),
        }
    }

    /// Install a session from a server bundle, replacing any previous one.
    ///
    /// The session is persisted before it becomes current; if persisting
    /// fails the previous state is left untouched.
    pub fn set_tokens(&self, response: &AuthResponse, user_id: Option<i64>) -> Result<()> {
        let token = SessionToken::issue(response, user_id, None, self.inner.clock.now())?;

        let mut state = self.inner.write_state();
        storage::save_session(self.inner.store.as_ref(), &token)?;

        tracing::info!(
            "Session established (token: {}, expires: {})",
            token_preview(token.access_token()),
            token.expires_at().to_rfc3339()
        );

        state.token = Some(token);
        state.generation += 1;
        Ok(())
    }

    /// Current access token, `None` when signed out
    pub fn get_access_token(&self) -> Option<String> {
        self.inner
            .read_state()
            .token
            .as_ref()
            .map(|t| t.access_token().to_string())
    }

    /// Whether the session is absent or within the threshold of expiry
    pub fn is_token_expired(&self) -> bool {
        let now = self.inner.clock.now();
        match self.inner.read_state().token.as_ref() {
            None => true,
            Some(token) => token.is_expired_at(now, self.inner.refresh_threshold),
        }
    }

    pub fn has_tokens(&self) -> bool {
        self.inner.read_state().token.is_some()
    }

    pub fn is_authenticated(&self) -> bool {
        self.has_tokens() && !self.is_token_expired()
    }

    pub fn get_user_id(&self) -> Option<i64> {
        self.inner
            .read_state()
            .token
            .as_ref()
            .and_then(|t| t.user().id)
    }

    pub fn user(&self) -> Option<SessionUser> {
        self.inner
            .read_state()
            .token
            .as_ref()
            .map(|t| t.user().clone())
    }

    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.inner
            .read_state()
            .token
            .as_ref()
            .map(|t| t.expires_at())
    }

    /// Copy of the current session
    pub fn snapshot(&self) -> Option<SessionToken> {
        self.inner.read_state().token.clone()
    }

    /// End the session and remove persisted state. Idempotent.
    ///
    /// If the store refuses the removal, the persisted value is blanked so it
    /// is not restored on the next start. When the store rejects that write
    /// too, the session is gone in memory only and an error is logged.
    pub fn clear_tokens(&self) {
        let mut state = self.inner.write_state();
        if state.token.is_some() {
            tracing::info!("Session cleared");
        }
        self.inner.discard(&mut state);
    }

    /// Return a usable access token, refreshing first if it has expired
    pub async fn get_valid_access_token(&self) -> Option<String> {
        if !self.has_tokens() {
            return None;
        }

        if self.is_token_expired() {
            tracing::debug!("Access token expired or expiring soon, refreshing...");
            if !self.refresh_access_token().await {
                return None;
            }
        }

        self.get_access_token()
    }

    /// Refresh the session; true if a valid session exists afterward
    pub async fn refresh_access_token(&self) -> bool {
        match self.refresh().await {
            RefreshOutcome::Refreshed => true,
            RefreshOutcome::Superseded => self.is_authenticated(),
            _ => false,
        }
    }

    /// Refresh the session, reporting why it failed if it did.
    ///
    /// Concurrent callers share one request: whoever finds a refresh in
    /// flight waits for that one instead of starting another.
    pub async fn refresh(&self) -> RefreshOutcome {
        let pending = {
            let mut slot = self.inner.lock_pending();
            match slot.as_ref() {
                Some(in_flight) => {
                    tracing::debug!("Joining in-flight token refresh");
                    in_flight.clone()
                }
                None => {
                    let inner = Arc::clone(&self.inner);
                    let refresh = async move {
                        let outcome = match AssertUnwindSafe(inner.run_refresh())
                            .catch_unwind()
                            .await
                        {
                            Ok(outcome) => outcome,
                            Err(_) => {
                                tracing::error!("Token refresh panicked, ending session");
                                inner.discard(&mut inner.write_state());
                                RefreshOutcome::Unavailable {
                                    reason: "refresh aborted".to_string(),
                                }
                            }
                        };
                        *inner.lock_pending() = None;
                        outcome
                    }
                    .boxed()
                    .shared();
                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };

        pending.await
    }

    /// Whether a refresh is currently in flight
    pub fn is_refreshing(&self) -> bool {
        self.inner.lock_pending().is_some()
    }

    /// Log in with email and password and install the resulting session
    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        let response = self.inner.client.login(email, password).await?;
        self.set_tokens(&response, None)
    }

    /// Create an account and install the resulting session
    pub async fn signup(&self, email: &str, password: &str, name: Option<&str>) -> Result<()> {
        let response = self.inner.client.signup(email, password, name).await?;
        self.set_tokens(&response, None)
    }

    /// Log in through an identity provider and install the resulting session
    pub async fn social_login(&self, provider: &str, token: &str) -> Result<()> {
        let response = self.inner.client.social_login(provider, token).await?;
        self.set_tokens(&response, None)
    }
}

fn threshold_duration(secs: u64) -> Duration {
    if secs > MAX_REFRESH_THRESHOLD_SECS {
        tracing::warn!(
            "Refresh threshold {}s is too large, using {}s",
            secs,
            MAX_REFRESH_THRESHOLD_SECS
        );
    }
    Duration::seconds(secs.min(MAX_REFRESH_THRESHOLD_SECS) as i64)
}

impl Inner {
    fn read_state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, SessionState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_pending(&self) -> MutexGuard<'_, Option<PendingRefresh>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn device_info(&self) -> &DeviceInfo {
        self.device.get_or_init(|| {
            DeviceInfo::detect(self.store.as_ref()).unwrap_or_else(|e| {
                tracing::warn!("Failed to load device id, using a temporary one: {:#}", e);
                DeviceInfo::ephemeral()
            })
        })
    }

    /// Drop the session in memory and in the store
    fn discard(&self, state: &mut SessionState) {
        state.token = None;
        state.generation += 1;
        if let Err(e) = storage::remove_session(self.store.as_ref()) {
            tracing::error!("Failed to remove persisted session: {}", e);
        }
    }

    async fn run_refresh(&self) -> RefreshOutcome {
        let (refresh_token, previous_user, generation) = {
            let state = self.read_state();
            match state.token.as_ref() {
                None => {
                    tracing::debug!("No session to refresh");
                    return RefreshOutcome::NoSession;
                }
                Some(token) => (
                    token.refresh_token().to_string(),
                    token.user().clone(),
                    state.generation,
                ),
            }
        };

        let result = self
            .client
            .refresh(&refresh_token, self.device_info())
            .await;
        let now = self.clock.now();

        let mut state = self.write_state();
        if state.generation != generation {
            tracing::info!("Session changed while refreshing, discarding refresh result");
            return RefreshOutcome::Superseded;
        }

        let token = match result
            .and_then(|response| SessionToken::issue(&response, None, Some(&previous_user), now))
        {
            Ok(token) => token,
            Err(e) => {
                tracing::error!("Token refresh failed, ending session: {}", e);
                self.discard(&mut state);
                return RefreshOutcome::from(&e);
            }
        };

        if let Err(e) = storage::save_session(self.store.as_ref(), &token) {
            tracing::error!("Failed to persist refreshed session, ending session: {}", e);
            self.discard(&mut state);
            return RefreshOutcome::from(&e);
        }

        tracing::info!(
            "Session refreshed (token: {}, expires: {})",
            token_preview(token.access_token()),
            token.expires_at().to_rfc3339()
        );

        state.token = Some(token);
        state.generation += 1;
        RefreshOutcome::Refreshed
    }
}
