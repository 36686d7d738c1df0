// Session persistence in the local key-value store

use crate::error::Result;
use crate::store::KeyValueStore;

use super::types::{SessionToken, StoredSession};

/// Key holding the JSON-serialized session
pub const SESSION_KEY: &str = "auth_session";

/// Key used by older clients for a bare access token string
pub const LEGACY_TOKEN_KEY: &str = "auth_token";

/// Drop the legacy single-token entry if one is present
pub fn migrate_legacy(store: &dyn KeyValueStore) {
    match store.get(LEGACY_TOKEN_KEY) {
        Ok(Some(_)) => {
            tracing::info!("Discarding legacy single-token session entry");
            if let Err(e) = store.remove(LEGACY_TOKEN_KEY) {
                tracing::warn!("Failed to remove legacy token entry: {:#}", e);
            }
        }
        Ok(None) => {}
        Err(e) => tracing::warn!("Failed to check for legacy token entry: {:#}", e),
    }
}

/// Load the persisted session.
///
/// Unreadable or malformed state is treated as "no session" and removed so
/// it cannot fail again on the next start.
pub fn load_session(store: &dyn KeyValueStore) -> Option<SessionToken> {
    migrate_legacy(store);

    let raw = match store.get(SESSION_KEY) {
        Ok(Some(raw)) if raw.is_empty() => {
            // Left blank by a removal the store refused; try again now
            if let Err(e) = store.remove(SESSION_KEY) {
                tracing::debug!("Blank session entry still not removable: {:#}", e);
            }
            return None;
        }
        Ok(Some(raw)) => raw,
        Ok(None) => return None,
        Err(e) => {
            tracing::warn!("Failed to read persisted session: {:#}", e);
            return None;
        }
    };

    let parsed = serde_json::from_str::<StoredSession>(&raw)
        .map_err(crate::error::SessionError::from)
        .and_then(SessionToken::try_from);

    match parsed {
        Ok(token) => {
            tracing::debug!(
                "Loaded persisted session (expires: {})",
                token.expires_at().to_rfc3339()
            );
            Some(token)
        }
        Err(e) => {
            tracing::warn!("Discarding malformed persisted session: {}", e);
            if let Err(e) = store.remove(SESSION_KEY) {
                tracing::warn!("Failed to remove malformed session: {:#}", e);
            }
            None
        }
    }
}

/// Persist a session, replacing any previous value in full
pub fn save_session(store: &dyn KeyValueStore, token: &SessionToken) -> Result<()> {
    let json = serde_json::to_string(&StoredSession::from(token))?;
    store.set(SESSION_KEY, &json)?;
    Ok(())
}

/// Remove the persisted session (and any legacy leftover).
///
/// Falls back to blanking the value when the store refuses the delete, so
/// the next load still finds no session.
pub fn remove_session(store: &dyn KeyValueStore) -> Result<()> {
    if let Err(e) = store.remove(SESSION_KEY) {
        tracing::warn!("Failed to delete persisted session, blanking it: {:#}", e);
        store.set(SESSION_KEY, "")?;
    }
    // Legacy entries never load as a session
    if let Err(e) = store.remove(LEGACY_TOKEN_KEY) {
        tracing::warn!("Failed to remove legacy token entry: {:#}", e);
    }
    Ok(())
}
