//! Session-backed authentication.
//!
//! Handlers that need a logged-in operator take an [`Authenticated`]
//! extractor; it reads the per-client session and rejects with 401.

use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use tower_sessions::Session;

use crate::error::{AppError, AuthError};
use crate::routes::AppState;

const AUTHENTICATED_KEY: &str = "authenticated";

/// Per-client authentication flag storage.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn is_authenticated(&self) -> Result<bool, AuthError>;
    async fn set_authenticated(&self) -> Result<(), AuthError>;
    async fn revoke(&self) -> Result<(), AuthError>;
}

#[async_trait]
impl SessionStore for Session {
    async fn is_authenticated(&self) -> Result<bool, AuthError> {
        let flag: Option<bool> = self
            .get(AUTHENTICATED_KEY)
            .await
            .map_err(|e| AuthError::Session(e.to_string()))?;
        Ok(flag.unwrap_or(false))
    }

    async fn set_authenticated(&self) -> Result<(), AuthError> {
        // New id on privilege change.
        self.cycle_id()
            .await
            .map_err(|e| AuthError::Session(e.to_string()))?;
        self.insert(AUTHENTICATED_KEY, true)
            .await
            .map_err(|e| AuthError::Session(e.to_string()))
    }

    async fn revoke(&self) -> Result<(), AuthError> {
        self.flush()
            .await
            .map_err(|e| AuthError::Session(e.to_string()))
    }
}

/// Check a submitted token and mark the session on success.
pub async fn login(
    store: &dyn SessionStore,
    expected_token: &str,
    submitted: &str,
) -> Result<(), AuthError> {
    if expected_token.is_empty() || !tokens_match(expected_token.as_bytes(), submitted.as_bytes()) {
        tracing::warn!("rejected login attempt");
        return Err(AuthError::InvalidToken);
    }
    store.set_authenticated().await?;
    tracing::info!("operator logged in");
    Ok(())
}

/// Equality that does not stop at the first differing byte.
fn tokens_match(expected: &[u8], submitted: &[u8]) -> bool {
    if expected.len() != submitted.len() {
        return false;
    }
    expected
        .iter()
        .zip(submitted)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Decide whether a request may proceed.
pub async fn authorize(store: &dyn SessionStore, debug_mode: bool) -> Result<(), AuthError> {
    if debug_mode || store.is_authenticated().await? {
        Ok(())
    } else {
        Err(AuthError::NotAuthenticated)
    }
}

/// Proof that the current request belongs to an authenticated session.
#[derive(Debug, Clone, Copy)]
pub struct Authenticated;

#[async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let session = Session::from_request_parts(parts, state)
            .await
            .map_err(|(_, msg)| AuthError::Session(msg.to_string()))?;
        authorize(&session, state.config.debug_mode).await?;
        Ok(Authenticated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Default)]
    struct FlagStore(AtomicBool);

    #[async_trait]
    impl SessionStore for FlagStore {
        async fn is_authenticated(&self) -> Result<bool, AuthError> {
            Ok(self.0.load(Ordering::SeqCst))
        }
        async fn set_authenticated(&self) -> Result<(), AuthError> {
            self.0.store(true, Ordering::SeqCst);
            Ok(())
        }
        async fn revoke(&self) -> Result<(), AuthError> {
            self.0.store(false, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_login_with_correct_token() {
        let store = FlagStore::default();
        login(&store, "s3cret", "s3cret").await.unwrap();
        assert!(authorize(&store, false).await.is_ok());

        store.revoke().await.unwrap();
        assert!(matches!(
            authorize(&store, false).await,
            Err(AuthError::NotAuthenticated)
        ));
    }

    #[tokio::test]
    async fn test_login_rejects_wrong_or_empty_token() {
        let store = FlagStore::default();
        assert!(matches!(
            login(&store, "s3cret", "s3cre").await,
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(login(&store, "", "").await, Err(AuthError::InvalidToken)));
        assert!(!store.is_authenticated().await.unwrap());
    }

    #[tokio::test]
    async fn test_debug_mode_bypasses_session() {
        let store = FlagStore::default();
        assert!(authorize(&store, true).await.is_ok());
    }
}
