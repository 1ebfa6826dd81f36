// ── Session providers ──
//
// A `SessionProvider` hands out the current house session and replaces
// it when a pad rejects the token. Refreshes are generation-checked so
// concurrent callers holding the same stale session trigger a single
// re-authentication.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use lightpad_api::{AuthError, Credentials, HouseClient, Session};
use tracing::{debug, info};

pub trait SessionProvider: Send + Sync {
    /// The live session, authenticating first if there is none or it expired.
    fn current(&self) -> impl Future<Output = Result<Arc<Session>, AuthError>> + Send;

    /// Replace `stale` with a fresh session. If the provider already moved
    /// past `stale` the newer session is returned without authenticating.
    fn refresh(
        &self,
        stale: &Session,
    ) -> impl Future<Output = Result<Arc<Session>, AuthError>> + Send;
}

// ── Cloud-backed provider ────────────────────────────────────────────

/// Authenticates against the house service with account credentials.
pub struct CloudSessions {
    client: HouseClient,
    credentials: Credentials,
    current: ArcSwapOption<Session>,
    generation: AtomicU64,
    refresh_lock: tokio::sync::Mutex<()>,
}

impl CloudSessions {
    pub fn new(client: HouseClient, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
            current: ArcSwapOption::empty(),
            generation: AtomicU64::new(0),
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Last issued session without any I/O.
    pub fn peek(&self) -> Option<Arc<Session>> {
        self.current.load_full()
    }

    /// Authenticate unless a usable session newer than `stale_generation`
    /// appeared while waiting for the lock.
    async fn reauthenticate(
        &self,
        stale_generation: Option<u64>,
    ) -> Result<Arc<Session>, AuthError> {
        let _guard = self.refresh_lock.lock().await;

        if let Some(existing) = self.current.load_full() {
            let newer = stale_generation.is_none_or(|g| existing.generation() > g);
            if newer && !existing.is_expired() {
                debug!(generation = existing.generation(), "session already refreshed");
                return Ok(existing);
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let session = self
            .client
            .authenticate(&self.credentials.email, &self.credentials.password)
            .await?
            .with_generation(generation);
        info!(house_id = session.house_id(), generation, "house session issued");

        let session = Arc::new(session);
        self.current.store(Some(Arc::clone(&session)));
        Ok(session)
    }
}

impl SessionProvider for CloudSessions {
    async fn current(&self) -> Result<Arc<Session>, AuthError> {
        match self.current.load_full() {
            Some(session) if !session.is_expired() => Ok(session),
            Some(session) => self.reauthenticate(Some(session.generation())).await,
            None => self.reauthenticate(None).await,
        }
    }

    async fn refresh(&self, stale: &Session) -> Result<Arc<Session>, AuthError> {
        stale.expire();
        self.reauthenticate(Some(stale.generation())).await
    }
}

// ── Fixed token ──────────────────────────────────────────────────────

/// A house access token obtained elsewhere. It cannot be refreshed, so a
/// rejection surfaces as [`AuthError::InvalidCredentials`].
#[derive(Debug)]
pub struct StaticSession(Arc<Session>);

impl StaticSession {
    pub fn new(session: Session) -> Self {
        Self(Arc::new(session))
    }
}

impl SessionProvider for StaticSession {
    async fn current(&self) -> Result<Arc<Session>, AuthError> {
        if self.0.is_expired() {
            return Err(AuthError::InvalidCredentials {
                message: "fixed house access token has expired".into(),
            });
        }
        Ok(Arc::clone(&self.0))
    }

    async fn refresh(&self, stale: &Session) -> Result<Arc<Session>, AuthError> {
        stale.expire();
        Err(AuthError::InvalidCredentials {
            message: "fixed house access token was rejected".into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::SecretString;

    #[tokio::test]
    async fn static_session_cannot_refresh() {
        let provider = StaticSession::new(Session::new(
            "house",
            SecretString::from("hat".to_string()),
            None,
        ));
        let session = provider.current().await.unwrap();

        assert!(provider.refresh(&session).await.is_err());
        assert!(session.is_expired());
        assert!(provider.current().await.is_err());
    }
}
