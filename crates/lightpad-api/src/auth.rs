use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use secrecy::SecretString;

/// Account credentials for the Plum house service.
///
/// Held only in memory; nothing in this crate writes them anywhere.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub email: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(email: impl Into<String>, password: SecretString) -> Self {
        Self {
            email: email.into(),
            password,
        }
    }
}

/// A house-scoped access token plus its lifetime bookkeeping.
///
/// Sessions are shared as `Arc<Session>`. Expiry is one-way: once
/// [`expire`](Self::expire) is called, or the TTL elapses, every
/// transport refuses the token and callers must obtain a new session.
#[derive(Debug)]
pub struct Session {
    house_id: String,
    token: SecretString,
    issued_at: DateTime<Utc>,
    ttl: Option<Duration>,
    generation: u64,
    revoked: AtomicBool,
}

impl Session {
    /// Create a session issued now.
    pub fn new(house_id: impl Into<String>, token: SecretString, ttl: Option<Duration>) -> Self {
        Self {
            house_id: house_id.into(),
            token,
            issued_at: Utc::now(),
            ttl,
            generation: 0,
            revoked: AtomicBool::new(false),
        }
    }

    /// Tag the session with a generation number (bumped on every refresh).
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = generation;
        self
    }

    /// Override the issue time (used by tests and by sessions restored from a cache).
    pub fn issued(mut self, at: DateTime<Utc>) -> Self {
        self.issued_at = at;
        self
    }

    pub fn house_id(&self) -> &str {
        &self.house_id
    }

    /// The house access token. Never log this.
    pub fn token(&self) -> &SecretString {
        &self.token
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        self.issued_at
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Mark the token as dead. Irreversible.
    pub fn expire(&self) {
        self.revoked.store(true, Ordering::Release);
    }

    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        if self.revoked.load(Ordering::Acquire) {
            return true;
        }
        let Some(ttl) = self.ttl else {
            return false;
        };
        // A clock that moved backwards yields a negative delta; treat as fresh.
        now.signed_duration_since(self.issued_at)
            .to_std()
            .is_ok_and(|elapsed| elapsed >= ttl)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(ttl: Option<Duration>) -> Session {
        Session::new("house-1", SecretString::from("hat".to_string()), ttl)
    }

    #[test]
    fn session_without_ttl_lives_until_expired() {
        let s = session(None);
        let far_future = Utc::now() + chrono::TimeDelta::days(3650);
        assert!(!s.is_expired_at(far_future));

        s.expire();
        assert!(s.is_expired());
    }

    #[test]
    fn session_ttl_elapses() {
        let s = session(Some(Duration::from_secs(60)));
        let issued = s.issued_at();
        assert!(!s.is_expired_at(issued + chrono::TimeDelta::seconds(59)));
        assert!(s.is_expired_at(issued + chrono::TimeDelta::seconds(60)));
    }

    #[test]
    fn clock_skew_does_not_expire() {
        let s = session(Some(Duration::from_secs(1)));
        let earlier = s.issued_at() - chrono::TimeDelta::seconds(30);
        assert!(!s.is_expired_at(earlier));
    }

    #[test]
    fn expiry_is_sticky_across_generations() {
        let s = session(None).with_generation(4);
        assert_eq!(s.generation(), 4);
        s.expire();
        s.expire();
        assert!(s.is_expired());
    }
}
