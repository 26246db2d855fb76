//! Sessions
//!
//! The session carries every piece of per-browser authentication state as a
//! typed field. Stores use optimistic locking so that two requests racing on
//! the same session cannot both complete the same challenge.

use chrono::{DateTime, Duration, Utc};
use gate_core::traits::{Id, Lockable};
use gate_core::GateError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::admin_mode::AdminModeSession;
use crate::challenge::ChallengeState;

/// Session errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("Session not found")]
    NotFound,
    #[error("Session was modified concurrently")]
    Conflict,
    #[error("Session store unavailable: {0}")]
    Unavailable(String),
}

/// A missing or concurrently modified session means the flow has to start
/// over; only an unavailable store is worth retrying.
impl From<SessionError> for GateError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound | SessionError::Conflict => GateError::StaleChallenge,
            SessionError::Unavailable(message) => GateError::transport("sessions", message),
        }
    }
}

/// Session data
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    /// Set once the user is fully signed in
    pub user_id: Option<Id>,
    pub remember_me: bool,
    pub login_challenge: Option<ChallengeState>,
    pub step_up_challenge: Option<ChallengeState>,
    /// Subject whose login ended in a lockout on this session
    pub locked_out_user: Option<Id>,
    pub admin_mode: Option<AdminModeSession>,
    pub admin_mode_return_to: Option<String>,
    pub step_up_locked_until: Option<DateTime<Utc>>,
    /// Failed step-up attempts across every step-up request on this session
    #[serde(default)]
    pub step_up_failed_attempts: i32,
    /// User chose to postpone two-factor enrollment until then
    pub skip_two_factor_until: Option<DateTime<Utc>>,
    pub ip_address: Option<String>,
    pub lock_version: u64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn anonymous(now: DateTime<Utc>, lifetime: Duration) -> Self {
        Self {
            id: generate_session_id(),
            user_id: None,
            remember_me: false,
            login_challenge: None,
            step_up_challenge: None,
            locked_out_user: None,
            admin_mode: None,
            admin_mode_return_to: None,
            step_up_locked_until: None,
            step_up_failed_attempts: 0,
            skip_two_factor_until: None,
            ip_address: None,
            lock_version: 0,
            created_at: now,
            expires_at: now + lifetime,
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_authenticated(&self) -> bool {
        self.user_id.is_some()
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip_address = Some(ip.into());
        self
    }

    pub fn step_up_locked(&self, now: DateTime<Utc>) -> bool {
        self.step_up_locked_until.map_or(false, |until| now < until)
    }

    /// Drop a step-up lock that has run out, and the failures behind it
    pub fn release_lapsed_step_up_lock(&mut self, now: DateTime<Utc>) {
        if self.step_up_locked_until.is_some_and(|until| now >= until) {
            self.step_up_locked_until = None;
            self.step_up_failed_attempts = 0;
        }
    }
}

impl Lockable for Session {
    fn lock_version(&self) -> u64 {
        self.lock_version
    }
}

/// Generate a secure random session ID
fn generate_session_id() -> String {
    use rand::Rng;
    const CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
    const SESSION_ID_LENGTH: usize = 64;

    let mut rng = rand::rng();
    (0..SESSION_ID_LENGTH)
        .map(|_| {
            let idx = rng.random_range(0..CHARSET.len());
            CHARSET[idx] as char
        })
        .collect()
}

/// Session store trait for different backends
pub trait SessionStore: Send + Sync {
    fn get(&self, session_id: &str) -> Result<Option<Session>, SessionError>;

    /// Store a new session
    fn create(&self, session: Session) -> Result<Session, SessionError>;

    /// Compare-and-set on `lock_version`. Returns the stored copy with the
    /// bumped version.
    fn save(&self, session: Session) -> Result<Session, SessionError>;

    fn delete(&self, session_id: &str) -> Result<(), SessionError>;

    fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize, SessionError>;
}

/// In-memory session store (for development/testing)
pub struct MemorySessionStore {
    sessions: std::sync::RwLock<HashMap<String, Session>>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: std::sync::RwLock::new(HashMap::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned<T>(_: T) -> SessionError {
    SessionError::Unavailable("session lock poisoned".to_string())
}

impl SessionStore for MemorySessionStore {
    fn get(&self, session_id: &str) -> Result<Option<Session>, SessionError> {
        let sessions = self.sessions.read().map_err(poisoned)?;
        Ok(sessions.get(session_id).cloned())
    }

    fn create(&self, session: Session) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        if sessions.contains_key(&session.id) {
            return Err(SessionError::Conflict);
        }
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    fn save(&self, mut session: Session) -> Result<Session, SessionError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let stored = sessions.get(&session.id).ok_or(SessionError::NotFound)?;
        if stored.lock_version != session.lock_version {
            return Err(SessionError::Conflict);
        }
        session.lock_version += 1;
        sessions.insert(session.id.clone(), session.clone());
        Ok(session)
    }

    fn delete(&self, session_id: &str) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        sessions.remove(session_id);
        Ok(())
    }

    fn cleanup_expired(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        let mut sessions = self.sessions.write().map_err(poisoned)?;
        let before = sessions.len();
        sessions.retain(|_, s| s.is_valid(now));
        Ok(before - sessions.len())
    }
}

/// Cookie configuration for sessions
#[derive(Debug, Clone)]
pub struct CookieConfig {
    pub name: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    pub max_age: Option<i64>,
}

#[derive(Debug, Clone, Copy)]
pub enum SameSite {
    Strict,
    Lax,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            name: "_gate_session".to_string(),
            path: "/".to_string(),
            secure: true,
            http_only: true,
            same_site: SameSite::Lax,
            max_age: None,
        }
    }
}

impl CookieConfig {
    /// Create a development configuration (non-secure)
    pub fn development() -> Self {
        Self {
            secure: false,
            ..Default::default()
        }
    }

    /// Build cookie header value
    pub fn build_cookie(&self, session_id: &str) -> String {
        let mut parts = vec![format!("{}={}", self.name, session_id)];

        parts.push(format!("Path={}", self.path));

        if self.secure {
            parts.push("Secure".to_string());
        }

        if self.http_only {
            parts.push("HttpOnly".to_string());
        }

        match self.same_site {
            SameSite::Strict => parts.push("SameSite=Strict".to_string()),
            SameSite::Lax => parts.push("SameSite=Lax".to_string()),
        }

        if let Some(max_age) = self.max_age {
            parts.push(format!("Max-Age={}", max_age));
        }

        parts.join("; ")
    }
}

/// Extract session ID from cookie header
pub fn extract_session_id(cookie_header: &str, cookie_name: &str) -> Option<String> {
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((name, value)) = part.split_once('=') {
            if name.trim() == cookie_name {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> Session {
        Session::anonymous(Utc::now(), Duration::hours(1))
    }

    #[test]
    fn test_anonymous_session() {
        let now = Utc::now();
        let session = Session::anonymous(now, Duration::hours(1));
        assert!(session.is_valid(now));
        assert!(!session.is_valid(now + Duration::hours(1)));
        assert!(!session.is_authenticated());
        assert_eq!(session.id.len(), 64);
    }

    #[test]
    fn test_save_bumps_version() {
        let store = MemorySessionStore::new();
        let session = store.create(session()).unwrap();
        assert_eq!(session.lock_version, 0);

        let saved = store.save(session).unwrap();
        assert_eq!(saved.lock_version, 1);
        assert_eq!(store.get(&saved.id).unwrap().unwrap().lock_version, 1);
    }

    #[test]
    fn test_stale_copy_conflicts() {
        let store = MemorySessionStore::new();
        let session = store.create(session()).unwrap();
        let racer = session.clone();

        let mut first = session;
        first.user_id = Some(1);
        store.save(first).unwrap();

        assert_eq!(store.save(racer), Err(SessionError::Conflict));
        assert_eq!(
            GateError::from(SessionError::Conflict),
            GateError::StaleChallenge
        );
    }

    #[test]
    fn test_save_unknown_session() {
        let store = MemorySessionStore::new();
        assert_eq!(store.save(session()), Err(SessionError::NotFound));
    }

    #[test]
    fn test_cleanup_expired() {
        let store = MemorySessionStore::new();
        let now = Utc::now();
        store.create(Session::anonymous(now, Duration::minutes(1))).unwrap();
        store.create(Session::anonymous(now, Duration::hours(1))).unwrap();

        assert_eq!(store.cleanup_expired(now + Duration::minutes(2)).unwrap(), 1);
        assert_eq!(store.len(), 1);

        let id = store.create(session()).unwrap().id;
        store.delete(&id).unwrap();
        assert!(store.get(&id).unwrap().is_none());
    }

    #[test]
    fn test_lapsed_step_up_lock_is_released() {
        let now = Utc::now();
        let mut session = Session::anonymous(now, Duration::hours(1));
        session.step_up_failed_attempts = 5;
        session.step_up_locked_until = Some(now + Duration::minutes(10));

        session.release_lapsed_step_up_lock(now + Duration::minutes(9));
        assert!(session.step_up_locked(now + Duration::minutes(9)));
        assert_eq!(session.step_up_failed_attempts, 5);

        session.release_lapsed_step_up_lock(now + Duration::minutes(10));
        assert!(session.step_up_locked_until.is_none());
        assert_eq!(session.step_up_failed_attempts, 0);
    }

    #[test]
    fn test_cookie_config() {
        let config = CookieConfig::default();
        let cookie = config.build_cookie("abc123");

        assert!(cookie.contains("_gate_session=abc123"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Secure"));
        assert!(!CookieConfig::development().build_cookie("x").contains("Secure"));
    }

    #[test]
    fn test_extract_session_id() {
        let cookie = "_gate_session=abc123; other=value";
        assert_eq!(
            extract_session_id(cookie, "_gate_session"),
            Some("abc123".to_string())
        );
        assert_eq!(extract_session_id(cookie, "missing"), None);
    }
}
