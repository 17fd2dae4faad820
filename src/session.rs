use std::collections::HashMap;
use std::time::{Duration, Instant};

use rand::Rng;

use crate::backend::{AuthSession, Credential};
use crate::models::Profile;

/// A signed-in browser session.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub email: String,
    pub access_token: String,
    /// Cached profile row; `None` until one exists.
    pub profile: Option<Profile>,
    expires_at: Instant,
}

impl Session {
    pub fn viewer(&self) -> Viewer {
        Viewer {
            user_id: self.user_id.clone(),
            credential: Credential::User(self.access_token.clone()),
        }
    }
}

/// The identity a domain operation runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Viewer {
    pub user_id: String,
    pub credential: Credential,
}

/// Sessions keyed by the opaque cookie token.
pub struct SessionStore {
    sessions: HashMap<String, Session>,
    ttl: Duration,
}

impl SessionStore {
    pub fn new(ttl_hours: u64) -> Self {
        Self {
            sessions: HashMap::new(),
            ttl: Duration::from_secs(ttl_hours * 3600),
        }
    }

    /// Start a session for a fresh sign-in. Returns the cookie token.
    pub fn create(&mut self, auth: &AuthSession, profile: Option<Profile>) -> String {
        self.clear_stale();

        let token = generate_token();
        self.sessions.insert(
            token.clone(),
            Session {
                user_id: auth.user.id.clone(),
                email: auth.user.email.clone().unwrap_or_default(),
                access_token: auth.access_token.clone(),
                profile,
                expires_at: Instant::now() + self.ttl,
            },
        );
        tracing::debug!("Session created for user {}", auth.user.id);

        token
    }

    pub fn get(&mut self, token: &str) -> Option<Session> {
        let session = self.sessions.get(token)?;
        if Instant::now() >= session.expires_at {
            tracing::debug!("Session for user {} expired", session.user_id);
            self.sessions.remove(token);
            return None;
        }
        Some(session.clone())
    }

    /// Replace the cached profile on every session of that user.
    pub fn set_profile(&mut self, profile: Profile) {
        for session in self.sessions.values_mut() {
            if session.user_id == profile.id {
                session.profile = Some(profile.clone());
            }
        }
    }

    pub fn remove(&mut self, token: &str) -> Option<Session> {
        self.sessions.remove(token)
    }

    /// Drop every session of a user. Returns how many were dropped.
    pub fn remove_user(&mut self, user_id: &str) -> usize {
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.user_id != user_id);
        before - self.sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn clear_stale(&mut self) {
        let now = Instant::now();
        self.sessions.retain(|_, s| now < s.expires_at);
    }
}

/// Generate a cryptographically random 32-byte hex token.
fn generate_token() -> String {
    let mut rng = rand::thread_rng();
    let bytes: [u8; 32] = rng.gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
