use log::{info, warn};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// In-memory admin sessions keyed by bearer token.
pub struct AdminSessions {
    sessions: Mutex<HashMap<String, Instant>>,
    timeout: Duration,
}

impl AdminSessions {
    pub fn new(timeout: Duration) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Issue a token when `password` matches the configured one. Login is
    /// refused outright while no admin password is configured.
    pub fn login(&self, password: &str, configured: Option<&str>) -> Option<String> {
        let Some(configured) = configured else {
            warn!("🔒 Admin login attempted but no admin password is configured");
            return None;
        };
        if password != configured {
            warn!("🔒 Admin login failed: invalid password");
            return None;
        }

        let token = Uuid::new_v4().to_string();
        let expires_at = Instant::now() + self.timeout;
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.retain(|_, expiry| *expiry > Instant::now());
            sessions.insert(token.clone(), expires_at);
        }
        info!("🔓 Admin session started");
        Some(token)
    }

    /// Accepts the raw `Authorization` header value, with or without the
    /// `Bearer ` prefix. Expired sessions are dropped on sight.
    pub fn is_authenticated(&self, authorization: Option<&str>) -> bool {
        let Some(header) = authorization else {
            return false;
        };
        let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
        if token.is_empty() {
            return false;
        }

        let Ok(mut sessions) = self.sessions.lock() else {
            return false;
        };
        match sessions.get(token) {
            Some(expiry) if *expiry > Instant::now() => true,
            Some(_) => {
                sessions.remove(token);
                false
            }
            None => false,
        }
    }

    pub fn active_sessions(&self) -> usize {
        self.sessions
            .lock()
            .map(|sessions| sessions.values().filter(|e| **e > Instant::now()).count())
            .unwrap_or(0)
    }
}
