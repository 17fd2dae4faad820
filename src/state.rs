use std::sync::Arc;

use tokio::sync::Mutex;

use crate::backend::Backend;
use crate::config::Config;
use crate::session::SessionStore;

#[derive(Clone)]
pub struct AppState {
    pub backend: Backend,
    pub config: Config,
    pub sessions: Arc<Mutex<SessionStore>>,
}

impl AppState {
    pub fn new(backend: Backend, config: Config) -> Self {
        let sessions = SessionStore::new(config.auth.session_hours);
        Self {
            backend,
            config,
            sessions: Arc::new(Mutex::new(sessions)),
        }
    }

    pub fn event_retention(&self) -> chrono::Duration {
        chrono::Duration::hours(self.config.events.retention_hours)
    }
}
