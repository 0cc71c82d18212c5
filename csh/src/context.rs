//! The server context bundles every piece of shared state a connection
//! handler or command needs, so handlers take an explicit `&ServerContext`
//! rather than reaching for process-wide globals, per `spec.md` §9's
//! note that the source's global mutable state becomes a single owning
//! object passed explicitly to handlers.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ServerConfig, Settings};
use crate::rate_limit::RateLimiter;
use crate::sandbox::Sandbox;
use crate::session::SessionTable;
use crate::users::UsersStore;

pub struct ServerContext {
    pub config: ServerConfig,
    pub settings: Settings,
    pub sandbox: Sandbox,
    pub users: UsersStore,
    pub sessions: Arc<SessionTable>,
    pub rate_limiter: RateLimiter,
    /// Set by the `shutdown` admin command. The connection handler
    /// checks this once it has finished writing the response, and
    /// exits the process only after the response made it onto the
    /// wire.
    shutdown: AtomicBool,
}

impl ServerContext {
    pub fn new(config: ServerConfig, settings: Settings, users: UsersStore) -> std::io::Result<Arc<Self>> {
        let sandbox = Sandbox::new(config.path.clone())?;
        let sweep_interval = Duration::from_secs(settings.session_expiration_delay().max(1));
        let sessions = SessionTable::spawn(sweep_interval);
        let rate_limiter = RateLimiter::new(settings.rate_limit().unwrap_or_default().into_iter().collect());
        Ok(Arc::new(ServerContext {
            config,
            settings,
            sandbox,
            users,
            sessions,
            rate_limiter,
            shutdown: AtomicBool::new(false),
        }))
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }

    pub fn shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}
