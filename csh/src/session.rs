//! The in-memory session table, the session-ID generation serializer,
//! and the periodic expiration sweeper.
//!
//! Grounded on `daemon/server.rs`'s `Server::shells: Arc<Mutex<HashMap<..>>>`
//! pattern for the shared table, and `daemon/ttl_reaper.rs` for the
//! sleep-then-sweep periodic worker shape. The single-threaded ID
//! generator replaces `session.py::SessionIDGenerationItem`'s busy-wait
//! spin with a `crossbeam_channel` rendezvous, per `spec.md` §9's explicit
//! instruction not to reproduce that spin.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, instrument, span, Level};

use crate::common;
use crate::error::ResponseCode;

#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub session_id: String,
    pub username: String,
    pub peer_ip: IpAddr,
    pub created_at: DateTime<Utc>,
    pub cwd: String,
    ttl: Option<Duration>,
    expires_at: Option<Instant>,
}

impl Session {
    pub fn new(session_id: String, username: String, peer_ip: IpAddr, ttl: Option<Duration>) -> Self {
        Session {
            session_id,
            username,
            peer_ip,
            created_at: Utc::now(),
            cwd: String::new(),
            ttl,
            expires_at: ttl.map(|d| Instant::now() + d),
        }
    }
}

pub struct SessionTable {
    sessions: Arc<Mutex<HashMap<String, Session>>>,
    gen_tx: Sender<Sender<String>>,
    running: AtomicBool,
}

impl SessionTable {
    /// Build the session table and spawn its two background workers: the
    /// session-ID generation serializer and the expiration sweeper, which
    /// wakes every `sweep_interval`. Both workers share the same
    /// underlying map as the table itself, so ID collisions are checked
    /// against sessions that are actually live.
    pub fn spawn(sweep_interval: Duration) -> Arc<SessionTable> {
        let sessions: Arc<Mutex<HashMap<String, Session>>> = Arc::new(Mutex::new(HashMap::new()));
        let (gen_tx, gen_rx) = crossbeam_channel::unbounded::<Sender<String>>();

        {
            let sessions = Arc::clone(&sessions);
            thread::spawn(move || run_id_generator(gen_rx, sessions));
        }

        let table = Arc::new(SessionTable { sessions, gen_tx, running: AtomicBool::new(true) });

        let sweep_table = Arc::clone(&table);
        thread::spawn(move || run_sweeper(sweep_table, sweep_interval));

        table
    }

    /// Request a fresh, collision-free session ID from the generation
    /// serializer and block until it replies.
    #[instrument(skip(self))]
    pub fn generate_id(&self) -> String {
        let (reply_tx, reply_rx) = crossbeam_channel::bounded(1);
        self.gen_tx.send(reply_tx).expect("session id generator thread is gone");
        reply_rx.recv().expect("session id generator thread is gone")
    }

    #[instrument(skip(self, session))]
    pub fn insert(&self, session: Session) {
        let span = span!(Level::DEBUG, "sessions.lock");
        let _enter = span.enter();
        let mut sessions = self.sessions.lock().expect("session table lock poisoned");
        sessions.insert(session.session_id.clone(), session);
    }

    pub fn count_for_user(&self, username: &str) -> usize {
        let sessions = self.sessions.lock().expect("session table lock poisoned");
        sessions.values().filter(|s| s.username == username).count()
    }

    /// Check the per-user session count against `limit` and insert
    /// `session` if still under it, as a single critical section so the
    /// count and the insertion can never race against a concurrent
    /// login for the same user (spec.md §5's admission-control
    /// requirement). Returns `Err(())` if the limit was already
    /// reached; the caller's freshly generated session ID is simply
    /// discarded in that case.
    #[instrument(skip(self, session))]
    pub fn try_insert_with_limit(&self, session: Session, limit: Option<usize>) -> Result<(), ()> {
        let mut sessions = self.sessions.lock().expect("session table lock poisoned");
        if let Some(limit) = limit {
            let count = sessions.values().filter(|s| s.username == session.username).count();
            if count >= limit {
                return Err(());
            }
        }
        sessions.insert(session.session_id.clone(), session);
        Ok(())
    }

    /// Validate a presented session per spec.md §4.6: present in the
    /// table, peer IP matches, and not expired. A successful check
    /// renews the session's expiration using its *own* originally chosen
    /// TTL rather than the server's current `default_expire` setting.
    #[instrument(skip(self))]
    pub fn validate_and_renew(&self, session_id: &str, peer_ip: IpAddr) -> Result<Session, ResponseCode> {
        let mut sessions = self.sessions.lock().expect("session table lock poisoned");
        let Some(session) = sessions.get_mut(session_id) else {
            return Err(ResponseCode::SessionInvalid);
        };
        if session.peer_ip != peer_ip {
            return Err(ResponseCode::SessionInvalid);
        }
        if let Some(expires_at) = session.expires_at {
            if Instant::now() > expires_at {
                sessions.remove(session_id);
                return Err(ResponseCode::SessionInvalid);
            }
        }
        if let Some(ttl) = session.ttl {
            session.expires_at = Some(Instant::now() + ttl);
        }
        Ok(sessions.get(session_id).expect("just renewed").clone())
    }

    pub fn update_cwd(&self, session_id: &str, cwd: String) {
        let mut sessions = self.sessions.lock().expect("session table lock poisoned");
        if let Some(session) = sessions.get_mut(session_id) {
            session.cwd = cwd;
        }
    }

    pub fn remove(&self, session_id: &str) -> bool {
        let mut sessions = self.sessions.lock().expect("session table lock poisoned");
        sessions.remove(session_id).is_some()
    }

    pub fn clear_all(&self) {
        let mut sessions = self.sessions.lock().expect("session table lock poisoned");
        sessions.clear();
    }

    pub fn clear_for_user(&self, username: &str) {
        let mut sessions = self.sessions.lock().expect("session table lock poisoned");
        sessions.retain(|_, s| s.username != username);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn run_id_generator(rx: Receiver<Sender<String>>, sessions: Arc<Mutex<HashMap<String, Session>>>) {
    // Single-threaded by construction: requests are drained one at a time
    // off `rx`, so two in-flight generations can never race each other.
    for reply in rx {
        let mut id = common::generate_session_id();
        loop {
            let collision = sessions.lock().expect("session table lock poisoned").contains_key(&id);
            if !collision {
                break;
            }
            id = common::generate_session_id();
        }
        let _ = reply.send(id);
    }
    debug!("session id generator thread exiting");
}

fn run_sweeper(table: Arc<SessionTable>, interval: Duration) {
    info!("session expiration sweeper running every {:?}", interval);
    loop {
        thread::sleep(interval);
        if !table.running.load(Ordering::SeqCst) {
            break;
        }
        let now = Instant::now();
        let mut sessions = table.sessions.lock().expect("session table lock poisoned");
        sessions.retain(|_, s| match s.expires_at {
            Some(expires_at) => now <= expires_at,
            None => true,
        });
    }
    info!("session expiration sweeper exiting");
}
