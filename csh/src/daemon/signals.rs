//! SIGTERM/SIGINT-driven graceful shutdown, grounded on
//! `daemon/signals.rs`'s double-arm pattern: the first term signal
//! triggers a graceful shutdown (persisting touched settings), a
//! second one kills the process immediately in case the first one
//! hangs.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use signal_hook::{consts::TERM_SIGNALS, flag, iterator::Signals};
use tracing::{error, info};

use crate::context::ServerContext;

pub struct Handler {
    ctx: Arc<ServerContext>,
}

impl Handler {
    pub fn new(ctx: Arc<ServerContext>) -> Self {
        Handler { ctx }
    }

    pub fn spawn(self) -> anyhow::Result<()> {
        info!("spawning signal handler thread");

        let term_now = Arc::new(AtomicBool::new(false));
        for sig in TERM_SIGNALS {
            flag::register_conditional_shutdown(*sig, 1, Arc::clone(&term_now))?;
            flag::register(*sig, Arc::clone(&term_now))?;
        }

        let mut signals = Signals::new(TERM_SIGNALS).context("creating signal iterator")?;
        thread::spawn(move || {
            #[allow(clippy::never_loop)]
            for signal in &mut signals {
                assert!(TERM_SIGNALS.contains(&signal));

                info!("term sig handler: persisting settings");
                if let Err(e) = crate::config::write_back(&self.ctx.config, &self.ctx.settings) {
                    error!("error persisting settings on shutdown: {:?}", e);
                }

                info!("term sig handler: exiting");
                std::process::exit(0);
            }
        });

        Ok(())
    }
}
