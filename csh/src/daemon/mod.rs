//! The accept loop: bind the configured host/port, optionally wrap
//! each accepted connection in TLS, and hand it off to a worker
//! thread. Grounded on `daemon/mod.rs`/`daemon/server.rs`'s
//! bind-then-spawn-a-thread-per-connection shape, generalized from a
//! single Unix socket listener to a TCP listener with optional TLS.

mod signals;
mod tls;

use std::net::TcpListener;
use std::sync::Arc;
use std::thread;

use anyhow::Context;
use tracing::{error, info, instrument};

use crate::config;
use crate::context::ServerContext;

#[instrument(skip_all)]
pub fn run(ctx: Arc<ServerContext>) -> anyhow::Result<()> {
    let (ip, port) = config::parse_host_port(&ctx.config.host, ctx.config.port)?;
    let listener = TcpListener::bind((ip, port)).context("binding listener socket")?;
    info!(address = %ip, port, "listening");

    let tls_config = tls::server_config(&ctx.config.secure)?;

    signals::Handler::new(Arc::clone(&ctx)).spawn()?;

    serve(ctx, listener, tls_config)
}

fn serve(
    ctx: Arc<ServerContext>,
    listener: TcpListener,
    tls_config: Option<Arc<rustls::ServerConfig>>,
) -> anyhow::Result<()> {
    let mut conn_counter: u64 = 0;
    for stream in listener.incoming() {
        let stream = match stream {
            Ok(stream) => stream,
            Err(err) => {
                error!(%err, "accepting connection");
                continue;
            }
        };

        conn_counter += 1;
        let conn_id = conn_counter;
        let ctx = Arc::clone(&ctx);
        let tls_config = tls_config.clone();

        thread::spawn(move || handle_conn(ctx, stream, conn_id, tls_config));
    }

    Ok(())
}

#[instrument(skip_all, fields(cid = conn_id))]
fn handle_conn(
    ctx: Arc<ServerContext>,
    stream: std::net::TcpStream,
    conn_id: u64,
    tls_config: Option<Arc<rustls::ServerConfig>>,
) {
    let peer_ip = match stream.peer_addr() {
        Ok(addr) => addr.ip(),
        Err(err) => {
            error!(%err, "reading peer address");
            return;
        }
    };

    match tls_config {
        Some(tls_config) => match tls::accept(&tls_config, stream) {
            Ok(mut tls_stream) => crate::connection::handle(&ctx, &mut tls_stream, peer_ip),
            Err(err) => error!(%err, "TLS handshake failed"),
        },
        None => {
            let mut stream = stream;
            crate::connection::handle(&ctx, &mut stream, peer_ip);
        }
    }
}
