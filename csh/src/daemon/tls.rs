//! Optional TLS wrapping of the listening socket, built from the
//! `secure` config key. Grounded on `server.py`'s `ssl.wrap_socket`
//! call: a certfile/keyfile pair turns the plain TCP listener into a
//! TLS one. `rustls` only negotiates modern TLS, so the source's
//! `protocol` field (e.g. a specific SSL/TLS version enum) is accepted
//! for config-file compatibility but otherwise unused; rustls always
//! negotiates the highest protocol version both sides support.

use std::fs::File;
use std::io::{self, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;

use anyhow::Context;

use crate::config::SecureConfig;

/// Build a `rustls::ServerConfig` from the config file's `secure`
/// setting, or `None` if TLS is disabled.
pub fn server_config(secure: &SecureConfig) -> anyhow::Result<Option<Arc<rustls::ServerConfig>>> {
    let SecureConfig::Enabled { certfile, keyfile, .. } = secure else {
        return Ok(None);
    };

    let certs = load_certs(certfile)?;
    let key = load_key(keyfile)?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("building TLS server config")?;

    Ok(Some(Arc::new(config)))
}

fn load_certs(path: &str) -> anyhow::Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("opening certfile \"{path}\""))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("parsing certfile \"{path}\""))
}

fn load_key(path: &str) -> anyhow::Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("opening keyfile \"{path}\""))?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .with_context(|| format!("parsing keyfile \"{path}\""))?
        .ok_or_else(|| anyhow::anyhow!("no private key found in \"{path}\""))
}

/// A TCP stream that may or may not be wrapped in a TLS session,
/// implementing `Read`/`Write` either way so the connection handler
/// never needs to know which.
pub enum MaybeTlsStream {
    Plain(TcpStream),
    Tls(Box<rustls::StreamOwned<rustls::ServerConnection, TcpStream>>),
}

impl Read for MaybeTlsStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            MaybeTlsStream::Plain(s) => s.read(buf),
            MaybeTlsStream::Tls(s) => s.read(buf),
        }
    }
}

impl Write for MaybeTlsStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            MaybeTlsStream::Plain(s) => s.write(buf),
            MaybeTlsStream::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            MaybeTlsStream::Plain(s) => s.flush(),
            MaybeTlsStream::Tls(s) => s.flush(),
        }
    }
}

/// Wrap an accepted connection in a TLS session. The handshake itself
/// happens lazily on the connection handler's first read or write, the
/// way `rustls::StreamOwned` is meant to be used.
pub fn accept(tls_config: &Arc<rustls::ServerConfig>, stream: TcpStream) -> anyhow::Result<MaybeTlsStream> {
    let conn = rustls::ServerConnection::new(Arc::clone(tls_config)).context("starting TLS session")?;
    let tls_stream = rustls::StreamOwned::new(conn, stream);
    Ok(MaybeTlsStream::Tls(Box::new(tls_stream)))
}
