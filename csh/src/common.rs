//! The common module is a grab bag of shared utility functions: password
//! hashing, session ID generation, and the timestamp/hostname/IP helpers
//! the status and login responses need.

use std::net::UdpSocket;

use chrono::{DateTime, Datelike, Timelike, Utc};
use csh_protocol::Value;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::consts;

/// Hash a password with SHA-256 and return the digest as a lowercase hex
/// string, matching `auth.py::hash_password`.
pub fn hash_password(password: &str) -> String {
    let digest = Sha256::digest(password.as_bytes());
    hex::encode(digest)
}

/// Generate a random session ID: 64 random bytes, hex-encoded into 128
/// lowercase hex characters.
pub fn generate_session_id() -> String {
    let mut bytes = [0u8; consts::SESSION_ID_RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Encode a UTC instant as the 9-tuple `(y, m, d, h, mi, s, wday, yday,
/// isdst)` the wire protocol uses for timestamps, mirroring Python's
/// `time.struct_time`/`utctimetuple()`. `wday` is Monday=0 and `isdst`
/// is always `-1`, since the tuple is always expressed in UTC.
pub fn timestamp_tuple(now: DateTime<Utc>) -> Value {
    Value::Tuple(vec![
        Value::Int(now.year() as i64),
        Value::Int(now.month() as i64),
        Value::Int(now.day() as i64),
        Value::Int(now.hour() as i64),
        Value::Int(now.minute() as i64),
        Value::Int(now.second() as i64),
        Value::Int(now.weekday().num_days_from_monday() as i64),
        Value::Int(now.ordinal() as i64),
        Value::Int(-1),
    ])
}

/// Substitute the `%HOSTNAME%` placeholder in a server name setting with
/// the system hostname, as `runtime.py` does.
pub fn substitute_hostname(name: &str) -> String {
    if name.eq_ignore_ascii_case("%HOSTNAME%") {
        hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_else(|| "localhost".to_string())
    } else {
        name.to_string()
    }
}

/// Substitute the `%IP%` placeholder in a config host field with a
/// best-effort local IP address, matching `runtime.py::get_local_ip`: open
/// a UDP socket "connected" to a well-known off-host address and read back
/// the address the kernel picked for the outgoing route, falling back to
/// loopback if that fails.
pub fn substitute_local_ip(host: &str) -> String {
    if host.eq_ignore_ascii_case("%IP%") {
        local_ip()
    } else {
        host.to_string()
    }
}

fn local_ip() -> String {
    (|| -> std::io::Result<String> {
        let socket = UdpSocket::bind("0.0.0.0:0")?;
        socket.connect("10.255.255.255:1")?;
        Ok(socket.local_addr()?.ip().to_string())
    })()
    .unwrap_or_else(|_| "127.0.0.1".to_string())
}
