//! The per-connection, one-request-one-response handler (`spec.md`
//! §4.3/§4.10), grounded on `connection.py::ConnectionHandler.handle`.
//!
//! Every branch below returns a response as soon as it has one to give,
//! fixing a source bug where an error response was built but execution
//! fell through to subsequent checks instead of stopping there.

use std::io::{Read, Write};
use std::net::IpAddr;

use csh_protocol::{read_frame, write_frame, CodecError, Value};
use tracing::{debug, info, warn};

use crate::command::{dispatch_admin, dispatch_session};
use crate::context::ServerContext;
use crate::error::ResponseCode;

/// Handle exactly one request on `stream`: read one frame, route it,
/// write exactly one response frame, then return. The caller is
/// responsible for closing the connection once this returns.
pub fn handle(ctx: &ServerContext, stream: &mut (impl Read + Write), peer_ip: IpAddr) {
    if !ctx.rate_limiter.admit(peer_ip) {
        respond(stream, ResponseCode::RateLimited.default_response());
        return;
    }

    let request = match read_request(stream) {
        Ok(request) => request,
        Err(ReadError::BadMagic) => {
            respond(stream, ResponseCode::BadMagic.default_response());
            return;
        }
        Err(ReadError::Other(err)) => {
            debug!(%err, "connection closed before a full request arrived");
            return;
        }
    };

    let response = route(ctx, &request, peer_ip);
    respond(stream, response);

    if ctx.shutdown_requested() {
        info!("shutdown requested, persisting settings and exiting");
        if let Err(err) = crate::config::write_back(&ctx.config, &ctx.settings) {
            warn!(%err, "failed to persist settings on shutdown");
        }
        std::process::exit(0);
    }
}

enum ReadError {
    BadMagic,
    Other(CodecError),
}

fn read_request(stream: &mut impl Read) -> Result<Value, ReadError> {
    let payload = read_frame(stream).map_err(|err| match err {
        CodecError::BadMagic => ReadError::BadMagic,
        other => ReadError::Other(other),
    })?;
    let (value, _) = Value::decode(&payload).map_err(ReadError::Other)?;
    Ok(value)
}

fn route(ctx: &ServerContext, request: &Value, peer_ip: IpAddr) -> Value {
    let Some(command) = request.get("command") else {
        return ResponseCode::MissingCommand.default_response();
    };

    match command {
        Value::Text(s) if s == "L" => handle_login(ctx, request, peer_ip),
        Value::Text(s) if s == "I" => handle_status(ctx),
        Value::Text(s) if s == "A" => handle_admin(ctx, request, peer_ip),
        Value::Text(s) if s == "CS" => handle_clear_user_sessions(ctx, request),
        Value::Int(id) => handle_session_command(ctx, *id, request, peer_ip),
        _ => ResponseCode::UnknownCommand.default_response(),
    }
}

fn handle_login(ctx: &ServerContext, request: &Value, peer_ip: IpAddr) -> Value {
    let (Some(username), Some(password)) = (request.get_text("username"), request.get_text("password")) else {
        return ResponseCode::MissingCredentials.default_response();
    };
    if !ctx.users.exists(username) {
        return ResponseCode::UnknownUser.default_response();
    }
    if !ctx.users.check_password(username, password) {
        return ResponseCode::PasswordMismatch.default_response();
    }

    let allow_change_expire = ctx.settings.allow_change_expire();
    let ttl = if allow_change_expire {
        request
            .get_int("expiration_time")
            .map(|secs| secs as u64)
            .or_else(|| ctx.settings.default_expire())
    } else {
        ctx.settings.default_expire()
    }
    .map(std::time::Duration::from_secs);

    let session_id = ctx.sessions.generate_id();
    let session = crate::session::Session::new(session_id.clone(), username.to_string(), peer_ip, ttl);
    if ctx.sessions.try_insert_with_limit(session, ctx.settings.session_limit()).is_err() {
        return ResponseCode::SessionLimitReached.default_response();
    }

    Value::mapping([
        ("code", Value::Int(0)),
        ("session_id", Value::Text(session_id)),
        ("timestamp", crate::common::timestamp_tuple(chrono::Utc::now())),
    ])
}

fn handle_status(ctx: &ServerContext) -> Value {
    Value::mapping([
        ("code", Value::Int(0)),
        ("status", Value::Text("OK".to_string())),
        ("timestamp", crate::common::timestamp_tuple(chrono::Utc::now())),
        ("version", Value::Text(crate::consts::VERSION.to_string())),
        ("name", Value::Text(ctx.settings.server_name())),
        ("os", Value::Text(std::env::consts::OS.to_string())),
        ("language", Value::Text(crate::consts::LANG.to_string())),
    ])
}

fn handle_admin(ctx: &ServerContext, request: &Value, peer_ip: IpAddr) -> Value {
    let (Some(username), Some(password)) = (request.get_text("username"), request.get_text("password")) else {
        return ResponseCode::MissingCredentials.default_response();
    };
    if !ctx.users.exists(username) {
        return ResponseCode::UnknownUser.default_response();
    }
    if !ctx.users.check_password(username, password) {
        return ResponseCode::PasswordMismatch.default_response();
    }

    let Some(admin_command) = request.get_int("admin_command") else {
        return ResponseCode::MissingCommand.default_response();
    };
    let Some(args) = request.get("args").filter(|v| matches!(v, Value::Mapping(_))) else {
        return ResponseCode::MissingArgs.default_response();
    };

    dispatch_admin(ctx, admin_command, peer_ip, args)
}

fn handle_clear_user_sessions(ctx: &ServerContext, request: &Value) -> Value {
    let (Some(username), Some(password)) = (request.get_text("username"), request.get_text("password")) else {
        return ResponseCode::MissingCredentials.default_response();
    };
    if !ctx.users.exists(username) {
        return ResponseCode::UnknownUser.default_response();
    }
    if !ctx.users.check_password(username, password) {
        return ResponseCode::PasswordMismatch.default_response();
    }
    ctx.sessions.clear_for_user(username);
    Value::mapping([("code", Value::Int(0))])
}

fn handle_session_command(ctx: &ServerContext, command: i64, request: &Value, peer_ip: IpAddr) -> Value {
    if !(0..=13).contains(&command) {
        return ResponseCode::UnknownCommand.default_response();
    }
    let (Some(username), Some(session_id)) = (request.get_text("username"), request.get_text("session_id")) else {
        return ResponseCode::MissingSessionFields.default_response();
    };
    let Some(args) = request.get("args").filter(|v| matches!(v, Value::Mapping(_))) else {
        return ResponseCode::MissingArgs.default_response();
    };

    let session = match ctx.sessions.validate_and_renew(session_id, peer_ip) {
        Ok(session) => session,
        Err(code) => return code.default_response(),
    };
    if session.username != username {
        return ResponseCode::SessionInvalid.default_response();
    }
    let Some(user) = ctx.users.get(&session.username) else {
        return ResponseCode::SessionInvalid.default_response();
    };

    dispatch_session(ctx, command, &session, user.permissions, args)
}

/// Write one response frame, logging (rather than panicking) if the
/// peer has already gone away.
fn respond(stream: &mut impl Write, value: Value) {
    let payload = value.encode();
    if let Err(err) = write_frame(stream, &payload) {
        warn!(%err, "error writing response to peer");
    }
}
