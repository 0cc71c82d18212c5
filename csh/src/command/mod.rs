//! The two numeric command-dispatch tables: session commands 0-13 and
//! admin commands 0-15. Grounded on `commands.py`'s `BaseCommand`/
//! `admin.py`'s `BaseAdminCommand` validate-then-execute shape, folded
//! here into free functions over an explicit `&ServerContext` rather
//! than a class hierarchy, per `spec.md` §9's note to drop the source's
//! positional-keyword command objects for typed argument access.

pub mod admin_cmds;
pub mod session_cmds;

use std::net::IpAddr;

use csh_protocol::Value;
use tracing::warn;

use crate::context::ServerContext;
use crate::error::{CommandResult, ResponseCode};
use crate::session::Session;
use crate::users::Permission;

/// Map a filesystem I/O error onto the wire's closed error taxonomy:
/// not-found gets its own code so the client can distinguish it from a
/// generic failure, and the message never repeats the host-side error
/// text (which may embed the absolute path).
pub fn map_io_error(err: &std::io::Error, client_path: &str) -> (ResponseCode, String) {
    if err.kind() == std::io::ErrorKind::NotFound {
        (ResponseCode::NotFound, format!("path not found: \"{client_path}\""))
    } else {
        (ResponseCode::FilesystemError, "filesystem operation failed".to_string())
    }
}

fn required_text<'a>(args: &'a Value, key: &str) -> CommandResult<&'a str> {
    args.get_text(key)
        .ok_or_else(|| (ResponseCode::BadArguments, format!("missing or invalid \"{key}\" argument")))
}

fn optional_int(args: &Value, key: &str, default: i64) -> i64 {
    args.get_int(key).unwrap_or(default)
}

/// Build the final response mapping for a successful command: `code:0`
/// plus whatever fields the handler produced.
fn success(fields: Vec<(&'static str, Value)>) -> Value {
    let mut entries = vec![(Value::Text("code".to_string()), Value::Int(0))];
    entries.extend(fields.into_iter().map(|(k, v)| (Value::Text(k.to_string()), v)));
    Value::Mapping(entries)
}

fn failure((code, message): (ResponseCode, String)) -> Value {
    code.response(message)
}

/// Run one of the 14 session commands (§4.4). The caller has already
/// validated the session and resolved its owning user; this function
/// only checks the command's required permission letter before
/// dispatching.
pub fn dispatch_session(
    ctx: &ServerContext,
    command: i64,
    session: &Session,
    permission: Permission,
    args: &Value,
) -> Value {
    let requires_write = matches!(command, 2 | 3 | 4 | 5 | 6 | 8 | 9);
    if requires_write && !permission.can_write() {
        return failure((ResponseCode::PermissionDenied, "permission denied".to_string()));
    }
    if !requires_write && !permission.can_read() {
        return failure((ResponseCode::PermissionDenied, "permission denied".to_string()));
    }

    let result = match command {
        0 => session_cmds::logout(ctx, session),
        1 => session_cmds::read(ctx, session, args),
        2 => session_cmds::write(ctx, session, args),
        3 => session_cmds::delete(ctx, session, args),
        4 => session_cmds::rename(ctx, session, args),
        5 => session_cmds::mkdir(ctx, session, args),
        6 => session_cmds::rmdir(ctx, session, args),
        7 => session_cmds::list(ctx, session, args),
        8 => session_cmds::mv(ctx, session, args),
        9 => session_cmds::copy(ctx, session, args),
        10 => session_cmds::chdir(ctx, session, args),
        11 => session_cmds::cwd(ctx, session),
        12 => session_cmds::size(ctx, session, args),
        13 => session_cmds::exists(ctx, session, args),
        other => {
            warn!(command = other, "unreachable session command id");
            Err((ResponseCode::UnknownCommand, "unknown command id".to_string()))
        }
    };

    match result {
        Ok(fields) => success(fields),
        Err(err) => failure(err),
    }
}

/// Run one of the 16 admin commands (§4.5). The caller has already
/// authenticated the admin credentials (username exists, password
/// matches); per `spec.md` §9 this deliberately does not additionally
/// require the `a` permission letter, matching the reference behavior.
pub fn dispatch_admin(
    ctx: &ServerContext,
    admin_command: i64,
    peer_ip: IpAddr,
    args: &Value,
) -> Value {
    let result = match admin_command {
        0 => admin_cmds::shutdown(ctx),
        1 => admin_cmds::create_user(ctx, args),
        2 => admin_cmds::get_user(ctx, args),
        3 => admin_cmds::update_user(ctx, args),
        4 => admin_cmds::delete_user(ctx, args),
        5 => admin_cmds::clear_sessions(ctx),
        6 => admin_cmds::update_rate_limit(ctx, args),
        7 => admin_cmds::update_server_name(ctx, args),
        8 => admin_cmds::update_session_expiration(ctx, args),
        9 => admin_cmds::format(ctx),
        10 => admin_cmds::backup(ctx, args),
        11 => admin_cmds::get_server_path(ctx),
        12 => admin_cmds::run_shell(ctx, args),
        13 => admin_cmds::all_users(ctx),
        14 => admin_cmds::update_max_sessions(ctx, args),
        15 => admin_cmds::get_all_settings(ctx),
        other => {
            warn!(admin_command = other, peer_ip = %peer_ip, "unreachable admin command id");
            Err((ResponseCode::UnknownCommand, "unknown command id".to_string()))
        }
    };

    match result {
        Ok(fields) => success(fields),
        Err(err) => failure(err),
    }
}
