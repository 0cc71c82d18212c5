//! The 16 administrative commands (`spec.md` §4.5), grounded on
//! `admin.py`'s one-class-per-command handlers. Unlike the session
//! commands, these act on server-wide state (the users file, the
//! runtime settings, the session table, the server root itself) rather
//! than a single session's view of the filesystem.

use std::fs;
use std::io::Write as _;
use std::process::Command;

use chrono::Utc;
use csh_protocol::Value;
use tracing::info;

use super::{map_io_error, required_text};
use crate::consts;
use crate::context::ServerContext;
use crate::error::{CommandResult, ResponseCode};
use crate::rate_limit::Rule;
use crate::users::{Permission, UserUpdate};

type Fields = Vec<(&'static str, Value)>;

fn bad_args(message: impl Into<String>) -> (ResponseCode, String) {
    (ResponseCode::BadArguments, message.into())
}

pub fn shutdown(ctx: &ServerContext) -> CommandResult<Fields> {
    info!("shutdown requested via admin command");
    ctx.request_shutdown();
    Ok(vec![])
}

pub fn create_user(ctx: &ServerContext, args: &Value) -> CommandResult<Fields> {
    let username = required_text(args, "username")?;
    let password = required_text(args, "password")?;
    let permissions = required_permission(args)?;

    ctx.users
        .create_user(username, password, permissions)
        .map_err(|e| (ResponseCode::Internal, e.to_string()))?;
    Ok(vec![])
}

pub fn get_user(ctx: &ServerContext, args: &Value) -> CommandResult<Fields> {
    let username = required_text(args, "username")?;
    let user = ctx.users.get(username).ok_or_else(|| (ResponseCode::UnknownUser, format!("no such user \"{username}\"")))?;
    Ok(vec![
        ("password_hash", Value::Text(user.password_hash)),
        ("permissions", Value::Text(user.permissions.as_str().to_string())),
    ])
}

pub fn update_user(ctx: &ServerContext, args: &Value) -> CommandResult<Fields> {
    let username = required_text(args, "username")?;
    let to_modify = args.get("to_modify").ok_or_else(|| bad_args("missing \"to_modify\" argument"))?;

    let password = to_modify.get_text("password").map(str::to_string);
    let permissions = match to_modify.get_text("permissions") {
        Some(p) => Some(Permission::from_str(p).ok_or_else(|| bad_args(format!("unknown permission \"{p}\"")))?),
        None => None,
    };

    let found = ctx
        .users
        .update_user(username, UserUpdate { password, permissions })
        .map_err(|e| (ResponseCode::Internal, e.to_string()))?;
    if !found {
        return Err((ResponseCode::UnknownUser, format!("no such user \"{username}\"")));
    }
    Ok(vec![])
}

pub fn delete_user(ctx: &ServerContext, args: &Value) -> CommandResult<Fields> {
    let username = required_text(args, "username")?;
    let found = ctx.users.delete_user(username).map_err(|e| (ResponseCode::Internal, e.to_string()))?;
    if !found {
        return Err((ResponseCode::UnknownUser, format!("no such user \"{username}\"")));
    }
    ctx.sessions.clear_for_user(username);
    Ok(vec![])
}

pub fn clear_sessions(ctx: &ServerContext) -> CommandResult<Fields> {
    ctx.sessions.clear_all();
    Ok(vec![])
}

pub fn update_rate_limit(ctx: &ServerContext, args: &Value) -> CommandResult<Fields> {
    let new_limit = args.get("new_limit").ok_or_else(|| bad_args("missing \"new_limit\" argument"))?;
    let rules = match new_limit {
        Value::Null => None,
        Value::List(items) | Value::Tuple(items) => {
            let mut rules = Vec::with_capacity(items.len());
            for item in items {
                let pair = item.as_list().ok_or_else(|| bad_args("each rate limit rule must be a [window, max] pair"))?;
                let [window, max] = pair else {
                    return Err(bad_args("each rate limit rule must be a [window, max] pair"));
                };
                let window_secs = window.as_int().ok_or_else(|| bad_args("rate limit window must be an integer"))?;
                let max_requests = max.as_int().ok_or_else(|| bad_args("rate limit max must be an integer"))?;
                rules.push(Rule { window_secs: window_secs as u64, max_requests: max_requests as u64 });
            }
            Some(rules)
        }
        _ => return Err(bad_args("\"new_limit\" must be null or a list of [window, max] pairs")),
    };

    ctx.rate_limiter.set_rules(rules.clone().unwrap_or_default());
    ctx.settings.set_rate_limit(rules);
    Ok(vec![])
}

pub fn update_server_name(ctx: &ServerContext, args: &Value) -> CommandResult<Fields> {
    let name = required_text(args, "name")?;
    ctx.settings.set_server_name(name.to_string());
    Ok(vec![])
}

pub fn update_session_expiration(ctx: &ServerContext, args: &Value) -> CommandResult<Fields> {
    let default_expire = match args.get("default_expire") {
        Some(Value::Null) | None => None,
        Some(v) => Some(v.as_int().ok_or_else(|| bad_args("\"default_expire\" must be an integer or null"))? as u64),
    };
    let allow_change_expire = args.get_bool("allow_change_expire").unwrap_or(true);
    ctx.settings.set_session_expiration(default_expire, allow_change_expire);
    Ok(vec![])
}

pub fn format(ctx: &ServerContext) -> CommandResult<Fields> {
    let root = ctx.sandbox.root();
    for entry in fs::read_dir(root).map_err(|e| map_io_error(&e, "/"))? {
        let entry = entry.map_err(|e| map_io_error(&e, "/"))?;
        let path = entry.path();
        let result = if path.is_dir() { fs::remove_dir_all(&path) } else { fs::remove_file(&path) };
        result.map_err(|e| map_io_error(&e, "/"))?;
    }
    Ok(vec![])
}

pub fn backup(ctx: &ServerContext, args: &Value) -> CommandResult<Fields> {
    let path = required_text(args, "path")?;
    let replace = args.get_bool("replace").unwrap_or(false);

    let dest_dir =
        ctx.sandbox.resolve("", path).map_err(|code| (code, "destination path validation failed".to_string()))?;
    if !dest_dir.is_dir() {
        return Err((ResponseCode::PathValidation, format!("\"{path}\" is not a directory")));
    }

    let name = format!(
        "{}{}{}",
        consts::BACKUP_PREFIX,
        Utc::now().format(consts::BACKUP_TIMESTAMP_FMT),
        consts::BACKUP_SUFFIX
    );
    let archive_path = dest_dir.join(&name);
    if archive_path.exists() && !replace {
        return Err((ResponseCode::BackupExists, format!("backup \"{name}\" already exists")));
    }

    let file = fs::File::create(&archive_path).map_err(|e| map_io_error(&e, path))?;
    let mut zip = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    let root = ctx.sandbox.root();

    for entry in walkdir::WalkDir::new(root).into_iter().filter_map(Result::ok) {
        let entry_path = entry.path();
        if entry_path == archive_path {
            continue;
        }
        let rel = entry_path.strip_prefix(root).expect("walkdir yields paths under root");
        if rel.as_os_str().is_empty() {
            continue;
        }
        let name = rel.to_string_lossy();
        if entry.file_type().is_dir() {
            zip.add_directory(name, options).map_err(|e| (ResponseCode::Internal, e.to_string()))?;
        } else {
            zip.start_file(name, options).map_err(|e| (ResponseCode::Internal, e.to_string()))?;
            let contents = fs::read(entry_path).map_err(|e| map_io_error(&e, path))?;
            zip.write_all(&contents).map_err(|e| (ResponseCode::Internal, e.to_string()))?;
        }
    }
    zip.finish().map_err(|e| (ResponseCode::Internal, e.to_string()))?;

    Ok(vec![("path", Value::Text(name))])
}

pub fn get_server_path(ctx: &ServerContext) -> CommandResult<Fields> {
    Ok(vec![("data", Value::Text(ctx.sandbox.root().to_string_lossy().into_owned()))])
}

pub fn run_shell(_ctx: &ServerContext, args: &Value) -> CommandResult<Fields> {
    let command = required_text(args, "command")?;
    let output = Command::new("sh")
        .arg("-c")
        .arg(command)
        .output()
        .map_err(|e| (ResponseCode::Internal, format!("failed to run shell command: {e}")))?;

    Ok(vec![
        ("stdout", Value::Bytes(output.stdout)),
        ("stderr", Value::Bytes(output.stderr)),
        ("return_code", Value::Int(output.status.code().unwrap_or(-1) as i64)),
    ])
}

pub fn all_users(ctx: &ServerContext) -> CommandResult<Fields> {
    let names = ctx.users.all_usernames().into_iter().map(Value::Text).collect();
    Ok(vec![("data", Value::List(names))])
}

pub fn update_max_sessions(ctx: &ServerContext, args: &Value) -> CommandResult<Fields> {
    let limit = match args.get("session_limit") {
        Some(Value::Null) | None => None,
        Some(v) => Some(v.as_int().ok_or_else(|| bad_args("\"session_limit\" must be an integer or null"))? as usize),
    };
    ctx.settings.set_session_limit(limit);
    Ok(vec![])
}

pub fn get_all_settings(ctx: &ServerContext) -> CommandResult<Fields> {
    let snapshot = ctx.settings.full_snapshot(&ctx.config.secure);
    let mut entries: Vec<(Value, Value)> =
        snapshot.into_iter().map(|(k, v)| (Value::Text(k), json_to_value(v))).collect();
    entries.sort_by(|a, b| a.0.as_text().cmp(&b.0.as_text()));
    Ok(vec![("data", Value::Mapping(entries))])
}

fn required_permission(args: &Value) -> CommandResult<Permission> {
    let text = required_text(args, "permissions")?;
    Permission::from_str(text).ok_or_else(|| bad_args(format!("unknown permission \"{text}\"")))
}

fn json_to_value(value: serde_json::Value) -> Value {
    match value {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::Int(i)
            } else {
                Value::Float(n.as_f64().unwrap_or(0.0) as f32)
            }
        }
        serde_json::Value::String(s) => Value::Text(s),
        serde_json::Value::Array(items) => Value::List(items.into_iter().map(json_to_value).collect()),
        serde_json::Value::Object(map) => {
            Value::Mapping(map.into_iter().map(|(k, v)| (Value::Text(k), json_to_value(v))).collect())
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::CliOverrides;
    use crate::context::ServerContext;
    use crate::users::UsersStore;

    fn test_ctx() -> (tempfile::TempDir, std::sync::Arc<ServerContext>) {
        let dir = tempfile::tempdir().unwrap();
        let overrides = CliOverrides { path: Some(dir.path().to_string_lossy().into_owned()), ..Default::default() };
        let (config, settings) = crate::config::load(None, &overrides).unwrap();
        let users = UsersStore::load(&dir.path().join("users.json")).unwrap();
        let ctx = ServerContext::new(config, settings, users).unwrap();
        (dir, ctx)
    }

    #[test]
    fn create_then_get_user() {
        let (_dir, ctx) = test_ctx();
        let args = Value::mapping([
            ("username", Value::Text("bob".into())),
            ("password", Value::Text("pw".into())),
            ("permissions", Value::Text("w".into())),
        ]);
        create_user(&ctx, &args).unwrap();

        let fields = get_user(&ctx, &Value::mapping([("username", Value::Text("bob".into()))])).unwrap();
        assert_eq!(fields[0], ("password_hash", Value::Text(crate::common::hash_password("pw"))));
        assert_eq!(fields[1], ("permissions", Value::Text("w".into())));
    }

    #[test]
    fn delete_user_also_clears_their_sessions() {
        let (_dir, ctx) = test_ctx();
        ctx.users.create_user("carol", "pw", Permission::Read).unwrap();
        ctx.sessions.insert(crate::session::Session::new(
            "s1".into(),
            "carol".into(),
            std::net::IpAddr::V4(std::net::Ipv4Addr::new(127, 0, 0, 1)),
            None,
        ));
        delete_user(&ctx, &Value::mapping([("username", Value::Text("carol".into()))])).unwrap();
        assert_eq!(ctx.sessions.count_for_user("carol"), 0);
    }

    #[test]
    fn update_rate_limit_accepts_null_to_disable() {
        let (_dir, ctx) = test_ctx();
        update_rate_limit(&ctx, &Value::mapping([("new_limit", Value::Null)])).unwrap();
        assert_eq!(ctx.settings.rate_limit(), None);
    }

    #[test]
    fn backup_refuses_to_overwrite_without_replace() {
        let (_dir, ctx) = test_ctx();
        fs::write(ctx.sandbox.root().join("data.txt"), b"hi").unwrap();
        let args = Value::mapping([("path", Value::Text("/".into()))]);
        let first = backup(&ctx, &args).unwrap();
        let Value::Text(name) = &first[0].1 else { panic!("expected text path") };
        assert!(ctx.sandbox.root().join(name).exists());

        // Back-to-back calls land in the same second, so the second call
        // targets the same archive name and must be refused without `replace`.
        let err = backup(&ctx, &args).unwrap_err();
        assert_eq!(err.0, ResponseCode::BackupExists);

        let replace_args = Value::mapping([("path", Value::Text("/".into())), ("replace", Value::Bool(true))]);
        backup(&ctx, &replace_args).unwrap();
    }

    #[test]
    fn shutdown_sets_the_flag() {
        let (_dir, ctx) = test_ctx();
        assert!(!ctx.shutdown_requested());
        shutdown(&ctx).unwrap();
        assert!(ctx.shutdown_requested());
    }
}
