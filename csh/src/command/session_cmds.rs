//! The 14 per-session filesystem commands (`spec.md` §4.4), grounded on
//! `commands.py`'s one-class-per-command handlers. Each function
//! resolves its path argument(s) through the session's sandbox, checks
//! whatever existence precondition the command implies, runs the
//! underlying filesystem primitive, and maps any I/O failure onto the
//! closed error taxonomy.

use std::fs;
use std::io::{Read, Seek, SeekFrom};

use csh_protocol::Value;

use super::{map_io_error, optional_int, required_text};
use crate::context::ServerContext;
use crate::error::{CommandResult, ResponseCode};
use crate::session::Session;

type Fields = Vec<(&'static str, Value)>;

fn bad_args(message: impl Into<String>) -> (ResponseCode, String) {
    (ResponseCode::BadArguments, message.into())
}

fn path_validation(message: impl Into<String>) -> (ResponseCode, String) {
    (ResponseCode::PathValidation, message.into())
}

pub fn logout(ctx: &ServerContext, session: &Session) -> CommandResult<Fields> {
    if ctx.sessions.remove(&session.session_id) {
        Ok(vec![])
    } else {
        Err((ResponseCode::LogoutFailed, "session already gone".to_string()))
    }
}

pub fn read(ctx: &ServerContext, session: &Session, args: &Value) -> CommandResult<Fields> {
    let path = required_text(args, "path")?;
    let start = optional_int(args, "start", 0);
    let length = optional_int(args, "length", -1);
    if start < 0 {
        return Err(bad_args("\"start\" must not be negative"));
    }

    let resolved = ctx.sandbox.resolve(&session.cwd, path).map_err(|code| (code, "path validation failed".to_string()))?;
    if !resolved.is_file() {
        return Err(path_validation(format!("\"{path}\" is not a file")));
    }

    let mut file = fs::File::open(&resolved).map_err(|e| map_io_error(&e, path))?;
    file.seek(SeekFrom::Start(start as u64)).map_err(|e| map_io_error(&e, path))?;
    let mut buf = Vec::new();
    if length < 0 {
        file.read_to_end(&mut buf).map_err(|e| map_io_error(&e, path))?;
    } else {
        file.take(length as u64).read_to_end(&mut buf).map_err(|e| map_io_error(&e, path))?;
    }

    Ok(vec![("data", Value::Bytes(buf))])
}

pub fn write(ctx: &ServerContext, session: &Session, args: &Value) -> CommandResult<Fields> {
    let path = required_text(args, "path")?;
    let data = args
        .get_bytes("data")
        .ok_or_else(|| (ResponseCode::InvalidWriteData, "\"data\" must be bytes".to_string()))?;
    let mode = args.get_text("mode").unwrap_or("wb");
    if mode != "wb" && mode != "ab" {
        return Err((ResponseCode::InvalidWriteMode, format!("unknown write mode \"{mode}\"")));
    }

    let resolved = ctx.sandbox.resolve(&session.cwd, path).map_err(|code| (code, "path validation failed".to_string()))?;
    let mut open_opts = fs::OpenOptions::new();
    open_opts.write(true).create(true);
    if mode == "ab" {
        open_opts.append(true);
    } else {
        open_opts.truncate(true);
    }
    let mut file = open_opts.open(&resolved).map_err(|e| map_io_error(&e, path))?;
    std::io::Write::write_all(&mut file, data).map_err(|e| map_io_error(&e, path))?;

    Ok(vec![])
}

pub fn delete(ctx: &ServerContext, session: &Session, args: &Value) -> CommandResult<Fields> {
    let path = required_text(args, "path")?;
    let resolved = ctx.sandbox.resolve(&session.cwd, path).map_err(|code| (code, "path validation failed".to_string()))?;
    if !resolved.is_file() {
        return Err(path_validation(format!("\"{path}\" is not a file")));
    }
    fs::remove_file(&resolved).map_err(|e| map_io_error(&e, path))?;
    Ok(vec![])
}

pub fn rename(ctx: &ServerContext, session: &Session, args: &Value) -> CommandResult<Fields> {
    let path = required_text(args, "path")?;
    let new_name = required_text(args, "new_name")?;

    let resolved = ctx.sandbox.resolve(&session.cwd, path).map_err(|code| (code, "path validation failed".to_string()))?;
    if !resolved.exists() {
        return Err(path_validation(format!("\"{path}\" does not exist")));
    }
    // The destination is sandboxed the same way as mv/copy: against the
    // session's cwd, not the resolved source's parent directory.
    let dest = ctx.sandbox.resolve(&session.cwd, new_name).map_err(|code| (code, "destination path validation failed".to_string()))?;

    fs::rename(&resolved, &dest).map_err(|e| map_io_error(&e, path))?;
    Ok(vec![])
}

pub fn mkdir(ctx: &ServerContext, session: &Session, args: &Value) -> CommandResult<Fields> {
    let path = required_text(args, "path")?;
    let resolved = ctx.sandbox.resolve(&session.cwd, path).map_err(|code| (code, "path validation failed".to_string()))?;
    fs::create_dir(&resolved).map_err(|e| map_io_error(&e, path))?;
    Ok(vec![])
}

pub fn rmdir(ctx: &ServerContext, session: &Session, args: &Value) -> CommandResult<Fields> {
    let path = required_text(args, "path")?;
    let resolved = ctx.sandbox.resolve(&session.cwd, path).map_err(|code| (code, "path validation failed".to_string()))?;
    if !resolved.is_dir() {
        return Err(path_validation(format!("\"{path}\" is not a directory")));
    }
    fs::remove_dir_all(&resolved).map_err(|e| map_io_error(&e, path))?;
    Ok(vec![])
}

pub fn list(ctx: &ServerContext, session: &Session, args: &Value) -> CommandResult<Fields> {
    let path = required_text(args, "path")?;
    let resolved = ctx.sandbox.resolve(&session.cwd, path).map_err(|code| (code, "path validation failed".to_string()))?;
    if !resolved.is_dir() {
        return Err(path_validation(format!("\"{path}\" is not a directory")));
    }
    let mut entries = Vec::new();
    for entry in fs::read_dir(&resolved).map_err(|e| map_io_error(&e, path))? {
        let entry = entry.map_err(|e| map_io_error(&e, path))?;
        entries.push(Value::Text(entry.file_name().to_string_lossy().into_owned()));
    }
    entries.sort_by(|a, b| a.as_text().cmp(&b.as_text()));
    Ok(vec![("data", Value::List(entries))])
}

pub fn mv(ctx: &ServerContext, session: &Session, args: &Value) -> CommandResult<Fields> {
    let path = required_text(args, "path")?;
    let destination = required_text(args, "destination")?;

    let resolved = ctx.sandbox.resolve(&session.cwd, path).map_err(|code| (code, "path validation failed".to_string()))?;
    if !resolved.exists() {
        return Err(path_validation(format!("\"{path}\" does not exist")));
    }
    let dest = ctx.sandbox.resolve(&session.cwd, destination).map_err(|code| (code, "destination path validation failed".to_string()))?;

    fs::rename(&resolved, &dest).map_err(|e| map_io_error(&e, path))?;
    Ok(vec![])
}

pub fn copy(ctx: &ServerContext, session: &Session, args: &Value) -> CommandResult<Fields> {
    let path = required_text(args, "path")?;
    let destination = required_text(args, "destination")?;

    let resolved = ctx.sandbox.resolve(&session.cwd, path).map_err(|code| (code, "path validation failed".to_string()))?;
    if !resolved.is_file() {
        return Err(path_validation(format!("\"{path}\" is not a file")));
    }
    let dest = ctx.sandbox.resolve(&session.cwd, destination).map_err(|code| (code, "destination path validation failed".to_string()))?;

    fs::copy(&resolved, &dest).map_err(|e| map_io_error(&e, path))?;
    Ok(vec![])
}

pub fn chdir(ctx: &ServerContext, session: &Session, args: &Value) -> CommandResult<Fields> {
    let path = required_text(args, "path")?;
    // Validate the destination before mutating the session's cwd, fixing
    // a source bug where the cwd was updated before the path was known
    // to exist and stay within the sandbox.
    let new_cwd = ctx.sandbox.compute_new_cwd(&session.cwd, path).map_err(|code| (code, "path validation failed".to_string()))?;
    let resolved = ctx.sandbox.root().join(&new_cwd);
    if !resolved.is_dir() {
        return Err(path_validation(format!("\"{path}\" is not a directory")));
    }
    ctx.sessions.update_cwd(&session.session_id, new_cwd);
    Ok(vec![])
}

pub fn cwd(_ctx: &ServerContext, session: &Session) -> CommandResult<Fields> {
    Ok(vec![("path", Value::Text(format!("/{}", session.cwd)))])
}

pub fn size(ctx: &ServerContext, session: &Session, args: &Value) -> CommandResult<Fields> {
    let path = required_text(args, "path")?;
    let resolved = ctx.sandbox.resolve(&session.cwd, path).map_err(|code| (code, "path validation failed".to_string()))?;
    if !resolved.is_file() {
        return Err(path_validation(format!("\"{path}\" is not a file")));
    }
    let metadata = fs::metadata(&resolved).map_err(|e| map_io_error(&e, path))?;
    Ok(vec![("size", Value::Int(metadata.len() as i64))])
}

pub fn exists(ctx: &ServerContext, session: &Session, args: &Value) -> CommandResult<Fields> {
    let path = required_text(args, "path")?;
    let resolved = ctx.sandbox.resolve(&session.cwd, path).map_err(|code| (code, "path validation failed".to_string()))?;
    Ok(vec![
        ("exists", Value::Bool(resolved.exists())),
        ("isfile", Value::Bool(resolved.is_file())),
        ("isdir", Value::Bool(resolved.is_dir())),
    ])
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::config::{CliOverrides, Settings};
    use crate::context::ServerContext;
    use crate::users::{Permission, UsersStore};
    use std::net::{IpAddr, Ipv4Addr};

    fn test_ctx() -> (tempfile::TempDir, std::sync::Arc<ServerContext>) {
        let dir = tempfile::tempdir().unwrap();
        let overrides = CliOverrides { path: Some(dir.path().to_string_lossy().into_owned()), ..Default::default() };
        let (config, settings) = crate::config::load(None, &overrides).unwrap();
        let users = UsersStore::load(&dir.path().join("users.json")).unwrap();
        users.create_user("alice", "pw", Permission::Admin).unwrap();
        let ctx = ServerContext::new(config, settings, users).unwrap();
        (dir, ctx)
    }

    fn session() -> Session {
        Session::new("sess".into(), "alice".into(), IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), None)
    }

    #[test]
    fn write_then_read_round_trips() {
        let (_dir, ctx) = test_ctx();
        let session = session();
        let write_args = Value::mapping([
            ("path", Value::Text("a.txt".into())),
            ("data", Value::Bytes(b"hello".to_vec())),
        ]);
        write(&ctx, &session, &write_args).unwrap();

        let read_args = Value::mapping([("path", Value::Text("a.txt".into()))]);
        let fields = read(&ctx, &session, &read_args).unwrap();
        assert_eq!(fields, vec![("data", Value::Bytes(b"hello".to_vec()))]);
    }

    #[test]
    fn read_missing_file_is_path_validation_error() {
        let (_dir, ctx) = test_ctx();
        let session = session();
        let args = Value::mapping([("path", Value::Text("nope.txt".into()))]);
        let err = read(&ctx, &session, &args).unwrap_err();
        assert_eq!(err.0, ResponseCode::PathValidation);
    }

    #[test]
    fn mkdir_then_chdir_then_cwd() {
        let (_dir, ctx) = test_ctx();
        let session = session();
        mkdir(&ctx, &session, &Value::mapping([("path", Value::Text("sub".into()))])).unwrap();

        let new_cwd = ctx.sandbox.compute_new_cwd(&session.cwd, "sub").unwrap();
        ctx.sessions.insert(session.clone());
        chdir(&ctx, &session, &Value::mapping([("path", Value::Text("sub".into()))])).unwrap();
        let renewed = ctx.sessions.validate_and_renew(&session.session_id, session.peer_ip).unwrap();
        assert_eq!(renewed.cwd, new_cwd);
        assert_eq!(cwd(&ctx, &renewed).unwrap(), vec![("path", Value::Text(format!("/{new_cwd}")))]);
    }

    #[test]
    fn exists_reports_false_for_absent_path() {
        let (_dir, ctx) = test_ctx();
        let session = session();
        let args = Value::mapping([("path", Value::Text("ghost".into()))]);
        assert_eq!(
            exists(&ctx, &session, &args).unwrap(),
            vec![
                ("exists", Value::Bool(false)),
                ("isfile", Value::Bool(false)),
                ("isdir", Value::Bool(false)),
            ]
        );
    }

    #[test]
    fn exists_reports_isfile_and_isdir_for_present_paths() {
        let (_dir, ctx) = test_ctx();
        let session = session();
        write(&ctx, &session, &Value::mapping([("path", Value::Text("a.txt".into())), ("data", Value::Bytes(b"x".to_vec()))])).unwrap();
        mkdir(&ctx, &session, &Value::mapping([("path", Value::Text("sub".into()))])).unwrap();

        let file_args = Value::mapping([("path", Value::Text("a.txt".into()))]);
        assert_eq!(
            exists(&ctx, &session, &file_args).unwrap(),
            vec![
                ("exists", Value::Bool(true)),
                ("isfile", Value::Bool(true)),
                ("isdir", Value::Bool(false)),
            ]
        );

        let dir_args = Value::mapping([("path", Value::Text("sub".into()))]);
        assert_eq!(
            exists(&ctx, &session, &dir_args).unwrap(),
            vec![
                ("exists", Value::Bool(true)),
                ("isfile", Value::Bool(false)),
                ("isdir", Value::Bool(true)),
            ]
        );
    }

    #[test]
    fn rename_sandboxes_the_destination() {
        let (_dir, ctx) = test_ctx();
        let session = session();
        write(&ctx, &session, &Value::mapping([("path", Value::Text("a.txt".into())), ("data", Value::Bytes(b"x".to_vec()))])).unwrap();
        let err = rename(
            &ctx,
            &session,
            &Value::mapping([("path", Value::Text("a.txt".into())), ("new_name", Value::Text("../escape.txt".into()))]),
        )
        .unwrap_err();
        assert_eq!(err.0, ResponseCode::PathValidation);
    }

    #[test]
    fn rename_sandboxes_the_destination_against_session_cwd_not_source_parent() {
        let (_dir, ctx) = test_ctx();
        let session = session();
        mkdir(&ctx, &session, &Value::mapping([("path", Value::Text("sub".into()))])).unwrap();
        write(
            &ctx,
            &session,
            &Value::mapping([("path", Value::Text("sub/file1.txt".into())), ("data", Value::Bytes(b"x".to_vec()))]),
        )
        .unwrap();

        // new_name is resolved against the session's cwd ("", the
        // sandbox root), not against "sub" (the resolved source's
        // parent directory) -- so this lands at the root, not in "sub".
        rename(
            &ctx,
            &session,
            &Value::mapping([
                ("path", Value::Text("sub/file1.txt".into())),
                ("new_name", Value::Text("file1-renamed.txt".into())),
            ]),
        )
        .unwrap();

        let at_root = read(&ctx, &session, &Value::mapping([("path", Value::Text("file1-renamed.txt".into()))]));
        assert_eq!(at_root.unwrap(), vec![("data", Value::Bytes(b"x".to_vec()))]);

        let still_in_sub = read(&ctx, &session, &Value::mapping([("path", Value::Text("sub/file1-renamed.txt".into()))]));
        assert_eq!(still_in_sub.unwrap_err().0, ResponseCode::PathValidation);
    }
}
