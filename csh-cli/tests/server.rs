//! End-to-end tests driving a real `csh` server subprocess over a TCP
//! socket, covering the scenarios a client integration would exercise:
//! login/status/logout, sandbox escapes, write-then-read, permission
//! denial, session limits, and rate limiting.

use std::io::{Read, Write};
use std::net::TcpStream;
use std::process::{Child, Command, Stdio};
use std::time::Duration;

use csh_protocol::{frame, Value};
use libcsh::users::{Permission, UsersStore};

struct Server {
    child: Child,
    port: u16,
    _root: tempfile::TempDir,
}

impl Server {
    fn start(session_limit: Option<usize>, rate_limit: Option<(u64, u64)>) -> Server {
        let root = tempfile::tempdir().unwrap();
        let users_path = root.path().join("users.json");
        let users = UsersStore::load(&users_path).unwrap();
        users.create_user("alice", "hunter2", Permission::Write).unwrap();
        users.create_user("reader", "pw", Permission::Read).unwrap();
        users.create_user("boss", "adminpw", Permission::Admin).unwrap();
        drop(users);

        let config_path = root.path().join("config.json");
        let mut config = serde_json::json!({
            "address": ["127.0.0.1", 0],
            "path": root.path().to_string_lossy(),
            "users_file": users_path.to_string_lossy(),
        });
        if let Some(limit) = session_limit {
            config["session_limit"] = serde_json::json!(limit);
        }
        if let Some((window, max)) = rate_limit {
            config["rate_limit"] = serde_json::json!([[window, max]]);
        }

        let port = pick_free_port();
        config["address"] = serde_json::json!(["127.0.0.1", port]);
        std::fs::write(&config_path, serde_json::to_vec(&config).unwrap()).unwrap();

        let child = Command::new(env!("CARGO_BIN_EXE_csh"))
            .arg(&config_path)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .expect("spawning csh server process");

        let server = Server { child, port, _root: root };
        server.wait_until_listening();
        server
    }

    fn wait_until_listening(&self) {
        let mut sleep = Duration::from_millis(10);
        for _ in 0..12 {
            if TcpStream::connect(("127.0.0.1", self.port)).is_ok() {
                return;
            }
            std::thread::sleep(sleep);
            sleep *= 2;
        }
        panic!("server never started listening on port {}", self.port);
    }

    fn request(&self, req: Value) -> Value {
        let mut stream = TcpStream::connect(("127.0.0.1", self.port)).expect("connecting to server");
        frame::write_frame(&mut stream, &req.encode()).expect("writing request frame");
        let payload = frame::read_frame(&mut stream).expect("reading response frame");
        Value::decode(&payload).expect("decoding response").0
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn pick_free_port() -> u16 {
    let listener = std::net::TcpListener::bind(("127.0.0.1", 0)).unwrap();
    listener.local_addr().unwrap().port()
}

fn login(server: &Server, username: &str, password: &str) -> Value {
    server.request(Value::mapping([
        ("command", Value::Text("L".into())),
        ("username", Value::Text(username.into())),
        ("password", Value::Text(password.into())),
    ]))
}

fn session_command(server: &Server, command: i64, username: &str, session_id: &str, args: Value) -> Value {
    server.request(Value::mapping([
        ("command", Value::Int(command)),
        ("username", Value::Text(username.into())),
        ("session_id", Value::Text(session_id.into())),
        ("args", args),
    ]))
}

#[test]
fn login_status_logout() {
    let server = Server::start(None, None);

    let login_response = login(&server, "alice", "hunter2");
    assert_eq!(login_response.get_int("code"), Some(0));
    let session_id = login_response.get_text("session_id").unwrap().to_string();

    let status = server.request(Value::mapping([("command", Value::Text("I".into()))]));
    assert_eq!(status.get_text("status"), Some("OK"));

    let logout_response =
        session_command(&server, 0, "alice", &session_id, Value::Mapping(vec![]));
    assert_eq!(logout_response.get_int("code"), Some(0));

    // the session is gone now; using it again is rejected.
    let reused = session_command(&server, 11, "alice", &session_id, Value::Mapping(vec![]));
    assert_eq!(reused.get_int("code"), Some(libcsh::error::ResponseCode::SessionInvalid.code()));
}

#[test]
fn sandbox_escape_refused() {
    let server = Server::start(None, None);
    let session_id = login(&server, "alice", "hunter2").get_text("session_id").unwrap().to_string();

    let response = session_command(
        &server,
        1,
        "alice",
        &session_id,
        Value::mapping([
            ("path", Value::Text("../etc/passwd".into())),
            ("start", Value::Int(0)),
            ("length", Value::Int(-1)),
        ]),
    );
    assert_eq!(response.get_int("code"), Some(libcsh::error::ResponseCode::PathValidation.code()));
}

#[test]
fn write_then_read_with_ranges() {
    let server = Server::start(None, None);
    let session_id = login(&server, "alice", "hunter2").get_text("session_id").unwrap().to_string();

    let write_response = session_command(
        &server,
        2,
        "alice",
        &session_id,
        Value::mapping([
            ("path", Value::Text("a.txt".into())),
            ("data", Value::Bytes(b"hello".to_vec())),
            ("mode", Value::Text("wb".into())),
        ]),
    );
    assert_eq!(write_response.get_int("code"), Some(0));

    let full_read = session_command(
        &server,
        1,
        "alice",
        &session_id,
        Value::mapping([
            ("path", Value::Text("a.txt".into())),
            ("start", Value::Int(0)),
            ("length", Value::Int(-1)),
        ]),
    );
    assert_eq!(full_read.get("data"), Some(&Value::Bytes(b"hello".to_vec())));

    let partial_read = session_command(
        &server,
        1,
        "alice",
        &session_id,
        Value::mapping([
            ("path", Value::Text("a.txt".into())),
            ("start", Value::Int(1)),
            ("length", Value::Int(3)),
        ]),
    );
    assert_eq!(partial_read.get("data"), Some(&Value::Bytes(b"ell".to_vec())));
}

#[test]
fn permission_denial_blocks_write_and_leaves_no_file() {
    let server = Server::start(None, None);
    let session_id = login(&server, "reader", "pw").get_text("session_id").unwrap().to_string();

    let response = session_command(
        &server,
        2,
        "reader",
        &session_id,
        Value::mapping([("path", Value::Text("blocked.txt".into())), ("data", Value::Bytes(b"x".to_vec()))]),
    );
    assert_eq!(response.get_int("code"), Some(libcsh::error::ResponseCode::PermissionDenied.code()));

    let exists = session_command(
        &server,
        13,
        "reader",
        &session_id,
        Value::mapping([("path", Value::Text("blocked.txt".into()))]),
    );
    assert_eq!(exists.get("exists"), Some(&Value::Bool(false)));
}

#[test]
fn session_limit_rejects_third_login() {
    let server = Server::start(Some(2), None);

    let first = login(&server, "alice", "hunter2");
    let second = login(&server, "alice", "hunter2");
    let third = login(&server, "alice", "hunter2");

    assert_eq!(first.get_int("code"), Some(0));
    assert_eq!(second.get_int("code"), Some(0));
    assert_eq!(third.get_int("code"), Some(libcsh::error::ResponseCode::SessionLimitReached.code()));
}

#[test]
fn rate_limit_throttles_the_third_request() {
    let server = Server::start(None, Some((60, 2)));

    let first = server.request(Value::mapping([("command", Value::Text("I".into()))]));
    let second = server.request(Value::mapping([("command", Value::Text("I".into()))]));
    let third = server.request(Value::mapping([("command", Value::Text("I".into()))]));

    assert_eq!(first.get_text("status"), Some("OK"));
    assert_eq!(second.get_text("status"), Some("OK"));
    assert_eq!(third.get_int("code"), Some(libcsh::error::ResponseCode::RateLimited.code()));
}

#[test]
fn admin_create_user_then_login() {
    let server = Server::start(None, None);

    let admin_response = server.request(Value::mapping([
        ("command", Value::Text("A".into())),
        ("username", Value::Text("boss".into())),
        ("password", Value::Text("adminpw".into())),
        ("admin_command", Value::Int(1)),
        (
            "args",
            Value::mapping([
                ("username", Value::Text("carol".into())),
                ("password", Value::Text("carolpw".into())),
                ("permissions", Value::Text("w".into())),
            ]),
        ),
    ]));
    assert_eq!(admin_response.get_int("code"), Some(0));

    let login_response = login(&server, "carol", "carolpw");
    assert_eq!(login_response.get_int("code"), Some(0));
}
