//! Config-file parsing and the runtime-mutable settings that admin
//! commands touch.
//!
//! Grounded on `libshpool/src/config.rs`'s `read_config`/`Config` shape
//! (a `#[derive(Deserialize, Default)]` struct of heavily-`Option`al
//! fields), generalized from shpool's TOML dialect to the JSON config
//! format `spec.md` §6 specifies, and on `runtime.py`'s settings
//! read-patch-write sequence for shutdown persistence.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::Context;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::info;

use crate::common;
use crate::rate_limit::Rule;

/// What `secure` in the config file says about TLS: either disabled, or
/// the certfile/keyfile/protocol triple the original wraps the socket
/// with.
#[derive(Debug, Clone, Default)]
pub enum SecureConfig {
    #[default]
    Disabled,
    Enabled { certfile: String, keyfile: String, protocol: String },
}

impl<'de> Deserialize<'de> for SecureConfig {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_json::Value::deserialize(deserializer)?;
        match value {
            serde_json::Value::Bool(false) | serde_json::Value::Null => Ok(SecureConfig::Disabled),
            serde_json::Value::Array(items) if items.len() == 3 => {
                let as_str = |v: &serde_json::Value| -> Result<String, D::Error> {
                    v.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| serde::de::Error::custom("secure entries must be strings"))
                };
                Ok(SecureConfig::Enabled {
                    certfile: as_str(&items[0])?,
                    keyfile: as_str(&items[1])?,
                    protocol: as_str(&items[2])?,
                })
            }
            _ => Err(serde::de::Error::custom("secure must be false or [certfile, keyfile, protocol]")),
        }
    }
}

impl Serialize for SecureConfig {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            SecureConfig::Disabled => serializer.serialize_bool(false),
            SecureConfig::Enabled { certfile, keyfile, protocol } => {
                (certfile, keyfile, protocol).serialize(serializer)
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct RawConfig {
    pub address: Option<(String, u16)>,
    pub path: Option<String>,
    pub users_file: Option<String>,
    pub server_name: Option<String>,
    pub backlog: Option<i32>,
    #[serde(default)]
    pub secure: SecureConfig,
    pub rate_limit: Option<Vec<(u64, u64)>>,
    pub session_limit: Option<usize>,
    pub default_expire: Option<u64>,
    pub allow_change_expire: Option<bool>,
    pub session_expiration_delay: Option<u64>,
    pub verbose: Option<bool>,
    pub file_handler: Option<String>,
    pub level: Option<String>,
    pub update_settings: Option<bool>,
}

/// Command-line overrides, layered on top of whatever the config file
/// (if any) specifies, matching `main.py`'s `ARGS` list.
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub path: Option<String>,
    pub server_name: Option<String>,
    pub users_file: Option<String>,
    pub file_handler: Option<String>,
    pub level: Option<String>,
}

/// The fixed, startup-only half of the server's configuration: the bits
/// no admin command ever mutates at runtime.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub path: PathBuf,
    pub users_file: PathBuf,
    pub backlog: i32,
    pub secure: SecureConfig,
    pub verbose: bool,
    pub file_handler: Option<String>,
    pub level: Option<String>,
    /// If set, the entire in-memory settings view (not just touched
    /// fields) is written back on shutdown.
    pub update_settings: bool,
    /// Where the config file this server was started from lives, if any
    /// (absent when run with `--noconfig`). Used to patch settings back
    /// in on shutdown.
    pub config_path: Option<PathBuf>,
}

impl ServerConfig {
    pub fn root(&self) -> &Path {
        &self.path
    }
}

struct SettingsInner {
    server_name: String,
    rate_limit: Option<Vec<Rule>>,
    session_limit: Option<usize>,
    default_expire: Option<u64>,
    allow_change_expire: bool,
    session_expiration_delay: u64,
    touched: HashSet<&'static str>,
}

/// The runtime-mutable settings admin commands 6, 7, 8, and 14 touch,
/// with "touched" tracking so only settings actually changed since
/// startup get written back to the config file on shutdown.
pub struct Settings {
    inner: Mutex<SettingsInner>,
}

impl Settings {
    pub fn new(
        server_name: String,
        rate_limit: Option<Vec<Rule>>,
        session_limit: Option<usize>,
        default_expire: Option<u64>,
        allow_change_expire: bool,
        session_expiration_delay: u64,
    ) -> Self {
        Settings {
            inner: Mutex::new(SettingsInner {
                server_name,
                rate_limit,
                session_limit,
                default_expire,
                allow_change_expire,
                session_expiration_delay,
                touched: HashSet::new(),
            }),
        }
    }

    pub fn server_name(&self) -> String {
        self.inner.lock().expect("settings lock poisoned").server_name.clone()
    }

    pub fn set_server_name(&self, name: String) {
        let mut inner = self.inner.lock().expect("settings lock poisoned");
        inner.server_name = name;
        inner.touched.insert("server_name");
    }

    pub fn rate_limit(&self) -> Option<Vec<Rule>> {
        self.inner.lock().expect("settings lock poisoned").rate_limit.clone()
    }

    pub fn set_rate_limit(&self, rules: Option<Vec<Rule>>) {
        let mut inner = self.inner.lock().expect("settings lock poisoned");
        inner.rate_limit = rules;
        inner.touched.insert("rate_limit");
    }

    pub fn session_limit(&self) -> Option<usize> {
        self.inner.lock().expect("settings lock poisoned").session_limit
    }

    pub fn set_session_limit(&self, limit: Option<usize>) {
        let mut inner = self.inner.lock().expect("settings lock poisoned");
        inner.session_limit = limit;
        inner.touched.insert("session_limit");
    }

    pub fn default_expire(&self) -> Option<u64> {
        self.inner.lock().expect("settings lock poisoned").default_expire
    }

    pub fn allow_change_expire(&self) -> bool {
        self.inner.lock().expect("settings lock poisoned").allow_change_expire
    }

    pub fn set_session_expiration(&self, default_expire: Option<u64>, allow_change_expire: bool) {
        let mut inner = self.inner.lock().expect("settings lock poisoned");
        inner.default_expire = default_expire;
        inner.allow_change_expire = allow_change_expire;
        inner.touched.insert("default_expire");
        inner.touched.insert("allow_change_expire");
    }

    pub fn session_expiration_delay(&self) -> u64 {
        self.inner.lock().expect("settings lock poisoned").session_expiration_delay
    }

    /// A JSON snapshot of every currently-touched setting, keyed by its
    /// config-file field name, for the shutdown write-back.
    pub fn touched_snapshot(&self) -> HashMap<String, serde_json::Value> {
        let inner = self.inner.lock().expect("settings lock poisoned");
        let mut out = HashMap::new();
        for key in &inner.touched {
            let value = match *key {
                "server_name" => serde_json::Value::String(inner.server_name.clone()),
                "rate_limit" => match &inner.rate_limit {
                    Some(rules) => serde_json::Value::Array(
                        rules
                            .iter()
                            .map(|r| serde_json::json!([r.window_secs, r.max_requests]))
                            .collect(),
                    ),
                    None => serde_json::Value::Null,
                },
                "session_limit" => inner
                    .session_limit
                    .map(|v| serde_json::json!(v))
                    .unwrap_or(serde_json::Value::Null),
                "default_expire" => inner
                    .default_expire
                    .map(|v| serde_json::json!(v))
                    .unwrap_or(serde_json::Value::Null),
                "allow_change_expire" => serde_json::json!(inner.allow_change_expire),
                _ => continue,
            };
            out.insert(key.to_string(), value);
        }
        out
    }

    /// A full snapshot of every runtime-visible setting, for admin
    /// command 15 (`get_all_settings`). `secure` is not itself a
    /// `Settings` field (it's part of the fixed `ServerConfig`), so the
    /// caller passes it in, matching `admin.py::GetAllSettings.preform`'s
    /// `'secure': False if not self.server.secure else
    /// self.server.secure[2].name`.
    pub fn full_snapshot(&self, secure: &SecureConfig) -> HashMap<String, serde_json::Value> {
        let inner = self.inner.lock().expect("settings lock poisoned");
        let mut out = HashMap::new();
        out.insert("server_name".to_string(), serde_json::Value::String(inner.server_name.clone()));
        out.insert(
            "rate_limit".to_string(),
            match &inner.rate_limit {
                Some(rules) => serde_json::Value::Array(
                    rules.iter().map(|r| serde_json::json!([r.window_secs, r.max_requests])).collect(),
                ),
                None => serde_json::Value::Null,
            },
        );
        out.insert(
            "session_limit".to_string(),
            inner.session_limit.map(|v| serde_json::json!(v)).unwrap_or(serde_json::Value::Null),
        );
        out.insert(
            "default_expire".to_string(),
            inner.default_expire.map(|v| serde_json::json!(v)).unwrap_or(serde_json::Value::Null),
        );
        out.insert("allow_change_expire".to_string(), serde_json::json!(inner.allow_change_expire));
        out.insert(
            "session_expiration_delay".to_string(),
            serde_json::json!(inner.session_expiration_delay),
        );
        out.insert(
            "secure".to_string(),
            match secure {
                SecureConfig::Disabled => serde_json::Value::Bool(false),
                SecureConfig::Enabled { protocol, .. } => serde_json::Value::String(protocol.clone()),
            },
        );
        out
    }
}

/// Parse a config file (if any) and layer CLI overrides on top of it,
/// applying the `%HOSTNAME%`/`%IP%` substitutions and defaults the way
/// `runtime.py::__init__` does.
pub fn load(config_path: Option<&Path>, overrides: &CliOverrides) -> anyhow::Result<(ServerConfig, Settings)> {
    let raw = match config_path {
        Some(path) => {
            info!(path = %path.display(), "reading config file");
            let contents = fs::read_to_string(path).context("reading config file")?;
            serde_json::from_str(&contents).context("parsing config file")?
        }
        None => RawConfig::default(),
    };

    let host = overrides
        .host
        .clone()
        .or_else(|| raw.address.as_ref().map(|(h, _)| h.clone()))
        .unwrap_or_else(|| "localhost".to_string());
    let host = common::substitute_local_ip(&host);

    let port = overrides.port.or_else(|| raw.address.as_ref().map(|(_, p)| *p)).unwrap_or(crate::consts::DEFAULT_PORT);

    let path = overrides
        .path
        .clone()
        .or(raw.path)
        .map(PathBuf::from)
        .unwrap_or(std::env::current_dir().context("resolving current directory")?);

    let users_file = overrides
        .users_file
        .clone()
        .or(raw.users_file)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(crate::consts::DEFAULT_USERS_FILE));

    let server_name = overrides
        .server_name
        .clone()
        .or(raw.server_name)
        .unwrap_or_else(|| crate::consts::DEFAULT_SERVER_NAME.to_string());
    let server_name = common::substitute_hostname(&server_name);

    let backlog = raw.backlog.unwrap_or(crate::consts::DEFAULT_BACKLOG);
    let rate_limit = raw.rate_limit.map(|rules| {
        rules.into_iter().map(|(window_secs, max_requests)| Rule { window_secs, max_requests }).collect()
    });
    let session_expiration_delay = raw.session_expiration_delay.unwrap_or(100);
    let allow_change_expire = raw.allow_change_expire.unwrap_or(true);

    let server_config = ServerConfig {
        host,
        port,
        path,
        users_file,
        backlog,
        secure: raw.secure,
        verbose: raw.verbose.unwrap_or(false),
        file_handler: overrides.file_handler.clone().or(raw.file_handler),
        level: overrides.level.clone().or(raw.level),
        update_settings: raw.update_settings.unwrap_or(false),
        config_path: config_path.map(Path::to_path_buf),
    };

    let settings = Settings::new(
        server_name,
        rate_limit,
        raw.session_limit,
        raw.default_expire,
        allow_change_expire,
        session_expiration_delay,
    );

    Ok((server_config, settings))
}

/// On graceful shutdown, patch touched settings back into the *original*
/// config file content (re-read fresh, not the in-memory merged view),
/// per `runtime.py::finish`. If `update_settings` is set, every
/// runtime-visible setting is written back instead of only the touched
/// ones.
pub fn write_back(config: &ServerConfig, settings: &Settings) -> anyhow::Result<()> {
    let Some(config_path) = &config.config_path else {
        return Ok(());
    };

    let snapshot =
        if config.update_settings { settings.full_snapshot(&config.secure) } else { settings.touched_snapshot() };
    if snapshot.is_empty() {
        return Ok(());
    }

    let original = fs::read_to_string(config_path).context("reading config file for write-back")?;
    let mut parsed: serde_json::Value =
        serde_json::from_str(&original).context("parsing config file for write-back")?;
    let serde_json::Value::Object(map) = &mut parsed else {
        anyhow::bail!("config file does not contain a JSON object");
    };
    for (key, value) in snapshot {
        map.insert(key, value);
    }

    fs::write(config_path, serde_json::to_string_pretty(&parsed)?).context("writing config file back")?;
    Ok(())
}

pub fn parse_host_port(host: &str, port: u16) -> anyhow::Result<(IpAddr, u16)> {
    let ip = if host == "localhost" {
        IpAddr::from([127, 0, 0, 1])
    } else {
        host.parse().context("host is not a valid IP address")?
    };
    Ok((ip, port))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults_apply_with_no_config_file() {
        let (config, settings) = load(None, &CliOverrides::default()).unwrap();
        assert_eq!(config.port, crate::consts::DEFAULT_PORT);
        assert_eq!(config.backlog, crate::consts::DEFAULT_BACKLOG);
        assert!(settings.allow_change_expire());
    }

    #[test]
    fn cli_overrides_win_over_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        fs::write(&config_path, r#"{"address": ["0.0.0.0", 1111], "server_name": "from-file"}"#).unwrap();

        let overrides = CliOverrides { port: Some(2222), ..Default::default() };
        let (config, settings) = load(Some(&config_path), &overrides).unwrap();
        assert_eq!(config.port, 2222);
        assert_eq!(settings.server_name(), "from-file");
    }

    #[test]
    fn touched_settings_round_trip_through_write_back() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.json");
        fs::write(&config_path, r#"{"server_name": "old", "backlog": 5}"#).unwrap();

        let (mut config, settings) = load(Some(&config_path), &CliOverrides::default()).unwrap();
        config.config_path = Some(config_path.clone());
        settings.set_server_name("new".to_string());

        write_back(&config, &settings).unwrap();

        let written: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&config_path).unwrap()).unwrap();
        assert_eq!(written["server_name"], "new");
        // untouched key survives the patch.
        assert_eq!(written["backlog"], 5);
    }

    #[test]
    fn secure_false_parses_as_disabled() {
        let raw: RawConfig = serde_json::from_str(r#"{"secure": false}"#).unwrap();
        assert!(matches!(raw.secure, SecureConfig::Disabled));
    }

    #[test]
    fn secure_triple_parses_as_enabled() {
        let raw: RawConfig =
            serde_json::from_str(r#"{"secure": ["cert.pem", "key.pem", "TLSv1_2"]}"#).unwrap();
        assert!(matches!(raw.secure, SecureConfig::Enabled { .. }));
    }
}
