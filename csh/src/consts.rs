pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const LANG: &str = "rust";

pub const DEFAULT_PORT: u16 = 8008;
pub const DEFAULT_BACKLOG: i32 = 5;
pub const DEFAULT_USERS_FILE: &str = "users.json";
pub const DEFAULT_SERVER_NAME: &str = "%HOSTNAME%";

/// Number of hex characters in a session ID (64 random bytes, hex
/// encoded two characters per byte).
pub const SESSION_ID_HEX_LEN: usize = 128;
pub const SESSION_ID_RANDOM_BYTES: usize = 64;

pub const BACKUP_PREFIX: &str = "BACKUP-";
pub const BACKUP_SUFFIX: &str = ".bak.zip";
pub const BACKUP_TIMESTAMP_FMT: &str = "%Y%m%d-%H%M%S";
