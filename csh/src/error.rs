//! The closed response-code taxonomy. Every failure path in the
//! server produces one of these rather than propagating a raw
//! `std::io::Error` or `anyhow::Error` to the wire.

use csh_protocol::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ResponseCode {
    #[error("session invalid or expired")]
    SessionInvalid = 1,
    #[error("logout failed")]
    LogoutFailed = 2,
    #[error("path not found")]
    NotFound = 3,
    #[error("filesystem operation failed")]
    FilesystemError = 4,
    #[error("write data must be bytes")]
    InvalidWriteData = 5,
    #[error("invalid write mode")]
    InvalidWriteMode = 6,
    #[error("failure while responding")]
    ResponseFailure = 7,
    #[error("bad wire magic")]
    BadMagic = 8,
    #[error("missing command field")]
    MissingCommand = 9,
    #[error("unknown command id")]
    UnknownCommand = 10,
    #[error("internal server error")]
    Internal = 11,
    #[error("missing username or password")]
    MissingCredentials = 12,
    #[error("user does not exist")]
    UnknownUser = 13,
    #[error("password mismatch")]
    PasswordMismatch = 14,
    #[error("missing username or session id")]
    MissingSessionFields = 15,
    #[error("missing args mapping")]
    MissingArgs = 16,
    #[error("exception inside command execution")]
    CommandExecutionError = 17,
    #[error("path validation failed")]
    PathValidation = 18,
    #[error("permission denied")]
    PermissionDenied = 19,
    #[error("rate limit exceeded")]
    RateLimited = 20,
    #[error("serialization failure")]
    SerializationFailure = 21,
    #[error("bad argument shape")]
    BadArguments = 22,
    #[error("backup already exists")]
    BackupExists = 23,
    #[error("session limit reached")]
    SessionLimitReached = 24,
}

impl ResponseCode {
    pub fn code(self) -> i64 {
        self as u8 as i64
    }

    /// Build the `{code, error}` response mapping for this failure,
    /// with a message that never leaks an absolute host path.
    pub fn response(self, message: impl Into<String>) -> Value {
        Value::mapping([
            ("code", Value::Int(self.code())),
            ("error", Value::Text(message.into())),
        ])
    }

    /// Build the response mapping using this error's default message.
    pub fn default_response(self) -> Value {
        self.response(self.to_string())
    }
}

pub type CommandResult<T> = Result<T, (ResponseCode, String)>;
