//! The command-level error taxonomy.
//!
//! Each variant renders to one RESP error line. Errors raised inside an EXEC
//! are placed into the reply array by the transaction code; everything else
//! goes straight to the client.

use thiserror::Error;

use crate::config::ConfigError;
use crate::resp::RespValue;
use crate::store::stream::StreamError;
use crate::store::ValueError;

#[derive(Error, Debug, PartialEq)]
pub enum CommandError {
    #[error("unknown command '{0}'")]
    UnknownCommand(String),
    #[error("wrong number of arguments for '{0}' command")]
    WrongArgCount(String),
    #[error("syntax error")]
    Syntax,
    #[error("operation against a key holding the wrong kind of value")]
    WrongType,
    #[error("value is not an integer or out of range")]
    NotAnInteger,
    #[error("value is not a valid float")]
    NotAFloat,
    #[error("{0}")]
    OutOfRange(String),
    #[error("authentication required")]
    NoAuth,
    #[error("invalid username-password pair or user is disabled")]
    AuthFailed,
    #[error("{0}")]
    NoPerm(String),
    #[error("subscriber mode violation for '{0}'")]
    SubscriberMode(String),
    #[error("MULTI calls can not be nested")]
    MultiNested,
    #[error("EXEC without MULTI")]
    ExecWithoutMulti,
    #[error("DISCARD without MULTI")]
    DiscardWithoutMulti,
    #[error("WATCH inside MULTI is not allowed")]
    WatchInMulti,
    #[error("transaction discarded because of previous errors")]
    ExecAbort,
    #[error("client unblocked via CLIENT UNBLOCK")]
    Unblocked,
    #[error("'{0}' is not supported")]
    NotImplemented(String),
    #[error("DB index is out of range")]
    InvalidDatabaseIndex,
    #[error("invalid expire time in '{0}' command")]
    InvalidExpireTime(String),
    #[error("configuration error")]
    Config(#[from] ConfigError),
    /// Pre-rendered error line, code included (NOGROUP, BUSYGROUP, ...).
    #[error("{0}")]
    Raw(String),
}

impl CommandError {
    pub fn to_reply(&self) -> RespValue {
        let line = match self {
            CommandError::UnknownCommand(name) => {
                format!("ERR unknown command '{}'", name)
            }
            CommandError::WrongArgCount(name) => format!(
                "ERR wrong number of arguments for '{}' command",
                name.to_lowercase()
            ),
            CommandError::Syntax => "ERR syntax error".to_string(),
            CommandError::WrongType => {
                "WRONGTYPE Operation against a key holding the wrong kind of value".to_string()
            }
            CommandError::NotAnInteger => {
                "ERR value is not an integer or out of range".to_string()
            }
            CommandError::NotAFloat => "ERR value is not a valid float".to_string(),
            CommandError::OutOfRange(message) => format!("ERR {}", message),
            CommandError::NoAuth => "NOAUTH Authentication required.".to_string(),
            CommandError::AuthFailed => {
                "WRONGPASS invalid username-password pair or user is disabled".to_string()
            }
            CommandError::NoPerm(message) => format!("NOPERM {}", message),
            CommandError::SubscriberMode(name) => format!(
                "ERR Can't execute '{}': only (P)SUBSCRIBE / (P)UNSUBSCRIBE / PING / QUIT / RESET are allowed in this context",
                name.to_lowercase()
            ),
            CommandError::MultiNested => "ERR MULTI calls can not be nested".to_string(),
            CommandError::ExecWithoutMulti => "ERR EXEC without MULTI".to_string(),
            CommandError::DiscardWithoutMulti => "ERR DISCARD without MULTI".to_string(),
            CommandError::WatchInMulti => "ERR WATCH inside MULTI is not allowed".to_string(),
            CommandError::ExecAbort => {
                "EXECABORT Transaction discarded because of previous errors.".to_string()
            }
            CommandError::Unblocked => {
                "UNBLOCKED client unblocked via CLIENT UNBLOCK".to_string()
            }
            CommandError::NotImplemented(name) => {
                format!("ERR {} is not supported", name)
            }
            CommandError::InvalidDatabaseIndex => "ERR DB index is out of range".to_string(),
            CommandError::InvalidExpireTime(name) => {
                format!("ERR invalid expire time in '{}' command", name.to_lowercase())
            }
            CommandError::Config(error) => format!("ERR {}", error),
            CommandError::Raw(line) => line.clone(),
        };
        RespValue::Error(line)
    }
}

impl From<ValueError> for CommandError {
    fn from(error: ValueError) -> Self {
        match error {
            ValueError::NotAnInteger => CommandError::NotAnInteger,
            ValueError::NotAFloat => CommandError::NotAFloat,
            ValueError::Overflow => {
                CommandError::OutOfRange("increment or decrement would overflow".to_string())
            }
            ValueError::NanOrInfinity => {
                CommandError::OutOfRange("increment would produce NaN or Infinity".to_string())
            }
        }
    }
}

impl From<StreamError> for CommandError {
    fn from(error: StreamError) -> Self {
        CommandError::OutOfRange(error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let test_cases = vec![
            (
                CommandError::UnknownCommand("frobnicate".to_string()),
                "ERR unknown command 'frobnicate'",
            ),
            (
                CommandError::WrongArgCount("GET".to_string()),
                "ERR wrong number of arguments for 'get' command",
            ),
            (
                CommandError::WrongType,
                "WRONGTYPE Operation against a key holding the wrong kind of value",
            ),
            (CommandError::NoAuth, "NOAUTH Authentication required."),
            (
                CommandError::ExecAbort,
                "EXECABORT Transaction discarded because of previous errors.",
            ),
            (
                CommandError::Unblocked,
                "UNBLOCKED client unblocked via CLIENT UNBLOCK",
            ),
            (
                CommandError::Raw("NOGROUP No such consumer group".to_string()),
                "NOGROUP No such consumer group",
            ),
        ];

        for (error, expected) in test_cases {
            assert_eq!(
                error.to_reply(),
                RespValue::Error(expected.to_string()),
                "rendering {:?}",
                error
            );
        }
    }
}
