//! In-process command harness for unit tests.
//!
//! Drives the same pipeline as a live connection — precheck, auth,
//! subscriber gate, ACL, transaction queueing, execution — but synchronously
//! against owned state and with a controllable clock, so expiry tests do not
//! have to sleep.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize};
use std::sync::{Arc, Mutex as StdMutex};

use bytes::Bytes;
use tokio::sync::Notify;

use crate::commands::command_error::CommandError;
use crate::commands::context::CommandContext;
use crate::commands::{
    authentication_required_with, authorize_with, execute_command, precheck_queued,
};
use crate::registry::flags;
use crate::resp::RespValue;
use crate::server::{ClientHandle, ServerOptions, ServerState};
use crate::session::{Session, TransactionState};
use crate::store::{MutationEvent, Store};

const MAIN_CLIENT: u64 = 1;
const OTHER_CLIENT: u64 = 2;

pub struct TestContext {
    store: Store,
    server: ServerState,
    sessions: HashMap<u64, Session>,
    handles: HashMap<u64, Arc<ClientHandle>>,
    now: u64,
    last_suppressed: bool,
    last_events: Vec<MutationEvent>,
}

fn socketless_handle(id: u64, now: u64) -> Arc<ClientHandle> {
    Arc::new(ClientHandle {
        id,
        address: format!("127.0.0.1:{}", 40_000 + id),
        name: StdMutex::new(String::new()),
        writer: None,
        protocol_version: AtomicU8::new(2),
        database_index: AtomicUsize::new(0),
        created_at_ms: now,
        last_command: StdMutex::new(String::new()),
        kill_requested: AtomicBool::new(false),
        kill_signal: Notify::new(),
        no_evict: AtomicBool::new(false),
        no_touch: AtomicBool::new(false),
    })
}

impl TestContext {
    pub fn new() -> Self {
        let now = 1_700_000_000_000;
        let mut sessions = HashMap::new();
        let mut handles = HashMap::new();
        for id in [MAIN_CLIENT, OTHER_CLIENT] {
            sessions.insert(id, Session::new(id));
            handles.insert(id, socketless_handle(id, now));
        }

        TestContext {
            store: Store::new(16),
            server: ServerState::new(&ServerOptions::default()),
            sessions,
            handles,
            now,
            last_suppressed: false,
            last_events: Vec::new(),
        }
    }

    pub fn advance_clock(&mut self, milliseconds: u64) {
        self.now += milliseconds;
    }

    pub fn session(&self) -> &Session {
        &self.sessions[&MAIN_CLIENT]
    }

    pub fn server(&self) -> &ServerState {
        &self.server
    }

    pub fn store(&mut self) -> &mut Store {
        &mut self.store
    }

    pub fn last_reply_suppressed(&self) -> bool {
        self.last_suppressed
    }

    /// Mutation-journal entries drained by the most recent command, for
    /// asserting on WATCH-version/notification event names.
    pub fn last_events(&self) -> &[MutationEvent] {
        &self.last_events
    }

    pub fn run(&mut self, command_line: &str) -> Result<RespValue, CommandError> {
        self.run_for(MAIN_CLIENT, command_line)
    }

    pub fn run_as_other_client(
        &mut self,
        command_line: &str,
    ) -> Result<RespValue, CommandError> {
        self.run_for(OTHER_CLIENT, command_line)
    }

    fn run_for(
        &mut self,
        client_id: u64,
        command_line: &str,
    ) -> Result<RespValue, CommandError> {
        let args = tokenize(command_line);
        self.run_args(client_id, args)
    }

    fn run_args(
        &mut self,
        client_id: u64,
        args: Vec<Bytes>,
    ) -> Result<RespValue, CommandError> {
        self.last_suppressed = false;
        let session = self.sessions.get_mut(&client_id).expect("known client");
        let handle = self.handles.get(&client_id).expect("known client");

        let queueing = matches!(
            session.transaction_state,
            TransactionState::Queueing | TransactionState::DirtyExec
        );

        let (spec, name) = match precheck_queued(&args) {
            Ok(found) => found,
            Err(error) => {
                if queueing {
                    session.transaction_state = TransactionState::DirtyExec;
                }
                return Err(error);
            }
        };

        if !spec.has_flag(flags::NO_AUTH) && authentication_required_with(&self.server, session)
        {
            return Err(CommandError::NoAuth);
        }

        if session.in_subscriber_mode() && !spec.has_flag(flags::SUBSCRIBER_OK) {
            return Err(CommandError::SubscriberMode(name));
        }

        if let Err(error) = authorize_with(&self.server, session, spec, &name, &args) {
            if queueing {
                session.transaction_state = TransactionState::DirtyExec;
            }
            return Err(error);
        }

        if queueing && !spec.has_flag(flags::TX_CONTROL) {
            session.queued_commands.push(args);
            return Ok(RespValue::SimpleString("QUEUED".to_string()));
        }

        let mut ctx = CommandContext {
            store: &mut self.store,
            server: &mut self.server,
            session: &mut *session,
            handle,
            now: self.now,
            post: Vec::new(),
            tail_frames: Vec::new(),
            suppress_reply: false,
            in_exec: false,
        };

        let result = execute_command(spec, &name, &args, &mut ctx);
        self.last_suppressed = ctx.suppress_reply;

        // Drain the journal so later commands start clean, keeping the
        // entries around for event assertions.
        self.last_events = self.store.drain_events();
        result
    }
}

/// redis-cli style tokenization: whitespace-separated, double quotes group,
/// backslash escapes the next byte inside quotes.
fn tokenize(line: &str) -> Vec<Bytes> {
    let mut tokens = Vec::new();
    let mut current = Vec::new();
    let mut in_token = false;
    let mut in_quotes = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' => {
                in_quotes = !in_quotes;
                in_token = true;
            }
            '\\' if in_quotes => {
                if let Some(escaped) = chars.next() {
                    let mut buffer = [0u8; 4];
                    current.extend_from_slice(escaped.encode_utf8(&mut buffer).as_bytes());
                }
            }
            c if c.is_whitespace() && !in_quotes => {
                if in_token {
                    tokens.push(Bytes::from(std::mem::take(&mut current)));
                    in_token = false;
                }
            }
            c => {
                let mut buffer = [0u8; 4];
                current.extend_from_slice(c.encode_utf8(&mut buffer).as_bytes());
                in_token = true;
            }
        }
    }
    if in_token {
        tokens.push(Bytes::from(current));
    }
    tokens
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_plain_and_quoted() {
        assert_eq!(
            tokenize("SET k v"),
            vec![Bytes::from("SET"), Bytes::from("k"), Bytes::from("v")]
        );
        assert_eq!(
            tokenize("SET k \"hello world\""),
            vec![
                Bytes::from("SET"),
                Bytes::from("k"),
                Bytes::from("hello world")
            ]
        );
        assert_eq!(
            tokenize("ECHO \"say \\\"hi\\\"\""),
            vec![Bytes::from("ECHO"), Bytes::from("say \"hi\"")]
        );
        assert_eq!(tokenize("ECHO \"\""), vec![Bytes::from("ECHO"), Bytes::from("")]);
    }

    #[test]
    fn test_unknown_command() {
        let mut test = TestContext::new();
        assert_eq!(
            test.run("FROBNICATE"),
            Err(CommandError::UnknownCommand("frobnicate".to_string()))
        );
    }

    #[test]
    fn test_arity_enforced_from_registry() {
        let mut test = TestContext::new();
        assert_eq!(
            test.run("GET"),
            Err(CommandError::WrongArgCount("GET".to_string()))
        );
        assert_eq!(
            test.run("GET a b"),
            Err(CommandError::WrongArgCount("GET".to_string()))
        );
    }

    #[test]
    fn test_acl_denied_command() {
        let mut test = TestContext::new();
        test.run("ACL SETUSER limited on nopass +@all -get ~*")
            .unwrap();
        test.run("AUTH limited x").unwrap();

        assert!(matches!(
            test.run("GET k"),
            Err(CommandError::NoPerm(_))
        ));
        // Other commands still pass.
        assert_eq!(test.run("SET k v"), Ok(RespValue::ok()));
    }

    #[test]
    fn test_acl_key_patterns() {
        let mut test = TestContext::new();
        test.run("ACL SETUSER reader on nopass +@read +auth ~foo:*")
            .unwrap();
        test.run("AUTH reader x").unwrap();

        assert_eq!(test.run("GET foo:bar"), Ok(RespValue::NullBulkString));
        assert!(matches!(
            test.run("GET bar:baz"),
            Err(CommandError::NoPerm(_))
        ));
        assert!(matches!(test.run("SET foo:bar 1"), Err(CommandError::NoPerm(_))));
    }

    #[test]
    fn test_acl_channel_patterns() {
        let mut test = TestContext::new();
        test.run("ACL SETUSER sub on nopass +@all &news.*").unwrap();
        test.run("AUTH sub x").unwrap();

        assert!(test.run("SUBSCRIBE news.tech").is_ok());
        assert!(matches!(
            test.run("SUBSCRIBE other"),
            Err(CommandError::NoPerm(_))
        ));
        assert!(matches!(
            test.run("PUBLISH private hi"),
            Err(CommandError::NoPerm(_))
        ));
    }

    #[test]
    fn test_subscriber_mode_restricts_resp2() {
        let mut test = TestContext::new();
        test.run("SUBSCRIBE news").unwrap();

        assert!(matches!(
            test.run("GET k"),
            Err(CommandError::SubscriberMode(_))
        ));
        // The permitted commands still work.
        assert!(test.run("PING").is_ok());
        assert!(test.run("UNSUBSCRIBE news").is_ok());
        // Out of subscriber mode again.
        assert_eq!(test.run("GET k"), Ok(RespValue::NullBulkString));
    }

    #[test]
    fn test_requirepass_gates_commands() {
        let mut test = TestContext::new();
        test.server.config.set_startup("requirepass", "hunter2");

        assert_eq!(test.run("GET k"), Err(CommandError::NoAuth));
        assert!(test.run("PING").is_ok());

        assert_eq!(test.run("AUTH wrong"), Err(CommandError::AuthFailed));
        assert_eq!(test.run("AUTH hunter2"), Ok(RespValue::ok()));
        assert_eq!(test.run("GET k"), Ok(RespValue::NullBulkString));
    }
}
