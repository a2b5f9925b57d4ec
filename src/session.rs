//! Per-connection session state.
//!
//! Everything the executor needs to know about one client between requests:
//! selected database, authenticated user, negotiated protocol version, reply
//! mode, subscriptions, transaction queue, and WATCH bookmarks.

use std::collections::HashSet;

use bytes::Bytes;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReplyMode {
    On,
    Off,
    /// Swallow exactly the next reply, then back to On.
    Skip,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransactionState {
    None,
    Queueing,
    /// A queue error was seen; EXEC must abort.
    DirtyExec,
}

#[derive(Debug)]
pub struct Session {
    pub client_id: u64,
    pub database_index: usize,
    /// The ACL identity this session runs as.
    pub user: String,
    pub authenticated: bool,
    pub protocol_version: u8,
    pub reply_mode: ReplyMode,
    pub transaction_state: TransactionState,
    pub queued_commands: Vec<Vec<Bytes>>,
    /// (database, key, version at WATCH time).
    pub watched_keys: Vec<(usize, Bytes, u64)>,
    pub subscribed_channels: HashSet<Bytes>,
    pub subscribed_patterns: HashSet<Bytes>,
    /// CLIENT TRACKING state; tracked read keys live server-side.
    pub tracking: bool,
    pub should_close: bool,
}

impl Session {
    pub fn new(client_id: u64) -> Self {
        Session {
            client_id,
            database_index: 0,
            user: "default".to_string(),
            authenticated: false,
            protocol_version: 2,
            reply_mode: ReplyMode::On,
            transaction_state: TransactionState::None,
            queued_commands: Vec::new(),
            watched_keys: Vec::new(),
            subscribed_channels: HashSet::new(),
            subscribed_patterns: HashSet::new(),
            tracking: false,
            should_close: false,
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscribed_channels.len() + self.subscribed_patterns.len()
    }

    /// RESP2 sessions with active subscriptions may only run the
    /// subscription commands; RESP3 lifted that restriction.
    pub fn in_subscriber_mode(&self) -> bool {
        self.protocol_version == 2 && self.subscription_count() > 0
    }

    pub fn clear_transaction(&mut self) {
        self.transaction_state = TransactionState::None;
        self.queued_commands.clear();
    }

    pub fn clear_watches(&mut self) {
        self.watched_keys.clear();
    }

    /// RESET: back to a freshly-connected state (the protocol version is
    /// negotiated per connection and survives).
    pub fn reset(&mut self) {
        let client_id = self.client_id;
        let protocol_version = self.protocol_version;
        *self = Session::new(client_id);
        self.protocol_version = protocol_version;
    }

    /// Whether the next reply should actually be written, consuming one
    /// Skip if armed.
    pub fn take_reply_permission(&mut self) -> bool {
        match self.reply_mode {
            ReplyMode::On => true,
            ReplyMode::Off => false,
            ReplyMode::Skip => {
                self.reply_mode = ReplyMode::On;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscriber_mode_is_resp2_only() {
        let mut session = Session::new(1);
        session.subscribed_channels.insert(Bytes::from("news"));
        assert!(session.in_subscriber_mode());

        session.protocol_version = 3;
        assert!(!session.in_subscriber_mode());
    }

    #[test]
    fn test_reply_skip_reverts_to_on() {
        let mut session = Session::new(1);

        session.reply_mode = ReplyMode::Skip;
        assert!(!session.take_reply_permission());
        assert!(session.take_reply_permission());

        session.reply_mode = ReplyMode::Off;
        assert!(!session.take_reply_permission());
        assert!(!session.take_reply_permission());
    }

    #[test]
    fn test_reset_preserves_identity_and_protocol() {
        let mut session = Session::new(42);
        session.protocol_version = 3;
        session.database_index = 5;
        session.transaction_state = TransactionState::Queueing;
        session.queued_commands.push(vec![Bytes::from("PING")]);
        session.watched_keys.push((0, Bytes::from("k"), 1));

        session.reset();

        assert_eq!(session.client_id, 42);
        assert_eq!(session.protocol_version, 3);
        assert_eq!(session.database_index, 0);
        assert_eq!(session.transaction_state, TransactionState::None);
        assert!(session.queued_commands.is_empty());
        assert!(session.watched_keys.is_empty());
    }
}
