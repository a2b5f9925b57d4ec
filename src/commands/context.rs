//! Execution context handed to every command handler.
//!
//! Handlers run synchronously holding both the store lock and the server
//! write lock, which is what makes single commands and EXEC batches atomic.
//! Anything that must happen off those locks (frames to other clients,
//! kills, shutdown) is queued as a post action for the executor to perform
//! after release.

use std::sync::Arc;

use crate::server::{ClientHandle, ServerState};
use crate::session::Session;
use crate::store::{Database, Store};

pub enum PostAction {
    /// Write an already-encoded frame to another client's connection.
    DeliverFrame {
        handle: Arc<ClientHandle>,
        frame: Vec<u8>,
    },
    /// Close another client's connection.
    KillClient { handle: Arc<ClientHandle> },
    /// Stop the accept loop.
    Shutdown,
}

pub struct CommandContext<'a> {
    pub store: &'a mut Store,
    pub server: &'a mut ServerState,
    pub session: &'a mut Session,
    pub handle: &'a Arc<ClientHandle>,
    /// Wall clock for this command; one reading per command keeps expiry
    /// decisions consistent across its keys.
    pub now: u64,
    pub post: Vec<PostAction>,
    /// Extra frames for this client, written after the command reply
    /// (SUBSCRIBE sends one confirmation per channel).
    pub tail_frames: Vec<Vec<u8>>,
    /// Set by CLIENT REPLY OFF/SKIP so the executor suppresses the
    /// handler's own reply without consuming the skip.
    pub suppress_reply: bool,
    /// Inside an EXEC batch: blocking commands degrade to immediate forms.
    pub in_exec: bool,
}

impl<'a> CommandContext<'a> {
    /// The session's selected database.
    pub fn database(&mut self) -> &mut Database {
        self.store.database(self.session.database_index)
    }

    /// Registers a key read for client-side caching invalidation.
    pub fn track_read(&mut self, key: &bytes::Bytes) {
        if self.session.tracking {
            self.server.track_key_read(
                self.session.database_index,
                key.clone(),
                self.session.client_id,
            );
        }
    }
}
