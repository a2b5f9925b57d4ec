//! MULTI/EXEC/DISCARD/WATCH/UNWATCH.
//!
//! Queueing itself happens in the executor (it must intercept commands
//! before they run); this module holds the control commands and the EXEC
//! drain, which runs the queue back through the executor's synchronous core
//! under the single lock hold that makes the batch atomic.

use bytes::Bytes;

use crate::commands::command_error::CommandError;
use crate::commands::context::CommandContext;
use crate::commands::{execute_command, precheck_queued};
use crate::resp::RespValue;
use crate::session::TransactionState;

pub fn multi(ctx: &mut CommandContext, _args: &[Bytes]) -> Result<RespValue, CommandError> {
    if ctx.session.transaction_state != TransactionState::None {
        return Err(CommandError::MultiNested);
    }
    ctx.session.transaction_state = TransactionState::Queueing;
    Ok(RespValue::ok())
}

pub fn discard(ctx: &mut CommandContext, _args: &[Bytes]) -> Result<RespValue, CommandError> {
    if ctx.session.transaction_state == TransactionState::None {
        return Err(CommandError::DiscardWithoutMulti);
    }
    ctx.session.clear_transaction();
    ctx.session.clear_watches();
    Ok(RespValue::ok())
}

pub fn watch(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    if ctx.session.transaction_state != TransactionState::None {
        return Err(CommandError::WatchInMulti);
    }

    let database_index = ctx.session.database_index;
    for key in &args[1..] {
        let version = ctx.store.database(database_index).version(key);
        ctx.session
            .watched_keys
            .push((database_index, key.clone(), version));
    }
    Ok(RespValue::ok())
}

pub fn unwatch(ctx: &mut CommandContext, _args: &[Bytes]) -> Result<RespValue, CommandError> {
    ctx.session.clear_watches();
    Ok(RespValue::ok())
}

pub fn exec(ctx: &mut CommandContext, _args: &[Bytes]) -> Result<RespValue, CommandError> {
    match ctx.session.transaction_state {
        TransactionState::None => return Err(CommandError::ExecWithoutMulti),
        TransactionState::DirtyExec => {
            ctx.session.clear_transaction();
            ctx.session.clear_watches();
            return Err(CommandError::ExecAbort);
        }
        TransactionState::Queueing => {}
    }

    // Optimistic concurrency: any watched key mutated since WATCH aborts.
    let aborted = ctx
        .session
        .watched_keys
        .iter()
        .any(|(database_index, key, version)| {
            ctx.store.database(*database_index).version(key) != *version
        });

    let queued = std::mem::take(&mut ctx.session.queued_commands);
    ctx.session.clear_transaction();
    ctx.session.clear_watches();

    if aborted {
        return Ok(RespValue::NullArray);
    }

    ctx.in_exec = true;
    let mut replies = Vec::with_capacity(queued.len());
    for command in queued {
        let reply = match precheck_queued(&command) {
            Ok((spec, name)) => {
                match execute_command(spec, &name, &command, ctx) {
                    Ok(reply) => reply,
                    Err(error) => error.to_reply(),
                }
            }
            Err(error) => error.to_reply(),
        };
        replies.push(reply);
    }
    ctx.in_exec = false;

    Ok(RespValue::Array(replies))
}
