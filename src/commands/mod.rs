//! Command execution.
//!
//! [`handle_request`] is the per-request pipeline: registry lookup, arity,
//! authentication, subscriber-mode gating, ACL, transaction queueing, and
//! finally execution. Ordinary commands run synchronously under the store
//! and server locks ([`execute_command`]); the blocking family suspends in
//! [`blocking::run_blocking`] instead.

pub mod arguments;
pub mod blocking;
pub mod command_error;
pub mod connections;
pub mod context;
pub mod hashes;
pub mod keyspace;
pub mod lists;
pub mod pubsub_cmds;
pub mod server_cmds;
pub mod sets;
pub mod sorted_sets;
pub mod streams;
pub mod strings;
pub mod transactions;

#[cfg(test)]
pub mod testing;

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

pub use command_error::CommandError;
pub use context::{CommandContext, PostAction};

use crate::effects;
use crate::registry::{self, flags, CommandSpec};
use crate::resp::RespValue;
use crate::server::{ClientHandle, ServerState};
use crate::session::{Session, TransactionState};
use crate::store::{now_ms, Store};

fn command_name(args: &[Bytes]) -> Result<String, CommandError> {
    let raw = args.first().ok_or(CommandError::Syntax)?;
    std::str::from_utf8(raw)
        .map(|name| name.to_uppercase())
        .map_err(|_| CommandError::UnknownCommand(String::from_utf8_lossy(raw).into_owned()))
}

/// Lookup + arity; the checks a command must pass before it may even be
/// queued.
pub fn precheck_queued(args: &[Bytes]) -> Result<(&'static CommandSpec, String), CommandError> {
    let name = command_name(args)?;
    let spec =
        registry::lookup(&name).ok_or_else(|| CommandError::UnknownCommand(name.to_lowercase()))?;
    if !spec.arity_matches(args.len()) {
        return Err(CommandError::WrongArgCount(name));
    }
    Ok((spec, name))
}

/// The synchronous core: every command that does not suspend. Blocking
/// commands landing here (inside EXEC, or via tests) degrade to their
/// immediate forms.
pub fn execute_command(
    _spec: &'static CommandSpec,
    name: &str,
    args: &[Bytes],
    ctx: &mut CommandContext,
) -> Result<RespValue, CommandError> {
    match name {
        // Connection handling.
        "AUTH" => connections::auth(ctx, args),
        "CLIENT" => connections::client(ctx, args),
        "ECHO" => connections::echo(ctx, args),
        "HELLO" => connections::hello(ctx, args),
        "PING" => connections::ping(ctx, args),
        "QUIT" => connections::quit(ctx, args),
        "RESET" => connections::reset(ctx, args),
        "SELECT" => connections::select(ctx, args),
        // Keyspace.
        "COPY" => keyspace::copy(ctx, args),
        "DBSIZE" => keyspace::dbsize(ctx, args),
        "DEL" | "UNLINK" => keyspace::del(ctx, args),
        "DUMP" => keyspace::dump(ctx, args),
        "EXISTS" => keyspace::exists(ctx, args),
        "EXPIRE" => keyspace::expire(ctx, args),
        "EXPIREAT" => keyspace::expireat(ctx, args),
        "EXPIRETIME" => keyspace::expiretime(ctx, args),
        "FLUSHALL" => keyspace::flushall(ctx, args),
        "FLUSHDB" => keyspace::flushdb(ctx, args),
        "KEYS" => keyspace::keys(ctx, args),
        "PERSIST" => keyspace::persist(ctx, args),
        "PEXPIRE" => keyspace::pexpire(ctx, args),
        "PEXPIREAT" => keyspace::pexpireat(ctx, args),
        "PEXPIRETIME" => keyspace::pexpiretime(ctx, args),
        "PTTL" => keyspace::pttl(ctx, args),
        "RANDOMKEY" => keyspace::randomkey(ctx, args),
        "RENAME" => keyspace::rename(ctx, args),
        "RENAMENX" => keyspace::renamenx(ctx, args),
        "RESTORE" => keyspace::restore(ctx, args),
        "SCAN" => keyspace::scan(ctx, args),
        "TOUCH" => keyspace::touch(ctx, args),
        "TTL" => keyspace::ttl(ctx, args),
        "TYPE" => keyspace::type_command(ctx, args),
        // Strings and bitmaps.
        "APPEND" => strings::append(ctx, args),
        "BITCOUNT" => strings::bitcount(ctx, args),
        "BITOP" => strings::bitop(ctx, args),
        "BITPOS" => strings::bitpos(ctx, args),
        "DECR" => strings::decr(ctx, args),
        "DECRBY" => strings::decrby(ctx, args),
        "GET" => strings::get(ctx, args),
        "GETBIT" => strings::getbit(ctx, args),
        "GETDEL" => strings::getdel(ctx, args),
        "GETEX" => strings::getex(ctx, args),
        "GETRANGE" => strings::getrange(ctx, args),
        "GETSET" => strings::getset(ctx, args),
        "INCR" => strings::incr(ctx, args),
        "INCRBY" => strings::incrby(ctx, args),
        "INCRBYFLOAT" => strings::incrbyfloat(ctx, args),
        "MGET" => strings::mget(ctx, args),
        "MSET" => strings::mset(ctx, args),
        "MSETNX" => strings::msetnx(ctx, args),
        "PSETEX" => strings::psetex(ctx, args),
        "SET" => strings::set(ctx, args),
        "SETBIT" => strings::setbit(ctx, args),
        "SETEX" => strings::setex(ctx, args),
        "SETNX" => strings::setnx(ctx, args),
        "SETRANGE" => strings::setrange(ctx, args),
        "STRLEN" => strings::strlen(ctx, args),
        // Lists.
        "BLMOVE" | "BLMPOP" | "BLPOP" | "BRPOP" | "BRPOPLPUSH" => {
            blocking::run_immediate(name, args, ctx)
        }
        "LINDEX" => lists::lindex(ctx, args),
        "LINSERT" => lists::linsert(ctx, args),
        "LLEN" => lists::llen(ctx, args),
        "LMOVE" => lists::lmove(ctx, args),
        "LMPOP" => lists::lmpop(ctx, args),
        "LPOP" => lists::lpop(ctx, args),
        "LPOS" => lists::lpos(ctx, args),
        "LPUSH" => lists::lpush(ctx, args),
        "LPUSHX" => lists::lpushx(ctx, args),
        "LRANGE" => lists::lrange(ctx, args),
        "LREM" => lists::lrem(ctx, args),
        "LSET" => lists::lset(ctx, args),
        "LTRIM" => lists::ltrim(ctx, args),
        "RPOP" => lists::rpop(ctx, args),
        "RPOPLPUSH" => lists::rpoplpush(ctx, args),
        "RPUSH" => lists::rpush(ctx, args),
        "RPUSHX" => lists::rpushx(ctx, args),
        // Hashes.
        "HDEL" => hashes::hdel(ctx, args),
        "HEXISTS" => hashes::hexists(ctx, args),
        "HGET" => hashes::hget(ctx, args),
        "HGETALL" => hashes::hgetall(ctx, args),
        "HINCRBY" => hashes::hincrby(ctx, args),
        "HINCRBYFLOAT" => hashes::hincrbyfloat(ctx, args),
        "HKEYS" => hashes::hkeys(ctx, args),
        "HLEN" => hashes::hlen(ctx, args),
        "HMGET" => hashes::hmget(ctx, args),
        "HMSET" => hashes::hmset(ctx, args),
        "HRANDFIELD" => hashes::hrandfield(ctx, args),
        "HSCAN" => hashes::hscan(ctx, args),
        "HSET" => hashes::hset(ctx, args),
        "HSETNX" => hashes::hsetnx(ctx, args),
        "HSTRLEN" => hashes::hstrlen(ctx, args),
        "HVALS" => hashes::hvals(ctx, args),
        // Sets.
        "SADD" => sets::sadd(ctx, args),
        "SCARD" => sets::scard(ctx, args),
        "SDIFF" => sets::sdiff(ctx, args),
        "SDIFFSTORE" => sets::sdiffstore(ctx, args),
        "SINTER" => sets::sinter(ctx, args),
        "SINTERCARD" => sets::sintercard(ctx, args),
        "SINTERSTORE" => sets::sinterstore(ctx, args),
        "SISMEMBER" => sets::sismember(ctx, args),
        "SMEMBERS" => sets::smembers(ctx, args),
        "SMISMEMBER" => sets::smismember(ctx, args),
        "SMOVE" => sets::smove(ctx, args),
        "SPOP" => sets::spop(ctx, args),
        "SRANDMEMBER" => sets::srandmember(ctx, args),
        "SREM" => sets::srem(ctx, args),
        "SSCAN" => sets::sscan(ctx, args),
        "SUNION" => sets::sunion(ctx, args),
        "SUNIONSTORE" => sets::sunionstore(ctx, args),
        // Sorted sets.
        "ZADD" => sorted_sets::zadd(ctx, args),
        "ZCARD" => sorted_sets::zcard(ctx, args),
        "ZCOUNT" => sorted_sets::zcount(ctx, args),
        "ZDIFF" => sorted_sets::zdiff(ctx, args),
        "ZDIFFSTORE" => sorted_sets::zdiffstore(ctx, args),
        "ZINCRBY" => sorted_sets::zincrby(ctx, args),
        "ZINTER" => sorted_sets::zinter(ctx, args),
        "ZINTERSTORE" => sorted_sets::zinterstore(ctx, args),
        "ZLEXCOUNT" => sorted_sets::zlexcount(ctx, args),
        "ZMSCORE" => sorted_sets::zmscore(ctx, args),
        "ZPOPMAX" => sorted_sets::zpopmax(ctx, args),
        "ZPOPMIN" => sorted_sets::zpopmin(ctx, args),
        "ZRANDMEMBER" => sorted_sets::zrandmember(ctx, args),
        "ZRANGE" => sorted_sets::zrange(ctx, args),
        "ZRANGEBYLEX" => sorted_sets::zrangebylex(ctx, args),
        "ZRANGEBYSCORE" => sorted_sets::zrangebyscore(ctx, args),
        "ZRANK" => sorted_sets::zrank(ctx, args),
        "ZREM" => sorted_sets::zrem(ctx, args),
        "ZREMRANGEBYRANK" => sorted_sets::zremrangebyrank(ctx, args),
        "ZREMRANGEBYSCORE" => sorted_sets::zremrangebyscore(ctx, args),
        "ZREVRANGE" => sorted_sets::zrevrange(ctx, args),
        "ZREVRANGEBYLEX" => sorted_sets::zrevrangebylex(ctx, args),
        "ZREVRANGEBYSCORE" => sorted_sets::zrevrangebyscore(ctx, args),
        "ZREVRANK" => sorted_sets::zrevrank(ctx, args),
        "ZSCORE" => sorted_sets::zscore(ctx, args),
        "ZUNION" => sorted_sets::zunion(ctx, args),
        "ZUNIONSTORE" => sorted_sets::zunionstore(ctx, args),
        // Streams.
        "XACK" => streams::xack(ctx, args),
        "XADD" => streams::xadd(ctx, args),
        "XCLAIM" => streams::xclaim(ctx, args),
        "XDEL" => streams::xdel(ctx, args),
        "XGROUP" => streams::xgroup(ctx, args),
        "XLEN" => streams::xlen(ctx, args),
        "XPENDING" => streams::xpending(ctx, args),
        "XRANGE" => streams::xrange(ctx, args),
        "XREAD" => streams::xread(ctx, args),
        "XREADGROUP" => streams::xreadgroup(ctx, args),
        "XREVRANGE" => streams::xrevrange(ctx, args),
        // Pub/Sub.
        "PSUBSCRIBE" => pubsub_cmds::psubscribe(ctx, args),
        "PUBLISH" => pubsub_cmds::publish(ctx, args),
        "PUBSUB" => pubsub_cmds::pubsub(ctx, args),
        "PUNSUBSCRIBE" => pubsub_cmds::punsubscribe(ctx, args),
        "SUBSCRIBE" => pubsub_cmds::subscribe(ctx, args),
        "UNSUBSCRIBE" => pubsub_cmds::unsubscribe(ctx, args),
        // Transactions.
        "DISCARD" => transactions::discard(ctx, args),
        "EXEC" => transactions::exec(ctx, args),
        "MULTI" => transactions::multi(ctx, args),
        "UNWATCH" => transactions::unwatch(ctx, args),
        "WATCH" => transactions::watch(ctx, args),
        // Server administration.
        "ACL" => server_cmds::acl(ctx, args),
        "COMMAND" => server_cmds::command(ctx, args),
        "CONFIG" => server_cmds::config(ctx, args),
        "INFO" => server_cmds::info(ctx, args),
        "SHUTDOWN" => server_cmds::shutdown(ctx, args),
        "TIME" => server_cmds::time(ctx, args),
        "WAIT" => server_cmds::wait(ctx, args),
        other => Err(CommandError::UnknownCommand(other.to_lowercase())),
    }
}

/// Whether a raw request would take the suspending path. The connection
/// loop races these against socket closure so a disconnected client's
/// parked wait is dropped promptly.
pub fn is_blocking_request(args: &[Bytes]) -> bool {
    let Ok(name) = command_name(args) else {
        return false;
    };
    let Some(spec) = registry::lookup(&name) else {
        return false;
    };
    is_blocking_invocation(spec, args)
}

/// Whether this invocation must go through the suspending path.
fn is_blocking_invocation(spec: &CommandSpec, args: &[Bytes]) -> bool {
    if !spec.has_flag(flags::BLOCKING) {
        return false;
    }
    match spec.name {
        // XREAD-family commands only block when BLOCK was given.
        "XREAD" | "XREADGROUP" => args
            .iter()
            .any(|arg| arg.eq_ignore_ascii_case(b"BLOCK")),
        "WAIT" => false,
        _ => true,
    }
}

pub(crate) fn authentication_required_with(
    server_state: &ServerState,
    session: &Session,
) -> bool {
    if session.authenticated {
        return false;
    }
    let requirepass = server_state.config.get("requirepass").unwrap_or("");
    if !requirepass.is_empty() {
        return true;
    }
    !server_state
        .acl
        .user("default")
        .is_some_and(|user| user.enabled && user.nopass)
}

/// ACL authorization against the session's user: the command itself, every
/// key position, and every channel argument.
pub(crate) fn authorize_with(
    server_state: &ServerState,
    session: &Session,
    spec: &'static CommandSpec,
    name: &str,
    args: &[Bytes],
) -> Result<(), CommandError> {
    let Some(user) = server_state.acl.user(&session.user) else {
        return Err(CommandError::NoPerm(format!(
            "User {} has no permissions to run the '{}' command",
            session.user,
            name.to_lowercase()
        )));
    };

    if !user.can_run(name, spec.categories) {
        return Err(CommandError::NoPerm(format!(
            "User {} has no permissions to run the '{}' command",
            session.user,
            name.to_lowercase()
        )));
    }

    for key in spec.keys(args) {
        if !user.can_access_key(key) {
            return Err(CommandError::NoPerm(format!(
                "User {} has no permissions to access one of the keys used as arguments",
                session.user
            )));
        }
    }

    let channels: &[Bytes] = match name {
        "SUBSCRIBE" | "PSUBSCRIBE" => &args[1..],
        "PUBLISH" => &args[1..2.min(args.len())],
        _ => &[],
    };
    for channel in channels {
        if !user.can_access_channel(channel) {
            return Err(CommandError::NoPerm(format!(
                "User {} has no permissions to access one of the channels used as arguments",
                session.user
            )));
        }
    }

    Ok(())
}

/// Runs one parsed request end to end and returns the encoded reply frame,
/// or `None` when the reply mode suppresses it.
pub async fn handle_request(
    args: Vec<Bytes>,
    session: &mut Session,
    handle: &Arc<ClientHandle>,
    store: &Arc<Mutex<Store>>,
    server: &Arc<RwLock<ServerState>>,
) -> Option<Vec<u8>> {
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
            return finish(session, Err(error), false);
        }
    };

    *handle.last_command.lock().expect("last command lock") = name.to_lowercase();

    {
        let server_guard = server.read().await;

        if !spec.has_flag(flags::NO_AUTH)
            && authentication_required_with(&server_guard, session)
        {
            drop(server_guard);
            return finish(session, Err(CommandError::NoAuth), false);
        }

        if session.in_subscriber_mode() && !spec.has_flag(flags::SUBSCRIBER_OK) {
            drop(server_guard);
            return finish(session, Err(CommandError::SubscriberMode(name)), false);
        }

        if let Err(error) = authorize_with(&server_guard, session, spec, &name, &args) {
            drop(server_guard);
            if queueing {
                session.transaction_state = TransactionState::DirtyExec;
            }
            return finish(session, Err(error), false);
        }
    }

    if queueing && !spec.has_flag(flags::TX_CONTROL) {
        session.queued_commands.push(args);
        return finish(
            session,
            Ok(RespValue::SimpleString("QUEUED".to_string())),
            false,
        );
    }

    {
        let mut server_guard = server.write().await;
        server_guard.stats.commands_processed += 1;
    }

    if is_blocking_invocation(spec, &args) {
        let result = blocking::run_blocking(&name, &args, session, handle, store, server).await;
        return finish(session, result, false);
    }

    let (result, post, tails, suppress, events) = {
        let mut store_guard = store.lock().await;
        let mut server_guard = server.write().await;
        let mut ctx = CommandContext {
            store: &mut *store_guard,
            server: &mut *server_guard,
            session: &mut *session,
            handle,
            now: now_ms(),
            post: Vec::new(),
            tail_frames: Vec::new(),
            suppress_reply: false,
            in_exec: false,
        };

        let result = execute_command(spec, &name, &args, &mut ctx);
        let suppress = ctx.suppress_reply;
        let post = std::mem::take(&mut ctx.post);
        let tails = std::mem::take(&mut ctx.tail_frames);
        let events = store_guard.drain_events();
        (result, post, tails, suppress, events)
    };

    for action in post {
        match action {
            PostAction::DeliverFrame { handle, frame } => {
                if let Err(e) = handle.send(&frame).await {
                    debug!(client = handle.id, "frame delivery failed: {}", e);
                }
            }
            PostAction::KillClient { handle } => {
                handle.request_kill();
            }
            PostAction::Shutdown => {
                let server_guard = server.read().await;
                server_guard.shutdown.notify_one();
            }
        }
    }

    effects::process_mutations(store, server, events).await;

    let mut frame = finish(session, result, suppress);
    if !tails.is_empty() {
        let combined = frame.get_or_insert_with(Vec::new);
        for tail in tails {
            combined.extend_from_slice(&tail);
        }
    }
    frame
}

/// Applies the reply mode and encodes.
fn finish(
    session: &mut Session,
    result: Result<RespValue, CommandError>,
    suppress: bool,
) -> Option<Vec<u8>> {
    let reply = match result {
        Ok(reply) => reply,
        Err(error) => error.to_reply(),
    };

    if suppress {
        return None;
    }
    if !session.take_reply_permission() {
        return None;
    }
    Some(reply.encode(session.protocol_version))
}

/// Cleanup when a connection goes away: waiters, subscriptions, tracking,
/// and the client-table entry.
pub async fn disconnect_cleanup(
    session: &Session,
    store: &Arc<Mutex<Store>>,
    server: &Arc<RwLock<ServerState>>,
) {
    {
        let mut store_guard = store.lock().await;
        store_guard.remove_client_waiters(session.client_id);
    }
    let mut server_guard = server.write().await;
    server_guard.unregister_client(session.client_id);
}
