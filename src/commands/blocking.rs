//! The blocking command executor.
//!
//! BLPOP-family and blocking XREAD commands run here: try the operation,
//! and when there is nothing to serve, register a waiter on the target keys
//! *under the same store-lock hold* (so a concurrent push cannot slip
//! between the miss and the registration), then suspend on the wake channel
//! until a mutation, a timeout, or a forced unblock.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::oneshot;
use tokio::sync::{Mutex, RwLock};

use crate::commands::arguments::ArgCursor;
use crate::commands::command_error::CommandError;
use crate::commands::context::CommandContext;
use crate::commands::{lists, streams};
use crate::effects;
use crate::resp::RespValue;
use crate::server::{ClientHandle, ServerState};
use crate::session::Session;
use crate::store::stream::StreamId;
use crate::store::{now_ms, Store, Wake};

/// What a parked command retries and how it replies.
enum BlockingPlan {
    PopFirst {
        keys: Vec<Bytes>,
        end: lists::End,
    },
    MoveElement {
        source: Bytes,
        destination: Bytes,
        from: lists::End,
        to: lists::End,
    },
    PopMany {
        keys: Vec<Bytes>,
        end: lists::End,
        count: usize,
    },
    Read {
        resolved: Vec<(Bytes, StreamId)>,
        count: Option<usize>,
    },
    ReadGroup {
        parsed: streams::XreadGroupArguments,
    },
}

impl BlockingPlan {
    fn wait_keys(&self) -> Vec<Bytes> {
        match self {
            BlockingPlan::PopFirst { keys, .. } | BlockingPlan::PopMany { keys, .. } => {
                keys.clone()
            }
            BlockingPlan::MoveElement { source, .. } => vec![source.clone()],
            BlockingPlan::Read { resolved, .. } => {
                resolved.iter().map(|(key, _)| key.clone()).collect()
            }
            BlockingPlan::ReadGroup { parsed } => {
                parsed.streams.iter().map(|(key, _)| key.clone()).collect()
            }
        }
    }

    fn timeout_reply(&self) -> RespValue {
        match self {
            BlockingPlan::MoveElement { .. } => RespValue::NullBulkString,
            _ => RespValue::NullArray,
        }
    }

    fn attempt(&self, ctx: &mut CommandContext) -> Result<Option<RespValue>, CommandError> {
        match self {
            BlockingPlan::PopFirst { keys, end } => {
                Ok(lists::try_pop_first(ctx, keys, *end)?.map(|(key, element)| {
                    RespValue::Array(vec![
                        RespValue::BulkString(key),
                        RespValue::BulkString(element),
                    ])
                }))
            }
            BlockingPlan::MoveElement {
                source,
                destination,
                from,
                to,
            } => Ok(lists::try_move_element(ctx, source, destination, *from, *to)?
                .map(RespValue::BulkString)),
            BlockingPlan::PopMany { keys, end, count } => {
                Ok(lists::try_pop_many(ctx, keys, *end, *count)?.map(|(key, elements)| {
                    RespValue::Array(vec![
                        RespValue::BulkString(key),
                        RespValue::Array(
                            elements.into_iter().map(RespValue::BulkString).collect(),
                        ),
                    ])
                }))
            }
            BlockingPlan::Read { resolved, count } => {
                streams::xread_attempt(ctx, resolved, *count)
            }
            BlockingPlan::ReadGroup { parsed } => streams::xreadgroup_attempt(ctx, parsed),
        }
    }
}

/// `0` (and `0.0`) mean "block forever".
fn parse_timeout_seconds(raw: &[u8]) -> Result<Option<Duration>, CommandError> {
    let text = std::str::from_utf8(raw).map_err(|_| {
        CommandError::OutOfRange("timeout is not a float or out of range".to_string())
    })?;
    let seconds = text.parse::<f64>().map_err(|_| {
        CommandError::OutOfRange("timeout is not a float or out of range".to_string())
    })?;
    if seconds.is_nan() || seconds.is_infinite() {
        return Err(CommandError::OutOfRange(
            "timeout is not a float or out of range".to_string(),
        ));
    }
    if seconds < 0.0 {
        return Err(CommandError::OutOfRange(
            "timeout is negative".to_string(),
        ));
    }
    if seconds == 0.0 {
        return Ok(None);
    }
    Ok(Some(Duration::from_secs_f64(seconds)))
}

fn parse_plan(name: &str, args: &[Bytes]) -> Result<(BlockingPlan, Option<Duration>), CommandError> {
    match name {
        "BLPOP" | "BRPOP" => {
            if args.len() < 3 {
                return Err(CommandError::WrongArgCount(name.to_string()));
            }
            let timeout = parse_timeout_seconds(&args[args.len() - 1])?;
            let keys = args[1..args.len() - 1].to_vec();
            let end = if name == "BLPOP" {
                lists::End::Left
            } else {
                lists::End::Right
            };
            Ok((BlockingPlan::PopFirst { keys, end }, timeout))
        }
        "BLMOVE" => {
            let mut cursor = ArgCursor::new(args);
            let source = cursor.expect_bytes()?;
            let destination = cursor.expect_bytes()?;
            let from = lists::End::parse(&mut cursor)?;
            let to = lists::End::parse(&mut cursor)?;
            let timeout = parse_timeout_seconds(&cursor.expect_bytes()?)?;
            cursor.finish()?;
            Ok((
                BlockingPlan::MoveElement {
                    source,
                    destination,
                    from,
                    to,
                },
                timeout,
            ))
        }
        "BRPOPLPUSH" => {
            let mut cursor = ArgCursor::new(args);
            let source = cursor.expect_bytes()?;
            let destination = cursor.expect_bytes()?;
            let timeout = parse_timeout_seconds(&cursor.expect_bytes()?)?;
            cursor.finish()?;
            Ok((
                BlockingPlan::MoveElement {
                    source,
                    destination,
                    from: lists::End::Right,
                    to: lists::End::Left,
                },
                timeout,
            ))
        }
        "BLMPOP" => {
            let mut cursor = ArgCursor::new(args);
            let timeout = parse_timeout_seconds(&cursor.expect_bytes()?)?;
            let parsed = lists::MpopArguments::parse(&mut cursor)?;
            Ok((
                BlockingPlan::PopMany {
                    keys: parsed.keys,
                    end: parsed.end,
                    count: parsed.count,
                },
                timeout,
            ))
        }
        "XREAD" => {
            let parsed = streams::XreadArguments::parse(args)?;
            let timeout = parsed
                .block_ms
                .filter(|&ms| ms > 0)
                .map(Duration::from_millis);
            // Ids resolve lazily under the first lock hold so `$` pins to
            // the state at call time.
            Ok((
                BlockingPlan::Read {
                    resolved: parsed
                        .streams
                        .iter()
                        .map(|(key, _)| (key.clone(), StreamId::MIN))
                        .collect(),
                    count: parsed.count,
                },
                timeout,
            ))
        }
        "XREADGROUP" => {
            let parsed = streams::XreadGroupArguments::parse(args)?;
            let timeout = parsed
                .block_ms
                .filter(|&ms| ms > 0)
                .map(Duration::from_millis);
            Ok((BlockingPlan::ReadGroup { parsed }, timeout))
        }
        _ => Err(CommandError::UnknownCommand(name.to_string())),
    }
}

#[allow(clippy::too_many_arguments)]
pub async fn run_blocking(
    name: &str,
    args: &[Bytes],
    session: &mut Session,
    handle: &Arc<ClientHandle>,
    store: &Arc<Mutex<Store>>,
    server: &Arc<RwLock<ServerState>>,
) -> Result<RespValue, CommandError> {
    let (mut plan, timeout) = parse_plan(name, args)?;
    let deadline = timeout.map(|duration| tokio::time::Instant::now() + duration);
    let client_id = session.client_id;

    // XREAD's `$` ids need one pass over the store before the first attempt.
    let mut ids_resolved = !matches!(plan, BlockingPlan::Read { .. });
    let raw_streams: Vec<(Bytes, Bytes)> = match &plan {
        BlockingPlan::Read { .. } => streams::XreadArguments::parse(args)?.streams,
        _ => Vec::new(),
    };

    loop {
        let wait = {
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

            if !ids_resolved {
                let resolved = streams::resolve_read_ids(&mut ctx, &raw_streams)?;
                plan = match plan {
                    BlockingPlan::Read { count, .. } => BlockingPlan::Read { resolved, count },
                    other => other,
                };
                ids_resolved = true;
            }

            match plan.attempt(&mut ctx) {
                Ok(Some(reply)) => {
                    let events = store_guard.drain_events();
                    drop(server_guard);
                    drop(store_guard);
                    effects::process_mutations(store, server, events).await;
                    return Ok(reply);
                }
                Ok(None) => {
                    let keys = plan.wait_keys();
                    let (token, receiver) =
                        store_guard.register_waiter(session.database_index, &keys, client_id);
                    (token, keys, receiver, store_guard.drain_events())
                }
                Err(error) => return Err(error),
            }
        };
        let (token, keys, receiver, events) = wait;
        effects::process_mutations(store, server, events).await;

        let wake = await_wake(receiver, deadline).await;

        match wake {
            Wake::Ready => {
                // Retry; stale queue entries on the other keys are swept on
                // their next wake.
                let mut store_guard = store.lock().await;
                store_guard.unregister_waiter(session.database_index, &keys, token);
            }
            Wake::Timeout => {
                let mut store_guard = store.lock().await;
                store_guard.unregister_waiter(session.database_index, &keys, token);
                return Ok(plan.timeout_reply());
            }
            Wake::Unblocked => {
                let mut store_guard = store.lock().await;
                store_guard.unregister_waiter(session.database_index, &keys, token);
                return Err(CommandError::Unblocked);
            }
        }
    }
}

/// The non-suspending form: one attempt, then the timeout reply. This is
/// what blocking commands degrade to inside MULTI/EXEC.
pub fn run_immediate(
    name: &str,
    args: &[Bytes],
    ctx: &mut CommandContext,
) -> Result<RespValue, CommandError> {
    let (mut plan, _timeout) = parse_plan(name, args)?;

    if let BlockingPlan::Read { count, .. } = &plan {
        let count = *count;
        let raw_streams = streams::XreadArguments::parse(args)?.streams;
        let resolved = streams::resolve_read_ids(ctx, &raw_streams)?;
        plan = BlockingPlan::Read { resolved, count };
    }

    match plan.attempt(ctx)? {
        Some(reply) => Ok(reply),
        None => Ok(plan.timeout_reply()),
    }
}

async fn await_wake(
    receiver: oneshot::Receiver<Wake>,
    deadline: Option<tokio::time::Instant>,
) -> Wake {
    match deadline {
        Some(deadline) => match tokio::time::timeout_at(deadline, receiver).await {
            Ok(Ok(wake)) => wake,
            // The sender vanished (server teardown): treat as unblocked.
            Ok(Err(_)) => Wake::Unblocked,
            Err(_) => Wake::Timeout,
        },
        None => receiver.await.unwrap_or(Wake::Unblocked),
    }
}
