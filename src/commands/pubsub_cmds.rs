//! Pub/Sub commands.
//!
//! Subscription confirmations and published messages are Push frames; the
//! encoder rewrites them as plain arrays for RESP2 sessions. Deliveries to
//! other clients leave the handler as post actions so they happen off the
//! locks.

use bytes::Bytes;

use crate::commands::arguments::ArgCursor;
use crate::commands::command_error::CommandError;
use crate::commands::context::{CommandContext, PostAction};
use crate::resp::RespValue;

fn confirmation(kind: &str, channel: Option<&Bytes>, count: usize) -> RespValue {
    RespValue::Push(vec![
        RespValue::bulk_from_string(kind),
        match channel {
            Some(channel) => RespValue::BulkString(channel.clone()),
            None => RespValue::NullBulkString,
        },
        RespValue::Integer(count as i64),
    ])
}

/// The first confirmation is the command reply; the rest follow it on the
/// wire as tail frames, so the client sees one frame per channel in order.
fn reply_per_channel(
    ctx: &mut CommandContext,
    confirmations: Vec<RespValue>,
) -> Result<RespValue, CommandError> {
    let mut iter = confirmations.into_iter();
    let first = iter.next().ok_or(CommandError::Syntax)?;

    let protocol_version = ctx.session.protocol_version;
    for extra in iter {
        ctx.tail_frames.push(extra.encode(protocol_version));
    }
    Ok(first)
}

pub fn subscribe(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let channels = cursor.rest();
    if channels.is_empty() {
        return Err(CommandError::WrongArgCount("SUBSCRIBE".to_string()));
    }

    let client_id = ctx.session.client_id;
    let mut confirmations = Vec::with_capacity(channels.len());
    for channel in channels {
        ctx.server.pubsub.subscribe(channel.clone(), client_id);
        ctx.session.subscribed_channels.insert(channel.clone());
        confirmations.push(confirmation(
            "subscribe",
            Some(&channel),
            ctx.session.subscription_count(),
        ));
    }
    reply_per_channel(ctx, confirmations)
}

pub fn unsubscribe(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let requested = cursor.rest();

    let channels: Vec<Bytes> = if requested.is_empty() {
        let mut all: Vec<Bytes> = ctx.session.subscribed_channels.iter().cloned().collect();
        all.sort();
        all
    } else {
        requested
    };

    if channels.is_empty() {
        // Not subscribed anywhere: a single confirmation with a nil channel.
        return Ok(confirmation("unsubscribe", None, 0));
    }

    let client_id = ctx.session.client_id;
    let mut confirmations = Vec::with_capacity(channels.len());
    for channel in channels {
        ctx.server.pubsub.unsubscribe(&channel, client_id);
        ctx.session.subscribed_channels.remove(&channel);
        confirmations.push(confirmation(
            "unsubscribe",
            Some(&channel),
            ctx.session.subscription_count(),
        ));
    }
    reply_per_channel(ctx, confirmations)
}

pub fn psubscribe(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let patterns = cursor.rest();
    if patterns.is_empty() {
        return Err(CommandError::WrongArgCount("PSUBSCRIBE".to_string()));
    }

    let client_id = ctx.session.client_id;
    let mut confirmations = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        ctx.server.pubsub.psubscribe(pattern.clone(), client_id);
        ctx.session.subscribed_patterns.insert(pattern.clone());
        confirmations.push(confirmation(
            "psubscribe",
            Some(&pattern),
            ctx.session.subscription_count(),
        ));
    }
    reply_per_channel(ctx, confirmations)
}

pub fn punsubscribe(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let requested = cursor.rest();

    let patterns: Vec<Bytes> = if requested.is_empty() {
        let mut all: Vec<Bytes> = ctx.session.subscribed_patterns.iter().cloned().collect();
        all.sort();
        all
    } else {
        requested
    };

    if patterns.is_empty() {
        return Ok(confirmation("punsubscribe", None, 0));
    }

    let client_id = ctx.session.client_id;
    let mut confirmations = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        ctx.server.pubsub.punsubscribe(&pattern, client_id);
        ctx.session.subscribed_patterns.remove(&pattern);
        confirmations.push(confirmation(
            "punsubscribe",
            Some(&pattern),
            ctx.session.subscription_count(),
        ));
    }
    reply_per_channel(ctx, confirmations)
}

pub fn publish(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let channel = cursor.expect_bytes()?;
    let payload = cursor.expect_bytes()?;
    cursor.finish()?;

    let deliveries = ctx.server.pubsub.deliveries(&channel);
    let receivers = deliveries.len();

    for delivery in deliveries {
        let Some(handle) = ctx.server.clients.get(&delivery.client_id) else {
            continue;
        };
        let protocol_version = handle
            .protocol_version
            .load(std::sync::atomic::Ordering::SeqCst);

        let elements = match &delivery.pattern {
            Some(pattern) => vec![
                RespValue::bulk_from_string("pmessage"),
                RespValue::BulkString(pattern.clone()),
                RespValue::BulkString(channel.clone()),
                RespValue::BulkString(payload.clone()),
            ],
            None => vec![
                RespValue::bulk_from_string("message"),
                RespValue::BulkString(channel.clone()),
                RespValue::BulkString(payload.clone()),
            ],
        };

        ctx.post.push(PostAction::DeliverFrame {
            handle: std::sync::Arc::clone(handle),
            frame: RespValue::Push(elements).encode(protocol_version),
        });
    }

    Ok(RespValue::Integer(receivers as i64))
}

pub fn pubsub(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let subcommand = cursor.next_token()?;

    match subcommand.as_str() {
        "CHANNELS" => {
            let filter = if cursor.done() {
                None
            } else {
                let pattern = cursor.expect_bytes()?;
                cursor.finish()?;
                Some(pattern)
            };
            let channels = ctx
                .server
                .pubsub
                .active_channels(filter.as_deref())
                .into_iter()
                .map(RespValue::BulkString)
                .collect();
            Ok(RespValue::Array(channels))
        }
        "NUMSUB" => {
            let channels = cursor.rest();
            let mut replies = Vec::with_capacity(channels.len() * 2);
            for channel in channels {
                let count = ctx.server.pubsub.subscriber_count(&channel);
                replies.push(RespValue::BulkString(channel));
                replies.push(RespValue::Integer(count as i64));
            }
            Ok(RespValue::Array(replies))
        }
        "NUMPAT" => {
            cursor.finish()?;
            Ok(RespValue::Integer(ctx.server.pubsub.pattern_count() as i64))
        }
        _ => Err(CommandError::Syntax),
    }
}
