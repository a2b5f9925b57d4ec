//! Stream commands, including consumer groups. The blocking XREAD path
//! reuses the attempt helpers here from the blocking executor.

use bytes::Bytes;

use crate::commands::arguments::ArgCursor;
use crate::commands::command_error::CommandError;
use crate::commands::context::CommandContext;
use crate::resp::RespValue;
use crate::store::stream::{AddId, ConsumerGroup, PendingEntry, Stream, StreamId};
use crate::store::{Database, Value};

fn read_stream<'a>(
    database: &'a mut Database,
    key: &[u8],
    now: u64,
) -> Result<Option<&'a Stream>, CommandError> {
    match database.read(key, now) {
        None => Ok(None),
        Some(Value::Stream(stream)) => Ok(Some(stream)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn write_stream<'a>(
    database: &'a mut Database,
    key: &[u8],
    now: u64,
) -> Result<Option<&'a mut Stream>, CommandError> {
    match database.write(key, now) {
        None => Ok(None),
        Some(Value::Stream(stream)) => Ok(Some(stream)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn no_group_error(group: &[u8], key: &[u8]) -> CommandError {
    CommandError::Raw(format!(
        "NOGROUP No such consumer group '{}' for key name '{}'",
        String::from_utf8_lossy(group),
        String::from_utf8_lossy(key)
    ))
}

fn entries_reply(entries: Vec<(StreamId, Vec<(Bytes, Bytes)>)>) -> RespValue {
    RespValue::Array(
        entries
            .into_iter()
            .map(|(id, fields)| {
                let mut flat = Vec::with_capacity(fields.len() * 2);
                for (field, value) in fields {
                    flat.push(RespValue::BulkString(field));
                    flat.push(RespValue::BulkString(value));
                }
                RespValue::Array(vec![
                    RespValue::bulk_from_string(id.to_string()),
                    RespValue::Array(flat),
                ])
            })
            .collect(),
    )
}

pub fn xadd(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;

    let mut no_mkstream = false;
    // MAXLEN/MINID trimming arguments are accepted and applied after the add.
    let mut max_length = None;
    loop {
        if cursor.match_token("NOMKSTREAM") {
            no_mkstream = true;
        } else if cursor.match_token("MAXLEN") {
            let _ = cursor.match_token("~") || cursor.match_token("=");
            max_length = Some(cursor.expect_usize()?);
        } else {
            break;
        }
    }

    let id_token = cursor.next().ok_or(CommandError::Syntax)?;
    let id = AddId::parse(id_token).ok_or_else(|| {
        CommandError::OutOfRange("Invalid stream ID specified as stream command argument".to_string())
    })?;

    let flat = cursor.rest();
    if flat.is_empty() || flat.len() % 2 != 0 {
        return Err(CommandError::WrongArgCount("XADD".to_string()));
    }
    let fields: Vec<(Bytes, Bytes)> = flat
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();

    let now = ctx.now;
    let database = ctx.database();

    if no_mkstream && read_stream(database, &key, now)?.is_none() {
        return Ok(RespValue::NullBulkString);
    }

    read_stream(database, &key, now)?;
    let value = database.entry_or_insert_with(key.clone(), now, || Value::Stream(Stream::new()));
    let Value::Stream(stream) = value else {
        return Err(CommandError::WrongType);
    };

    let added = stream.add(id, fields, now)?;

    if let Some(max_length) = max_length {
        while stream.len() > max_length {
            let oldest = stream
                .range(StreamId::MIN, StreamId::MAX, false, false, false, Some(1))
                .first()
                .map(|(id, _)| *id);
            match oldest {
                Some(id) => {
                    stream.delete(&id);
                }
                None => break,
            }
        }
    }

    database.mark_mutated(key, "xadd");
    Ok(RespValue::bulk_from_string(added.to_string()))
}

pub fn xlen(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let length = read_stream(ctx.database(), &key, now)?
        .map(Stream::len)
        .unwrap_or(0);
    Ok(RespValue::Integer(length as i64))
}

/// One end of an XRANGE: `-`, `+`, `id`, or `(id`.
fn parse_range_bound(
    raw: &[u8],
    low: bool,
) -> Result<(StreamId, bool), CommandError> {
    match raw {
        b"-" => return Ok((StreamId::MIN, false)),
        b"+" => return Ok((StreamId::MAX, false)),
        _ => {}
    }

    let (body, exclusive) = match raw.first() {
        Some(b'(') => (&raw[1..], true),
        _ => (raw, false),
    };
    let default_seq = if low { 0 } else { u64::MAX };
    let id = StreamId::parse(body, default_seq).ok_or_else(|| {
        CommandError::OutOfRange("Invalid stream ID specified as stream command argument".to_string())
    })?;
    Ok((id, exclusive))
}

fn xrange_impl(
    ctx: &mut CommandContext,
    args: &[Bytes],
    reverse: bool,
) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let first_raw = cursor.expect_bytes()?;
    let second_raw = cursor.expect_bytes()?;
    let count = if cursor.done() {
        None
    } else {
        cursor.expect_token("COUNT")?;
        let count = cursor.expect_usize()?;
        cursor.finish()?;
        Some(count)
    };

    // XREVRANGE takes end before start.
    let (low_raw, high_raw) = if reverse {
        (&second_raw, &first_raw)
    } else {
        (&first_raw, &second_raw)
    };
    let (start, start_exclusive) = parse_range_bound(low_raw, true)?;
    let (end, end_exclusive) = parse_range_bound(high_raw, false)?;

    let now = ctx.now;
    let Some(stream) = read_stream(ctx.database(), &key, now)? else {
        return Ok(RespValue::Array(Vec::new()));
    };
    let entries = stream.range(start, end, start_exclusive, end_exclusive, reverse, count);
    Ok(entries_reply(entries))
}

pub fn xrange(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    xrange_impl(ctx, args, false)
}

pub fn xrevrange(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    xrange_impl(ctx, args, true)
}

pub fn xdel(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let raw_ids = cursor.rest();
    if raw_ids.is_empty() {
        return Err(CommandError::WrongArgCount("XDEL".to_string()));
    }

    let mut ids = Vec::with_capacity(raw_ids.len());
    for raw in &raw_ids {
        ids.push(StreamId::parse(raw, 0).ok_or_else(|| {
            CommandError::OutOfRange(
                "Invalid stream ID specified as stream command argument".to_string(),
            )
        })?);
    }

    let now = ctx.now;
    let database = ctx.database();
    let Some(stream) = write_stream(database, &key, now)? else {
        return Ok(RespValue::Integer(0));
    };

    let mut removed = 0;
    for id in ids {
        if stream.delete(&id) {
            removed += 1;
        }
    }
    if removed > 0 {
        database.mark_mutated(key, "xdel");
    }
    Ok(RespValue::Integer(removed))
}

pub struct XreadArguments {
    pub count: Option<usize>,
    pub block_ms: Option<u64>,
    /// (key, raw id token) pairs in request order.
    pub streams: Vec<(Bytes, Bytes)>,
}

impl XreadArguments {
    pub fn parse(args: &[Bytes]) -> Result<Self, CommandError> {
        let mut cursor = ArgCursor::new(args);
        let mut count = None;
        let mut block_ms = None;

        loop {
            if cursor.match_token("COUNT") {
                count = Some(cursor.expect_usize()?);
            } else if cursor.match_token("BLOCK") {
                let wanted = cursor.expect_int()?;
                if wanted < 0 {
                    return Err(CommandError::OutOfRange(
                        "timeout is negative".to_string(),
                    ));
                }
                block_ms = Some(wanted as u64);
            } else if cursor.match_token("STREAMS") {
                break;
            } else {
                return Err(CommandError::Syntax);
            }
        }

        let tail = cursor.rest();
        if tail.is_empty() || tail.len() % 2 != 0 {
            return Err(CommandError::Raw(
                "ERR Unbalanced XREAD list of streams: for each stream key an ID or '$' must be specified.".to_string(),
            ));
        }
        let key_count = tail.len() / 2;
        let streams = (0..key_count)
            .map(|index| (tail[index].clone(), tail[key_count + index].clone()))
            .collect();

        Ok(XreadArguments {
            count,
            block_ms,
            streams,
        })
    }
}

/// Pins `$` to each stream's current last id so a blocking read only sees
/// entries that arrive after the call.
pub fn resolve_read_ids(
    ctx: &mut CommandContext,
    streams: &[(Bytes, Bytes)],
) -> Result<Vec<(Bytes, StreamId)>, CommandError> {
    let now = ctx.now;
    let database = ctx.database();

    let mut resolved = Vec::with_capacity(streams.len());
    for (key, raw_id) in streams {
        let id = if raw_id.as_ref() == b"$" {
            read_stream(database, key, now)?
                .map(|stream| stream.last_id)
                .unwrap_or(StreamId::MIN)
        } else {
            StreamId::parse(raw_id, 0).ok_or_else(|| {
                CommandError::OutOfRange(
                    "Invalid stream ID specified as stream command argument".to_string(),
                )
            })?
        };
        resolved.push((key.clone(), id));
    }
    Ok(resolved)
}

/// One XREAD pass. `None` when no stream has entries past its id.
pub fn xread_attempt(
    ctx: &mut CommandContext,
    resolved: &[(Bytes, StreamId)],
    count: Option<usize>,
) -> Result<Option<RespValue>, CommandError> {
    let now = ctx.now;
    let protocol_version = ctx.session.protocol_version;
    let database = ctx.database();

    let mut per_key = Vec::new();
    for (key, after) in resolved {
        let Some(stream) = read_stream(database, key, now)? else {
            continue;
        };
        let entries = stream.entries_after(*after, count);
        if !entries.is_empty() {
            per_key.push((key.clone(), entries_reply(entries)));
        }
    }

    if per_key.is_empty() {
        return Ok(None);
    }
    Ok(Some(streams_reply(per_key, protocol_version)))
}

fn streams_reply(per_key: Vec<(Bytes, RespValue)>, protocol_version: u8) -> RespValue {
    if protocol_version >= 3 {
        RespValue::Map(
            per_key
                .into_iter()
                .map(|(key, entries)| (RespValue::BulkString(key), entries))
                .collect(),
        )
    } else {
        RespValue::Array(
            per_key
                .into_iter()
                .map(|(key, entries)| {
                    RespValue::Array(vec![RespValue::BulkString(key), entries])
                })
                .collect(),
        )
    }
}

/// Non-blocking XREAD; the blocking form is driven by the blocking
/// executor.
pub fn xread(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let parsed = XreadArguments::parse(args)?;
    let resolved = resolve_read_ids(ctx, &parsed.streams)?;
    match xread_attempt(ctx, &resolved, parsed.count)? {
        Some(reply) => Ok(reply),
        None => Ok(RespValue::NullArray),
    }
}

pub struct XreadGroupArguments {
    pub group: Bytes,
    pub consumer: Bytes,
    pub count: Option<usize>,
    pub block_ms: Option<u64>,
    pub no_ack: bool,
    pub streams: Vec<(Bytes, Bytes)>,
}

impl XreadGroupArguments {
    pub fn parse(args: &[Bytes]) -> Result<Self, CommandError> {
        let mut cursor = ArgCursor::new(args);
        cursor.expect_token("GROUP")?;
        let group = cursor.expect_bytes()?;
        let consumer = cursor.expect_bytes()?;

        let mut count = None;
        let mut block_ms = None;
        let mut no_ack = false;

        loop {
            if cursor.match_token("COUNT") {
                count = Some(cursor.expect_usize()?);
            } else if cursor.match_token("BLOCK") {
                let wanted = cursor.expect_int()?;
                if wanted < 0 {
                    return Err(CommandError::OutOfRange(
                        "timeout is negative".to_string(),
                    ));
                }
                block_ms = Some(wanted as u64);
            } else if cursor.match_token("NOACK") {
                no_ack = true;
            } else if cursor.match_token("STREAMS") {
                break;
            } else {
                return Err(CommandError::Syntax);
            }
        }

        let tail = cursor.rest();
        if tail.is_empty() || tail.len() % 2 != 0 {
            return Err(CommandError::Raw(
                "ERR Unbalanced XREADGROUP list of streams: for each stream key an ID or '>' must be specified.".to_string(),
            ));
        }
        let key_count = tail.len() / 2;
        let streams = (0..key_count)
            .map(|index| (tail[index].clone(), tail[key_count + index].clone()))
            .collect();

        Ok(XreadGroupArguments {
            group,
            consumer,
            count,
            block_ms,
            no_ack,
            streams,
        })
    }
}

/// One XREADGROUP pass. `>` delivers new entries into the group's pending
/// list; an explicit id replays the consumer's own pending entries.
pub fn xreadgroup_attempt(
    ctx: &mut CommandContext,
    parsed: &XreadGroupArguments,
) -> Result<Option<RespValue>, CommandError> {
    let now = ctx.now;
    let protocol_version = ctx.session.protocol_version;
    let database = ctx.database();

    let mut per_key = Vec::new();
    let mut mutated = false;

    for (key, raw_id) in &parsed.streams {
        if read_stream(database, key, now)?.is_none() {
            return Err(no_group_error(&parsed.group, key));
        }
        let Some(Value::Stream(stream)) = database.write(key, now) else {
            return Err(CommandError::WrongType);
        };
        if !stream.groups.contains_key(&parsed.group) {
            return Err(no_group_error(&parsed.group, key));
        }

        if raw_id.as_ref() == b">" {
            let group = stream.groups.get(&parsed.group).expect("checked above");
            let new_entries = stream.entries_after(group.last_delivered, parsed.count);
            if new_entries.is_empty() {
                continue;
            }

            let group = stream
                .groups
                .get_mut(&parsed.group)
                .expect("checked above");
            group.consumers.insert(parsed.consumer.clone(), now);
            for (id, _) in &new_entries {
                group.last_delivered = *id;
                if !parsed.no_ack {
                    group.pending.insert(
                        *id,
                        PendingEntry {
                            consumer: parsed.consumer.clone(),
                            delivery_time_ms: now,
                            delivery_count: 1,
                        },
                    );
                }
            }
            mutated = true;
            per_key.push((key.clone(), entries_reply(new_entries)));
        } else {
            let from = StreamId::parse(raw_id, 0).ok_or_else(|| {
                CommandError::OutOfRange(
                    "Invalid stream ID specified as stream command argument".to_string(),
                )
            })?;

            let group = stream.groups.get(&parsed.group).expect("checked above");
            let own_pending: Vec<StreamId> = group
                .pending
                .range(from..)
                .filter(|(_, entry)| entry.consumer == parsed.consumer)
                .map(|(&id, _)| id)
                .take(parsed.count.unwrap_or(usize::MAX))
                .collect();

            let entries: Vec<(StreamId, Vec<(Bytes, Bytes)>)> = own_pending
                .iter()
                .filter_map(|id| stream.get(id).map(|fields| (*id, fields.clone())))
                .collect();
            // Replaying pending entries always produces a (possibly empty)
            // listing; it never blocks.
            per_key.push((key.clone(), entries_reply(entries)));
        }
    }

    if mutated {
        for (key, _) in &parsed.streams {
            ctx.database().mark_mutated(key.clone(), "xgroup-deliver");
        }
    }

    if per_key.is_empty() {
        return Ok(None);
    }
    Ok(Some(streams_reply(per_key, protocol_version)))
}

pub fn xreadgroup(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let parsed = XreadGroupArguments::parse(args)?;
    match xreadgroup_attempt(ctx, &parsed)? {
        Some(reply) => Ok(reply),
        None => Ok(RespValue::NullArray),
    }
}

pub fn xgroup(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let subcommand = cursor.next_token()?;

    match subcommand.as_str() {
        "CREATE" => {
            let key = cursor.expect_bytes()?;
            let group = cursor.expect_bytes()?;
            let raw_id = cursor.expect_bytes()?;
            let mkstream = if cursor.done() {
                false
            } else {
                cursor.expect_token("MKSTREAM")?;
                cursor.finish()?;
                true
            };

            let now = ctx.now;
            let database = ctx.database();

            if read_stream(database, &key, now)?.is_none() {
                if !mkstream {
                    return Err(CommandError::Raw(
                        "ERR The XGROUP subcommand requires the key to exist. Note that for CREATE you may want to use the MKSTREAM option to create an empty stream automatically.".to_string(),
                    ));
                }
                database.set_value(key.clone(), Value::Stream(Stream::new()), "xgroup-create");
            }

            let Some(Value::Stream(stream)) = database.write(&key, now) else {
                return Err(CommandError::WrongType);
            };
            let start = if raw_id.as_ref() == b"$" {
                stream.last_id
            } else {
                StreamId::parse(&raw_id, 0).ok_or_else(|| {
                    CommandError::OutOfRange(
                        "Invalid stream ID specified as stream command argument".to_string(),
                    )
                })?
            };

            if stream.groups.contains_key(&group) {
                return Err(CommandError::Raw(
                    "BUSYGROUP Consumer Group name already exists".to_string(),
                ));
            }
            stream.groups.insert(group, ConsumerGroup::new(start));
            database.mark_mutated(key, "xgroup-create");
            Ok(RespValue::ok())
        }
        "SETID" => {
            let key = cursor.expect_bytes()?;
            let group = cursor.expect_bytes()?;
            let raw_id = cursor.expect_bytes()?;
            cursor.finish()?;

            let now = ctx.now;
            let database = ctx.database();
            let Some(stream) = write_stream(database, &key, now)? else {
                return Err(no_group_error(&group, &key));
            };
            let id = if raw_id.as_ref() == b"$" {
                stream.last_id
            } else {
                StreamId::parse(&raw_id, 0).ok_or_else(|| {
                    CommandError::OutOfRange(
                        "Invalid stream ID specified as stream command argument".to_string(),
                    )
                })?
            };
            let Some(entry) = stream.groups.get_mut(&group) else {
                return Err(no_group_error(&group, &key));
            };
            entry.last_delivered = id;
            database.mark_mutated(key, "xgroup-setid");
            Ok(RespValue::ok())
        }
        "DESTROY" => {
            let key = cursor.expect_bytes()?;
            let group = cursor.expect_bytes()?;
            cursor.finish()?;

            let now = ctx.now;
            let database = ctx.database();
            let Some(stream) = write_stream(database, &key, now)? else {
                return Ok(RespValue::Integer(0));
            };
            let removed = stream.groups.remove(&group).is_some();
            if removed {
                database.mark_mutated(key, "xgroup-destroy");
            }
            Ok(RespValue::Integer(removed as i64))
        }
        "CREATECONSUMER" => {
            let key = cursor.expect_bytes()?;
            let group = cursor.expect_bytes()?;
            let consumer = cursor.expect_bytes()?;
            cursor.finish()?;

            let now = ctx.now;
            let database = ctx.database();
            let Some(stream) = write_stream(database, &key, now)? else {
                return Err(no_group_error(&group, &key));
            };
            let Some(entry) = stream.groups.get_mut(&group) else {
                return Err(no_group_error(&group, &key));
            };
            let created = entry.consumers.insert(consumer, now).is_none();
            Ok(RespValue::Integer(created as i64))
        }
        "DELCONSUMER" => {
            let key = cursor.expect_bytes()?;
            let group = cursor.expect_bytes()?;
            let consumer = cursor.expect_bytes()?;
            cursor.finish()?;

            let now = ctx.now;
            let database = ctx.database();
            let Some(stream) = write_stream(database, &key, now)? else {
                return Err(no_group_error(&group, &key));
            };
            let Some(entry) = stream.groups.get_mut(&group) else {
                return Err(no_group_error(&group, &key));
            };

            let doomed: Vec<StreamId> = entry
                .pending
                .iter()
                .filter(|(_, pending)| pending.consumer == consumer)
                .map(|(&id, _)| id)
                .collect();
            for id in &doomed {
                entry.pending.remove(id);
            }
            entry.consumers.remove(&consumer);
            Ok(RespValue::Integer(doomed.len() as i64))
        }
        _ => Err(CommandError::Syntax),
    }
}

pub fn xack(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let group = cursor.expect_bytes()?;
    let raw_ids = cursor.rest();
    if raw_ids.is_empty() {
        return Err(CommandError::WrongArgCount("XACK".to_string()));
    }

    let now = ctx.now;
    let database = ctx.database();
    let Some(stream) = write_stream(database, &key, now)? else {
        return Ok(RespValue::Integer(0));
    };
    let Some(entry) = stream.groups.get_mut(&group) else {
        return Ok(RespValue::Integer(0));
    };

    let mut acknowledged = 0;
    for raw in raw_ids {
        let Some(id) = StreamId::parse(&raw, 0) else {
            return Err(CommandError::OutOfRange(
                "Invalid stream ID specified as stream command argument".to_string(),
            ));
        };
        if entry.pending.remove(&id).is_some() {
            acknowledged += 1;
        }
    }
    Ok(RespValue::Integer(acknowledged))
}

pub fn xpending(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let group = cursor.expect_bytes()?;

    let now = ctx.now;

    if cursor.done() {
        // Summary form: count, smallest id, greatest id, per-consumer counts.
        let database = ctx.database();
        let Some(stream) = read_stream(database, &key, now)? else {
            return Err(no_group_error(&group, &key));
        };
        let Some(entry) = stream.groups.get(&group) else {
            return Err(no_group_error(&group, &key));
        };

        if entry.pending.is_empty() {
            return Ok(RespValue::Array(vec![
                RespValue::Integer(0),
                RespValue::NullBulkString,
                RespValue::NullBulkString,
                RespValue::NullArray,
            ]));
        }

        let smallest = *entry.pending.keys().next().expect("non-empty");
        let greatest = *entry.pending.keys().next_back().expect("non-empty");

        let mut per_consumer: Vec<(Bytes, u64)> = Vec::new();
        for pending in entry.pending.values() {
            match per_consumer
                .iter_mut()
                .find(|(consumer, _)| *consumer == pending.consumer)
            {
                Some((_, count)) => *count += 1,
                None => per_consumer.push((pending.consumer.clone(), 1)),
            }
        }
        per_consumer.sort();

        return Ok(RespValue::Array(vec![
            RespValue::Integer(entry.pending.len() as i64),
            RespValue::bulk_from_string(smallest.to_string()),
            RespValue::bulk_from_string(greatest.to_string()),
            RespValue::Array(
                per_consumer
                    .into_iter()
                    .map(|(consumer, count)| {
                        RespValue::Array(vec![
                            RespValue::BulkString(consumer),
                            RespValue::bulk_from_string(count.to_string()),
                        ])
                    })
                    .collect(),
            ),
        ]));
    }

    // Extended form: [IDLE ms] start end count [consumer].
    let mut min_idle_ms = 0;
    if cursor.match_token("IDLE") {
        min_idle_ms = cursor.expect_int()?.max(0) as u64;
    }
    let (start, start_exclusive) = parse_range_bound(&cursor.expect_bytes()?, true)?;
    let (end, end_exclusive) = parse_range_bound(&cursor.expect_bytes()?, false)?;
    let count = cursor.expect_usize()?;
    let consumer_filter = if cursor.done() {
        None
    } else {
        let consumer = cursor.expect_bytes()?;
        cursor.finish()?;
        Some(consumer)
    };

    let database = ctx.database();
    let Some(stream) = read_stream(database, &key, now)? else {
        return Err(no_group_error(&group, &key));
    };
    let Some(entry) = stream.groups.get(&group) else {
        return Err(no_group_error(&group, &key));
    };

    let low = if start_exclusive {
        match start.successor() {
            Some(id) => id,
            None => return Ok(RespValue::Array(Vec::new())),
        }
    } else {
        start
    };

    let rows: Vec<RespValue> = entry
        .pending
        .range(low..=end)
        .filter(|(id, _)| !(end_exclusive && **id == end))
        .filter(|(_, pending)| now.saturating_sub(pending.delivery_time_ms) >= min_idle_ms)
        .filter(|(_, pending)| {
            consumer_filter
                .as_ref()
                .map_or(true, |consumer| pending.consumer == *consumer)
        })
        .take(count)
        .map(|(id, pending)| {
            RespValue::Array(vec![
                RespValue::bulk_from_string(id.to_string()),
                RespValue::BulkString(pending.consumer.clone()),
                RespValue::Integer(now.saturating_sub(pending.delivery_time_ms) as i64),
                RespValue::Integer(pending.delivery_count as i64),
            ])
        })
        .collect();

    Ok(RespValue::Array(rows))
}

pub struct XclaimArguments {
    key: Bytes,
    group: Bytes,
    consumer: Bytes,
    min_idle_ms: u64,
    ids: Vec<StreamId>,
    idle_override_ms: Option<u64>,
    time_override_ms: Option<u64>,
    retry_count: Option<u64>,
    force: bool,
    just_id: bool,
}

impl XclaimArguments {
    pub fn parse(args: &[Bytes]) -> Result<Self, CommandError> {
        let mut cursor = ArgCursor::new(args);
        let key = cursor.expect_bytes()?;
        let group = cursor.expect_bytes()?;
        let consumer = cursor.expect_bytes()?;
        let min_idle_ms = cursor.expect_int()?.max(0) as u64;

        let mut ids = Vec::new();
        while let Some(raw) = cursor.peek() {
            let Some(id) = StreamId::parse(raw, 0) else {
                break;
            };
            cursor.next();
            ids.push(id);
        }
        if ids.is_empty() {
            return Err(CommandError::OutOfRange(
                "Invalid stream ID specified as stream command argument".to_string(),
            ));
        }

        let mut parsed = XclaimArguments {
            key,
            group,
            consumer,
            min_idle_ms,
            ids,
            idle_override_ms: None,
            time_override_ms: None,
            retry_count: None,
            force: false,
            just_id: false,
        };

        while !cursor.done() {
            if cursor.match_token("IDLE") {
                parsed.idle_override_ms = Some(cursor.expect_int()?.max(0) as u64);
            } else if cursor.match_token("TIME") {
                parsed.time_override_ms = Some(cursor.expect_int()?.max(0) as u64);
            } else if cursor.match_token("RETRYCOUNT") {
                parsed.retry_count = Some(cursor.expect_int()?.max(0) as u64);
            } else if cursor.match_token("FORCE") {
                parsed.force = true;
            } else if cursor.match_token("JUSTID") {
                parsed.just_id = true;
            } else {
                return Err(CommandError::Syntax);
            }
        }
        Ok(parsed)
    }
}

pub fn xclaim(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let parsed = XclaimArguments::parse(args)?;

    let now = ctx.now;
    let database = ctx.database();
    let Some(stream) = write_stream(database, &parsed.key, now)? else {
        return Err(no_group_error(&parsed.group, &parsed.key));
    };
    if !stream.groups.contains_key(&parsed.group) {
        return Err(no_group_error(&parsed.group, &parsed.key));
    }

    let mut claimed = Vec::new();
    for id in &parsed.ids {
        let entry_exists = stream.get(id).is_some();
        let group = stream.groups.get_mut(&parsed.group).expect("checked above");

        let eligible = match group.pending.get(id) {
            Some(pending) => now.saturating_sub(pending.delivery_time_ms) >= parsed.min_idle_ms,
            // FORCE creates a pending entry for any existing stream entry.
            None => parsed.force && entry_exists,
        };
        if !eligible {
            continue;
        }
        if !entry_exists {
            // The entry was deleted from the stream; drop the dangling
            // pending record.
            group.pending.remove(id);
            continue;
        }

        let delivery_time_ms = match (parsed.time_override_ms, parsed.idle_override_ms) {
            (Some(time), _) => time,
            (None, Some(idle)) => now.saturating_sub(idle),
            (None, None) => now,
        };
        let delivery_count = match (parsed.retry_count, group.pending.get(id)) {
            (Some(retry), _) => retry,
            (None, Some(pending)) if parsed.just_id => pending.delivery_count,
            (None, Some(pending)) => pending.delivery_count + 1,
            (None, None) => 1,
        };

        group.pending.insert(
            *id,
            PendingEntry {
                consumer: parsed.consumer.clone(),
                delivery_time_ms,
                delivery_count,
            },
        );
        group.consumers.insert(parsed.consumer.clone(), now);
        claimed.push(*id);
    }

    database.mark_mutated(parsed.key.clone(), "xclaim");

    if parsed.just_id {
        return Ok(RespValue::Array(
            claimed
                .into_iter()
                .map(|id| RespValue::bulk_from_string(id.to_string()))
                .collect(),
        ));
    }

    let Some(stream) = read_stream(ctx.database(), &parsed.key, now)? else {
        return Ok(RespValue::Array(Vec::new()));
    };
    let entries: Vec<(StreamId, Vec<(Bytes, Bytes)>)> = claimed
        .iter()
        .filter_map(|id| stream.get(id).map(|fields| (*id, fields.clone())))
        .collect();
    Ok(entries_reply(entries))
}
