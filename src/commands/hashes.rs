//! Hash commands.

use std::collections::HashMap;

use bytes::Bytes;

use crate::commands::arguments::ArgCursor;
use crate::commands::command_error::CommandError;
use crate::commands::context::CommandContext;
use crate::resp::RespValue;
use crate::store::hash::random_fields;
use crate::store::string::{format_float, StringValue};
use crate::store::{Database, Value};

fn read_hash<'a>(
    database: &'a mut Database,
    key: &[u8],
    now: u64,
) -> Result<Option<&'a HashMap<Bytes, Bytes>>, CommandError> {
    match database.read(key, now) {
        None => Ok(None),
        Some(Value::Hash(hash)) => Ok(Some(hash)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn write_hash<'a>(
    database: &'a mut Database,
    key: &[u8],
    now: u64,
) -> Result<Option<&'a mut HashMap<Bytes, Bytes>>, CommandError> {
    match database.write(key, now) {
        None => Ok(None),
        Some(Value::Hash(hash)) => Ok(Some(hash)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn hash_entry<'a>(
    database: &'a mut Database,
    key: &Bytes,
    now: u64,
) -> Result<&'a mut HashMap<Bytes, Bytes>, CommandError> {
    read_hash(database, key, now)?;
    let value = database.entry_or_insert_with(key.clone(), now, || Value::Hash(HashMap::new()));
    match value {
        Value::Hash(hash) => Ok(hash),
        _ => Err(CommandError::WrongType),
    }
}

pub fn hset(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let flat = cursor.rest();
    if flat.is_empty() || flat.len() % 2 != 0 {
        return Err(CommandError::WrongArgCount("HSET".to_string()));
    }

    let now = ctx.now;
    let database = ctx.database();
    let hash = hash_entry(database, &key, now)?;

    let mut added = 0;
    for pair in flat.chunks(2) {
        if hash.insert(pair[0].clone(), pair[1].clone()).is_none() {
            added += 1;
        }
    }
    database.mark_mutated(key, "hset");
    Ok(RespValue::Integer(added))
}

pub fn hsetnx(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let field = cursor.expect_bytes()?;
    let value = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let database = ctx.database();
    let hash = hash_entry(database, &key, now)?;

    if hash.contains_key(&field) {
        // Nothing was written; drop the key again if we just created it.
        database.collapse_if_empty(&key);
        return Ok(RespValue::Integer(0));
    }
    hash.insert(field, value);
    database.mark_mutated(key, "hset");
    Ok(RespValue::Integer(1))
}

pub fn hget(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let field = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let reply = match read_hash(ctx.database(), &key, now)? {
        Some(hash) => match hash.get(&field) {
            Some(value) => RespValue::BulkString(value.clone()),
            None => RespValue::NullBulkString,
        },
        None => RespValue::NullBulkString,
    };
    ctx.track_read(&key);
    Ok(reply)
}

pub fn hmget(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let fields = cursor.rest();
    if fields.is_empty() {
        return Err(CommandError::WrongArgCount("HMGET".to_string()));
    }

    let now = ctx.now;
    let hash = read_hash(ctx.database(), &key, now)?;
    let replies = fields
        .iter()
        .map(|field| match hash.and_then(|hash| hash.get(field)) {
            Some(value) => RespValue::BulkString(value.clone()),
            None => RespValue::NullBulkString,
        })
        .collect();
    Ok(RespValue::Array(replies))
}

pub fn hmset(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    hset(ctx, args)?;
    Ok(RespValue::ok())
}

pub fn hdel(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let fields = cursor.rest();
    if fields.is_empty() {
        return Err(CommandError::WrongArgCount("HDEL".to_string()));
    }

    let now = ctx.now;
    let database = ctx.database();
    let Some(hash) = write_hash(database, &key, now)? else {
        return Ok(RespValue::Integer(0));
    };

    let mut removed = 0;
    for field in fields {
        if hash.remove(&field).is_some() {
            removed += 1;
        }
    }
    if removed > 0 {
        database.mark_mutated(key.clone(), "hdel");
        database.collapse_if_empty(&key);
    }
    Ok(RespValue::Integer(removed))
}

pub fn hlen(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let length = read_hash(ctx.database(), &key, now)?
        .map(HashMap::len)
        .unwrap_or(0);
    Ok(RespValue::Integer(length as i64))
}

pub fn hexists(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let field = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let present = read_hash(ctx.database(), &key, now)?
        .is_some_and(|hash| hash.contains_key(&field));
    Ok(RespValue::Integer(present as i64))
}

pub fn hstrlen(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let field = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let length = read_hash(ctx.database(), &key, now)?
        .and_then(|hash| hash.get(&field))
        .map(Bytes::len)
        .unwrap_or(0);
    Ok(RespValue::Integer(length as i64))
}

pub fn hkeys(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    hash_projection(ctx, args, |field, _| vec![RespValue::BulkString(field.clone())])
}

pub fn hvals(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    hash_projection(ctx, args, |_, value| vec![RespValue::BulkString(value.clone())])
}

pub fn hgetall(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let Some(hash) = read_hash(ctx.database(), &key, now)? else {
        return Ok(if ctx.session.protocol_version >= 3 {
            RespValue::Map(Vec::new())
        } else {
            RespValue::Array(Vec::new())
        });
    };

    let mut pairs: Vec<(Bytes, Bytes)> = hash
        .iter()
        .map(|(field, value)| (field.clone(), value.clone()))
        .collect();
    pairs.sort();

    Ok(if ctx.session.protocol_version >= 3 {
        RespValue::Map(
            pairs
                .into_iter()
                .map(|(field, value)| {
                    (RespValue::BulkString(field), RespValue::BulkString(value))
                })
                .collect(),
        )
    } else {
        RespValue::Array(
            pairs
                .into_iter()
                .flat_map(|(field, value)| {
                    [RespValue::BulkString(field), RespValue::BulkString(value)]
                })
                .collect(),
        )
    })
}

fn hash_projection(
    ctx: &mut CommandContext,
    args: &[Bytes],
    project: impl Fn(&Bytes, &Bytes) -> Vec<RespValue>,
) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let Some(hash) = read_hash(ctx.database(), &key, now)? else {
        return Ok(RespValue::Array(Vec::new()));
    };

    let mut pairs: Vec<(&Bytes, &Bytes)> = hash.iter().collect();
    pairs.sort();
    Ok(RespValue::Array(
        pairs
            .into_iter()
            .flat_map(|(field, value)| project(field, value))
            .collect(),
    ))
}

pub fn hincrby(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let field = cursor.expect_bytes()?;
    let delta = cursor.expect_int()?;
    cursor.finish()?;

    let now = ctx.now;
    let database = ctx.database();
    let hash = hash_entry(database, &key, now)?;

    let mut stored = match hash.get(&field) {
        Some(value) => StringValue::from_bytes(value.clone()),
        None => StringValue::from_int(0),
    };
    let next = stored.increment_by(delta)?;
    hash.insert(field, stored.as_bytes());
    database.mark_mutated(key, "hincrby");
    Ok(RespValue::Integer(next))
}

pub fn hincrbyfloat(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let field = cursor.expect_bytes()?;
    let delta = cursor.expect_float()?;
    cursor.finish()?;

    let now = ctx.now;
    let database = ctx.database();
    let hash = hash_entry(database, &key, now)?;

    let mut stored = match hash.get(&field) {
        Some(value) => StringValue::from_bytes(value.clone()),
        None => StringValue::from_int(0),
    };
    let next = stored.increment_by_float(delta)?;
    hash.insert(field, stored.as_bytes());
    database.mark_mutated(key, "hincrbyfloat");
    Ok(RespValue::bulk_from_string(format_float(next)))
}

pub fn hrandfield(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;

    let mut count = None;
    let mut with_values = false;
    if !cursor.done() {
        count = Some(cursor.expect_int()?);
        if !cursor.done() {
            cursor.expect_token("WITHVALUES")?;
            with_values = true;
            cursor.finish()?;
        }
    }

    let now = ctx.now;
    let Some(hash) = read_hash(ctx.database(), &key, now)? else {
        return Ok(match count {
            Some(_) => RespValue::Array(Vec::new()),
            None => RespValue::NullBulkString,
        });
    };

    let sampled = random_fields(hash, count.unwrap_or(1));
    Ok(match count {
        None => match sampled.into_iter().next() {
            Some(field) => RespValue::BulkString(field),
            None => RespValue::NullBulkString,
        },
        Some(_) if with_values => RespValue::Array(
            sampled
                .into_iter()
                .flat_map(|field| {
                    let value = hash.get(&field).cloned().unwrap_or_default();
                    [RespValue::BulkString(field), RespValue::BulkString(value)]
                })
                .collect(),
        ),
        Some(_) => RespValue::Array(sampled.into_iter().map(RespValue::BulkString).collect()),
    })
}

/// HSCAN iterates small hashes in one pass: cursor 0 in, everything out,
/// cursor 0 back.
pub fn hscan(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let _cursor_position = cursor.expect_int()?;

    let mut pattern = None;
    let mut no_values = false;
    while !cursor.done() {
        if cursor.match_token("MATCH") {
            pattern = Some(cursor.expect_string()?);
        } else if cursor.match_token("COUNT") {
            cursor.expect_int()?;
        } else if cursor.match_token("NOVALUES") {
            no_values = true;
        } else {
            return Err(CommandError::Syntax);
        }
    }

    let matcher = match &pattern {
        Some(pattern) => Some(
            globset::Glob::new(pattern)
                .map_err(|_| CommandError::Syntax)?
                .compile_matcher(),
        ),
        None => None,
    };

    let now = ctx.now;
    let hash = read_hash(ctx.database(), &key, now)?;

    let mut pairs: Vec<(&Bytes, &Bytes)> = hash
        .map(|hash| hash.iter().collect())
        .unwrap_or_default();
    pairs.sort();

    let mut elements = Vec::new();
    for (field, value) in pairs {
        if let Some(matcher) = &matcher {
            if !std::str::from_utf8(field).is_ok_and(|field| matcher.is_match(field)) {
                continue;
            }
        }
        elements.push(RespValue::BulkString(field.clone()));
        if !no_values {
            elements.push(RespValue::BulkString(value.clone()));
        }
    }

    Ok(RespValue::Array(vec![
        RespValue::bulk_from_string("0"),
        RespValue::Array(elements),
    ]))
}
