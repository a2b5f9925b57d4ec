//! Set commands.

use std::collections::HashSet;

use bytes::Bytes;

use crate::commands::arguments::ArgCursor;
use crate::commands::command_error::CommandError;
use crate::commands::context::CommandContext;
use crate::resp::RespValue;
use crate::store::set::{combine, random_members, SetOperation};
use crate::store::{Database, Value};

fn read_set<'a>(
    database: &'a mut Database,
    key: &[u8],
    now: u64,
) -> Result<Option<&'a HashSet<Bytes>>, CommandError> {
    match database.read(key, now) {
        None => Ok(None),
        Some(Value::Set(set)) => Ok(Some(set)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn write_set<'a>(
    database: &'a mut Database,
    key: &[u8],
    now: u64,
) -> Result<Option<&'a mut HashSet<Bytes>>, CommandError> {
    match database.write(key, now) {
        None => Ok(None),
        Some(Value::Set(set)) => Ok(Some(set)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn sorted_members(set: &HashSet<Bytes>) -> Vec<Bytes> {
    let mut members: Vec<Bytes> = set.iter().cloned().collect();
    members.sort();
    members
}

pub fn sadd(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let members = cursor.rest();
    if members.is_empty() {
        return Err(CommandError::WrongArgCount("SADD".to_string()));
    }

    let now = ctx.now;
    let database = ctx.database();
    read_set(database, &key, now)?;
    let value = database.entry_or_insert_with(key.clone(), now, || Value::Set(HashSet::new()));
    let Value::Set(set) = value else {
        return Err(CommandError::WrongType);
    };

    let mut added = 0;
    for member in members {
        if set.insert(member) {
            added += 1;
        }
    }
    database.mark_mutated(key, "sadd");
    Ok(RespValue::Integer(added))
}

pub fn srem(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let members = cursor.rest();
    if members.is_empty() {
        return Err(CommandError::WrongArgCount("SREM".to_string()));
    }

    let now = ctx.now;
    let database = ctx.database();
    let Some(set) = write_set(database, &key, now)? else {
        return Ok(RespValue::Integer(0));
    };

    let mut removed = 0;
    for member in members {
        if set.remove(&member) {
            removed += 1;
        }
    }
    if removed > 0 {
        database.mark_mutated(key.clone(), "srem");
        database.collapse_if_empty(&key);
    }
    Ok(RespValue::Integer(removed))
}

pub fn sismember(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let member = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let present = read_set(ctx.database(), &key, now)?
        .is_some_and(|set| set.contains(&member));
    Ok(RespValue::Integer(present as i64))
}

pub fn smismember(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let members = cursor.rest();
    if members.is_empty() {
        return Err(CommandError::WrongArgCount("SMISMEMBER".to_string()));
    }

    let now = ctx.now;
    let set = read_set(ctx.database(), &key, now)?;
    let replies = members
        .iter()
        .map(|member| {
            RespValue::Integer(set.is_some_and(|set| set.contains(member)) as i64)
        })
        .collect();
    Ok(RespValue::Array(replies))
}

pub fn scard(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let cardinality = read_set(ctx.database(), &key, now)?
        .map(HashSet::len)
        .unwrap_or(0);
    Ok(RespValue::Integer(cardinality as i64))
}

pub fn smembers(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let members = read_set(ctx.database(), &key, now)?
        .map(sorted_members)
        .unwrap_or_default();

    Ok(set_reply(
        members,
        ctx.session.protocol_version,
    ))
}

/// Set-valued replies are RESP3 sets, RESP2 arrays.
fn set_reply(members: Vec<Bytes>, protocol_version: u8) -> RespValue {
    let elements = members.into_iter().map(RespValue::BulkString).collect();
    if protocol_version >= 3 {
        RespValue::Set(elements)
    } else {
        RespValue::Array(elements)
    }
}

pub fn srandmember(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let count = if cursor.done() {
        None
    } else {
        let count = cursor.expect_int()?;
        cursor.finish()?;
        Some(count)
    };

    let now = ctx.now;
    let Some(set) = read_set(ctx.database(), &key, now)? else {
        return Ok(match count {
            Some(_) => RespValue::Array(Vec::new()),
            None => RespValue::NullBulkString,
        });
    };

    let sampled = random_members(set, count.unwrap_or(1));
    Ok(match count {
        Some(_) => RespValue::Array(sampled.into_iter().map(RespValue::BulkString).collect()),
        None => match sampled.into_iter().next() {
            Some(member) => RespValue::BulkString(member),
            None => RespValue::NullBulkString,
        },
    })
}

pub fn spop(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let count = if cursor.done() {
        None
    } else {
        let count = cursor.expect_int()?;
        cursor.finish()?;
        if count < 0 {
            return Err(CommandError::OutOfRange(
                "value is out of range, must be positive".to_string(),
            ));
        }
        Some(count as usize)
    };

    let now = ctx.now;
    let database = ctx.database();
    let Some(set) = write_set(database, &key, now)? else {
        return Ok(match count {
            Some(_) => RespValue::Array(Vec::new()),
            None => RespValue::NullBulkString,
        });
    };

    let chosen = random_members(set, count.unwrap_or(1).min(set.len()) as i64);
    for member in &chosen {
        set.remove(member);
    }
    if !chosen.is_empty() {
        database.mark_mutated(key.clone(), "spop");
        database.collapse_if_empty(&key);
    }

    Ok(match count {
        Some(_) => RespValue::Array(chosen.into_iter().map(RespValue::BulkString).collect()),
        None => match chosen.into_iter().next() {
            Some(member) => RespValue::BulkString(member),
            None => RespValue::NullBulkString,
        },
    })
}

pub fn smove(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let source = cursor.expect_bytes()?;
    let destination = cursor.expect_bytes()?;
    let member = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let database = ctx.database();

    // Type-check both ends before moving anything.
    read_set(database, &source, now)?;
    read_set(database, &destination, now)?;

    let Some(source_set) = write_set(database, &source, now)? else {
        return Ok(RespValue::Integer(0));
    };
    if !source_set.remove(&member) {
        return Ok(RespValue::Integer(0));
    }
    database.mark_mutated(source.clone(), "srem");
    database.collapse_if_empty(&source);

    let value =
        database.entry_or_insert_with(destination.clone(), now, || Value::Set(HashSet::new()));
    let Value::Set(destination_set) = value else {
        return Err(CommandError::WrongType);
    };
    destination_set.insert(member);
    database.mark_mutated(destination, "sadd");
    Ok(RespValue::Integer(1))
}

fn combine_sources(
    ctx: &mut CommandContext,
    keys: &[Bytes],
    operation: SetOperation,
) -> Result<HashSet<Bytes>, CommandError> {
    let now = ctx.now;
    let database = ctx.database();

    // Type-check all keys up front, then collect the snapshots.
    for key in keys {
        read_set(database, key, now)?;
    }
    let sources: Vec<Option<HashSet<Bytes>>> = keys
        .iter()
        .map(|key| read_set(database, key, now).map(|set| set.cloned()))
        .collect::<Result<_, _>>()?;
    let source_refs: Vec<Option<&HashSet<Bytes>>> =
        sources.iter().map(Option::as_ref).collect();
    Ok(combine(operation, &source_refs))
}

fn set_operation(
    ctx: &mut CommandContext,
    args: &[Bytes],
    operation: SetOperation,
) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let keys = cursor.rest();
    if keys.is_empty() {
        return Err(CommandError::WrongArgCount("SUNION".to_string()));
    }

    let combined = combine_sources(ctx, &keys, operation)?;
    let mut members: Vec<Bytes> = combined.into_iter().collect();
    members.sort();
    Ok(set_reply(members, ctx.session.protocol_version))
}

pub fn sunion(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    set_operation(ctx, args, SetOperation::Union)
}

pub fn sinter(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    set_operation(ctx, args, SetOperation::Intersection)
}

pub fn sdiff(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    set_operation(ctx, args, SetOperation::Difference)
}

fn set_operation_store(
    ctx: &mut CommandContext,
    args: &[Bytes],
    operation: SetOperation,
    event: &'static str,
) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let destination = cursor.expect_bytes()?;
    let keys = cursor.rest();
    if keys.is_empty() {
        return Err(CommandError::WrongArgCount("SUNIONSTORE".to_string()));
    }

    let combined = combine_sources(ctx, &keys, operation)?;
    let cardinality = combined.len();

    let now = ctx.now;
    let database = ctx.database();
    if cardinality == 0 {
        database.remove(&destination, now);
    } else {
        database.set_value(destination, Value::Set(combined), event);
    }
    Ok(RespValue::Integer(cardinality as i64))
}

pub fn sunionstore(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    set_operation_store(ctx, args, SetOperation::Union, "sunionstore")
}

pub fn sinterstore(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    set_operation_store(ctx, args, SetOperation::Intersection, "sinterstore")
}

pub fn sdiffstore(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    set_operation_store(ctx, args, SetOperation::Difference, "sdiffstore")
}

pub fn sintercard(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let numkeys = cursor.expect_int()?;
    if numkeys < 1 {
        return Err(CommandError::OutOfRange(
            "numkeys should be greater than 0".to_string(),
        ));
    }

    let mut keys = Vec::with_capacity(numkeys as usize);
    for _ in 0..numkeys {
        keys.push(cursor.expect_bytes()?);
    }
    let mut limit = None;
    if cursor.match_token("LIMIT") {
        let wanted = cursor.expect_int()?;
        if wanted < 0 {
            return Err(CommandError::OutOfRange(
                "LIMIT can't be negative".to_string(),
            ));
        }
        limit = Some(wanted as usize).filter(|&limit| limit > 0);
    }
    cursor.finish()?;

    let combined = combine_sources(ctx, &keys, SetOperation::Intersection)?;
    let cardinality = match limit {
        Some(limit) => combined.len().min(limit),
        None => combined.len(),
    };
    Ok(RespValue::Integer(cardinality as i64))
}

/// SSCAN: whole set in one pass, like HSCAN.
pub fn sscan(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let _cursor_position = cursor.expect_int()?;

    let mut pattern = None;
    while !cursor.done() {
        if cursor.match_token("MATCH") {
            pattern = Some(cursor.expect_string()?);
        } else if cursor.match_token("COUNT") {
            cursor.expect_int()?;
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
    let members = read_set(ctx.database(), &key, now)?
        .map(sorted_members)
        .unwrap_or_default();

    let elements = members
        .into_iter()
        .filter(|member| match &matcher {
            Some(matcher) => {
                std::str::from_utf8(member).is_ok_and(|member| matcher.is_match(member))
            }
            None => true,
        })
        .map(RespValue::BulkString)
        .collect();

    Ok(RespValue::Array(vec![
        RespValue::bulk_from_string("0"),
        RespValue::Array(elements),
    ]))
}
