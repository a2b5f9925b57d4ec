//! String and bitmap commands.

use bytes::Bytes;

use crate::commands::arguments::ArgCursor;
use crate::commands::command_error::CommandError;
use crate::commands::context::CommandContext;
use crate::resp::RespValue;
use crate::store::string::{
    bit_count, bit_operation, bit_position, format_float, BitOperation, BitUnit, StringValue,
    MAX_STRING_LENGTH,
};
use crate::store::{Database, Value};

fn read_string<'a>(
    database: &'a mut Database,
    key: &[u8],
    now: u64,
) -> Result<Option<&'a StringValue>, CommandError> {
    match database.read(key, now) {
        None => Ok(None),
        Some(Value::Str(value)) => Ok(Some(value)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn write_string<'a>(
    database: &'a mut Database,
    key: &[u8],
    now: u64,
) -> Result<Option<&'a mut StringValue>, CommandError> {
    match database.write(key, now) {
        None => Ok(None),
        Some(Value::Str(value)) => Ok(Some(value)),
        Some(_) => Err(CommandError::WrongType),
    }
}

pub fn get(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let database_index = ctx.session.database_index;
    let reply = match read_string(ctx.store.database(database_index), &key, now)? {
        Some(value) => {
            ctx.server.stats.keyspace_hits += 1;
            RespValue::BulkString(value.as_bytes())
        }
        None => {
            ctx.server.stats.keyspace_misses += 1;
            RespValue::NullBulkString
        }
    };
    ctx.track_read(&key);
    Ok(reply)
}

/// Expiry option within SET / GETEX.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ExpireOption {
    None,
    KeepTtl,
    Persist,
    At(u64),
}

pub struct SetArguments {
    key: Bytes,
    value: Bytes,
    expire: ExpireOption,
    nx: bool,
    xx: bool,
    get: bool,
}

impl SetArguments {
    pub fn parse(args: &[Bytes], now: u64) -> Result<Self, CommandError> {
        let mut cursor = ArgCursor::new(args);
        let key = cursor.expect_bytes()?;
        let value = cursor.expect_bytes()?;

        let mut parsed = SetArguments {
            key,
            value,
            expire: ExpireOption::None,
            nx: false,
            xx: false,
            get: false,
        };

        while !cursor.done() {
            if cursor.match_token("NX") {
                parsed.nx = true;
            } else if cursor.match_token("XX") {
                parsed.xx = true;
            } else if cursor.match_token("GET") {
                parsed.get = true;
            } else if cursor.match_token("KEEPTTL") {
                parsed.expire = ExpireOption::KeepTtl;
            } else if cursor.match_token("EX") {
                parsed.expire = relative_expiry(cursor.expect_int()?, 1_000, now, "set")?;
            } else if cursor.match_token("PX") {
                parsed.expire = relative_expiry(cursor.expect_int()?, 1, now, "set")?;
            } else if cursor.match_token("EXAT") {
                parsed.expire = ExpireOption::At(absolute_expiry(cursor.expect_int()?, 1_000)?);
            } else if cursor.match_token("PXAT") {
                parsed.expire = ExpireOption::At(absolute_expiry(cursor.expect_int()?, 1)?);
            } else {
                return Err(CommandError::Syntax);
            }
        }

        if parsed.nx && parsed.xx {
            return Err(CommandError::Syntax);
        }
        Ok(parsed)
    }
}

fn relative_expiry(
    amount: i64,
    unit_ms: i64,
    now: u64,
    command: &str,
) -> Result<ExpireOption, CommandError> {
    if amount <= 0 {
        return Err(CommandError::InvalidExpireTime(command.to_string()));
    }
    let millis = amount
        .checked_mul(unit_ms)
        .ok_or_else(|| CommandError::InvalidExpireTime(command.to_string()))?;
    Ok(ExpireOption::At(now + millis as u64))
}

fn absolute_expiry(timestamp: i64, unit_ms: i64) -> Result<u64, CommandError> {
    let millis = timestamp
        .checked_mul(unit_ms)
        .ok_or_else(|| CommandError::InvalidExpireTime("set".to_string()))?;
    Ok(millis.max(0) as u64)
}

pub fn set(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let parsed = SetArguments::parse(args, ctx.now)?;

    if parsed.value.len() > MAX_STRING_LENGTH {
        return Err(CommandError::OutOfRange(
            "string exceeds maximum allowed size (proto-max-bulk-len)".to_string(),
        ));
    }

    let now = ctx.now;
    let database = ctx.database();

    let previous = match database.read(&parsed.key, now) {
        Some(Value::Str(value)) => Some(value.as_bytes()),
        Some(_) if parsed.get => return Err(CommandError::WrongType),
        Some(_) => Some(Bytes::new()),
        None => None,
    };
    let exists = previous.is_some();

    if (parsed.nx && exists) || (parsed.xx && !exists) {
        return Ok(if parsed.get {
            match previous {
                Some(bytes) => RespValue::BulkString(bytes),
                None => RespValue::NullBulkString,
            }
        } else {
            RespValue::NullBulkString
        });
    }

    let value = Value::Str(StringValue::from_bytes(parsed.value));
    match parsed.expire {
        ExpireOption::KeepTtl => database.set_value_keep_ttl(parsed.key.clone(), value, "set"),
        _ => database.set_value(parsed.key.clone(), value, "set"),
    }
    if let ExpireOption::At(at) = parsed.expire {
        database.set_expiry(&parsed.key, at, now);
    }

    Ok(if parsed.get {
        match previous {
            Some(bytes) => RespValue::BulkString(bytes),
            None => RespValue::NullBulkString,
        }
    } else {
        RespValue::ok()
    })
}

pub fn setnx(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let value = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let database = ctx.database();
    if database.contains(&key, now) {
        return Ok(RespValue::Integer(0));
    }
    database.set_value(key, Value::Str(StringValue::from_bytes(value)), "set");
    Ok(RespValue::Integer(1))
}

pub fn setex(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    setex_with_unit(ctx, args, 1_000, "setex")
}

pub fn psetex(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    setex_with_unit(ctx, args, 1, "psetex")
}

fn setex_with_unit(
    ctx: &mut CommandContext,
    args: &[Bytes],
    unit_ms: i64,
    command: &str,
) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let amount = cursor.expect_int()?;
    let value = cursor.expect_bytes()?;
    cursor.finish()?;

    let ExpireOption::At(at) = relative_expiry(amount, unit_ms, ctx.now, command)? else {
        return Err(CommandError::Syntax);
    };

    let now = ctx.now;
    let database = ctx.database();
    database.set_value(key.clone(), Value::Str(StringValue::from_bytes(value)), "set");
    database.set_expiry(&key, at, now);
    Ok(RespValue::ok())
}

pub fn getset(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let value = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let database = ctx.database();
    let previous = match read_string(database, &key, now)? {
        Some(stored) => RespValue::BulkString(stored.as_bytes()),
        None => RespValue::NullBulkString,
    };
    database.set_value(key, Value::Str(StringValue::from_bytes(value)), "getset");
    Ok(previous)
}

pub fn getdel(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let database = ctx.database();
    match read_string(database, &key, now)? {
        Some(stored) => {
            let bytes = stored.as_bytes();
            database.remove(&key, now);
            Ok(RespValue::BulkString(bytes))
        }
        None => Ok(RespValue::NullBulkString),
    }
}

pub fn getex(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;

    let mut expire = ExpireOption::None;
    while !cursor.done() {
        if expire != ExpireOption::None {
            return Err(CommandError::Syntax);
        }
        if cursor.match_token("PERSIST") {
            expire = ExpireOption::Persist;
        } else if cursor.match_token("EX") {
            expire = relative_expiry(cursor.expect_int()?, 1_000, ctx.now, "getex")?;
        } else if cursor.match_token("PX") {
            expire = relative_expiry(cursor.expect_int()?, 1, ctx.now, "getex")?;
        } else if cursor.match_token("EXAT") {
            expire = ExpireOption::At(absolute_expiry(cursor.expect_int()?, 1_000)?);
        } else if cursor.match_token("PXAT") {
            expire = ExpireOption::At(absolute_expiry(cursor.expect_int()?, 1)?);
        } else {
            return Err(CommandError::Syntax);
        }
    }

    let now = ctx.now;
    let database = ctx.database();
    let Some(stored) = read_string(database, &key, now)? else {
        return Ok(RespValue::NullBulkString);
    };
    let bytes = stored.as_bytes();

    match expire {
        ExpireOption::None | ExpireOption::KeepTtl => {}
        ExpireOption::Persist => {
            database.persist(&key, now);
        }
        ExpireOption::At(at) => {
            database.set_expiry(&key, at, now);
        }
    }

    Ok(RespValue::BulkString(bytes))
}

pub fn append(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let suffix = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let database = ctx.database();
    let length = match write_string(database, &key, now)? {
        Some(stored) => {
            if stored.len() + suffix.len() > MAX_STRING_LENGTH {
                return Err(CommandError::OutOfRange(
                    "string exceeds maximum allowed size (proto-max-bulk-len)".to_string(),
                ));
            }
            let length = stored.append(&suffix);
            database.mark_mutated(key, "append");
            length
        }
        None => {
            let length = suffix.len();
            database.set_value(key, Value::Str(StringValue::from_bytes(suffix)), "append");
            length
        }
    };

    Ok(RespValue::Integer(length as i64))
}

pub fn strlen(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let length = read_string(ctx.database(), &key, now)?
        .map(StringValue::len)
        .unwrap_or(0);
    Ok(RespValue::Integer(length as i64))
}

pub fn getrange(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let start = cursor.expect_int()?;
    let end = cursor.expect_int()?;
    cursor.finish()?;

    let now = ctx.now;
    let slice = read_string(ctx.database(), &key, now)?
        .map(|stored| stored.get_range(start, end))
        .unwrap_or_default();
    Ok(RespValue::BulkString(slice))
}

pub fn setrange(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let offset = cursor.expect_int()?;
    let data = cursor.expect_bytes()?;
    cursor.finish()?;

    if offset < 0 {
        return Err(CommandError::OutOfRange(
            "offset is out of range".to_string(),
        ));
    }
    let offset = offset as usize;
    if offset + data.len() > MAX_STRING_LENGTH {
        return Err(CommandError::OutOfRange(
            "string exceeds maximum allowed size (proto-max-bulk-len)".to_string(),
        ));
    }

    let now = ctx.now;
    let database = ctx.database();
    let length = match write_string(database, &key, now)? {
        Some(stored) => {
            let length = stored.set_range(offset, &data);
            database.mark_mutated(key, "setrange");
            length
        }
        None => {
            if data.is_empty() {
                return Ok(RespValue::Integer(0));
            }
            let mut fresh = StringValue::from_bytes(Bytes::new());
            let length = fresh.set_range(offset, &data);
            database.set_value(key, Value::Str(fresh), "setrange");
            length
        }
    };

    Ok(RespValue::Integer(length as i64))
}

fn increment(
    ctx: &mut CommandContext,
    key: Bytes,
    delta: i64,
    event: &'static str,
) -> Result<RespValue, CommandError> {
    let now = ctx.now;
    let database = ctx.database();
    let next = match write_string(database, &key, now)? {
        Some(stored) => {
            let next = stored.increment_by(delta)?;
            database.mark_mutated(key, event);
            next
        }
        None => {
            database.set_value(key, Value::Str(StringValue::from_int(delta)), event);
            delta
        }
    };
    Ok(RespValue::Integer(next))
}

pub fn incr(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    cursor.finish()?;
    increment(ctx, key, 1, "incrby")
}

pub fn decr(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    cursor.finish()?;
    increment(ctx, key, -1, "decrby")
}

pub fn incrby(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let delta = cursor.expect_int()?;
    cursor.finish()?;
    increment(ctx, key, delta, "incrby")
}

pub fn decrby(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let delta = cursor.expect_int()?;
    cursor.finish()?;
    increment(ctx, key, delta.checked_neg().ok_or(CommandError::NotAnInteger)?, "decrby")
}

pub fn incrbyfloat(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let delta = cursor.expect_float()?;
    cursor.finish()?;

    let now = ctx.now;
    let database = ctx.database();
    let next = match write_string(database, &key, now)? {
        Some(stored) => {
            let next = stored.increment_by_float(delta)?;
            database.mark_mutated(key, "incrbyfloat");
            next
        }
        None => {
            if delta.is_infinite() {
                return Err(CommandError::OutOfRange(
                    "increment would produce NaN or Infinity".to_string(),
                ));
            }
            database.set_value(
                key,
                Value::Str(StringValue::from_bytes(Bytes::from(format_float(delta)))),
                "incrbyfloat",
            );
            delta
        }
    };
    Ok(RespValue::bulk_from_string(format_float(next)))
}

pub fn mget(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let keys = cursor.rest();
    if keys.is_empty() {
        return Err(CommandError::WrongArgCount("MGET".to_string()));
    }

    let now = ctx.now;
    let database_index = ctx.session.database_index;
    let mut replies = Vec::with_capacity(keys.len());
    for key in &keys {
        // A non-string value reads as nil here instead of failing.
        let reply = match ctx.store.database(database_index).read(key, now) {
            Some(Value::Str(value)) => RespValue::BulkString(value.as_bytes()),
            _ => RespValue::NullBulkString,
        };
        replies.push(reply);
        ctx.track_read(key);
    }
    Ok(RespValue::Array(replies))
}

fn parse_pairs(cursor: &mut ArgCursor) -> Result<Vec<(Bytes, Bytes)>, CommandError> {
    let flat = cursor.rest();
    if flat.is_empty() || flat.len() % 2 != 0 {
        return Err(CommandError::WrongArgCount("MSET".to_string()));
    }
    Ok(flat
        .chunks(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect())
}

pub fn mset(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let pairs = parse_pairs(&mut cursor)?;

    let database = ctx.database();
    for (key, value) in pairs {
        database.set_value(key, Value::Str(StringValue::from_bytes(value)), "set");
    }
    Ok(RespValue::ok())
}

pub fn msetnx(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let pairs = parse_pairs(&mut cursor)?;

    let now = ctx.now;
    let database = ctx.database();
    let any_exists = pairs.iter().any(|(key, _)| database.contains(key, now));
    if any_exists {
        return Ok(RespValue::Integer(0));
    }
    for (key, value) in pairs {
        database.set_value(key, Value::Str(StringValue::from_bytes(value)), "set");
    }
    Ok(RespValue::Integer(1))
}

pub fn setbit(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let bit_index = cursor.expect_int()?;
    let bit_value = cursor.expect_int()?;
    cursor.finish()?;

    if bit_index < 0 || bit_index as usize >= MAX_STRING_LENGTH * 8 {
        return Err(CommandError::OutOfRange(
            "bit offset is not an integer or out of range".to_string(),
        ));
    }
    let on = match bit_value {
        0 => false,
        1 => true,
        _ => {
            return Err(CommandError::OutOfRange(
                "bit is not an integer or out of range".to_string(),
            ))
        }
    };

    let now = ctx.now;
    let database = ctx.database();
    let previous = match write_string(database, &key, now)? {
        Some(stored) => {
            let previous = stored.set_bit(bit_index as usize, on);
            database.mark_mutated(key, "setbit");
            previous
        }
        None => {
            let mut fresh = StringValue::from_bytes(Bytes::new());
            let previous = fresh.set_bit(bit_index as usize, on);
            database.set_value(key, Value::Str(fresh), "setbit");
            previous
        }
    };
    Ok(RespValue::Integer(previous as i64))
}

pub fn getbit(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let bit_index = cursor.expect_int()?;
    cursor.finish()?;

    if bit_index < 0 {
        return Err(CommandError::OutOfRange(
            "bit offset is not an integer or out of range".to_string(),
        ));
    }

    let now = ctx.now;
    let bit = read_string(ctx.database(), &key, now)?
        .map(|stored| stored.get_bit(bit_index as usize))
        .unwrap_or(false);
    Ok(RespValue::Integer(bit as i64))
}

pub fn bitcount(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;

    let mut start = 0;
    let mut end = -1;
    let mut unit = BitUnit::Byte;
    if !cursor.done() {
        start = cursor.expect_int()?;
        end = cursor.expect_int()?;
        if !cursor.done() {
            unit = parse_bit_unit(&mut cursor)?;
        }
        cursor.finish()?;
    }

    let now = ctx.now;
    let count = read_string(ctx.database(), &key, now)?
        .map(|stored| bit_count(&stored.as_bytes(), start, end, unit))
        .unwrap_or(0);
    Ok(RespValue::Integer(count as i64))
}

pub fn bitpos(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let target = match cursor.expect_int()? {
        0 => false,
        1 => true,
        _ => return Err(CommandError::Syntax),
    };

    let mut start = 0;
    let mut end = None;
    let mut unit = BitUnit::Byte;
    if !cursor.done() {
        start = cursor.expect_int()?;
        if !cursor.done() {
            end = Some(cursor.expect_int()?);
            if !cursor.done() {
                unit = parse_bit_unit(&mut cursor)?;
            }
        }
        cursor.finish()?;
    }

    let now = ctx.now;
    let position = match read_string(ctx.database(), &key, now)? {
        Some(stored) => bit_position(&stored.as_bytes(), target, start, end, unit),
        // A missing key counts as an all-zero string.
        None => {
            if target {
                -1
            } else {
                0
            }
        }
    };
    Ok(RespValue::Integer(position))
}

fn parse_bit_unit(cursor: &mut ArgCursor) -> Result<BitUnit, CommandError> {
    if cursor.match_token("BYTE") {
        Ok(BitUnit::Byte)
    } else if cursor.match_token("BIT") {
        Ok(BitUnit::Bit)
    } else {
        Err(CommandError::Syntax)
    }
}

pub fn bitop(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let operation = match cursor.next_token()?.as_str() {
        "AND" => BitOperation::And,
        "OR" => BitOperation::Or,
        "XOR" => BitOperation::Xor,
        "NOT" => BitOperation::Not,
        _ => return Err(CommandError::Syntax),
    };
    let destination = cursor.expect_bytes()?;
    let sources = cursor.rest();

    if sources.is_empty() {
        return Err(CommandError::WrongArgCount("BITOP".to_string()));
    }
    if operation == BitOperation::Not && sources.len() != 1 {
        return Err(CommandError::OutOfRange(
            "BITOP NOT must be called with a single source key".to_string(),
        ));
    }

    let now = ctx.now;
    let database = ctx.database();
    let mut inputs = Vec::with_capacity(sources.len());
    for source in &sources {
        let data = read_string(database, source, now)?
            .map(StringValue::as_bytes)
            .unwrap_or_default();
        inputs.push(data);
    }

    let result = bit_operation(operation, &inputs);
    let length = result.len();
    if length == 0 {
        database.remove(&destination, now);
    } else {
        database.set_value(
            destination,
            Value::Str(StringValue::from_bytes(Bytes::from(result))),
            "set",
        );
    }
    Ok(RespValue::Integer(length as i64))
}
