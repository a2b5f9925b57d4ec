//! Generic keyspace commands: existence, deletion, expiry, renaming,
//! iteration.

use bytes::Bytes;
use globset::Glob;

use crate::commands::arguments::ArgCursor;
use crate::commands::command_error::CommandError;
use crate::commands::context::CommandContext;
use crate::resp::RespValue;
use crate::store::Value;

pub fn del(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let keys = cursor.rest();

    let now = ctx.now;
    let database = ctx.database();
    let mut removed = 0;
    for key in keys {
        if database.remove(&key, now).is_some() {
            removed += 1;
        }
    }
    Ok(RespValue::Integer(removed))
}

pub fn exists(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let keys = cursor.rest();

    let now = ctx.now;
    let database = ctx.database();
    let mut found = 0;
    for key in keys {
        if database.contains(&key, now) {
            found += 1;
        }
    }
    Ok(RespValue::Integer(found))
}

/// Conditions accepted by the EXPIRE family.
#[derive(Debug, Clone, Copy, PartialEq)]
enum ExpireCondition {
    Always,
    IfNone,
    IfExists,
    IfGreater,
    IfLess,
}

fn parse_expire_condition(cursor: &mut ArgCursor) -> Result<ExpireCondition, CommandError> {
    if cursor.done() {
        return Ok(ExpireCondition::Always);
    }
    let condition = if cursor.match_token("NX") {
        ExpireCondition::IfNone
    } else if cursor.match_token("XX") {
        ExpireCondition::IfExists
    } else if cursor.match_token("GT") {
        ExpireCondition::IfGreater
    } else if cursor.match_token("LT") {
        ExpireCondition::IfLess
    } else {
        return Err(CommandError::Syntax);
    };
    cursor.finish()?;
    Ok(condition)
}

fn apply_expiry(
    ctx: &mut CommandContext,
    key: &Bytes,
    at_ms: i64,
    condition: ExpireCondition,
) -> Result<RespValue, CommandError> {
    let now = ctx.now;
    let database = ctx.database();

    let Some(current) = database.expiry_at(key, now) else {
        return Ok(RespValue::Integer(0));
    };

    let allowed = match condition {
        ExpireCondition::Always => true,
        ExpireCondition::IfNone => current.is_none(),
        ExpireCondition::IfExists => current.is_some(),
        // A key without a TTL counts as infinitely far in the future.
        ExpireCondition::IfGreater => current.is_some_and(|at| at_ms > at as i64),
        ExpireCondition::IfLess => current.map_or(true, |at| at_ms < at as i64),
    };
    if !allowed {
        return Ok(RespValue::Integer(0));
    }

    let applied = database.set_expiry(key, at_ms.max(0) as u64, now);
    Ok(RespValue::Integer(applied as i64))
}

pub fn expire(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    expire_relative(ctx, args, 1_000)
}

pub fn pexpire(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    expire_relative(ctx, args, 1)
}

fn expire_relative(
    ctx: &mut CommandContext,
    args: &[Bytes],
    unit_ms: i64,
) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let amount = cursor.expect_int()?;
    let condition = parse_expire_condition(&mut cursor)?;

    let at_ms = amount
        .checked_mul(unit_ms)
        .and_then(|delta| (ctx.now as i64).checked_add(delta))
        .ok_or(CommandError::InvalidExpireTime("expire".to_string()))?;
    apply_expiry(ctx, &key, at_ms, condition)
}

pub fn expireat(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    expire_absolute(ctx, args, 1_000)
}

pub fn pexpireat(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    expire_absolute(ctx, args, 1)
}

fn expire_absolute(
    ctx: &mut CommandContext,
    args: &[Bytes],
    unit_ms: i64,
) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let timestamp = cursor.expect_int()?;
    let condition = parse_expire_condition(&mut cursor)?;

    let at_ms = timestamp
        .checked_mul(unit_ms)
        .ok_or(CommandError::InvalidExpireTime("expireat".to_string()))?;
    apply_expiry(ctx, &key, at_ms, condition)
}

pub fn ttl(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    ttl_with_unit(ctx, args, 1_000)
}

pub fn pttl(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    ttl_with_unit(ctx, args, 1)
}

fn ttl_with_unit(
    ctx: &mut CommandContext,
    args: &[Bytes],
    unit_ms: u64,
) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let reply = match ctx.database().ttl(&key, now) {
        None => RespValue::Integer(-2),
        Some(None) => RespValue::Integer(-1),
        Some(Some(remaining_ms)) => {
            // Seconds round up so a key about to expire still reports 1.
            RespValue::Integer((remaining_ms.div_ceil(unit_ms)) as i64)
        }
    };
    Ok(reply)
}

pub fn expiretime(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    expiretime_with_unit(ctx, args, 1_000)
}

pub fn pexpiretime(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    expiretime_with_unit(ctx, args, 1)
}

fn expiretime_with_unit(
    ctx: &mut CommandContext,
    args: &[Bytes],
    unit_ms: u64,
) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let reply = match ctx.database().expiry_at(&key, now) {
        None => RespValue::Integer(-2),
        Some(None) => RespValue::Integer(-1),
        Some(Some(at_ms)) => RespValue::Integer((at_ms / unit_ms) as i64),
    };
    Ok(reply)
}

pub fn persist(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let persisted = ctx.database().persist(&key, now);
    Ok(RespValue::Integer(persisted as i64))
}

pub fn keys(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let pattern = cursor.expect_string()?;
    cursor.finish()?;

    let glob = Glob::new(&pattern)
        .map_err(|_| CommandError::Syntax)?
        .compile_matcher();

    let now = ctx.now;
    let mut matched: Vec<RespValue> = ctx
        .database()
        .live_keys(now)
        .filter(|key| {
            std::str::from_utf8(key).is_ok_and(|key| glob.is_match(key))
        })
        .map(|key| RespValue::BulkString(key.clone()))
        .collect();
    matched.sort_by(|a, b| match (a, b) {
        (RespValue::BulkString(a), RespValue::BulkString(b)) => a.cmp(b),
        _ => std::cmp::Ordering::Equal,
    });
    Ok(RespValue::Array(matched))
}

const SCAN_DEFAULT_COUNT: usize = 10;

pub struct ScanArguments {
    cursor: u64,
    pattern: Option<String>,
    count: usize,
    type_filter: Option<String>,
}

impl ScanArguments {
    pub fn parse(args: &[Bytes]) -> Result<Self, CommandError> {
        let mut cursor = ArgCursor::new(args);
        let scan_cursor = cursor.expect_int()?;
        if scan_cursor < 0 {
            return Err(CommandError::Syntax);
        }

        let mut parsed = ScanArguments {
            cursor: scan_cursor as u64,
            pattern: None,
            count: SCAN_DEFAULT_COUNT,
            type_filter: None,
        };

        while !cursor.done() {
            if cursor.match_token("MATCH") {
                parsed.pattern = Some(cursor.expect_string()?);
            } else if cursor.match_token("COUNT") {
                let count = cursor.expect_int()?;
                if count < 1 {
                    return Err(CommandError::Syntax);
                }
                parsed.count = count as usize;
            } else if cursor.match_token("TYPE") {
                parsed.type_filter = Some(cursor.expect_string()?.to_lowercase());
            } else {
                return Err(CommandError::Syntax);
            }
        }
        Ok(parsed)
    }
}

pub fn scan(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let parsed = ScanArguments::parse(args)?;

    let matcher = match &parsed.pattern {
        Some(pattern) => Some(
            Glob::new(pattern)
                .map_err(|_| CommandError::Syntax)?
                .compile_matcher(),
        ),
        None => None,
    };

    let now = ctx.now;
    let database_index = ctx.session.database_index;

    let cursor_id = if parsed.cursor == 0 {
        ctx.store.open_scan_cursor(database_index, now)
    } else {
        parsed.cursor
    };

    let stale = match ctx.store.scan_cursor(cursor_id) {
        Some(state) => state.database_index != database_index,
        None => true,
    };
    if stale {
        // Stale, bogus, or cross-database cursor: an empty, finished scan.
        return Ok(RespValue::Array(vec![
            RespValue::bulk_from_string("0"),
            RespValue::Array(Vec::new()),
        ]));
    }
    let state = ctx
        .store
        .scan_cursor(cursor_id)
        .expect("checked just above");

    let window: Vec<Bytes> = state
        .keys
        .iter()
        .skip(state.position)
        .take(parsed.count)
        .cloned()
        .collect();
    state.position += window.len();
    let exhausted = state.position >= state.keys.len();

    if exhausted {
        ctx.store.close_scan_cursor(cursor_id);
    }

    let mut emitted = Vec::new();
    for key in window {
        // The snapshot can hold keys deleted since cursor creation.
        let Some(value) = ctx.store.database(database_index).read(&key, now) else {
            continue;
        };
        if let Some(filter) = &parsed.type_filter {
            if value.type_name() != filter {
                continue;
            }
        }
        if let Some(matcher) = &matcher {
            if !std::str::from_utf8(&key).is_ok_and(|key| matcher.is_match(key)) {
                continue;
            }
        }
        emitted.push(RespValue::BulkString(key));
    }

    let next_cursor = if exhausted { 0 } else { cursor_id };
    Ok(RespValue::Array(vec![
        RespValue::bulk_from_string(next_cursor.to_string()),
        RespValue::Array(emitted),
    ]))
}

pub fn randomkey(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    ArgCursor::new(args).finish()?;

    let now = ctx.now;
    let reply = match ctx.database().random_key(now) {
        Some(key) => RespValue::BulkString(key),
        None => RespValue::NullBulkString,
    };
    Ok(reply)
}

pub fn rename(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let source = cursor.expect_bytes()?;
    let destination = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    if !ctx.database().rename(&source, destination, now) {
        return Err(CommandError::OutOfRange("no such key".to_string()));
    }
    Ok(RespValue::ok())
}

pub fn renamenx(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let source = cursor.expect_bytes()?;
    let destination = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let database = ctx.database();
    if !database.contains(&source, now) {
        return Err(CommandError::OutOfRange("no such key".to_string()));
    }
    if database.contains(&destination, now) {
        return Ok(RespValue::Integer(0));
    }
    database.rename(&source, destination, now);
    Ok(RespValue::Integer(1))
}

pub fn type_command(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let name = ctx
        .database()
        .read(&key, now)
        .map(Value::type_name)
        .unwrap_or("none");
    Ok(RespValue::SimpleString(name.to_string()))
}

pub fn touch(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    // TOUCH only refreshes access clocks, which we do not keep; it still
    // reports how many of the keys exist.
    exists(ctx, args)
}

pub fn dbsize(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    ArgCursor::new(args).finish()?;
    let now = ctx.now;
    Ok(RespValue::Integer(ctx.database().len(now) as i64))
}

pub fn flushdb(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    parse_flush_mode(args)?;
    ctx.database().flush();
    Ok(RespValue::ok())
}

pub fn flushall(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    parse_flush_mode(args)?;
    for index in 0..ctx.store.database_count() {
        ctx.store.database(index).flush();
    }
    Ok(RespValue::ok())
}

/// FLUSHDB/FLUSHALL accept ASYNC or SYNC; everything here is synchronous
/// anyway.
fn parse_flush_mode(args: &[Bytes]) -> Result<(), CommandError> {
    let mut cursor = ArgCursor::new(args);
    if cursor.done() {
        return Ok(());
    }
    if cursor.match_token("ASYNC") || cursor.match_token("SYNC") {
        cursor.finish()
    } else {
        Err(CommandError::Syntax)
    }
}

pub fn copy(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let source = cursor.expect_bytes()?;
    let destination = cursor.expect_bytes()?;

    let mut destination_database = None;
    let mut replace = false;
    while !cursor.done() {
        if cursor.match_token("DB") {
            let index = cursor.expect_int()?;
            if index < 0 || index as usize >= ctx.store.database_count() {
                return Err(CommandError::InvalidDatabaseIndex);
            }
            destination_database = Some(index as usize);
        } else if cursor.match_token("REPLACE") {
            replace = true;
        } else {
            return Err(CommandError::Syntax);
        }
    }

    let now = ctx.now;
    let source_database = ctx.session.database_index;
    let target_database = destination_database.unwrap_or(source_database);

    if source_database == target_database && source == destination {
        return Err(CommandError::OutOfRange(
            "source and destination objects are the same".to_string(),
        ));
    }

    let Some(value) = ctx
        .store
        .database(source_database)
        .read(&source, now)
        .cloned()
    else {
        return Ok(RespValue::Integer(0));
    };
    let expiry = ctx
        .store
        .database(source_database)
        .expiry_at(&source, now)
        .flatten();

    let target = ctx.store.database(target_database);
    if !replace && target.contains(&destination, now) {
        return Ok(RespValue::Integer(0));
    }

    target.set_value(destination.clone(), value, "copy_to");
    if let Some(at) = expiry {
        target.set_expiry(&destination, at, now);
    }
    Ok(RespValue::Integer(1))
}

pub fn dump(_ctx: &mut CommandContext, _args: &[Bytes]) -> Result<RespValue, CommandError> {
    Err(CommandError::NotImplemented("DUMP".to_string()))
}

pub fn restore(_ctx: &mut CommandContext, _args: &[Bytes]) -> Result<RespValue, CommandError> {
    Err(CommandError::NotImplemented("RESTORE".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::TestContext;

    #[test]
    fn test_del_exists() {
        let mut test = TestContext::new();
        test.run("MSET a 1 b 2").unwrap();

        assert_eq!(test.run("EXISTS a b missing a"), Ok(RespValue::Integer(3)));
        assert_eq!(test.run("DEL a b missing"), Ok(RespValue::Integer(2)));
        assert_eq!(test.run("EXISTS a b"), Ok(RespValue::Integer(0)));
    }

    #[test]
    fn test_expire_and_ttl() {
        let mut test = TestContext::new();
        test.run("SET k v").unwrap();

        assert_eq!(test.run("TTL k"), Ok(RespValue::Integer(-1)));
        assert_eq!(test.run("EXPIRE k 10"), Ok(RespValue::Integer(1)));
        assert_eq!(test.run("TTL k"), Ok(RespValue::Integer(10)));
        assert_eq!(test.run("PTTL k"), Ok(RespValue::Integer(10_000)));

        assert_eq!(test.run("PERSIST k"), Ok(RespValue::Integer(1)));
        assert_eq!(test.run("TTL k"), Ok(RespValue::Integer(-1)));
        assert_eq!(test.run("PERSIST k"), Ok(RespValue::Integer(0)));

        assert_eq!(test.run("TTL missing"), Ok(RespValue::Integer(-2)));
        assert_eq!(test.run("EXPIRE missing 10"), Ok(RespValue::Integer(0)));
    }

    #[test]
    fn test_expire_conditions() {
        let mut test = TestContext::new();
        test.run("SET k v").unwrap();

        assert_eq!(test.run("EXPIRE k 10 XX"), Ok(RespValue::Integer(0)));
        assert_eq!(test.run("EXPIRE k 10 NX"), Ok(RespValue::Integer(1)));
        assert_eq!(test.run("EXPIRE k 20 NX"), Ok(RespValue::Integer(0)));
        assert_eq!(test.run("EXPIRE k 5 GT"), Ok(RespValue::Integer(0)));
        assert_eq!(test.run("EXPIRE k 20 GT"), Ok(RespValue::Integer(1)));
        assert_eq!(test.run("EXPIRE k 5 LT"), Ok(RespValue::Integer(1)));
    }

    #[test]
    fn test_expired_key_leaves_dbsize() {
        let mut test = TestContext::new();
        test.run("SET k v PX 50").unwrap();
        assert_eq!(test.run("DBSIZE"), Ok(RespValue::Integer(1)));

        test.advance_clock(100);
        assert_eq!(test.run("GET k"), Ok(RespValue::NullBulkString));
        assert_eq!(test.run("EXISTS k"), Ok(RespValue::Integer(0)));
        assert_eq!(test.run("DBSIZE"), Ok(RespValue::Integer(0)));
    }

    #[test]
    fn test_rename() {
        let mut test = TestContext::new();
        test.run("SET a v").unwrap();

        assert_eq!(test.run("RENAME a b"), Ok(RespValue::ok()));
        assert_eq!(test.run("GET b"), Ok(RespValue::bulk_from_string("v")));
        assert_eq!(test.run("EXISTS a"), Ok(RespValue::Integer(0)));

        assert!(test.run("RENAME missing x").is_err());

        test.run("SET c other").unwrap();
        assert_eq!(test.run("RENAMENX b c"), Ok(RespValue::Integer(0)));
        assert_eq!(test.run("RENAMENX b fresh"), Ok(RespValue::Integer(1)));
    }

    #[test]
    fn test_type_reports_kind() {
        let mut test = TestContext::new();
        test.run("SET s v").unwrap();
        test.run("LPUSH l x").unwrap();
        test.run("SADD st m").unwrap();

        assert_eq!(
            test.run("TYPE s"),
            Ok(RespValue::SimpleString("string".to_string()))
        );
        assert_eq!(
            test.run("TYPE l"),
            Ok(RespValue::SimpleString("list".to_string()))
        );
        assert_eq!(
            test.run("TYPE st"),
            Ok(RespValue::SimpleString("set".to_string()))
        );
        assert_eq!(
            test.run("TYPE missing"),
            Ok(RespValue::SimpleString("none".to_string()))
        );
    }

    #[test]
    fn test_keys_glob() {
        let mut test = TestContext::new();
        test.run("MSET foo:1 a foo:2 b bar:1 c").unwrap();

        assert_eq!(
            test.run("KEYS foo:*"),
            Ok(RespValue::Array(vec![
                RespValue::bulk_from_string("foo:1"),
                RespValue::bulk_from_string("foo:2"),
            ]))
        );
    }

    #[test]
    fn test_scan_returns_all_keys() {
        let mut test = TestContext::new();
        for index in 0..25 {
            test.run(&format!("SET key:{} v", index)).unwrap();
        }

        let mut seen = std::collections::HashSet::new();
        let mut cursor = "0".to_string();
        loop {
            let reply = test.run(&format!("SCAN {} COUNT 7", cursor)).unwrap();
            let RespValue::Array(parts) = reply else {
                panic!("SCAN must reply with an array");
            };
            let RespValue::BulkString(next) = &parts[0] else {
                panic!("cursor must be a bulk string");
            };
            let RespValue::Array(keys) = &parts[1] else {
                panic!("keys must be an array");
            };
            for key in keys {
                if let RespValue::BulkString(key) = key {
                    seen.insert(key.clone());
                }
            }
            cursor = String::from_utf8(next.to_vec()).unwrap();
            if cursor == "0" {
                break;
            }
        }
        assert_eq!(seen.len(), 25);
    }

    #[test]
    fn test_flushdb() {
        let mut test = TestContext::new();
        test.run("MSET a 1 b 2").unwrap();

        assert_eq!(test.run("FLUSHDB"), Ok(RespValue::ok()));
        assert_eq!(test.run("DBSIZE"), Ok(RespValue::Integer(0)));
    }

    #[test]
    fn test_copy() {
        let mut test = TestContext::new();
        test.run("SET src v").unwrap();

        assert_eq!(test.run("COPY src dst"), Ok(RespValue::Integer(1)));
        assert_eq!(test.run("GET dst"), Ok(RespValue::bulk_from_string("v")));

        test.run("SET dst other").unwrap();
        assert_eq!(test.run("COPY src dst"), Ok(RespValue::Integer(0)));
        assert_eq!(test.run("COPY src dst REPLACE"), Ok(RespValue::Integer(1)));
    }

    #[test]
    fn test_dump_restore_unsupported() {
        let mut test = TestContext::new();
        assert_eq!(
            test.run("DUMP k"),
            Err(CommandError::NotImplemented("DUMP".to_string()))
        );
        assert_eq!(
            test.run("RESTORE k 0 data"),
            Err(CommandError::NotImplemented("RESTORE".to_string()))
        );
    }
}
