//! List commands. The B-prefixed variants share these implementations: the
//! blocking executor retries the `try_*` helpers here until data arrives or
//! the timeout fires.

use std::collections::VecDeque;

use bytes::Bytes;

use crate::commands::arguments::ArgCursor;
use crate::commands::command_error::CommandError;
use crate::commands::context::CommandContext;
use crate::resp::RespValue;
use crate::store::list::{
    find_positions, insert_relative, remove_occurrences, resolve_index, resolve_range,
    trim_to_range, InsertPosition,
};
use crate::store::{Database, Value};

fn read_list<'a>(
    database: &'a mut Database,
    key: &[u8],
    now: u64,
) -> Result<Option<&'a VecDeque<Bytes>>, CommandError> {
    match database.read(key, now) {
        None => Ok(None),
        Some(Value::List(list)) => Ok(Some(list)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn write_list<'a>(
    database: &'a mut Database,
    key: &[u8],
    now: u64,
) -> Result<Option<&'a mut VecDeque<Bytes>>, CommandError> {
    match database.write(key, now) {
        None => Ok(None),
        Some(Value::List(list)) => Ok(Some(list)),
        Some(_) => Err(CommandError::WrongType),
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum End {
    Left,
    Right,
}

impl End {
    pub fn parse(cursor: &mut ArgCursor) -> Result<End, CommandError> {
        if cursor.match_token("LEFT") {
            Ok(End::Left)
        } else if cursor.match_token("RIGHT") {
            Ok(End::Right)
        } else {
            Err(CommandError::Syntax)
        }
    }
}

fn push(
    ctx: &mut CommandContext,
    args: &[Bytes],
    end: End,
    require_existing: bool,
) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let elements = cursor.rest();
    if elements.is_empty() {
        return Err(CommandError::WrongArgCount("LPUSH".to_string()));
    }

    let now = ctx.now;
    let database = ctx.database();

    if require_existing && read_list(database, &key, now)?.is_none() {
        return Ok(RespValue::Integer(0));
    }

    // Probe the type before creating anything.
    read_list(database, &key, now)?;
    let value = database.entry_or_insert_with(key.clone(), now, || Value::List(VecDeque::new()));
    let Value::List(list) = value else {
        return Err(CommandError::WrongType);
    };

    for element in elements {
        match end {
            End::Left => list.push_front(element),
            End::Right => list.push_back(element),
        }
    }
    let length = list.len();
    database.mark_mutated(key, if end == End::Left { "lpush" } else { "rpush" });
    Ok(RespValue::Integer(length as i64))
}

pub fn lpush(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    push(ctx, args, End::Left, false)
}

pub fn rpush(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    push(ctx, args, End::Right, false)
}

pub fn lpushx(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    push(ctx, args, End::Left, true)
}

pub fn rpushx(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    push(ctx, args, End::Right, true)
}

fn pop(ctx: &mut CommandContext, args: &[Bytes], end: End) -> Result<RespValue, CommandError> {
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
    let Some(list) = write_list(database, &key, now)? else {
        return Ok(match count {
            Some(_) => RespValue::NullArray,
            None => RespValue::NullBulkString,
        });
    };

    let take = count.unwrap_or(1).min(list.len());
    let mut popped = Vec::with_capacity(take);
    for _ in 0..take {
        let element = match end {
            End::Left => list.pop_front(),
            End::Right => list.pop_back(),
        };
        match element {
            Some(element) => popped.push(element),
            None => break,
        }
    }

    if !popped.is_empty() {
        database.mark_mutated(key.clone(), if end == End::Left { "lpop" } else { "rpop" });
        database.collapse_if_empty(&key);
    }

    Ok(match count {
        Some(_) => RespValue::Array(popped.into_iter().map(RespValue::BulkString).collect()),
        None => match popped.into_iter().next() {
            Some(element) => RespValue::BulkString(element),
            None => RespValue::NullBulkString,
        },
    })
}

pub fn lpop(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    pop(ctx, args, End::Left)
}

pub fn rpop(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    pop(ctx, args, End::Right)
}

pub fn llen(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let length = read_list(ctx.database(), &key, now)?
        .map(VecDeque::len)
        .unwrap_or(0);
    Ok(RespValue::Integer(length as i64))
}

pub fn lrange(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let start = cursor.expect_int()?;
    let stop = cursor.expect_int()?;
    cursor.finish()?;

    let now = ctx.now;
    let Some(list) = read_list(ctx.database(), &key, now)? else {
        return Ok(RespValue::Array(Vec::new()));
    };

    let elements = match resolve_range(list.len(), start, stop) {
        Some((from, to)) => list
            .iter()
            .skip(from)
            .take(to - from + 1)
            .cloned()
            .map(RespValue::BulkString)
            .collect(),
        None => Vec::new(),
    };
    Ok(RespValue::Array(elements))
}

pub fn lindex(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let index = cursor.expect_int()?;
    cursor.finish()?;

    let now = ctx.now;
    let Some(list) = read_list(ctx.database(), &key, now)? else {
        return Ok(RespValue::NullBulkString);
    };
    let reply = match resolve_index(list.len(), index) {
        Some(position) => RespValue::BulkString(list[position].clone()),
        None => RespValue::NullBulkString,
    };
    Ok(reply)
}

pub fn lset(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let index = cursor.expect_int()?;
    let element = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let database = ctx.database();
    let Some(list) = write_list(database, &key, now)? else {
        return Err(CommandError::OutOfRange("no such key".to_string()));
    };
    let Some(position) = resolve_index(list.len(), index) else {
        return Err(CommandError::OutOfRange("index out of range".to_string()));
    };
    list[position] = element;
    database.mark_mutated(key, "lset");
    Ok(RespValue::ok())
}

pub fn linsert(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let position = if cursor.match_token("BEFORE") {
        InsertPosition::Before
    } else if cursor.match_token("AFTER") {
        InsertPosition::After
    } else {
        return Err(CommandError::Syntax);
    };
    let pivot = cursor.expect_bytes()?;
    let element = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let database = ctx.database();
    let Some(list) = write_list(database, &key, now)? else {
        return Ok(RespValue::Integer(0));
    };
    let reply = match insert_relative(list, position, &pivot, element) {
        Some(length) => {
            database.mark_mutated(key, "linsert");
            RespValue::Integer(length as i64)
        }
        None => RespValue::Integer(-1),
    };
    Ok(reply)
}

pub fn lrem(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let count = cursor.expect_int()?;
    let element = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let database = ctx.database();
    let Some(list) = write_list(database, &key, now)? else {
        return Ok(RespValue::Integer(0));
    };
    let removed = remove_occurrences(list, count, &element);
    if removed > 0 {
        database.mark_mutated(key.clone(), "lrem");
        database.collapse_if_empty(&key);
    }
    Ok(RespValue::Integer(removed as i64))
}

pub fn ltrim(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let start = cursor.expect_int()?;
    let stop = cursor.expect_int()?;
    cursor.finish()?;

    let now = ctx.now;
    let database = ctx.database();
    if let Some(list) = write_list(database, &key, now)? {
        trim_to_range(list, start, stop);
        database.mark_mutated(key.clone(), "ltrim");
        database.collapse_if_empty(&key);
    }
    Ok(RespValue::ok())
}

pub fn lpos(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let element = cursor.expect_bytes()?;

    let mut rank = 1i64;
    let mut count = None;
    while !cursor.done() {
        if cursor.match_token("RANK") {
            rank = cursor.expect_int()?;
            if rank == 0 {
                return Err(CommandError::OutOfRange(
                    "RANK can't be zero".to_string(),
                ));
            }
        } else if cursor.match_token("COUNT") {
            let wanted = cursor.expect_int()?;
            if wanted < 0 {
                return Err(CommandError::OutOfRange(
                    "COUNT can't be negative".to_string(),
                ));
            }
            count = Some(wanted as u64);
        } else {
            return Err(CommandError::Syntax);
        }
    }

    let now = ctx.now;
    let Some(list) = read_list(ctx.database(), &key, now)? else {
        return Ok(match count {
            Some(_) => RespValue::Array(Vec::new()),
            None => RespValue::NullBulkString,
        });
    };

    let positions = find_positions(list, &element, rank, count);
    Ok(match count {
        Some(_) => RespValue::Array(
            positions
                .into_iter()
                .map(|position| RespValue::Integer(position as i64))
                .collect(),
        ),
        None => match positions.first() {
            Some(&position) => RespValue::Integer(position as i64),
            None => RespValue::NullBulkString,
        },
    })
}

/// The shared LMOVE core. Also services RPOPLPUSH and the blocking forms.
pub fn try_move_element(
    ctx: &mut CommandContext,
    source: &Bytes,
    destination: &Bytes,
    from: End,
    to: End,
) -> Result<Option<Bytes>, CommandError> {
    let now = ctx.now;
    let database = ctx.database();

    // Both sides must type-check before anything moves.
    read_list(database, source, now)?;
    read_list(database, destination, now)?;

    let Some(source_list) = write_list(database, source, now)? else {
        return Ok(None);
    };
    let element = match from {
        End::Left => source_list.pop_front(),
        End::Right => source_list.pop_back(),
    };
    let Some(element) = element else {
        return Ok(None);
    };

    database.mark_mutated(source.clone(), if from == End::Left { "lpop" } else { "rpop" });
    database.collapse_if_empty(source);

    let value =
        database.entry_or_insert_with(destination.clone(), now, || Value::List(VecDeque::new()));
    let Value::List(destination_list) = value else {
        return Err(CommandError::WrongType);
    };
    match to {
        End::Left => destination_list.push_front(element.clone()),
        End::Right => destination_list.push_back(element.clone()),
    }
    database.mark_mutated(
        destination.clone(),
        if to == End::Left { "lpush" } else { "rpush" },
    );

    Ok(Some(element))
}

pub fn lmove(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let source = cursor.expect_bytes()?;
    let destination = cursor.expect_bytes()?;
    let from = End::parse(&mut cursor)?;
    let to = End::parse(&mut cursor)?;
    cursor.finish()?;

    let reply = match try_move_element(ctx, &source, &destination, from, to)? {
        Some(element) => RespValue::BulkString(element),
        None => RespValue::NullBulkString,
    };
    Ok(reply)
}

pub fn rpoplpush(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let source = cursor.expect_bytes()?;
    let destination = cursor.expect_bytes()?;
    cursor.finish()?;

    let reply = match try_move_element(ctx, &source, &destination, End::Right, End::Left)? {
        Some(element) => RespValue::BulkString(element),
        None => RespValue::NullBulkString,
    };
    Ok(reply)
}

/// First-non-empty-key pop used by BLPOP/BRPOP: one element from the first
/// key that has any.
pub fn try_pop_first(
    ctx: &mut CommandContext,
    keys: &[Bytes],
    end: End,
) -> Result<Option<(Bytes, Bytes)>, CommandError> {
    let now = ctx.now;
    let database = ctx.database();

    for key in keys {
        let Some(list) = write_list(database, key, now)? else {
            continue;
        };
        let element = match end {
            End::Left => list.pop_front(),
            End::Right => list.pop_back(),
        };
        if let Some(element) = element {
            database.mark_mutated(key.clone(), if end == End::Left { "lpop" } else { "rpop" });
            database.collapse_if_empty(key);
            return Ok(Some((key.clone(), element)));
        }
    }
    Ok(None)
}

/// LMPOP/BLMPOP core: pop up to `count` elements from the first non-empty
/// key.
pub fn try_pop_many(
    ctx: &mut CommandContext,
    keys: &[Bytes],
    end: End,
    count: usize,
) -> Result<Option<(Bytes, Vec<Bytes>)>, CommandError> {
    let now = ctx.now;
    let database = ctx.database();

    for key in keys {
        let Some(list) = write_list(database, key, now)? else {
            continue;
        };
        if list.is_empty() {
            continue;
        }

        let take = count.min(list.len());
        let mut popped = Vec::with_capacity(take);
        for _ in 0..take {
            let element = match end {
                End::Left => list.pop_front(),
                End::Right => list.pop_back(),
            };
            match element {
                Some(element) => popped.push(element),
                None => break,
            }
        }
        database.mark_mutated(key.clone(), if end == End::Left { "lpop" } else { "rpop" });
        database.collapse_if_empty(key);
        return Ok(Some((key.clone(), popped)));
    }
    Ok(None)
}

pub struct MpopArguments {
    pub keys: Vec<Bytes>,
    pub end: End,
    pub count: usize,
}

impl MpopArguments {
    /// Parses `numkeys key... <LEFT|RIGHT> [COUNT n]` starting at the
    /// cursor's current position (after the timeout for BLMPOP).
    pub fn parse(cursor: &mut ArgCursor) -> Result<Self, CommandError> {
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

        let end = End::parse(cursor)?;
        let mut count = 1;
        if cursor.match_token("COUNT") {
            let wanted = cursor.expect_int()?;
            if wanted < 1 {
                return Err(CommandError::OutOfRange(
                    "count should be greater than 0".to_string(),
                ));
            }
            count = wanted as usize;
        }
        cursor.finish()?;

        Ok(MpopArguments { keys, end, count })
    }
}

pub fn lmpop(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let parsed = MpopArguments::parse(&mut cursor)?;

    let reply = match try_pop_many(ctx, &parsed.keys, parsed.end, parsed.count)? {
        Some((key, elements)) => RespValue::Array(vec![
            RespValue::BulkString(key),
            RespValue::Array(elements.into_iter().map(RespValue::BulkString).collect()),
        ]),
        None => RespValue::NullArray,
    };
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::TestContext;

    fn bulk_array(items: &[&str]) -> RespValue {
        RespValue::Array(
            items
                .iter()
                .map(|item| RespValue::bulk_from_string(*item))
                .collect(),
        )
    }

    #[test]
    fn test_push_and_range() {
        let mut test = TestContext::new();

        assert_eq!(test.run("LPUSH l a b c"), Ok(RespValue::Integer(3)));
        assert_eq!(test.run("LRANGE l 0 -1"), Ok(bulk_array(&["c", "b", "a"])));

        assert_eq!(test.run("RPUSH l z"), Ok(RespValue::Integer(4)));
        assert_eq!(
            test.run("LRANGE l 0 -1"),
            Ok(bulk_array(&["c", "b", "a", "z"]))
        );
        assert_eq!(test.run("LRANGE l 1 2"), Ok(bulk_array(&["b", "a"])));
        assert_eq!(test.run("LRANGE l 50 60"), Ok(bulk_array(&[])));
    }

    #[test]
    fn test_pushx_requires_existing() {
        let mut test = TestContext::new();
        assert_eq!(test.run("LPUSHX missing x"), Ok(RespValue::Integer(0)));
        test.run("RPUSH l a").unwrap();
        assert_eq!(test.run("LPUSHX l x"), Ok(RespValue::Integer(2)));
    }

    #[test]
    fn test_pop_variants() {
        let mut test = TestContext::new();
        test.run("RPUSH l a b c d").unwrap();

        assert_eq!(test.run("LPOP l"), Ok(RespValue::bulk_from_string("a")));
        assert_eq!(test.run("RPOP l"), Ok(RespValue::bulk_from_string("d")));
        assert_eq!(test.run("LPOP l 2"), Ok(bulk_array(&["b", "c"])));
        assert_eq!(test.run("LPOP l"), Ok(RespValue::NullBulkString));
        // Popping the last element removed the key.
        assert_eq!(test.run("EXISTS l"), Ok(RespValue::Integer(0)));
    }

    #[test]
    fn test_lindex_lset() {
        let mut test = TestContext::new();
        test.run("RPUSH l a b c").unwrap();

        assert_eq!(test.run("LINDEX l 0"), Ok(RespValue::bulk_from_string("a")));
        assert_eq!(test.run("LINDEX l -1"), Ok(RespValue::bulk_from_string("c")));
        assert_eq!(test.run("LINDEX l 9"), Ok(RespValue::NullBulkString));

        assert_eq!(test.run("LSET l 1 B"), Ok(RespValue::ok()));
        assert_eq!(test.run("LINDEX l 1"), Ok(RespValue::bulk_from_string("B")));
        assert!(test.run("LSET l 9 x").is_err());
        assert!(test.run("LSET missing 0 x").is_err());
    }

    #[test]
    fn test_linsert() {
        let mut test = TestContext::new();
        test.run("RPUSH l a c").unwrap();

        assert_eq!(test.run("LINSERT l BEFORE c b"), Ok(RespValue::Integer(3)));
        assert_eq!(test.run("LRANGE l 0 -1"), Ok(bulk_array(&["a", "b", "c"])));
        assert_eq!(test.run("LINSERT l AFTER zz x"), Ok(RespValue::Integer(-1)));
        assert_eq!(
            test.run("LINSERT missing BEFORE a x"),
            Ok(RespValue::Integer(0))
        );
    }

    #[test]
    fn test_lrem_collapses_empty() {
        let mut test = TestContext::new();
        test.run("RPUSH l a b a").unwrap();

        assert_eq!(test.run("LREM l 0 a"), Ok(RespValue::Integer(2)));
        assert_eq!(test.run("LREM l 0 b"), Ok(RespValue::Integer(1)));
        assert_eq!(test.run("EXISTS l"), Ok(RespValue::Integer(0)));
    }

    #[test]
    fn test_ltrim() {
        let mut test = TestContext::new();
        test.run("RPUSH l a b c d e").unwrap();

        assert_eq!(test.run("LTRIM l 1 3"), Ok(RespValue::ok()));
        assert_eq!(test.run("LRANGE l 0 -1"), Ok(bulk_array(&["b", "c", "d"])));

        assert_eq!(test.run("LTRIM l 5 10"), Ok(RespValue::ok()));
        assert_eq!(test.run("EXISTS l"), Ok(RespValue::Integer(0)));
    }

    #[test]
    fn test_lpos() {
        let mut test = TestContext::new();
        test.run("RPUSH l a b c 1 2 3 c c").unwrap();

        assert_eq!(test.run("LPOS l c"), Ok(RespValue::Integer(2)));
        assert_eq!(test.run("LPOS l c RANK -1"), Ok(RespValue::Integer(7)));
        assert_eq!(
            test.run("LPOS l c COUNT 2"),
            Ok(RespValue::Array(vec![
                RespValue::Integer(2),
                RespValue::Integer(6)
            ]))
        );
        assert_eq!(test.run("LPOS l missing"), Ok(RespValue::NullBulkString));
        assert!(test.run("LPOS l c RANK 0").is_err());
    }

    #[test]
    fn test_lmove_and_rpoplpush() {
        let mut test = TestContext::new();
        test.run("RPUSH src a b c").unwrap();

        assert_eq!(
            test.run("LMOVE src dst LEFT RIGHT"),
            Ok(RespValue::bulk_from_string("a"))
        );
        assert_eq!(
            test.run("RPOPLPUSH src dst"),
            Ok(RespValue::bulk_from_string("c"))
        );
        assert_eq!(test.run("LRANGE dst 0 -1"), Ok(bulk_array(&["c", "a"])));
        assert_eq!(test.run("LRANGE src 0 -1"), Ok(bulk_array(&["b"])));

        assert_eq!(
            test.run("LMOVE missing dst LEFT LEFT"),
            Ok(RespValue::NullBulkString)
        );
    }

    #[test]
    fn test_lmove_rotates_same_list() {
        let mut test = TestContext::new();
        test.run("RPUSH l a b c").unwrap();

        assert_eq!(
            test.run("LMOVE l l RIGHT LEFT"),
            Ok(RespValue::bulk_from_string("c"))
        );
        assert_eq!(test.run("LRANGE l 0 -1"), Ok(bulk_array(&["c", "a", "b"])));
    }

    #[test]
    fn test_lmpop() {
        let mut test = TestContext::new();
        test.run("RPUSH l2 x y z").unwrap();

        let reply = test.run("LMPOP 2 l1 l2 LEFT COUNT 2").unwrap();
        assert_eq!(
            reply,
            RespValue::Array(vec![
                RespValue::bulk_from_string("l2"),
                bulk_array(&["x", "y"]),
            ])
        );

        assert_eq!(test.run("LMPOP 2 l1 missing LEFT"), Ok(RespValue::NullArray));
    }

    #[test]
    fn test_wrong_type_probes() {
        let mut test = TestContext::new();
        test.run("SET s v").unwrap();

        assert_eq!(test.run("LPUSH s x"), Err(CommandError::WrongType));
        assert_eq!(test.run("LRANGE s 0 -1"), Err(CommandError::WrongType));
        assert_eq!(test.run("RPOPLPUSH s d"), Err(CommandError::WrongType));

        test.run("RPUSH l a").unwrap();
        assert_eq!(
            test.run("LMOVE l s LEFT LEFT"),
            Err(CommandError::WrongType)
        );
        // The failed move must not have consumed the element.
        assert_eq!(test.run("LLEN l"), Ok(RespValue::Integer(1)));
    }
}
