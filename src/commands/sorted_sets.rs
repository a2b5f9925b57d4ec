//! Sorted-set commands.

use bytes::Bytes;

use crate::commands::arguments::{parse_float, ArgCursor};
use crate::commands::command_error::CommandError;
use crate::commands::context::CommandContext;
use crate::resp::RespValue;
use crate::store::sorted_set::{LexBound, ScoreBound, SortedSet};
use crate::store::{Database, Value};

fn read_zset<'a>(
    database: &'a mut Database,
    key: &[u8],
    now: u64,
) -> Result<Option<&'a SortedSet>, CommandError> {
    match database.read(key, now) {
        None => Ok(None),
        Some(Value::Zset(zset)) => Ok(Some(zset)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn write_zset<'a>(
    database: &'a mut Database,
    key: &[u8],
    now: u64,
) -> Result<Option<&'a mut SortedSet>, CommandError> {
    match database.write(key, now) {
        None => Ok(None),
        Some(Value::Zset(zset)) => Ok(Some(zset)),
        Some(_) => Err(CommandError::WrongType),
    }
}

fn zset_entry<'a>(
    database: &'a mut Database,
    key: &Bytes,
    now: u64,
) -> Result<&'a mut SortedSet, CommandError> {
    read_zset(database, key, now)?;
    let value = database.entry_or_insert_with(key.clone(), now, || Value::Zset(SortedSet::new()));
    match value {
        Value::Zset(zset) => Ok(zset),
        _ => Err(CommandError::WrongType),
    }
}

/// Scored members rendered with or without scores. Scores ride as RESP3
/// doubles; the encoder downgrades them for RESP2.
fn scored_reply(members: Vec<(Bytes, f64)>, with_scores: bool) -> RespValue {
    let mut elements = Vec::with_capacity(members.len() * if with_scores { 2 } else { 1 });
    for (member, score) in members {
        elements.push(RespValue::BulkString(member));
        if with_scores {
            elements.push(RespValue::Double(score));
        }
    }
    RespValue::Array(elements)
}

fn parse_score_bound(cursor: &mut ArgCursor) -> Result<ScoreBound, CommandError> {
    let raw = cursor.next().ok_or(CommandError::Syntax)?;
    ScoreBound::parse(raw).ok_or(CommandError::OutOfRange(
        "min or max is not a float".to_string(),
    ))
}

fn parse_lex_bound(cursor: &mut ArgCursor, low: bool) -> Result<LexBound, CommandError> {
    let raw = cursor.next().ok_or(CommandError::Syntax)?;
    LexBound::parse(raw, low).ok_or(CommandError::OutOfRange(
        "min or max not valid string range item".to_string(),
    ))
}

pub struct ZaddArguments {
    key: Bytes,
    nx: bool,
    xx: bool,
    gt: bool,
    lt: bool,
    ch: bool,
    incr: bool,
    pairs: Vec<(f64, Bytes)>,
}

impl ZaddArguments {
    pub fn parse(args: &[Bytes]) -> Result<Self, CommandError> {
        let mut cursor = ArgCursor::new(args);
        let key = cursor.expect_bytes()?;

        let mut parsed = ZaddArguments {
            key,
            nx: false,
            xx: false,
            gt: false,
            lt: false,
            ch: false,
            incr: false,
            pairs: Vec::new(),
        };

        loop {
            if cursor.match_token("NX") {
                parsed.nx = true;
            } else if cursor.match_token("XX") {
                parsed.xx = true;
            } else if cursor.match_token("GT") {
                parsed.gt = true;
            } else if cursor.match_token("LT") {
                parsed.lt = true;
            } else if cursor.match_token("CH") {
                parsed.ch = true;
            } else if cursor.match_token("INCR") {
                parsed.incr = true;
            } else {
                break;
            }
        }

        if parsed.nx && (parsed.xx || parsed.gt || parsed.lt) {
            return Err(CommandError::OutOfRange(
                "GT, LT, and/or NX options at the same time are not compatible".to_string(),
            ));
        }
        if parsed.gt && parsed.lt {
            return Err(CommandError::OutOfRange(
                "GT, LT, and/or NX options at the same time are not compatible".to_string(),
            ));
        }

        while !cursor.done() {
            let score = cursor.expect_float()?;
            let member = cursor.expect_bytes()?;
            parsed.pairs.push((score, member));
        }
        if parsed.pairs.is_empty() {
            return Err(CommandError::WrongArgCount("ZADD".to_string()));
        }
        if parsed.incr && parsed.pairs.len() != 1 {
            return Err(CommandError::OutOfRange(
                "INCR option supports a single increment-element pair".to_string(),
            ));
        }

        Ok(parsed)
    }
}

pub fn zadd(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let parsed = ZaddArguments::parse(args)?;

    let now = ctx.now;
    let database = ctx.database();

    // XX against a missing key never creates it.
    if parsed.xx && !database.contains(&parsed.key, now) {
        return Ok(if parsed.incr {
            RespValue::NullBulkString
        } else {
            RespValue::Integer(0)
        });
    }

    let zset = zset_entry(database, &parsed.key, now)?;

    let mut added = 0i64;
    let mut changed = 0i64;
    let mut incr_result = None;

    for (score, member) in &parsed.pairs {
        let current = zset.score(member);

        let next = if parsed.incr {
            match current {
                Some(existing) => existing + score,
                None => *score,
            }
        } else {
            *score
        };

        let allowed = match current {
            None => !parsed.xx,
            Some(existing) => {
                !parsed.nx
                    && !(parsed.gt && next <= existing)
                    && !(parsed.lt && next >= existing)
            }
        };
        if !allowed {
            if parsed.incr {
                incr_result = Some(None);
            }
            continue;
        }
        if next.is_nan() {
            return Err(CommandError::OutOfRange(
                "resulting score is not a number (NaN)".to_string(),
            ));
        }

        let was_new = zset.insert(member.clone(), next);
        if was_new {
            added += 1;
            changed += 1;
        } else if current != Some(next) {
            changed += 1;
        }
        if parsed.incr {
            incr_result = Some(Some(next));
        }
    }

    if changed > 0 {
        database.mark_mutated(parsed.key.clone(), "zadd");
    }
    database.collapse_if_empty(&parsed.key);

    if parsed.incr {
        return Ok(match incr_result.flatten() {
            Some(score) => RespValue::Double(score),
            None => RespValue::NullBulkString,
        });
    }
    Ok(RespValue::Integer(if parsed.ch { changed } else { added }))
}

pub fn zscore(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let member = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let reply = match read_zset(ctx.database(), &key, now)?.and_then(|zset| zset.score(&member)) {
        Some(score) => RespValue::Double(score),
        None => RespValue::NullBulkString,
    };
    Ok(reply)
}

pub fn zmscore(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let members = cursor.rest();
    if members.is_empty() {
        return Err(CommandError::WrongArgCount("ZMSCORE".to_string()));
    }

    let now = ctx.now;
    let zset = read_zset(ctx.database(), &key, now)?;
    let replies = members
        .iter()
        .map(|member| match zset.and_then(|zset| zset.score(member)) {
            Some(score) => RespValue::Double(score),
            None => RespValue::NullBulkString,
        })
        .collect();
    Ok(RespValue::Array(replies))
}

pub fn zcard(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let cardinality = read_zset(ctx.database(), &key, now)?
        .map(SortedSet::len)
        .unwrap_or(0);
    Ok(RespValue::Integer(cardinality as i64))
}

pub fn zcount(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let min = parse_score_bound(&mut cursor)?;
    let max = parse_score_bound(&mut cursor)?;
    cursor.finish()?;

    let now = ctx.now;
    let count = read_zset(ctx.database(), &key, now)?
        .map(|zset| zset.count_in_score_range(min, max))
        .unwrap_or(0);
    Ok(RespValue::Integer(count as i64))
}

pub fn zlexcount(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let min = parse_lex_bound(&mut cursor, true)?;
    let max = parse_lex_bound(&mut cursor, false)?;
    cursor.finish()?;

    let now = ctx.now;
    let count = read_zset(ctx.database(), &key, now)?
        .map(|zset| zset.count_in_lex_range(&min, &max))
        .unwrap_or(0);
    Ok(RespValue::Integer(count as i64))
}

pub fn zincrby(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let delta = cursor.expect_float()?;
    let member = cursor.expect_bytes()?;
    cursor.finish()?;

    let now = ctx.now;
    let database = ctx.database();
    let zset = zset_entry(database, &key, now)?;

    let next = zset.score(&member).unwrap_or(0.0) + delta;
    if next.is_nan() {
        return Err(CommandError::OutOfRange(
            "resulting score is not a number (NaN)".to_string(),
        ));
    }
    zset.insert(member, next);
    database.mark_mutated(key, "zincr");
    Ok(RespValue::Double(next))
}

fn rank_reply(
    ctx: &mut CommandContext,
    args: &[Bytes],
    reverse: bool,
) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let member = cursor.expect_bytes()?;
    let with_score = if cursor.done() {
        false
    } else {
        cursor.expect_token("WITHSCORE")?;
        cursor.finish()?;
        true
    };

    let now = ctx.now;
    let Some(zset) = read_zset(ctx.database(), &key, now)? else {
        return Ok(if with_score {
            RespValue::NullArray
        } else {
            RespValue::NullBulkString
        });
    };

    let reply = match zset.rank(&member, reverse) {
        Some(rank) => {
            if with_score {
                let score = zset.score(&member).unwrap_or(0.0);
                RespValue::Array(vec![
                    RespValue::Integer(rank as i64),
                    RespValue::Double(score),
                ])
            } else {
                RespValue::Integer(rank as i64)
            }
        }
        None => {
            if with_score {
                RespValue::NullArray
            } else {
                RespValue::NullBulkString
            }
        }
    };
    Ok(reply)
}

pub fn zrank(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    rank_reply(ctx, args, false)
}

pub fn zrevrank(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    rank_reply(ctx, args, true)
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum RangeKind {
    Rank,
    Score,
    Lex,
}

/// The unified ZRANGE grammar; the legacy ZRANGEBY* commands funnel into
/// this with their kind fixed.
struct RangeQuery {
    key: Bytes,
    kind: RangeKind,
    reverse: bool,
    start_raw: Bytes,
    stop_raw: Bytes,
    offset: usize,
    count: Option<usize>,
    with_scores: bool,
}

impl RangeQuery {
    fn parse_zrange(args: &[Bytes]) -> Result<Self, CommandError> {
        let mut cursor = ArgCursor::new(args);
        let key = cursor.expect_bytes()?;
        let start_raw = cursor.expect_bytes()?;
        let stop_raw = cursor.expect_bytes()?;

        let mut query = RangeQuery {
            key,
            kind: RangeKind::Rank,
            reverse: false,
            start_raw,
            stop_raw,
            offset: 0,
            count: None,
            with_scores: false,
        };
        let mut limited = false;

        while !cursor.done() {
            if cursor.match_token("BYSCORE") {
                query.kind = RangeKind::Score;
            } else if cursor.match_token("BYLEX") {
                query.kind = RangeKind::Lex;
            } else if cursor.match_token("REV") {
                query.reverse = true;
            } else if cursor.match_token("LIMIT") {
                query.offset = cursor.expect_usize()?;
                let count = cursor.expect_int()?;
                query.count = if count < 0 { None } else { Some(count as usize) };
                limited = true;
            } else if cursor.match_token("WITHSCORES") {
                query.with_scores = true;
            } else {
                return Err(CommandError::Syntax);
            }
        }

        if limited && query.kind == RangeKind::Rank {
            return Err(CommandError::OutOfRange(
                "syntax error, LIMIT is only supported in combination with either BYSCORE or BYLEX".to_string(),
            ));
        }
        if query.with_scores && query.kind == RangeKind::Lex {
            return Err(CommandError::Syntax);
        }
        Ok(query)
    }

    fn parse_legacy(
        args: &[Bytes],
        kind: RangeKind,
        reverse: bool,
    ) -> Result<Self, CommandError> {
        let mut cursor = ArgCursor::new(args);
        let key = cursor.expect_bytes()?;
        let start_raw = cursor.expect_bytes()?;
        let stop_raw = cursor.expect_bytes()?;

        let mut query = RangeQuery {
            key,
            kind,
            reverse,
            start_raw,
            stop_raw,
            offset: 0,
            count: None,
            with_scores: false,
        };

        while !cursor.done() {
            if kind != RangeKind::Lex && cursor.match_token("WITHSCORES") {
                query.with_scores = true;
            } else if kind != RangeKind::Rank && cursor.match_token("LIMIT") {
                query.offset = cursor.expect_usize()?;
                let count = cursor.expect_int()?;
                query.count = if count < 0 { None } else { Some(count as usize) };
            } else {
                return Err(CommandError::Syntax);
            }
        }
        Ok(query)
    }

    fn run(&self, zset: &SortedSet) -> Result<Vec<(Bytes, f64)>, CommandError> {
        match self.kind {
            RangeKind::Rank => {
                let start = crate::commands::arguments::parse_int(&self.start_raw)?;
                let stop = crate::commands::arguments::parse_int(&self.stop_raw)?;
                Ok(zset.range_by_rank(start, stop, self.reverse))
            }
            RangeKind::Score => {
                // In REV form the bounds arrive high before low.
                let (low_raw, high_raw) = if self.reverse {
                    (&self.stop_raw, &self.start_raw)
                } else {
                    (&self.start_raw, &self.stop_raw)
                };
                let min = ScoreBound::parse(low_raw).ok_or(CommandError::OutOfRange(
                    "min or max is not a float".to_string(),
                ))?;
                let max = ScoreBound::parse(high_raw).ok_or(CommandError::OutOfRange(
                    "min or max is not a float".to_string(),
                ))?;
                Ok(zset.range_by_score(min, max, self.reverse, self.offset, self.count))
            }
            RangeKind::Lex => {
                let (low_raw, high_raw) = if self.reverse {
                    (&self.stop_raw, &self.start_raw)
                } else {
                    (&self.start_raw, &self.stop_raw)
                };
                let min = LexBound::parse(low_raw, true).ok_or(CommandError::OutOfRange(
                    "min or max not valid string range item".to_string(),
                ))?;
                let max = LexBound::parse(high_raw, false).ok_or(CommandError::OutOfRange(
                    "min or max not valid string range item".to_string(),
                ))?;
                Ok(zset.range_by_lex(&min, &max, self.reverse, self.offset, self.count))
            }
        }
    }
}

fn run_range_query(
    ctx: &mut CommandContext,
    query: RangeQuery,
) -> Result<RespValue, CommandError> {
    let now = ctx.now;
    let Some(zset) = read_zset(ctx.database(), &query.key, now)? else {
        // Parse errors surface even against a missing key.
        query.run(&SortedSet::new())?;
        return Ok(RespValue::Array(Vec::new()));
    };
    let members = query.run(zset)?;
    Ok(scored_reply(members, query.with_scores))
}

pub fn zrange(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let query = RangeQuery::parse_zrange(args)?;
    run_range_query(ctx, query)
}

pub fn zrangebyscore(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let query = RangeQuery::parse_legacy(args, RangeKind::Score, false)?;
    run_range_query(ctx, query)
}

pub fn zrevrangebyscore(
    ctx: &mut CommandContext,
    args: &[Bytes],
) -> Result<RespValue, CommandError> {
    let query = RangeQuery::parse_legacy(args, RangeKind::Score, true)?;
    run_range_query(ctx, query)
}

pub fn zrangebylex(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let query = RangeQuery::parse_legacy(args, RangeKind::Lex, false)?;
    run_range_query(ctx, query)
}

pub fn zrevrangebylex(
    ctx: &mut CommandContext,
    args: &[Bytes],
) -> Result<RespValue, CommandError> {
    let query = RangeQuery::parse_legacy(args, RangeKind::Lex, true)?;
    run_range_query(ctx, query)
}

pub fn zrevrange(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let query = RangeQuery::parse_legacy(args, RangeKind::Rank, true)?;
    run_range_query(ctx, query)
}

pub fn zrem(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let members = cursor.rest();
    if members.is_empty() {
        return Err(CommandError::WrongArgCount("ZREM".to_string()));
    }

    let now = ctx.now;
    let database = ctx.database();
    let Some(zset) = write_zset(database, &key, now)? else {
        return Ok(RespValue::Integer(0));
    };

    let mut removed = 0;
    for member in members {
        if zset.remove(&member).is_some() {
            removed += 1;
        }
    }
    if removed > 0 {
        database.mark_mutated(key.clone(), "zrem");
        database.collapse_if_empty(&key);
    }
    Ok(RespValue::Integer(removed))
}

pub fn zremrangebyrank(
    ctx: &mut CommandContext,
    args: &[Bytes],
) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let start = cursor.expect_int()?;
    let stop = cursor.expect_int()?;
    cursor.finish()?;

    let now = ctx.now;
    let database = ctx.database();
    let Some(zset) = write_zset(database, &key, now)? else {
        return Ok(RespValue::Integer(0));
    };

    let doomed = zset.range_by_rank(start, stop, false);
    for (member, _) in &doomed {
        zset.remove(member);
    }
    if !doomed.is_empty() {
        database.mark_mutated(key.clone(), "zremrangebyrank");
        database.collapse_if_empty(&key);
    }
    Ok(RespValue::Integer(doomed.len() as i64))
}

pub fn zremrangebyscore(
    ctx: &mut CommandContext,
    args: &[Bytes],
) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;
    let min = parse_score_bound(&mut cursor)?;
    let max = parse_score_bound(&mut cursor)?;
    cursor.finish()?;

    let now = ctx.now;
    let database = ctx.database();
    let Some(zset) = write_zset(database, &key, now)? else {
        return Ok(RespValue::Integer(0));
    };

    let doomed = zset.range_by_score(min, max, false, 0, None);
    for (member, _) in &doomed {
        zset.remove(member);
    }
    if !doomed.is_empty() {
        database.mark_mutated(key.clone(), "zremrangebyscore");
        database.collapse_if_empty(&key);
    }
    Ok(RespValue::Integer(doomed.len() as i64))
}

fn zpop(ctx: &mut CommandContext, args: &[Bytes], reverse: bool) -> Result<RespValue, CommandError> {
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
    let Some(zset) = write_zset(database, &key, now)? else {
        return Ok(RespValue::Array(Vec::new()));
    };

    let popped = zset.pop(count.unwrap_or(1), reverse);
    if !popped.is_empty() {
        database.mark_mutated(
            key.clone(),
            if reverse { "zpopmax" } else { "zpopmin" },
        );
        database.collapse_if_empty(&key);
    }
    Ok(scored_reply(popped, true))
}

pub fn zpopmin(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    zpop(ctx, args, false)
}

pub fn zpopmax(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    zpop(ctx, args, true)
}

pub fn zrandmember(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let key = cursor.expect_bytes()?;

    let mut count = None;
    let mut with_scores = false;
    if !cursor.done() {
        count = Some(cursor.expect_int()?);
        if !cursor.done() {
            cursor.expect_token("WITHSCORES")?;
            with_scores = true;
            cursor.finish()?;
        }
    }

    let now = ctx.now;
    let Some(zset) = read_zset(ctx.database(), &key, now)? else {
        return Ok(match count {
            Some(_) => RespValue::Array(Vec::new()),
            None => RespValue::NullBulkString,
        });
    };

    // Sampling reuses the set helper over the member list.
    let members: std::collections::HashSet<Bytes> = zset.members().cloned().collect();
    let sampled = crate::store::set::random_members(&members, count.unwrap_or(1));

    Ok(match count {
        None => match sampled.into_iter().next() {
            Some(member) => RespValue::BulkString(member),
            None => RespValue::NullBulkString,
        },
        Some(_) => {
            let scored = sampled
                .into_iter()
                .map(|member| {
                    let score = zset.score(&member).unwrap_or(0.0);
                    (member, score)
                })
                .collect();
            scored_reply(scored, with_scores)
        }
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Aggregate {
    Sum,
    Min,
    Max,
}

impl Aggregate {
    fn apply(self, a: f64, b: f64) -> f64 {
        match self {
            Aggregate::Sum => a + b,
            Aggregate::Min => a.min(b),
            Aggregate::Max => a.max(b),
        }
    }
}

struct CombineArguments {
    destination: Option<Bytes>,
    keys: Vec<Bytes>,
    weights: Vec<f64>,
    aggregate: Aggregate,
    with_scores: bool,
}

impl CombineArguments {
    /// `[dst] numkeys key... [WEIGHTS w...] [AGGREGATE SUM|MIN|MAX]
    /// [WITHSCORES]` — the store forms carry a destination and refuse
    /// WITHSCORES.
    fn parse(args: &[Bytes], with_destination: bool) -> Result<Self, CommandError> {
        let mut cursor = ArgCursor::new(args);
        let destination = if with_destination {
            Some(cursor.expect_bytes()?)
        } else {
            None
        };

        let numkeys = cursor.expect_int()?;
        if numkeys < 1 {
            return Err(CommandError::OutOfRange(
                "at least 1 input key is needed".to_string(),
            ));
        }
        let mut keys = Vec::with_capacity(numkeys as usize);
        for _ in 0..numkeys {
            keys.push(cursor.expect_bytes()?);
        }

        let mut weights = vec![1.0; keys.len()];
        let mut aggregate = Aggregate::Sum;
        let mut with_scores = false;

        while !cursor.done() {
            if cursor.match_token("WEIGHTS") {
                for weight in weights.iter_mut() {
                    let raw = cursor.next().ok_or(CommandError::Syntax)?;
                    *weight = parse_float(raw).map_err(|_| {
                        CommandError::OutOfRange(
                            "weight value is not a float".to_string(),
                        )
                    })?;
                }
            } else if cursor.match_token("AGGREGATE") {
                aggregate = match cursor.next_token()?.as_str() {
                    "SUM" => Aggregate::Sum,
                    "MIN" => Aggregate::Min,
                    "MAX" => Aggregate::Max,
                    _ => return Err(CommandError::Syntax),
                };
            } else if !with_destination && cursor.match_token("WITHSCORES") {
                with_scores = true;
            } else {
                return Err(CommandError::Syntax);
            }
        }

        Ok(CombineArguments {
            destination,
            keys,
            weights,
            aggregate,
            with_scores,
        })
    }
}

/// Members of a zset or set key viewed as (member, score) pairs; plain sets
/// score 1.0.
fn scored_snapshot(
    database: &mut Database,
    key: &[u8],
    now: u64,
) -> Result<Option<Vec<(Bytes, f64)>>, CommandError> {
    match database.read(key, now) {
        None => Ok(None),
        Some(Value::Zset(zset)) => Ok(Some(
            zset.iter().map(|(member, score)| (member.clone(), score)).collect(),
        )),
        Some(Value::Set(set)) => {
            Ok(Some(set.iter().map(|member| (member.clone(), 1.0)).collect()))
        }
        Some(_) => Err(CommandError::WrongType),
    }
}

fn combine_zsets(
    ctx: &mut CommandContext,
    parsed: &CombineArguments,
    union: bool,
) -> Result<SortedSet, CommandError> {
    let now = ctx.now;
    let database = ctx.database();

    let mut combined = SortedSet::new();
    let mut missing_any = false;

    for (index, key) in parsed.keys.iter().enumerate() {
        let weight = parsed.weights[index];
        let Some(members) = scored_snapshot(database, key, now)? else {
            missing_any = true;
            continue;
        };

        if union {
            for (member, score) in members {
                let weighted = score * weight;
                let next = match combined.score(&member) {
                    Some(existing) => parsed.aggregate.apply(existing, weighted),
                    None => weighted,
                };
                combined.insert(member, if next.is_nan() { 0.0 } else { next });
            }
        } else if index == 0 {
            for (member, score) in members {
                combined.insert(member, score * weight);
            }
        } else {
            let mut next = SortedSet::new();
            for (member, score) in members {
                if let Some(existing) = combined.score(&member) {
                    let aggregated = parsed.aggregate.apply(existing, score * weight);
                    next.insert(member, if aggregated.is_nan() { 0.0 } else { aggregated });
                }
            }
            combined = next;
        }
    }

    // Intersection with any missing key is empty.
    if !union && missing_any {
        return Ok(SortedSet::new());
    }
    Ok(combined)
}

fn combine_reply(combined: SortedSet, with_scores: bool) -> RespValue {
    let members: Vec<(Bytes, f64)> = combined
        .iter()
        .map(|(member, score)| (member.clone(), score))
        .collect();
    scored_reply(members, with_scores)
}

fn store_combined(
    ctx: &mut CommandContext,
    destination: Bytes,
    combined: SortedSet,
    event: &'static str,
) -> RespValue {
    let cardinality = combined.len();
    let now = ctx.now;
    let database = ctx.database();
    if cardinality == 0 {
        database.remove(&destination, now);
    } else {
        database.set_value(destination, Value::Zset(combined), event);
    }
    RespValue::Integer(cardinality as i64)
}

pub fn zunion(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let parsed = CombineArguments::parse(args, false)?;
    let combined = combine_zsets(ctx, &parsed, true)?;
    Ok(combine_reply(combined, parsed.with_scores))
}

pub fn zinter(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let parsed = CombineArguments::parse(args, false)?;
    let combined = combine_zsets(ctx, &parsed, false)?;
    Ok(combine_reply(combined, parsed.with_scores))
}

pub fn zunionstore(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let parsed = CombineArguments::parse(args, true)?;
    let combined = combine_zsets(ctx, &parsed, true)?;
    let destination = parsed.destination.expect("store form carries a destination");
    Ok(store_combined(ctx, destination, combined, "zunionstore"))
}

pub fn zinterstore(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let parsed = CombineArguments::parse(args, true)?;
    let combined = combine_zsets(ctx, &parsed, false)?;
    let destination = parsed.destination.expect("store form carries a destination");
    Ok(store_combined(ctx, destination, combined, "zinterstore"))
}

fn zdiff_combined(
    ctx: &mut CommandContext,
    keys: &[Bytes],
) -> Result<SortedSet, CommandError> {
    let now = ctx.now;
    let database = ctx.database();

    let mut combined = SortedSet::new();
    if let Some(members) = scored_snapshot(database, &keys[0], now)? {
        for (member, score) in members {
            combined.insert(member, score);
        }
    }
    for key in &keys[1..] {
        if let Some(members) = scored_snapshot(database, key, now)? {
            for (member, _) in members {
                combined.remove(&member);
            }
        }
    }
    Ok(combined)
}

pub fn zdiff(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let numkeys = cursor.expect_int()?;
    if numkeys < 1 {
        return Err(CommandError::OutOfRange(
            "at least 1 input key is needed".to_string(),
        ));
    }
    let mut keys = Vec::with_capacity(numkeys as usize);
    for _ in 0..numkeys {
        keys.push(cursor.expect_bytes()?);
    }
    let with_scores = if cursor.done() {
        false
    } else {
        cursor.expect_token("WITHSCORES")?;
        cursor.finish()?;
        true
    };

    let combined = zdiff_combined(ctx, &keys)?;
    Ok(combine_reply(combined, with_scores))
}

pub fn zdiffstore(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let destination = cursor.expect_bytes()?;
    let numkeys = cursor.expect_int()?;
    if numkeys < 1 {
        return Err(CommandError::OutOfRange(
            "at least 1 input key is needed".to_string(),
        ));
    }
    let mut keys = Vec::with_capacity(numkeys as usize);
    for _ in 0..numkeys {
        keys.push(cursor.expect_bytes()?);
    }
    cursor.finish()?;

    let combined = zdiff_combined(ctx, &keys)?;
    Ok(store_combined(ctx, destination, combined, "zdiffstore"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::TestContext;

    fn members(reply: &RespValue) -> Vec<String> {
        let RespValue::Array(elements) = reply else {
            panic!("expected array, got {:?}", reply);
        };
        elements
            .iter()
            .filter_map(|element| match element {
                RespValue::BulkString(member) => {
                    Some(String::from_utf8(member.to_vec()).unwrap())
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_zadd_and_ranges() {
        let mut test = TestContext::new();

        assert_eq!(test.run("ZADD z 1 a 2 b 3 c"), Ok(RespValue::Integer(3)));
        assert_eq!(
            members(&test.run("ZRANGEBYSCORE z 2 +inf").unwrap()),
            vec!["b", "c"]
        );
        assert_eq!(
            members(&test.run("ZRANGE z 0 -1").unwrap()),
            vec!["a", "b", "c"]
        );
        assert_eq!(
            members(&test.run("ZRANGE z 0 -1 REV").unwrap()),
            vec!["c", "b", "a"]
        );
    }

    #[test]
    fn test_zadd_flags() {
        let mut test = TestContext::new();
        test.run("ZADD z 5 m").unwrap();

        assert_eq!(test.run("ZADD z NX 9 m"), Ok(RespValue::Integer(0)));
        assert_eq!(test.run("ZSCORE z m"), Ok(RespValue::Double(5.0)));

        assert_eq!(test.run("ZADD z XX CH 9 m"), Ok(RespValue::Integer(1)));
        assert_eq!(test.run("ZSCORE z m"), Ok(RespValue::Double(9.0)));

        assert_eq!(test.run("ZADD z GT CH 4 m"), Ok(RespValue::Integer(0)));
        assert_eq!(test.run("ZADD z GT CH 12 m"), Ok(RespValue::Integer(1)));
        assert_eq!(test.run("ZADD z LT CH 3 m"), Ok(RespValue::Integer(1)));

        assert_eq!(test.run("ZADD z XX 1 fresh"), Ok(RespValue::Integer(0)));
        assert_eq!(test.run("ZSCORE z fresh"), Ok(RespValue::NullBulkString));

        assert!(test.run("ZADD z NX XX 1 m").is_err());
        assert!(test.run("ZADD z GT LT 1 m").is_err());
    }

    #[test]
    fn test_zadd_incr() {
        let mut test = TestContext::new();

        assert_eq!(test.run("ZADD z INCR 5 m"), Ok(RespValue::Double(5.0)));
        assert_eq!(test.run("ZADD z INCR 2.5 m"), Ok(RespValue::Double(7.5)));
        // INCR with NX against an existing member aborts with nil.
        assert_eq!(
            test.run("ZADD z NX INCR 1 m"),
            Ok(RespValue::NullBulkString)
        );
    }

    #[test]
    fn test_zrank() {
        let mut test = TestContext::new();
        test.run("ZADD z 1 a 2 b 3 c").unwrap();

        assert_eq!(test.run("ZRANK z a"), Ok(RespValue::Integer(0)));
        assert_eq!(test.run("ZREVRANK z a"), Ok(RespValue::Integer(2)));
        assert_eq!(test.run("ZRANK z missing"), Ok(RespValue::NullBulkString));
        assert_eq!(
            test.run("ZRANK z b WITHSCORE"),
            Ok(RespValue::Array(vec![
                RespValue::Integer(1),
                RespValue::Double(2.0)
            ]))
        );
    }

    #[test]
    fn test_zcount_zincrby() {
        let mut test = TestContext::new();
        test.run("ZADD z 1 a 2 b 3 c").unwrap();

        assert_eq!(test.run("ZCOUNT z -inf +inf"), Ok(RespValue::Integer(3)));
        assert_eq!(test.run("ZCOUNT z (1 3"), Ok(RespValue::Integer(2)));
        assert_eq!(test.run("ZINCRBY z 10 a"), Ok(RespValue::Double(11.0)));
        assert_eq!(test.run("ZRANK z a"), Ok(RespValue::Integer(2)));
    }

    #[test]
    fn test_lex_ranges() {
        let mut test = TestContext::new();
        test.run("ZADD z 0 a 0 b 0 c 0 d").unwrap();

        assert_eq!(
            members(&test.run("ZRANGEBYLEX z [b (d").unwrap()),
            vec!["b", "c"]
        );
        assert_eq!(
            members(&test.run("ZRANGEBYLEX z - +").unwrap()),
            vec!["a", "b", "c", "d"]
        );
        assert_eq!(test.run("ZLEXCOUNT z - +"), Ok(RespValue::Integer(4)));
        assert_eq!(
            members(&test.run("ZRANGE z + [c BYLEX REV").unwrap()),
            vec!["d", "c"]
        );
    }

    #[test]
    fn test_byscore_with_limit() {
        let mut test = TestContext::new();
        test.run("ZADD z 1 a 2 b 3 c 4 d").unwrap();

        assert_eq!(
            members(&test.run("ZRANGEBYSCORE z -inf +inf LIMIT 1 2").unwrap()),
            vec!["b", "c"]
        );
        assert_eq!(
            members(&test.run("ZREVRANGEBYSCORE z +inf -inf LIMIT 0 2").unwrap()),
            vec!["d", "c"]
        );
    }

    #[test]
    fn test_zrem_and_remrange() {
        let mut test = TestContext::new();
        test.run("ZADD z 1 a 2 b 3 c 4 d").unwrap();

        assert_eq!(test.run("ZREM z a missing"), Ok(RespValue::Integer(1)));
        assert_eq!(test.run("ZREMRANGEBYSCORE z 2 3"), Ok(RespValue::Integer(2)));
        assert_eq!(test.run("ZREMRANGEBYRANK z 0 -1"), Ok(RespValue::Integer(1)));
        assert_eq!(test.run("EXISTS z"), Ok(RespValue::Integer(0)));
    }

    #[test]
    fn test_zpop() {
        let mut test = TestContext::new();
        test.run("ZADD z 1 a 2 b 3 c").unwrap();

        assert_eq!(
            test.run("ZPOPMIN z"),
            Ok(RespValue::Array(vec![
                RespValue::bulk_from_string("a"),
                RespValue::Double(1.0),
            ]))
        );
        assert_eq!(
            test.run("ZPOPMAX z 2"),
            Ok(RespValue::Array(vec![
                RespValue::bulk_from_string("c"),
                RespValue::Double(3.0),
                RespValue::bulk_from_string("b"),
                RespValue::Double(2.0),
            ]))
        );
        assert_eq!(test.run("EXISTS z"), Ok(RespValue::Integer(0)));
    }

    #[test]
    fn test_union_and_inter_with_aggregation() {
        let mut test = TestContext::new();
        test.run("ZADD a 1 x 2 y").unwrap();
        test.run("ZADD b 10 y 20 z").unwrap();

        assert_eq!(
            test.run("ZUNION 2 a b WITHSCORES"),
            Ok(RespValue::Array(vec![
                RespValue::bulk_from_string("x"),
                RespValue::Double(1.0),
                RespValue::bulk_from_string("y"),
                RespValue::Double(12.0),
                RespValue::bulk_from_string("z"),
                RespValue::Double(20.0),
            ]))
        );

        assert_eq!(
            test.run("ZINTERSTORE dest 2 a b AGGREGATE MAX"),
            Ok(RespValue::Integer(1))
        );
        assert_eq!(test.run("ZSCORE dest y"), Ok(RespValue::Double(10.0)));

        assert_eq!(
            test.run("ZUNIONSTORE dest 2 a b WEIGHTS 2 1"),
            Ok(RespValue::Integer(3))
        );
        assert_eq!(test.run("ZSCORE dest y"), Ok(RespValue::Double(14.0)));
    }

    #[test]
    fn test_union_includes_plain_sets() {
        let mut test = TestContext::new();
        test.run("ZADD z 5 m").unwrap();
        test.run("SADD s m n").unwrap();

        assert_eq!(
            test.run("ZUNION 2 z s WITHSCORES"),
            Ok(RespValue::Array(vec![
                RespValue::bulk_from_string("n"),
                RespValue::Double(1.0),
                RespValue::bulk_from_string("m"),
                RespValue::Double(6.0),
            ]))
        );
    }

    #[test]
    fn test_combine_store_variants_journal_their_own_events() {
        let mut test = TestContext::new();
        test.run("ZADD a 1 x 2 y").unwrap();
        test.run("ZADD b 10 y 20 z").unwrap();

        let test_cases = vec![
            ("ZUNIONSTORE dest 2 a b", "zunionstore"),
            ("ZINTERSTORE dest 2 a b", "zinterstore"),
            ("ZDIFFSTORE dest 2 a b", "zdiffstore"),
        ];

        for (command, expected_event) in test_cases {
            test.run(command).unwrap();
            assert!(
                test.last_events()
                    .iter()
                    .any(|event| event.key == "dest" && event.event == expected_event),
                "{} should journal '{}', got {:?}",
                command,
                expected_event,
                test.last_events()
            );
        }
    }

    #[test]
    fn test_zdiff() {
        let mut test = TestContext::new();
        test.run("ZADD a 1 x 2 y 3 z").unwrap();
        test.run("ZADD b 0 y").unwrap();

        assert_eq!(
            members(&test.run("ZDIFF 2 a b").unwrap()),
            vec!["x", "z"]
        );
        assert_eq!(test.run("ZDIFFSTORE dest 2 a b"), Ok(RespValue::Integer(2)));
    }

    #[test]
    fn test_wrong_type() {
        let mut test = TestContext::new();
        test.run("SET s v").unwrap();
        assert_eq!(test.run("ZADD s 1 m"), Err(CommandError::WrongType));
        assert_eq!(test.run("ZRANGE s 0 -1"), Err(CommandError::WrongType));
    }
}
