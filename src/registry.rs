//! The command registry.
//!
//! Every command the server understands has a static [`CommandSpec`] record:
//! canonical name, arity rule, flag bits, ACL category bitmask, and a key
//! position rule. The executor drives its whole pre-dispatch pipeline
//! (arity, auth, ACL, transaction queueing, subscriber-mode gating) off this
//! table, so commands themselves only ever see bound arguments.

use std::collections::HashMap;
use std::sync::OnceLock;

use bytes::Bytes;

use crate::acl::AclCategory;

pub mod flags {
    pub const WRITE: u32 = 1 << 0;
    pub const READONLY: u32 = 1 << 1;
    pub const ADMIN: u32 = 1 << 2;
    pub const PUBSUB: u32 = 1 << 3;
    pub const NOSCRIPT: u32 = 1 << 4;
    pub const LOADING: u32 = 1 << 5;
    pub const STALE: u32 = 1 << 6;
    pub const FAST: u32 = 1 << 7;
    pub const MOVABLE_KEYS: u32 = 1 << 8;
    pub const BLOCKING: u32 = 1 << 9;
    /// Runnable before authentication.
    pub const NO_AUTH: u32 = 1 << 10;
    /// Not queued inside MULTI; takes effect immediately.
    pub const TX_CONTROL: u32 = 1 << 11;
    /// Permitted while a RESP2 session is in subscriber mode.
    pub const SUBSCRIBER_OK: u32 = 1 << 12;
}

/// Where a command's keys sit in the argument vector (`argv[0]` is the
/// command name).
#[derive(Clone, Copy)]
pub enum KeySpec {
    None,
    /// first..=last every `step` arguments; `last` of -1 means "to the end".
    Range {
        first: usize,
        last: i32,
        step: usize,
    },
    /// Commands whose key positions depend on other arguments.
    Movable(fn(&[Bytes]) -> Vec<usize>),
}

pub struct CommandSpec {
    pub name: &'static str,
    /// Redis arity convention, counting the command name itself; negative
    /// means "at least that many".
    pub arity: i32,
    pub flags: u32,
    pub categories: u32,
    pub key_spec: KeySpec,
}

impl CommandSpec {
    pub fn arity_matches(&self, argument_count: usize) -> bool {
        let argument_count = argument_count as i32;
        if self.arity >= 0 {
            argument_count == self.arity
        } else {
            argument_count >= -self.arity
        }
    }

    pub fn has_flag(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    pub fn is_write(&self) -> bool {
        self.has_flag(flags::WRITE)
    }

    /// Key positions for this invocation.
    pub fn key_positions(&self, args: &[Bytes]) -> Vec<usize> {
        match self.key_spec {
            KeySpec::None => Vec::new(),
            KeySpec::Range { first, last, step } => {
                let last = if last < 0 {
                    (args.len() as i32 + last) as usize
                } else {
                    last as usize
                };
                (first..=last.min(args.len().saturating_sub(1)))
                    .step_by(step)
                    .collect()
            }
            KeySpec::Movable(extract) => extract(args),
        }
    }

    pub fn keys<'a>(&self, args: &'a [Bytes]) -> Vec<&'a Bytes> {
        self.key_positions(args)
            .into_iter()
            .filter_map(|position| args.get(position))
            .collect()
    }
}

const READ: u32 = AclCategory::Read.bit();
const WRITE_CAT: u32 = AclCategory::Write.bit();
const KEYSPACE: u32 = AclCategory::Keyspace.bit();
const STRING: u32 = AclCategory::String.bit();
const LIST: u32 = AclCategory::List.bit();
const SET: u32 = AclCategory::Set.bit();
const ZSET: u32 = AclCategory::SortedSet.bit();
const HASH: u32 = AclCategory::Hash.bit();
const STREAM: u32 = AclCategory::Stream.bit();
const BITMAP: u32 = AclCategory::Bitmap.bit();
const PUBSUB_CAT: u32 = AclCategory::Pubsub.bit();
const ADMIN_CAT: u32 = AclCategory::Admin.bit();
const FAST_CAT: u32 = AclCategory::Fast.bit();
const SLOW: u32 = AclCategory::Slow.bit();
const BLOCKING_CAT: u32 = AclCategory::Blocking.bit();
const CONNECTION: u32 = AclCategory::Connection.bit();
const TRANSACTION: u32 = AclCategory::Transaction.bit();
const DANGEROUS: u32 = AclCategory::Dangerous.bit();

const FIRST_KEY: KeySpec = KeySpec::Range {
    first: 1,
    last: 1,
    step: 1,
};
const ALL_KEYS: KeySpec = KeySpec::Range {
    first: 1,
    last: -1,
    step: 1,
};
const TWO_KEYS: KeySpec = KeySpec::Range {
    first: 1,
    last: 2,
    step: 1,
};

/// `CMD dest numkeys key...`: destination plus the counted keys.
fn destination_then_counted_keys(args: &[Bytes]) -> Vec<usize> {
    let mut positions = vec![1];
    positions.extend(counted_keys_at(args, 2));
    positions
}

/// `CMD numkeys key...` with numkeys at position 1.
fn counted_keys(args: &[Bytes]) -> Vec<usize> {
    counted_keys_at(args, 1)
}

/// `CMD timeout numkeys key...` (BLMPOP).
fn counted_keys_after_timeout(args: &[Bytes]) -> Vec<usize> {
    counted_keys_at(args, 2)
}

fn counted_keys_at(args: &[Bytes], numkeys_position: usize) -> Vec<usize> {
    let count = args
        .get(numkeys_position)
        .and_then(|raw| std::str::from_utf8(raw).ok())
        .and_then(|text| text.parse::<usize>().ok())
        .unwrap_or(0);
    (numkeys_position + 1..)
        .take(count)
        .take_while(|&position| position < args.len())
        .collect()
}

/// XREAD/XREADGROUP: the first half of the arguments after STREAMS.
fn streams_keys(args: &[Bytes]) -> Vec<usize> {
    let Some(streams_at) = args
        .iter()
        .position(|arg| arg.eq_ignore_ascii_case(b"STREAMS"))
    else {
        return Vec::new();
    };
    let remaining = args.len() - streams_at - 1;
    let key_count = remaining / 2;
    (streams_at + 1..streams_at + 1 + key_count).collect()
}

/// BLPOP/BRPOP: every argument but the trailing timeout.
fn keys_before_timeout(args: &[Bytes]) -> Vec<usize> {
    if args.len() < 3 {
        return Vec::new();
    }
    (1..args.len() - 1).collect()
}

static COMMANDS: &[CommandSpec] = &[
    // Connection handling.
    spec("AUTH", -2, flags::NO_AUTH | flags::FAST | flags::NOSCRIPT, FAST_CAT | CONNECTION, KeySpec::None),
    spec("CLIENT", -2, flags::ADMIN | flags::NOSCRIPT | flags::SUBSCRIBER_OK, ADMIN_CAT | SLOW | DANGEROUS | CONNECTION, KeySpec::None),
    spec("COMMAND", -1, flags::LOADING | flags::STALE, SLOW | CONNECTION, KeySpec::None),
    spec("ECHO", 2, flags::FAST, FAST_CAT | CONNECTION, KeySpec::None),
    spec("HELLO", -1, flags::NO_AUTH | flags::FAST | flags::NOSCRIPT | flags::SUBSCRIBER_OK, FAST_CAT | CONNECTION, KeySpec::None),
    spec("PING", -1, flags::NO_AUTH | flags::FAST | flags::SUBSCRIBER_OK, FAST_CAT | CONNECTION, KeySpec::None),
    spec("QUIT", 1, flags::NO_AUTH | flags::FAST | flags::SUBSCRIBER_OK, FAST_CAT | CONNECTION, KeySpec::None),
    spec("RESET", 1, flags::NO_AUTH | flags::FAST | flags::NOSCRIPT | flags::TX_CONTROL | flags::SUBSCRIBER_OK, FAST_CAT | CONNECTION, KeySpec::None),
    spec("SELECT", 2, flags::FAST | flags::LOADING, FAST_CAT | CONNECTION, KeySpec::None),
    // Keyspace.
    spec("COPY", -3, flags::WRITE, WRITE_CAT | KEYSPACE | SLOW, TWO_KEYS),
    spec("DBSIZE", 1, flags::READONLY | flags::FAST, READ | KEYSPACE | FAST_CAT, KeySpec::None),
    spec("DEL", -2, flags::WRITE, WRITE_CAT | KEYSPACE | SLOW, ALL_KEYS),
    spec("DUMP", 2, flags::READONLY, READ | KEYSPACE | SLOW | DANGEROUS, FIRST_KEY),
    spec("EXISTS", -2, flags::READONLY | flags::FAST, READ | KEYSPACE | FAST_CAT, ALL_KEYS),
    spec("EXPIRE", -3, flags::WRITE | flags::FAST, WRITE_CAT | KEYSPACE | FAST_CAT, FIRST_KEY),
    spec("EXPIREAT", -3, flags::WRITE | flags::FAST, WRITE_CAT | KEYSPACE | FAST_CAT, FIRST_KEY),
    spec("EXPIRETIME", 2, flags::READONLY | flags::FAST, READ | KEYSPACE | FAST_CAT, FIRST_KEY),
    spec("FLUSHALL", -1, flags::WRITE, WRITE_CAT | KEYSPACE | SLOW | DANGEROUS, KeySpec::None),
    spec("FLUSHDB", -1, flags::WRITE, WRITE_CAT | KEYSPACE | SLOW | DANGEROUS, KeySpec::None),
    spec("KEYS", 2, flags::READONLY, READ | KEYSPACE | SLOW | DANGEROUS, KeySpec::None),
    spec("PERSIST", 2, flags::WRITE | flags::FAST, WRITE_CAT | KEYSPACE | FAST_CAT, FIRST_KEY),
    spec("PEXPIRE", -3, flags::WRITE | flags::FAST, WRITE_CAT | KEYSPACE | FAST_CAT, FIRST_KEY),
    spec("PEXPIREAT", -3, flags::WRITE | flags::FAST, WRITE_CAT | KEYSPACE | FAST_CAT, FIRST_KEY),
    spec("PEXPIRETIME", 2, flags::READONLY | flags::FAST, READ | KEYSPACE | FAST_CAT, FIRST_KEY),
    spec("PTTL", 2, flags::READONLY | flags::FAST, READ | KEYSPACE | FAST_CAT, FIRST_KEY),
    spec("RANDOMKEY", 1, flags::READONLY, READ | KEYSPACE | SLOW, KeySpec::None),
    spec("RENAME", 3, flags::WRITE, WRITE_CAT | KEYSPACE | SLOW, TWO_KEYS),
    spec("RENAMENX", 3, flags::WRITE | flags::FAST, WRITE_CAT | KEYSPACE | FAST_CAT, TWO_KEYS),
    spec("RESTORE", -4, flags::WRITE, WRITE_CAT | KEYSPACE | SLOW | DANGEROUS, FIRST_KEY),
    spec("SCAN", -2, flags::READONLY, READ | KEYSPACE | SLOW, KeySpec::None),
    spec("TOUCH", -2, flags::READONLY | flags::FAST, READ | KEYSPACE | FAST_CAT, ALL_KEYS),
    spec("TTL", 2, flags::READONLY | flags::FAST, READ | KEYSPACE | FAST_CAT, FIRST_KEY),
    spec("TYPE", 2, flags::READONLY | flags::FAST, READ | KEYSPACE | FAST_CAT, FIRST_KEY),
    spec("UNLINK", -2, flags::WRITE | flags::FAST, WRITE_CAT | KEYSPACE | FAST_CAT, ALL_KEYS),
    // Strings.
    spec("APPEND", 3, flags::WRITE | flags::FAST, WRITE_CAT | STRING | FAST_CAT, FIRST_KEY),
    spec("DECR", 2, flags::WRITE | flags::FAST, WRITE_CAT | STRING | FAST_CAT, FIRST_KEY),
    spec("DECRBY", 3, flags::WRITE | flags::FAST, WRITE_CAT | STRING | FAST_CAT, FIRST_KEY),
    spec("GET", 2, flags::READONLY | flags::FAST, READ | STRING | FAST_CAT, FIRST_KEY),
    spec("GETDEL", 2, flags::WRITE | flags::FAST, WRITE_CAT | STRING | FAST_CAT, FIRST_KEY),
    spec("GETEX", -2, flags::WRITE | flags::FAST, WRITE_CAT | STRING | FAST_CAT, FIRST_KEY),
    spec("GETRANGE", 4, flags::READONLY, READ | STRING | SLOW, FIRST_KEY),
    spec("GETSET", 3, flags::WRITE | flags::FAST, WRITE_CAT | STRING | FAST_CAT, FIRST_KEY),
    spec("INCR", 2, flags::WRITE | flags::FAST, WRITE_CAT | STRING | FAST_CAT, FIRST_KEY),
    spec("INCRBY", 3, flags::WRITE | flags::FAST, WRITE_CAT | STRING | FAST_CAT, FIRST_KEY),
    spec("INCRBYFLOAT", 3, flags::WRITE | flags::FAST, WRITE_CAT | STRING | FAST_CAT, FIRST_KEY),
    spec("MGET", -2, flags::READONLY | flags::FAST, READ | STRING | FAST_CAT, ALL_KEYS),
    spec("MSET", -3, flags::WRITE, WRITE_CAT | STRING | SLOW, KeySpec::Range { first: 1, last: -1, step: 2 }),
    spec("MSETNX", -3, flags::WRITE, WRITE_CAT | STRING | SLOW, KeySpec::Range { first: 1, last: -1, step: 2 }),
    spec("PSETEX", 4, flags::WRITE, WRITE_CAT | STRING | SLOW, FIRST_KEY),
    spec("SET", -3, flags::WRITE, WRITE_CAT | STRING | SLOW, FIRST_KEY),
    spec("SETEX", 4, flags::WRITE, WRITE_CAT | STRING | SLOW, FIRST_KEY),
    spec("SETNX", 3, flags::WRITE | flags::FAST, WRITE_CAT | STRING | FAST_CAT, FIRST_KEY),
    spec("SETRANGE", 4, flags::WRITE, WRITE_CAT | STRING | SLOW, FIRST_KEY),
    spec("STRLEN", 2, flags::READONLY | flags::FAST, READ | STRING | FAST_CAT, FIRST_KEY),
    // Bitmaps.
    spec("BITCOUNT", -2, flags::READONLY, READ | BITMAP | SLOW, FIRST_KEY),
    spec("BITOP", -4, flags::WRITE, WRITE_CAT | BITMAP | SLOW, KeySpec::Range { first: 2, last: -1, step: 1 }),
    spec("BITPOS", -3, flags::READONLY, READ | BITMAP | SLOW, FIRST_KEY),
    spec("GETBIT", 3, flags::READONLY | flags::FAST, READ | BITMAP | FAST_CAT, FIRST_KEY),
    spec("SETBIT", 4, flags::WRITE, WRITE_CAT | BITMAP | SLOW, FIRST_KEY),
    // Lists.
    spec("BLMOVE", 6, flags::WRITE | flags::BLOCKING | flags::NOSCRIPT, WRITE_CAT | LIST | SLOW | BLOCKING_CAT, TWO_KEYS),
    spec("BLMPOP", -5, flags::WRITE | flags::BLOCKING | flags::MOVABLE_KEYS | flags::NOSCRIPT, WRITE_CAT | LIST | SLOW | BLOCKING_CAT, KeySpec::Movable(counted_keys_after_timeout)),
    spec("BLPOP", -3, flags::WRITE | flags::BLOCKING | flags::NOSCRIPT, WRITE_CAT | LIST | SLOW | BLOCKING_CAT, KeySpec::Movable(keys_before_timeout)),
    spec("BRPOP", -3, flags::WRITE | flags::BLOCKING | flags::NOSCRIPT, WRITE_CAT | LIST | SLOW | BLOCKING_CAT, KeySpec::Movable(keys_before_timeout)),
    spec("BRPOPLPUSH", 4, flags::WRITE | flags::BLOCKING | flags::NOSCRIPT, WRITE_CAT | LIST | SLOW | BLOCKING_CAT, TWO_KEYS),
    spec("LINDEX", 3, flags::READONLY, READ | LIST | SLOW, FIRST_KEY),
    spec("LINSERT", 5, flags::WRITE, WRITE_CAT | LIST | SLOW, FIRST_KEY),
    spec("LLEN", 2, flags::READONLY | flags::FAST, READ | LIST | FAST_CAT, FIRST_KEY),
    spec("LMOVE", 5, flags::WRITE, WRITE_CAT | LIST | SLOW, TWO_KEYS),
    spec("LMPOP", -4, flags::WRITE | flags::MOVABLE_KEYS, WRITE_CAT | LIST | SLOW, KeySpec::Movable(counted_keys)),
    spec("LPOP", -2, flags::WRITE | flags::FAST, WRITE_CAT | LIST | FAST_CAT, FIRST_KEY),
    spec("LPOS", -3, flags::READONLY, READ | LIST | SLOW, FIRST_KEY),
    spec("LPUSH", -3, flags::WRITE | flags::FAST, WRITE_CAT | LIST | FAST_CAT, FIRST_KEY),
    spec("LPUSHX", -3, flags::WRITE | flags::FAST, WRITE_CAT | LIST | FAST_CAT, FIRST_KEY),
    spec("LRANGE", 4, flags::READONLY, READ | LIST | SLOW, FIRST_KEY),
    spec("LREM", 4, flags::WRITE, WRITE_CAT | LIST | SLOW, FIRST_KEY),
    spec("LSET", 4, flags::WRITE, WRITE_CAT | LIST | SLOW, FIRST_KEY),
    spec("LTRIM", 4, flags::WRITE, WRITE_CAT | LIST | SLOW, FIRST_KEY),
    spec("RPOP", -2, flags::WRITE | flags::FAST, WRITE_CAT | LIST | FAST_CAT, FIRST_KEY),
    spec("RPOPLPUSH", 3, flags::WRITE, WRITE_CAT | LIST | SLOW, TWO_KEYS),
    spec("RPUSH", -3, flags::WRITE | flags::FAST, WRITE_CAT | LIST | FAST_CAT, FIRST_KEY),
    spec("RPUSHX", -3, flags::WRITE | flags::FAST, WRITE_CAT | LIST | FAST_CAT, FIRST_KEY),
    // Hashes.
    spec("HDEL", -3, flags::WRITE | flags::FAST, WRITE_CAT | HASH | FAST_CAT, FIRST_KEY),
    spec("HEXISTS", 3, flags::READONLY | flags::FAST, READ | HASH | FAST_CAT, FIRST_KEY),
    spec("HGET", 3, flags::READONLY | flags::FAST, READ | HASH | FAST_CAT, FIRST_KEY),
    spec("HGETALL", 2, flags::READONLY, READ | HASH | SLOW, FIRST_KEY),
    spec("HINCRBY", 4, flags::WRITE | flags::FAST, WRITE_CAT | HASH | FAST_CAT, FIRST_KEY),
    spec("HINCRBYFLOAT", 4, flags::WRITE | flags::FAST, WRITE_CAT | HASH | FAST_CAT, FIRST_KEY),
    spec("HKEYS", 2, flags::READONLY, READ | HASH | SLOW, FIRST_KEY),
    spec("HLEN", 2, flags::READONLY | flags::FAST, READ | HASH | FAST_CAT, FIRST_KEY),
    spec("HMGET", -3, flags::READONLY | flags::FAST, READ | HASH | FAST_CAT, FIRST_KEY),
    spec("HMSET", -4, flags::WRITE | flags::FAST, WRITE_CAT | HASH | FAST_CAT, FIRST_KEY),
    spec("HRANDFIELD", -2, flags::READONLY, READ | HASH | SLOW, FIRST_KEY),
    spec("HSCAN", -3, flags::READONLY, READ | HASH | SLOW, FIRST_KEY),
    spec("HSET", -4, flags::WRITE | flags::FAST, WRITE_CAT | HASH | FAST_CAT, FIRST_KEY),
    spec("HSETNX", 4, flags::WRITE | flags::FAST, WRITE_CAT | HASH | FAST_CAT, FIRST_KEY),
    spec("HSTRLEN", 3, flags::READONLY | flags::FAST, READ | HASH | FAST_CAT, FIRST_KEY),
    spec("HVALS", 2, flags::READONLY, READ | HASH | SLOW, FIRST_KEY),
    // Sets.
    spec("SADD", -3, flags::WRITE | flags::FAST, WRITE_CAT | SET | FAST_CAT, FIRST_KEY),
    spec("SCARD", 2, flags::READONLY | flags::FAST, READ | SET | FAST_CAT, FIRST_KEY),
    spec("SDIFF", -2, flags::READONLY, READ | SET | SLOW, ALL_KEYS),
    spec("SDIFFSTORE", -3, flags::WRITE, WRITE_CAT | SET | SLOW, ALL_KEYS),
    spec("SINTER", -2, flags::READONLY, READ | SET | SLOW, ALL_KEYS),
    spec("SINTERCARD", -3, flags::READONLY | flags::MOVABLE_KEYS, READ | SET | SLOW, KeySpec::Movable(counted_keys)),
    spec("SINTERSTORE", -3, flags::WRITE, WRITE_CAT | SET | SLOW, ALL_KEYS),
    spec("SISMEMBER", 3, flags::READONLY | flags::FAST, READ | SET | FAST_CAT, FIRST_KEY),
    spec("SMEMBERS", 2, flags::READONLY, READ | SET | SLOW, FIRST_KEY),
    spec("SMISMEMBER", -3, flags::READONLY | flags::FAST, READ | SET | FAST_CAT, FIRST_KEY),
    spec("SMOVE", 4, flags::WRITE | flags::FAST, WRITE_CAT | SET | FAST_CAT, TWO_KEYS),
    spec("SPOP", -2, flags::WRITE | flags::FAST, WRITE_CAT | SET | FAST_CAT, FIRST_KEY),
    spec("SRANDMEMBER", -2, flags::READONLY, READ | SET | SLOW, FIRST_KEY),
    spec("SREM", -3, flags::WRITE | flags::FAST, WRITE_CAT | SET | FAST_CAT, FIRST_KEY),
    spec("SSCAN", -3, flags::READONLY, READ | SET | SLOW, FIRST_KEY),
    spec("SUNION", -2, flags::READONLY, READ | SET | SLOW, ALL_KEYS),
    spec("SUNIONSTORE", -3, flags::WRITE, WRITE_CAT | SET | SLOW, ALL_KEYS),
    // Sorted sets.
    spec("ZADD", -4, flags::WRITE | flags::FAST, WRITE_CAT | ZSET | FAST_CAT, FIRST_KEY),
    spec("ZCARD", 2, flags::READONLY | flags::FAST, READ | ZSET | FAST_CAT, FIRST_KEY),
    spec("ZCOUNT", 4, flags::READONLY | flags::FAST, READ | ZSET | FAST_CAT, FIRST_KEY),
    spec("ZDIFF", -3, flags::READONLY | flags::MOVABLE_KEYS, READ | ZSET | SLOW, KeySpec::Movable(counted_keys)),
    spec("ZDIFFSTORE", -4, flags::WRITE | flags::MOVABLE_KEYS, WRITE_CAT | ZSET | SLOW, KeySpec::Movable(destination_then_counted_keys)),
    spec("ZINCRBY", 4, flags::WRITE | flags::FAST, WRITE_CAT | ZSET | FAST_CAT, FIRST_KEY),
    spec("ZINTER", -3, flags::READONLY | flags::MOVABLE_KEYS, READ | ZSET | SLOW, KeySpec::Movable(counted_keys)),
    spec("ZINTERSTORE", -4, flags::WRITE | flags::MOVABLE_KEYS, WRITE_CAT | ZSET | SLOW, KeySpec::Movable(destination_then_counted_keys)),
    spec("ZLEXCOUNT", 4, flags::READONLY | flags::FAST, READ | ZSET | FAST_CAT, FIRST_KEY),
    spec("ZMSCORE", -3, flags::READONLY | flags::FAST, READ | ZSET | FAST_CAT, FIRST_KEY),
    spec("ZPOPMAX", -2, flags::WRITE | flags::FAST, WRITE_CAT | ZSET | FAST_CAT, FIRST_KEY),
    spec("ZPOPMIN", -2, flags::WRITE | flags::FAST, WRITE_CAT | ZSET | FAST_CAT, FIRST_KEY),
    spec("ZRANDMEMBER", -2, flags::READONLY, READ | ZSET | SLOW, FIRST_KEY),
    spec("ZRANGE", -4, flags::READONLY, READ | ZSET | SLOW, FIRST_KEY),
    spec("ZRANGEBYLEX", -4, flags::READONLY, READ | ZSET | SLOW, FIRST_KEY),
    spec("ZRANGEBYSCORE", -4, flags::READONLY, READ | ZSET | SLOW, FIRST_KEY),
    spec("ZRANK", -3, flags::READONLY | flags::FAST, READ | ZSET | FAST_CAT, FIRST_KEY),
    spec("ZREM", -3, flags::WRITE | flags::FAST, WRITE_CAT | ZSET | FAST_CAT, FIRST_KEY),
    spec("ZREMRANGEBYRANK", 4, flags::WRITE, WRITE_CAT | ZSET | SLOW, FIRST_KEY),
    spec("ZREMRANGEBYSCORE", 4, flags::WRITE, WRITE_CAT | ZSET | SLOW, FIRST_KEY),
    spec("ZREVRANGE", -4, flags::READONLY, READ | ZSET | SLOW, FIRST_KEY),
    spec("ZREVRANGEBYLEX", -4, flags::READONLY, READ | ZSET | SLOW, FIRST_KEY),
    spec("ZREVRANGEBYSCORE", -4, flags::READONLY, READ | ZSET | SLOW, FIRST_KEY),
    spec("ZREVRANK", -3, flags::READONLY | flags::FAST, READ | ZSET | FAST_CAT, FIRST_KEY),
    spec("ZSCORE", 3, flags::READONLY | flags::FAST, READ | ZSET | FAST_CAT, FIRST_KEY),
    spec("ZUNION", -3, flags::READONLY | flags::MOVABLE_KEYS, READ | ZSET | SLOW, KeySpec::Movable(counted_keys)),
    spec("ZUNIONSTORE", -4, flags::WRITE | flags::MOVABLE_KEYS, WRITE_CAT | ZSET | SLOW, KeySpec::Movable(destination_then_counted_keys)),
    // Streams.
    spec("XACK", -4, flags::WRITE | flags::FAST, WRITE_CAT | STREAM | FAST_CAT, FIRST_KEY),
    spec("XADD", -5, flags::WRITE | flags::FAST, WRITE_CAT | STREAM | FAST_CAT, FIRST_KEY),
    spec("XCLAIM", -6, flags::WRITE | flags::FAST, WRITE_CAT | STREAM | FAST_CAT, FIRST_KEY),
    spec("XDEL", -3, flags::WRITE | flags::FAST, WRITE_CAT | STREAM | FAST_CAT, FIRST_KEY),
    spec("XGROUP", -2, flags::WRITE, WRITE_CAT | STREAM | SLOW, KeySpec::Range { first: 2, last: 2, step: 1 }),
    spec("XLEN", 2, flags::READONLY | flags::FAST, READ | STREAM | FAST_CAT, FIRST_KEY),
    spec("XPENDING", -3, flags::READONLY, READ | STREAM | SLOW, FIRST_KEY),
    spec("XRANGE", -4, flags::READONLY, READ | STREAM | SLOW, FIRST_KEY),
    spec("XREAD", -4, flags::READONLY | flags::BLOCKING | flags::MOVABLE_KEYS | flags::NOSCRIPT, READ | STREAM | SLOW | BLOCKING_CAT, KeySpec::Movable(streams_keys)),
    spec("XREADGROUP", -7, flags::WRITE | flags::BLOCKING | flags::MOVABLE_KEYS | flags::NOSCRIPT, WRITE_CAT | STREAM | SLOW | BLOCKING_CAT, KeySpec::Movable(streams_keys)),
    spec("XREVRANGE", -4, flags::READONLY, READ | STREAM | SLOW, FIRST_KEY),
    // Pub/Sub.
    spec("PSUBSCRIBE", -2, flags::PUBSUB | flags::NOSCRIPT | flags::SUBSCRIBER_OK, PUBSUB_CAT | SLOW, KeySpec::None),
    spec("PUBLISH", 3, flags::PUBSUB | flags::FAST, PUBSUB_CAT | FAST_CAT, KeySpec::None),
    spec("PUBSUB", -2, flags::PUBSUB | flags::SUBSCRIBER_OK, PUBSUB_CAT | SLOW, KeySpec::None),
    spec("PUNSUBSCRIBE", -1, flags::PUBSUB | flags::NOSCRIPT | flags::SUBSCRIBER_OK, PUBSUB_CAT | SLOW, KeySpec::None),
    spec("SUBSCRIBE", -2, flags::PUBSUB | flags::NOSCRIPT | flags::SUBSCRIBER_OK, PUBSUB_CAT | SLOW, KeySpec::None),
    spec("UNSUBSCRIBE", -1, flags::PUBSUB | flags::NOSCRIPT | flags::SUBSCRIBER_OK, PUBSUB_CAT | SLOW, KeySpec::None),
    // Transactions.
    spec("DISCARD", 1, flags::FAST | flags::NOSCRIPT | flags::TX_CONTROL, FAST_CAT | TRANSACTION, KeySpec::None),
    spec("EXEC", 1, flags::NOSCRIPT | flags::TX_CONTROL, SLOW | TRANSACTION, KeySpec::None),
    spec("MULTI", 1, flags::FAST | flags::NOSCRIPT | flags::TX_CONTROL, FAST_CAT | TRANSACTION, KeySpec::None),
    spec("UNWATCH", 1, flags::FAST | flags::NOSCRIPT | flags::TX_CONTROL, FAST_CAT | TRANSACTION, KeySpec::None),
    spec("WATCH", -2, flags::FAST | flags::NOSCRIPT | flags::TX_CONTROL, FAST_CAT | TRANSACTION, ALL_KEYS),
    // Server administration.
    spec("ACL", -2, flags::ADMIN | flags::NOSCRIPT, ADMIN_CAT | SLOW | DANGEROUS, KeySpec::None),
    spec("CONFIG", -2, flags::ADMIN | flags::NOSCRIPT, ADMIN_CAT | SLOW | DANGEROUS, KeySpec::None),
    spec("INFO", -1, flags::LOADING | flags::STALE, SLOW | DANGEROUS, KeySpec::None),
    spec("SHUTDOWN", -1, flags::ADMIN | flags::NOSCRIPT | flags::LOADING | flags::STALE, ADMIN_CAT | SLOW | DANGEROUS, KeySpec::None),
    spec("TIME", 1, flags::FAST | flags::LOADING | flags::STALE, FAST_CAT, KeySpec::None),
    spec("WAIT", 3, flags::BLOCKING | flags::NOSCRIPT, SLOW | BLOCKING_CAT | CONNECTION, KeySpec::None),
];

const fn spec(
    name: &'static str,
    arity: i32,
    flags: u32,
    categories: u32,
    key_spec: KeySpec,
) -> CommandSpec {
    CommandSpec {
        name,
        arity,
        flags,
        categories,
        key_spec,
    }
}

fn registry() -> &'static HashMap<&'static str, &'static CommandSpec> {
    static REGISTRY: OnceLock<HashMap<&'static str, &'static CommandSpec>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        COMMANDS
            .iter()
            .map(|command| (command.name, command))
            .collect()
    })
}

/// Case-insensitive command lookup.
pub fn lookup(name: &str) -> Option<&'static CommandSpec> {
    registry().get(name.to_uppercase().as_str()).copied()
}

pub fn all_commands() -> &'static [CommandSpec] {
    COMMANDS
}

/// Commands stamped with the given ACL category, for ACL CAT.
pub fn commands_in_category(category: u32) -> Vec<&'static str> {
    let mut names: Vec<&'static str> = COMMANDS
        .iter()
        .filter(|command| command.categories & category != 0)
        .map(|command| command.name)
        .collect();
    names.sort();
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(parts: &[&str]) -> Vec<Bytes> {
        parts
            .iter()
            .map(|part| Bytes::copy_from_slice(part.as_bytes()))
            .collect()
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert!(lookup("get").is_some());
        assert!(lookup("GET").is_some());
        assert!(lookup("GeT").is_some());
        assert!(lookup("NOSUCH").is_none());
    }

    #[test]
    fn test_arity_rules() {
        let get = lookup("GET").unwrap();
        assert!(get.arity_matches(2));
        assert!(!get.arity_matches(1));
        assert!(!get.arity_matches(3));

        let set = lookup("SET").unwrap();
        assert!(set.arity_matches(3));
        assert!(set.arity_matches(5));
        assert!(!set.arity_matches(2));
    }

    #[test]
    fn test_range_key_positions() {
        let del = lookup("DEL").unwrap();
        assert_eq!(del.key_positions(&args(&["DEL", "a", "b", "c"])), vec![1, 2, 3]);

        let mset = lookup("MSET").unwrap();
        assert_eq!(
            mset.key_positions(&args(&["MSET", "k1", "v1", "k2", "v2"])),
            vec![1, 3]
        );

        let rename = lookup("RENAME").unwrap();
        assert_eq!(rename.key_positions(&args(&["RENAME", "a", "b"])), vec![1, 2]);
    }

    #[test]
    fn test_counted_key_positions() {
        let zunionstore = lookup("ZUNIONSTORE").unwrap();
        assert_eq!(
            zunionstore.key_positions(&args(&["ZUNIONSTORE", "dst", "2", "a", "b", "WEIGHTS", "1", "2"])),
            vec![1, 3, 4]
        );

        let lmpop = lookup("LMPOP").unwrap();
        assert_eq!(
            lmpop.key_positions(&args(&["LMPOP", "2", "a", "b", "LEFT"])),
            vec![2, 3]
        );

        let blmpop = lookup("BLMPOP").unwrap();
        assert_eq!(
            blmpop.key_positions(&args(&["BLMPOP", "0", "2", "a", "b", "LEFT"])),
            vec![3, 4]
        );
    }

    #[test]
    fn test_streams_key_positions() {
        let xread = lookup("XREAD").unwrap();
        assert_eq!(
            xread.key_positions(&args(&["XREAD", "COUNT", "5", "STREAMS", "s1", "s2", "0", "0"])),
            vec![4, 5]
        );
        assert_eq!(xread.key_positions(&args(&["XREAD", "COUNT", "5"])), Vec::<usize>::new());
    }

    #[test]
    fn test_blpop_key_positions() {
        let blpop = lookup("BLPOP").unwrap();
        assert_eq!(
            blpop.key_positions(&args(&["BLPOP", "a", "b", "0"])),
            vec![1, 2]
        );
    }

    #[test]
    fn test_every_command_name_is_uppercase_and_unique() {
        let mut seen = std::collections::HashSet::new();
        for command in all_commands() {
            assert_eq!(command.name, command.name.to_uppercase());
            assert!(seen.insert(command.name), "duplicate {}", command.name);
        }
    }
}
