//! Server administration: CONFIG, ACL, INFO, COMMAND, TIME, WAIT, SHUTDOWN.

use bytes::Bytes;

use crate::acl::AclCategory;
use crate::commands::arguments::ArgCursor;
use crate::commands::command_error::CommandError;
use crate::commands::context::{CommandContext, PostAction};
use crate::registry;
use crate::resp::RespValue;

pub fn config(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let subcommand = cursor.next_token()?;

    match subcommand.as_str() {
        "GET" => {
            let patterns = cursor.rest();
            if patterns.is_empty() {
                return Err(CommandError::WrongArgCount("CONFIG|GET".to_string()));
            }

            let mut pairs = Vec::new();
            for pattern in patterns {
                let pattern = String::from_utf8(pattern.to_vec())
                    .map_err(|_| CommandError::Syntax)?;
                for (name, value) in ctx.server.config.get_matching(&pattern) {
                    if !pairs.iter().any(|(existing, _): &(String, String)| *existing == name) {
                        pairs.push((name, value));
                    }
                }
            }

            Ok(if ctx.session.protocol_version >= 3 {
                RespValue::Map(
                    pairs
                        .into_iter()
                        .map(|(name, value)| {
                            (
                                RespValue::bulk_from_string(name),
                                RespValue::bulk_from_string(value),
                            )
                        })
                        .collect(),
                )
            } else {
                RespValue::Array(
                    pairs
                        .into_iter()
                        .flat_map(|(name, value)| {
                            [
                                RespValue::bulk_from_string(name),
                                RespValue::bulk_from_string(value),
                            ]
                        })
                        .collect(),
                )
            })
        }
        "SET" => {
            let flat = cursor.rest();
            if flat.is_empty() || flat.len() % 2 != 0 {
                return Err(CommandError::WrongArgCount("CONFIG|SET".to_string()));
            }
            for pair in flat.chunks(2) {
                let name = String::from_utf8(pair[0].to_vec())
                    .map_err(|_| CommandError::Syntax)?;
                let value = String::from_utf8(pair[1].to_vec())
                    .map_err(|_| CommandError::Syntax)?;
                ctx.server.config.set(&name, &value)?;
            }
            Ok(RespValue::ok())
        }
        "RESETSTAT" => {
            cursor.finish()?;
            ctx.server.stats = Default::default();
            Ok(RespValue::ok())
        }
        other => Err(CommandError::Raw(format!(
            "ERR Unknown CONFIG subcommand or wrong number of arguments for '{}'",
            other.to_lowercase()
        ))),
    }
}

pub fn acl(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let subcommand = cursor.next_token()?;

    match subcommand.as_str() {
        "WHOAMI" => {
            cursor.finish()?;
            Ok(RespValue::bulk_from_string(ctx.session.user.clone()))
        }
        "LIST" => {
            cursor.finish()?;
            let mut lines = Vec::new();
            for name in ctx.server.acl.names() {
                let user = ctx.server.acl.user(&name).expect("listed user exists");
                lines.push(RespValue::bulk_from_string(format!(
                    "user {} {}",
                    name,
                    user.describe().join(" ")
                )));
            }
            Ok(RespValue::Array(lines))
        }
        "USERS" => {
            cursor.finish()?;
            Ok(RespValue::Array(
                ctx.server
                    .acl
                    .names()
                    .into_iter()
                    .map(RespValue::bulk_from_string)
                    .collect(),
            ))
        }
        "CAT" => {
            if cursor.done() {
                return Ok(RespValue::Array(
                    AclCategory::ALL
                        .iter()
                        .map(|category| RespValue::bulk_from_string(category.name()))
                        .collect(),
                ));
            }
            let name = cursor.expect_string()?;
            cursor.finish()?;
            let category = AclCategory::parse(&name).ok_or_else(|| {
                CommandError::Raw(format!("ERR Unknown ACL cat '{}'", name))
            })?;
            Ok(RespValue::Array(
                registry::commands_in_category(category.bit())
                    .into_iter()
                    .map(|command| RespValue::bulk_from_string(command.to_lowercase()))
                    .collect(),
            ))
        }
        "GETUSER" => {
            let name = cursor.expect_string()?;
            cursor.finish()?;
            let Some(user) = ctx.server.acl.user(&name) else {
                return Ok(RespValue::NullArray);
            };
            Ok(RespValue::Array(
                user.describe()
                    .into_iter()
                    .map(RespValue::bulk_from_string)
                    .collect(),
            ))
        }
        "SETUSER" => {
            let name = cursor.expect_string()?;
            let rules = cursor.rest();

            let user = ctx.server.acl.user_mut(&name);
            for rule in rules {
                let rule = String::from_utf8(rule.to_vec())
                    .map_err(|_| CommandError::Syntax)?;
                user.apply_rule(&rule)
                    .map_err(|error| CommandError::Raw(format!("ERR {}", error)))?;
            }
            Ok(RespValue::ok())
        }
        "DELUSER" => {
            let names = cursor.rest();
            if names.is_empty() {
                return Err(CommandError::WrongArgCount("ACL|DELUSER".to_string()));
            }
            let mut deleted = 0;
            for name in names {
                let name =
                    String::from_utf8(name.to_vec()).map_err(|_| CommandError::Syntax)?;
                let removed = ctx
                    .server
                    .acl
                    .delete(&name)
                    .map_err(|error| CommandError::Raw(format!("ERR {}", error)))?;
                if removed {
                    deleted += 1;
                }
            }
            Ok(RespValue::Integer(deleted))
        }
        other => Err(CommandError::Raw(format!(
            "ERR Unknown ACL subcommand or wrong number of arguments for '{}'",
            other.to_lowercase()
        ))),
    }
}

pub fn info(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let requested: Vec<String> = cursor
        .rest()
        .into_iter()
        .filter_map(|section| String::from_utf8(section.to_vec()).ok())
        .map(|section| section.to_lowercase())
        .collect();

    let wants = |section: &str| {
        requested.is_empty()
            || requested.iter().any(|name| name == section || name == "all")
    };

    let mut body = String::new();

    if wants("server") {
        let uptime_seconds = ctx.now.saturating_sub(ctx.server.start_time_ms) / 1_000;
        body.push_str("# Server\r\n");
        body.push_str("server_name:ferrodis\r\n");
        body.push_str(&format!("version:{}\r\n", env!("CARGO_PKG_VERSION")));
        body.push_str(&format!("run_id:{}\r\n", ctx.server.run_id));
        body.push_str(&format!(
            "tcp_port:{}\r\n",
            ctx.server.config.get("port").unwrap_or("6379")
        ));
        body.push_str(&format!("uptime_in_seconds:{}\r\n", uptime_seconds));
        body.push_str("\r\n");
    }

    if wants("clients") {
        body.push_str("# Clients\r\n");
        body.push_str(&format!(
            "connected_clients:{}\r\n",
            ctx.server.clients.len()
        ));
        body.push_str(&format!(
            "blocked_clients:{}\r\n",
            ctx.store.blocked_client_count()
        ));
        body.push_str("\r\n");
    }

    if wants("stats") {
        body.push_str("# Stats\r\n");
        body.push_str(&format!(
            "total_connections_received:{}\r\n",
            ctx.server.stats.connections_received
        ));
        body.push_str(&format!(
            "total_commands_processed:{}\r\n",
            ctx.server.stats.commands_processed
        ));
        body.push_str(&format!(
            "expired_keys:{}\r\n",
            ctx.server.stats.expired_keys
        ));
        body.push_str(&format!(
            "keyspace_hits:{}\r\n",
            ctx.server.stats.keyspace_hits
        ));
        body.push_str(&format!(
            "keyspace_misses:{}\r\n",
            ctx.server.stats.keyspace_misses
        ));
        body.push_str("\r\n");
    }

    if wants("replication") {
        body.push_str("# Replication\r\n");
        body.push_str("role:master\r\n");
        body.push_str("connected_slaves:0\r\n");
        body.push_str("\r\n");
    }

    if wants("keyspace") {
        body.push_str("# Keyspace\r\n");
        for index in 0..ctx.store.database_count() {
            let keys = ctx.store.database(index).len(ctx.now);
            if keys > 0 {
                let expires = ctx.store.database(index).keys_with_expiry().count();
                body.push_str(&format!(
                    "db{}:keys={},expires={}\r\n",
                    index, keys, expires
                ));
            }
        }
        body.push_str("\r\n");
    }

    Ok(RespValue::bulk_from_string(body))
}

pub fn command(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);

    if cursor.done() {
        let entries = registry::all_commands()
            .iter()
            .map(command_entry)
            .collect();
        return Ok(RespValue::Array(entries));
    }

    match cursor.next_token()?.as_str() {
        "COUNT" => {
            cursor.finish()?;
            Ok(RespValue::Integer(registry::all_commands().len() as i64))
        }
        "INFO" => {
            let names = cursor.rest();
            let entries = names
                .iter()
                .map(|name| {
                    let name = String::from_utf8_lossy(name);
                    match registry::lookup(&name) {
                        Some(spec) => command_entry(spec),
                        None => RespValue::NullArray,
                    }
                })
                .collect();
            Ok(RespValue::Array(entries))
        }
        "DOCS" => {
            // Minimal form: clients only need the reply to be well formed.
            cursor.rest();
            Ok(if ctx.session.protocol_version >= 3 {
                RespValue::Map(Vec::new())
            } else {
                RespValue::Array(Vec::new())
            })
        }
        _ => Err(CommandError::Syntax),
    }
}

fn command_entry(spec: &'static registry::CommandSpec) -> RespValue {
    let mut flags = Vec::new();
    if spec.has_flag(registry::flags::WRITE) {
        flags.push("write");
    }
    if spec.has_flag(registry::flags::READONLY) {
        flags.push("readonly");
    }
    if spec.has_flag(registry::flags::ADMIN) {
        flags.push("admin");
    }
    if spec.has_flag(registry::flags::PUBSUB) {
        flags.push("pubsub");
    }
    if spec.has_flag(registry::flags::NOSCRIPT) {
        flags.push("noscript");
    }
    if spec.has_flag(registry::flags::LOADING) {
        flags.push("loading");
    }
    if spec.has_flag(registry::flags::STALE) {
        flags.push("stale");
    }
    if spec.has_flag(registry::flags::FAST) {
        flags.push("fast");
    }
    if spec.has_flag(registry::flags::MOVABLE_KEYS) {
        flags.push("movablekeys");
    }
    if spec.has_flag(registry::flags::BLOCKING) {
        flags.push("blocking");
    }

    let (first_key, last_key, key_step) = match spec.key_spec {
        registry::KeySpec::None => (0, 0, 0),
        registry::KeySpec::Range { first, last, step } => (first as i64, last as i64, step as i64),
        registry::KeySpec::Movable(_) => (1, -1, 1),
    };

    RespValue::Array(vec![
        RespValue::bulk_from_string(spec.name.to_lowercase()),
        RespValue::Integer(spec.arity as i64),
        RespValue::Array(
            flags
                .into_iter()
                .map(|flag| RespValue::SimpleString(flag.to_string()))
                .collect(),
        ),
        RespValue::Integer(first_key),
        RespValue::Integer(last_key),
        RespValue::Integer(key_step),
    ])
}

pub fn time(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    ArgCursor::new(args).finish()?;
    let seconds = ctx.now / 1_000;
    let microseconds = (ctx.now % 1_000) * 1_000;
    Ok(RespValue::Array(vec![
        RespValue::bulk_from_string(seconds.to_string()),
        RespValue::bulk_from_string(microseconds.to_string()),
    ]))
}

/// WAIT always reports zero replicas acknowledged: replication is out of
/// scope, so there is never anything to wait for.
pub fn wait(_ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let _numreplicas = cursor.expect_int()?;
    let _timeout = cursor.expect_int()?;
    cursor.finish()?;
    Ok(RespValue::Integer(0))
}

pub fn shutdown(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    if !cursor.done() {
        if !(cursor.match_token("NOSAVE") || cursor.match_token("SAVE")) {
            return Err(CommandError::Syntax);
        }
        cursor.finish()?;
    }

    // A successful shutdown never replies; the connection just closes.
    ctx.post.push(PostAction::Shutdown);
    ctx.session.should_close = true;
    ctx.suppress_reply = true;
    Ok(RespValue::ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::TestContext;

    #[test]
    fn test_config_get_set() {
        let mut test = TestContext::new();

        assert_eq!(
            test.run("CONFIG GET maxmemory"),
            Ok(RespValue::Array(vec![
                RespValue::bulk_from_string("maxmemory"),
                RespValue::bulk_from_string("0"),
            ]))
        );

        assert_eq!(test.run("CONFIG SET maxmemory 100mb"), Ok(RespValue::ok()));
        assert_eq!(
            test.run("CONFIG GET maxmemory"),
            Ok(RespValue::Array(vec![
                RespValue::bulk_from_string("maxmemory"),
                RespValue::bulk_from_string("100mb"),
            ]))
        );

        assert!(test.run("CONFIG SET nonsense 1").is_err());
        assert!(test.run("CONFIG SET timeout abc").is_err());
    }

    #[test]
    fn test_config_get_glob() {
        let mut test = TestContext::new();
        let reply = test.run("CONFIG GET maxmemory*").unwrap();
        let RespValue::Array(flat) = reply else {
            panic!("expected array");
        };
        assert_eq!(flat.len(), 4);
    }

    #[test]
    fn test_acl_whoami_and_users() {
        let mut test = TestContext::new();

        assert_eq!(
            test.run("ACL WHOAMI"),
            Ok(RespValue::bulk_from_string("default"))
        );
        assert_eq!(
            test.run("ACL USERS"),
            Ok(RespValue::Array(vec![RespValue::bulk_from_string("default")]))
        );

        test.run("ACL SETUSER app on >pw ~app:* +@read").unwrap();
        assert_eq!(
            test.run("ACL USERS"),
            Ok(RespValue::Array(vec![
                RespValue::bulk_from_string("app"),
                RespValue::bulk_from_string("default"),
            ]))
        );

        assert_eq!(test.run("ACL DELUSER app"), Ok(RespValue::Integer(1)));
        assert!(test.run("ACL DELUSER default").is_err());
    }

    #[test]
    fn test_acl_cat() {
        let mut test = TestContext::new();

        let reply = test.run("ACL CAT").unwrap();
        let RespValue::Array(categories) = reply else {
            panic!("expected array");
        };
        assert_eq!(categories.len(), AclCategory::ALL.len());

        let reply = test.run("ACL CAT string").unwrap();
        let RespValue::Array(commands) = reply else {
            panic!("expected array");
        };
        assert!(commands.contains(&RespValue::bulk_from_string("get")));
        assert!(!commands.contains(&RespValue::bulk_from_string("lpush")));
    }

    #[test]
    fn test_info_sections() {
        let mut test = TestContext::new();
        test.run("SET k v").unwrap();
        test.run("SET volatile v").unwrap();
        test.run("EXPIRE volatile 100").unwrap();

        let reply = test.run("INFO").unwrap();
        let RespValue::BulkString(body) = reply else {
            panic!("expected bulk");
        };
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("# Server"));
        assert!(body.contains("# Keyspace"));
        assert!(body.contains("db0:keys=2,expires=1"));

        let reply = test.run("INFO clients").unwrap();
        let RespValue::BulkString(body) = reply else {
            panic!("expected bulk");
        };
        let body = String::from_utf8(body.to_vec()).unwrap();
        assert!(body.contains("# Clients"));
        assert!(!body.contains("# Server"));
    }

    #[test]
    fn test_command_introspection() {
        let mut test = TestContext::new();

        let reply = test.run("COMMAND COUNT").unwrap();
        let RespValue::Integer(count) = reply else {
            panic!("expected integer");
        };
        assert!(count > 100);

        let reply = test.run("COMMAND INFO get nosuch").unwrap();
        let RespValue::Array(entries) = reply else {
            panic!("expected array");
        };
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0], RespValue::Array(_)));
        assert_eq!(entries[1], RespValue::NullArray);
    }

    #[test]
    fn test_time() {
        let mut test = TestContext::new();
        let reply = test.run("TIME").unwrap();
        let RespValue::Array(parts) = reply else {
            panic!("expected array");
        };
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn test_wait_reports_no_replicas() {
        let mut test = TestContext::new();
        assert_eq!(test.run("WAIT 1 100"), Ok(RespValue::Integer(0)));
    }
}
