//! Connection handling commands: handshake, authentication, database
//! selection, and the CLIENT administration family.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;

use crate::commands::arguments::ArgCursor;
use crate::commands::command_error::CommandError;
use crate::commands::context::{CommandContext, PostAction};
use crate::resp::RespValue;
use crate::session::ReplyMode;
use crate::store::Wake;

pub fn ping(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let message = if cursor.done() {
        None
    } else {
        let message = cursor.expect_bytes()?;
        cursor.finish()?;
        Some(message)
    };

    // In RESP2 subscriber mode PING answers with a push-shaped pair.
    if ctx.session.in_subscriber_mode() {
        return Ok(RespValue::Push(vec![
            RespValue::bulk_from_string("pong"),
            RespValue::BulkString(message.unwrap_or_default()),
        ]));
    }

    Ok(match message {
        Some(message) => RespValue::BulkString(message),
        None => RespValue::SimpleString("PONG".to_string()),
    })
}

pub fn echo(_ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let message = cursor.expect_bytes()?;
    cursor.finish()?;
    Ok(RespValue::BulkString(message))
}

fn verify_credentials(
    ctx: &CommandContext,
    username: &str,
    password: &str,
) -> Result<(), CommandError> {
    // requirepass doubles as the default user's password when set.
    if username == "default" {
        let requirepass = ctx.server.config.get("requirepass").unwrap_or("");
        if !requirepass.is_empty() {
            if password == requirepass {
                return Ok(());
            }
            return Err(CommandError::AuthFailed);
        }
    }

    let Some(user) = ctx.server.acl.user(username) else {
        return Err(CommandError::AuthFailed);
    };
    if !user.enabled || !user.check_password(password) {
        return Err(CommandError::AuthFailed);
    }
    Ok(())
}

fn any_password_configured(ctx: &CommandContext) -> bool {
    let requirepass = ctx.server.config.get("requirepass").unwrap_or("");
    if !requirepass.is_empty() {
        return true;
    }
    ctx.server
        .acl
        .user("default")
        .is_some_and(|user| !user.nopass)
}

pub fn auth(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let first = cursor.expect_string()?;
    let (username, password) = if cursor.done() {
        ("default".to_string(), first)
    } else {
        let password = cursor.expect_string()?;
        cursor.finish()?;
        (first, password)
    };

    if username == "default" && !any_password_configured(ctx) {
        return Err(CommandError::Raw(
            "ERR Client sent AUTH, but no password is set. Did you mean AUTH <username> <password>?".to_string(),
        ));
    }

    verify_credentials(ctx, &username, &password)?;
    ctx.session.user = username;
    ctx.session.authenticated = true;
    Ok(RespValue::ok())
}

pub fn hello(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);

    if !cursor.done() {
        let requested = cursor.expect_int().map_err(|_| {
            CommandError::Raw(
                "NOPROTO unsupported protocol version".to_string(),
            )
        })?;
        if requested != 2 && requested != 3 {
            return Err(CommandError::Raw(
                "NOPROTO unsupported protocol version".to_string(),
            ));
        }

        while !cursor.done() {
            if cursor.match_token("AUTH") {
                let username = cursor.expect_string()?;
                let password = cursor.expect_string()?;
                verify_credentials(ctx, &username, &password)?;
                ctx.session.user = username;
                ctx.session.authenticated = true;
            } else if cursor.match_token("SETNAME") {
                let name = cursor.expect_string()?;
                *ctx.handle.name.lock().expect("name lock") = name;
            } else {
                return Err(CommandError::Syntax);
            }
        }

        ctx.session.protocol_version = requested as u8;
        ctx.handle
            .protocol_version
            .store(requested as u8, Ordering::SeqCst);
    }

    let protocol_version = ctx.session.protocol_version;
    Ok(RespValue::Map(vec![
        (
            RespValue::bulk_from_string("server"),
            RespValue::bulk_from_string("ferrodis"),
        ),
        (
            RespValue::bulk_from_string("version"),
            RespValue::bulk_from_string(env!("CARGO_PKG_VERSION")),
        ),
        (
            RespValue::bulk_from_string("proto"),
            RespValue::Integer(protocol_version as i64),
        ),
        (
            RespValue::bulk_from_string("id"),
            RespValue::Integer(ctx.session.client_id as i64),
        ),
        (
            RespValue::bulk_from_string("mode"),
            RespValue::bulk_from_string("standalone"),
        ),
        (
            RespValue::bulk_from_string("role"),
            RespValue::bulk_from_string("master"),
        ),
        (
            RespValue::bulk_from_string("modules"),
            RespValue::Array(Vec::new()),
        ),
    ]))
}

pub fn select(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let index = cursor.expect_int()?;
    cursor.finish()?;

    if index < 0 || index as usize >= ctx.store.database_count() {
        return Err(CommandError::InvalidDatabaseIndex);
    }
    ctx.session.database_index = index as usize;
    ctx.handle
        .database_index
        .store(index as usize, Ordering::SeqCst);
    Ok(RespValue::ok())
}

pub fn reset(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    ArgCursor::new(args).finish()?;

    let client_id = ctx.session.client_id;
    for channel in ctx.session.subscribed_channels.drain() {
        ctx.server.pubsub.unsubscribe(&channel, client_id);
    }
    for pattern in ctx.session.subscribed_patterns.drain() {
        ctx.server.pubsub.punsubscribe(&pattern, client_id);
    }
    ctx.server.drop_client_tracking(client_id);
    ctx.session.reset();
    ctx.handle.database_index.store(0, Ordering::SeqCst);
    Ok(RespValue::SimpleString("RESET".to_string()))
}

pub fn quit(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    ArgCursor::new(args).finish()?;
    ctx.session.should_close = true;
    Ok(RespValue::ok())
}

pub fn client(ctx: &mut CommandContext, args: &[Bytes]) -> Result<RespValue, CommandError> {
    let mut cursor = ArgCursor::new(args);
    let subcommand = cursor.next_token()?;

    match subcommand.as_str() {
        "ID" => {
            cursor.finish()?;
            Ok(RespValue::Integer(ctx.session.client_id as i64))
        }
        "GETNAME" => {
            cursor.finish()?;
            let name = ctx.handle.name.lock().expect("name lock").clone();
            if name.is_empty() {
                Ok(RespValue::NullBulkString)
            } else {
                Ok(RespValue::bulk_from_string(name))
            }
        }
        "SETNAME" => {
            let name = cursor.expect_string()?;
            cursor.finish()?;
            if name.contains(' ') || name.contains('\n') {
                return Err(CommandError::OutOfRange(
                    "Client names cannot contain spaces, newlines or special characters."
                        .to_string(),
                ));
            }
            *ctx.handle.name.lock().expect("name lock") = name;
            Ok(RespValue::ok())
        }
        "LIST" => {
            cursor.finish()?;
            let mut ids: Vec<u64> = ctx.server.clients.keys().copied().collect();
            ids.sort();

            let mut lines = Vec::with_capacity(ids.len());
            for id in ids {
                let handle = &ctx.server.clients[&id];
                lines.push(format!(
                    "id={} addr={} name={} db={} age={} resp={} cmd={}",
                    handle.id,
                    handle.address,
                    handle.name.lock().expect("name lock"),
                    handle.database_index.load(Ordering::SeqCst),
                    (ctx.now.saturating_sub(handle.created_at_ms)) / 1_000,
                    handle.protocol_version.load(Ordering::SeqCst),
                    handle.last_command.lock().expect("last command lock"),
                ));
            }
            Ok(RespValue::bulk_from_string(lines.join("\n")))
        }
        "KILL" => {
            let mut targets: Vec<Arc<crate::server::ClientHandle>> = Vec::new();

            if cursor.remaining() == 1 {
                // Legacy form: CLIENT KILL addr:port.
                let address = cursor.expect_string()?;
                let Some(handle) = ctx
                    .server
                    .clients
                    .values()
                    .find(|handle| handle.address == address)
                else {
                    return Err(CommandError::OutOfRange("No such client".to_string()));
                };
                targets.push(Arc::clone(handle));
                queue_kills(ctx, &targets);
                return Ok(RespValue::ok());
            }

            let mut id_filter = None;
            let mut address_filter = None;
            let mut skip_me = true;
            while !cursor.done() {
                if cursor.match_token("ID") {
                    id_filter = Some(cursor.expect_int()?.max(0) as u64);
                } else if cursor.match_token("ADDR") {
                    address_filter = Some(cursor.expect_string()?);
                } else if cursor.match_token("SKIPME") {
                    skip_me = match cursor.next_token()?.as_str() {
                        "YES" => true,
                        "NO" => false,
                        _ => return Err(CommandError::Syntax),
                    };
                } else {
                    return Err(CommandError::Syntax);
                }
            }

            let own_id = ctx.session.client_id;
            for handle in ctx.server.clients.values() {
                if id_filter.is_some_and(|id| handle.id != id) {
                    continue;
                }
                if address_filter
                    .as_ref()
                    .is_some_and(|address| handle.address != *address)
                {
                    continue;
                }
                if skip_me && handle.id == own_id {
                    continue;
                }
                targets.push(Arc::clone(handle));
            }

            let killed = targets.len();
            queue_kills(ctx, &targets);
            Ok(RespValue::Integer(killed as i64))
        }
        "UNBLOCK" => {
            let client_id = cursor.expect_int()?.max(0) as u64;
            let wake = if cursor.done() {
                Wake::Timeout
            } else if cursor.match_token("TIMEOUT") {
                cursor.finish()?;
                Wake::Timeout
            } else if cursor.match_token("ERROR") {
                cursor.finish()?;
                Wake::Unblocked
            } else {
                return Err(CommandError::Syntax);
            };

            let unblocked = ctx.store.unblock_client(client_id, wake);
            Ok(RespValue::Integer(unblocked as i64))
        }
        "REPLY" => {
            let mode = cursor.next_token()?;
            cursor.finish()?;
            match mode.as_str() {
                "ON" => {
                    ctx.session.reply_mode = ReplyMode::On;
                    Ok(RespValue::ok())
                }
                "OFF" => {
                    ctx.session.reply_mode = ReplyMode::Off;
                    ctx.suppress_reply = true;
                    Ok(RespValue::ok())
                }
                "SKIP" => {
                    // Suppresses its own reply and the next command's.
                    ctx.session.reply_mode = ReplyMode::Skip;
                    ctx.suppress_reply = true;
                    Ok(RespValue::ok())
                }
                _ => Err(CommandError::Syntax),
            }
        }
        "NO-EVICT" | "NO-TOUCH" => {
            let toggle = cursor.next_token()?;
            cursor.finish()?;
            let on = match toggle.as_str() {
                "ON" => true,
                "OFF" => false,
                _ => return Err(CommandError::Syntax),
            };
            // Tracked per client; with no eviction or LRU machinery they
            // have no further effect.
            if subcommand == "NO-EVICT" {
                ctx.handle.no_evict.store(on, Ordering::SeqCst);
            } else {
                ctx.handle.no_touch.store(on, Ordering::SeqCst);
            }
            Ok(RespValue::ok())
        }
        "TRACKING" => {
            let toggle = cursor.next_token()?;
            cursor.finish()?;
            match toggle.as_str() {
                "ON" => {
                    ctx.session.tracking = true;
                    Ok(RespValue::ok())
                }
                "OFF" => {
                    ctx.session.tracking = false;
                    let client_id = ctx.session.client_id;
                    ctx.server.drop_client_tracking(client_id);
                    Ok(RespValue::ok())
                }
                _ => Err(CommandError::Syntax),
            }
        }
        other => Err(CommandError::Raw(format!(
            "ERR Unknown CLIENT subcommand or wrong number of arguments for '{}'",
            other.to_lowercase()
        ))),
    }
}

fn queue_kills(ctx: &mut CommandContext, targets: &[Arc<crate::server::ClientHandle>]) {
    for handle in targets {
        // Blocked victims get an UNBLOCKED error instead of hanging until
        // their timeout.
        ctx.store.unblock_client(handle.id, Wake::Unblocked);
        ctx.post.push(PostAction::KillClient {
            handle: Arc::clone(handle),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::testing::TestContext;

    #[test]
    fn test_ping() {
        let mut test = TestContext::new();
        assert_eq!(
            test.run("PING"),
            Ok(RespValue::SimpleString("PONG".to_string()))
        );
        assert_eq!(
            test.run("PING hello"),
            Ok(RespValue::bulk_from_string("hello"))
        );
    }

    #[test]
    fn test_echo() {
        let mut test = TestContext::new();
        assert_eq!(
            test.run("ECHO payload"),
            Ok(RespValue::bulk_from_string("payload"))
        );
        assert!(test.run("ECHO").is_err());
    }

    #[test]
    fn test_hello_negotiates_protocol() {
        let mut test = TestContext::new();

        let reply = test.run("HELLO 3").unwrap();
        let RespValue::Map(pairs) = &reply else {
            panic!("expected map, got {:?}", reply);
        };
        let keys: Vec<String> = pairs
            .iter()
            .map(|(key, _)| match key {
                RespValue::BulkString(key) => String::from_utf8(key.to_vec()).unwrap(),
                _ => panic!("expected bulk key"),
            })
            .collect();
        assert_eq!(
            keys,
            vec!["server", "version", "proto", "id", "mode", "role", "modules"]
        );
        assert_eq!(test.session().protocol_version, 3);

        assert!(matches!(
            test.run("HELLO 4"),
            Err(CommandError::Raw(message)) if message.starts_with("NOPROTO")
        ));
    }

    #[test]
    fn test_select_bounds() {
        let mut test = TestContext::new();

        assert_eq!(test.run("SELECT 3"), Ok(RespValue::ok()));
        assert_eq!(test.session().database_index, 3);

        assert_eq!(
            test.run("SELECT 16"),
            Err(CommandError::InvalidDatabaseIndex)
        );
        assert_eq!(
            test.run("SELECT -1"),
            Err(CommandError::InvalidDatabaseIndex)
        );
    }

    #[test]
    fn test_select_isolates_databases() {
        let mut test = TestContext::new();
        test.run("SET k db0").unwrap();

        test.run("SELECT 1").unwrap();
        assert_eq!(test.run("GET k"), Ok(RespValue::NullBulkString));
        test.run("SET k db1").unwrap();

        test.run("SELECT 0").unwrap();
        assert_eq!(test.run("GET k"), Ok(RespValue::bulk_from_string("db0")));
    }

    #[test]
    fn test_reset_restores_fresh_state() {
        let mut test = TestContext::new();
        test.run("SELECT 2").unwrap();
        test.run("MULTI").unwrap();
        test.run("SUBSCRIBE news").unwrap();

        assert_eq!(
            test.run("RESET"),
            Ok(RespValue::SimpleString("RESET".to_string()))
        );
        assert_eq!(test.session().database_index, 0);
        assert_eq!(test.session().subscription_count(), 0);
        assert_eq!(test.server().pubsub.subscriber_count(b"news"), 0);
    }

    #[test]
    fn test_quit_marks_close() {
        let mut test = TestContext::new();
        assert_eq!(test.run("QUIT"), Ok(RespValue::ok()));
        assert!(test.session().should_close);
    }

    #[test]
    fn test_client_id_and_name() {
        let mut test = TestContext::new();

        assert_eq!(test.run("CLIENT ID"), Ok(RespValue::Integer(1)));
        assert_eq!(test.run("CLIENT GETNAME"), Ok(RespValue::NullBulkString));

        assert_eq!(test.run("CLIENT SETNAME worker"), Ok(RespValue::ok()));
        assert_eq!(
            test.run("CLIENT GETNAME"),
            Ok(RespValue::bulk_from_string("worker"))
        );
    }

    #[test]
    fn test_client_reply_modes() {
        let mut test = TestContext::new();

        test.run("CLIENT REPLY OFF").unwrap();
        assert!(test.last_reply_suppressed());

        test.run("CLIENT REPLY ON").unwrap();
        assert_eq!(test.session().reply_mode, ReplyMode::On);
    }

    #[test]
    fn test_client_unblock_without_blocked_client() {
        let mut test = TestContext::new();
        assert_eq!(test.run("CLIENT UNBLOCK 99"), Ok(RespValue::Integer(0)));
    }

    #[test]
    fn test_auth_without_password_configured() {
        let mut test = TestContext::new();
        assert!(matches!(
            test.run("AUTH secret"),
            Err(CommandError::Raw(message)) if message.starts_with("ERR Client sent AUTH")
        ));
    }

    #[test]
    fn test_auth_against_acl_user() {
        let mut test = TestContext::new();
        test.run("ACL SETUSER app on >s3cret +@all ~*").unwrap();

        assert_eq!(test.run("AUTH app s3cret"), Ok(RespValue::ok()));
        assert_eq!(test.session().user, "app");

        assert_eq!(test.run("AUTH app wrong"), Err(CommandError::AuthFailed));
    }
}
