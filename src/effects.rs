//! Post-command effect processing.
//!
//! Every command (and the expiry sampler) journals its keyspace mutations;
//! once the store lock is released, the executor hands the journal here to
//! wake blocked clients, publish keyspace notifications, and invalidate
//! client-tracking readers. Keeping these out of the command handlers keeps
//! the handlers pure and keeps delivery off the store lock.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::resp::RespValue;
use crate::server::ServerState;
use crate::store::{MutationEvent, Store, Value};

/// Applies everything a batch of mutations implies beyond the keyspace
/// change itself.
pub async fn process_mutations(
    store: &Arc<Mutex<Store>>,
    server: &Arc<RwLock<ServerState>>,
    events: Vec<MutationEvent>,
) {
    if events.is_empty() {
        return;
    }

    wake_blocked_clients(store, &events).await;
    invalidate_tracking_readers(server, &events).await;
    publish_keyspace_notifications(store, server, &events).await;
}

/// Wakes waiters parked on mutated keys: one waiter per available list
/// element, every waiter for a stream (readers do not consume entries).
async fn wake_blocked_clients(store: &Arc<Mutex<Store>>, events: &[MutationEvent]) {
    let mut store_guard = store.lock().await;
    let now = crate::store::now_ms();

    for event in events {
        let available = match store_guard
            .database(event.database_index)
            .read(&event.key, now)
        {
            Some(Value::List(list)) => list.len(),
            Some(Value::Stream(_)) => usize::MAX,
            Some(Value::Zset(zset)) => zset.len(),
            _ => continue,
        };

        if available > 0 {
            store_guard.wake_waiters(event.database_index, &event.key, available);
        }
    }
}

async fn invalidate_tracking_readers(
    server: &Arc<RwLock<ServerState>>,
    events: &[MutationEvent],
) {
    // Collect deliveries under the write lock, send outside it.
    let mut deliveries: Vec<(Arc<crate::server::ClientHandle>, Bytes)> = Vec::new();
    {
        let mut server_guard = server.write().await;
        for event in events {
            for client_id in
                server_guard.take_tracking_readers(event.database_index, &event.key)
            {
                if let Some(handle) = server_guard.clients.get(&client_id) {
                    deliveries.push((Arc::clone(handle), event.key.clone()));
                }
            }
        }
    }

    for (handle, key) in deliveries {
        // Invalidation pushes only exist in RESP3.
        if handle.protocol_version.load(Ordering::SeqCst) < 3 {
            continue;
        }
        let frame = RespValue::Push(vec![
            RespValue::bulk_from_string("invalidate"),
            RespValue::Array(vec![RespValue::BulkString(key)]),
        ])
        .encode(3);
        if let Err(e) = handle.send(&frame).await {
            debug!(client = handle.id, "invalidation push failed: {}", e);
        }
    }
}

async fn publish_keyspace_notifications(
    store: &Arc<Mutex<Store>>,
    server: &Arc<RwLock<ServerState>>,
    events: &[MutationEvent],
) {
    let flags = {
        let server_guard = server.read().await;
        server_guard.config.notification_flags()
    };
    let Some(flags) = flags else {
        return;
    };

    for event in events {
        let class = event_class(event.event);
        if !flags.covers(class) {
            continue;
        }

        if flags.keyspace {
            let channel = format!(
                "__keyspace@{}__:{}",
                event.database_index,
                String::from_utf8_lossy(&event.key)
            );
            publish_message(
                store,
                server,
                Bytes::from(channel),
                Bytes::from(event.event.to_string()),
            )
            .await;
        }
        if flags.keyevent {
            let channel = format!("__keyevent@{}__:{}", event.database_index, event.event);
            publish_message(store, server, Bytes::from(channel), event.key.clone()).await;
        }
    }
}

/// Routes one message to every subscriber, RESP2 arrays or RESP3 pushes as
/// each connection negotiated. Returns the number of receivers.
pub async fn publish_message(
    _store: &Arc<Mutex<Store>>,
    server: &Arc<RwLock<ServerState>>,
    channel: Bytes,
    payload: Bytes,
) -> usize {
    let deliveries = {
        let server_guard = server.read().await;
        server_guard
            .pubsub
            .deliveries(&channel)
            .into_iter()
            .filter_map(|delivery| {
                server_guard
                    .clients
                    .get(&delivery.client_id)
                    .map(|handle| (Arc::clone(handle), delivery.pattern))
            })
            .collect::<Vec<_>>()
    };

    let mut receivers = 0;
    for (handle, pattern) in deliveries {
        let protocol_version = handle.protocol_version.load(Ordering::SeqCst);

        let elements = match &pattern {
            Some(pattern) => vec![
                RespValue::bulk_from_string("pmessage"),
                RespValue::BulkString(pattern.clone()),
                RespValue::BulkString(channel.clone()),
                RespValue::BulkString(payload.clone()),
            ],
            None => vec![
                RespValue::bulk_from_string("message"),
                RespValue::BulkString(channel.clone()),
                RespValue::BulkString(payload.clone()),
            ],
        };

        let frame = RespValue::Push(elements).encode(protocol_version);
        match handle.send(&frame).await {
            Ok(()) => receivers += 1,
            Err(e) => debug!(client = handle.id, "pubsub delivery failed: {}", e),
        }
    }

    receivers
}

/// Keyspace-notification class character for an event name.
fn event_class(event: &str) -> char {
    match event {
        "expired" => 'x',
        "del" | "rename_from" | "rename_to" | "expire" | "persist" | "copy_to" | "restore" => 'g',
        "set" | "setrange" | "append" | "incrby" | "decrby" | "incrbyfloat" | "getset"
        | "getdel" | "mset" | "setbit" => '$',
        event if event.starts_with('l') || event.starts_with("rp") => 'l',
        event if event.starts_with('s') => 's',
        event if event.starts_with('h') => 'h',
        event if event.starts_with('z') => 'z',
        event if event.starts_with('x') => 't',
        _ => 'g',
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_classes() {
        let test_cases = vec![
            ("expired", 'x'),
            ("del", 'g'),
            ("set", '$'),
            ("lpush", 'l'),
            ("rpush", 'l'),
            ("sadd", 's'),
            ("hset", 'h'),
            ("zadd", 'z'),
            ("xadd", 't'),
            ("rename_from", 'g'),
        ];

        for (event, expected) in test_cases {
            assert_eq!(event_class(event), expected, "class of {}", event);
        }
    }
}
