//! Multi-connection behavior: optimistic transactions, blocking pops,
//! pub/sub delivery, expiry, forced unblocking.

mod support;

use std::time::Duration;

use ferrodis::resp::RespValue;
use support::{bulk, bulk_array, TestServer};
use tokio::time::sleep;

#[tokio::test]
async fn test_watch_abort_on_concurrent_write() {
    let server = TestServer::start().await;
    let mut watcher = server.connect().await;
    let mut other = server.connect().await;

    watcher.round_trip(&["SET", "k", "0"]).await;
    assert_eq!(watcher.round_trip(&["WATCH", "k"]).await, RespValue::ok());
    assert_eq!(watcher.round_trip(&["MULTI"]).await, RespValue::ok());
    assert_eq!(
        watcher.round_trip(&["SET", "k", "1"]).await,
        RespValue::SimpleString("QUEUED".to_string())
    );

    // The other client races the transaction.
    assert_eq!(other.round_trip(&["SET", "k", "2"]).await, RespValue::ok());

    assert_eq!(watcher.round_trip(&["EXEC"]).await, RespValue::NullArray);
    assert_eq!(watcher.round_trip(&["GET", "k"]).await, bulk("2"));
}

#[tokio::test]
async fn test_watch_expiry_also_aborts() {
    let server = TestServer::start().await;
    let mut watcher = server.connect().await;

    watcher
        .round_trip(&["SET", "k", "v", "PX", "40"])
        .await;
    watcher.round_trip(&["WATCH", "k"]).await;
    watcher.round_trip(&["MULTI"]).await;
    watcher.round_trip(&["SET", "k", "fresh"]).await;

    // Let the key expire (either sweep observes it) before EXEC.
    sleep(Duration::from_millis(200)).await;

    assert_eq!(watcher.round_trip(&["EXEC"]).await, RespValue::NullArray);
}

#[tokio::test]
async fn test_blpop_earliest_waiter_wins() {
    let server = TestServer::start().await;
    let mut first = server.connect().await;
    let mut second = server.connect().await;
    let mut third = server.connect().await;
    let mut pusher = server.connect().await;

    first.send(&["BLPOP", "queue", "0"]).await;
    sleep(Duration::from_millis(50)).await;
    second.send(&["BLPOP", "queue", "0"]).await;
    sleep(Duration::from_millis(50)).await;
    third.send(&["BLPOP", "queue", "0"]).await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(
        pusher.round_trip(&["RPUSH", "queue", "payload"]).await,
        RespValue::Integer(1)
    );

    // Only the first waiter is served.
    assert_eq!(
        first.read_value().await,
        bulk_array(&["queue", "payload"])
    );

    // The rest stay blocked until more data arrives.
    pusher.round_trip(&["RPUSH", "queue", "again"]).await;
    assert_eq!(
        second.read_value().await,
        bulk_array(&["queue", "again"])
    );
}

#[tokio::test]
async fn test_blpop_timeout_returns_null() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let started = std::time::Instant::now();
    client.send(&["BLPOP", "nothing", "0.1"]).await;
    assert_eq!(client.read_value().await, RespValue::NullArray);
    assert!(started.elapsed() >= Duration::from_millis(90));
}

#[tokio::test]
async fn test_blpop_immediate_when_data_present() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.round_trip(&["RPUSH", "q", "a", "b"]).await;
    assert_eq!(
        client.round_trip(&["BLPOP", "q", "0"]).await,
        bulk_array(&["q", "a"])
    );
}

#[tokio::test]
async fn test_blmove_blocks_then_moves() {
    let server = TestServer::start().await;
    let mut mover = server.connect().await;
    let mut pusher = server.connect().await;

    mover
        .send(&["BLMOVE", "src", "dst", "LEFT", "RIGHT", "0"])
        .await;
    sleep(Duration::from_millis(50)).await;

    pusher.round_trip(&["RPUSH", "src", "x"]).await;
    assert_eq!(mover.read_value().await, bulk("x"));
    assert_eq!(
        pusher.round_trip(&["LRANGE", "dst", "0", "-1"]).await,
        bulk_array(&["x"])
    );
}

#[tokio::test]
async fn test_client_unblock() {
    let server = TestServer::start().await;
    let mut blocked = server.connect().await;
    let mut admin = server.connect().await;

    let RespValue::Integer(blocked_id) = blocked.round_trip(&["CLIENT", "ID"]).await else {
        panic!("CLIENT ID must reply with an integer");
    };

    blocked.send(&["BLPOP", "q", "0"]).await;
    sleep(Duration::from_millis(50)).await;

    // TIMEOUT flavor: the blocked client sees a null reply.
    assert_eq!(
        admin
            .round_trip(&["CLIENT", "UNBLOCK", &blocked_id.to_string()])
            .await,
        RespValue::Integer(1)
    );
    assert_eq!(blocked.read_value().await, RespValue::NullArray);

    // ERROR flavor: the blocked client sees the UNBLOCKED error.
    blocked.send(&["BLPOP", "q", "0"]).await;
    sleep(Duration::from_millis(50)).await;
    assert_eq!(
        admin
            .round_trip(&["CLIENT", "UNBLOCK", &blocked_id.to_string(), "ERROR"])
            .await,
        RespValue::Integer(1)
    );
    assert!(matches!(
        blocked.read_value().await,
        RespValue::Error(message) if message.starts_with("UNBLOCKED")
    ));
}

#[tokio::test]
async fn test_pubsub_delivery_order() {
    let server = TestServer::start().await;
    let mut subscriber = server.connect().await;
    let mut publisher = server.connect().await;

    let confirmation = subscriber.round_trip(&["SUBSCRIBE", "events"]).await;
    assert_eq!(
        confirmation,
        RespValue::Array(vec![
            bulk("subscribe"),
            bulk("events"),
            RespValue::Integer(1)
        ])
    );

    for index in 0..10 {
        assert_eq!(
            publisher
                .round_trip(&["PUBLISH", "events", &format!("m{}", index)])
                .await,
            RespValue::Integer(1)
        );
    }

    for index in 0..10 {
        assert_eq!(
            subscriber.read_value().await,
            bulk_array(&["message", "events", &format!("m{}", index)])
        );
    }
}

#[tokio::test]
async fn test_pattern_subscription_delivery() {
    let server = TestServer::start().await;
    let mut subscriber = server.connect().await;
    let mut publisher = server.connect().await;

    subscriber.round_trip(&["PSUBSCRIBE", "news.*"]).await;

    assert_eq!(
        publisher.round_trip(&["PUBLISH", "news.tech", "hi"]).await,
        RespValue::Integer(1)
    );
    assert_eq!(
        publisher.round_trip(&["PUBLISH", "sports", "ignored"]).await,
        RespValue::Integer(0)
    );

    assert_eq!(
        subscriber.read_value().await,
        bulk_array(&["pmessage", "news.*", "news.tech", "hi"])
    );
}

#[tokio::test]
async fn test_px_expiry_over_wire() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.round_trip(&["SET", "k", "v", "PX", "50"]).await;
    sleep(Duration::from_millis(100)).await;

    assert_eq!(
        client.round_trip(&["GET", "k"]).await,
        RespValue::NullBulkString
    );
    assert_eq!(
        client.round_trip(&["EXISTS", "k"]).await,
        RespValue::Integer(0)
    );
    assert_eq!(client.round_trip(&["DBSIZE"]).await, RespValue::Integer(0));
}

#[tokio::test]
async fn test_client_kill_disconnects_target() {
    let server = TestServer::start().await;
    let mut victim = server.connect().await;
    let mut admin = server.connect().await;

    let RespValue::Integer(victim_id) = victim.round_trip(&["CLIENT", "ID"]).await else {
        panic!("CLIENT ID must reply with an integer");
    };

    assert_eq!(
        admin
            .round_trip(&["CLIENT", "KILL", "ID", &victim_id.to_string()])
            .await,
        RespValue::Integer(1)
    );
    assert!(victim.is_closed().await);
}

#[tokio::test]
async fn test_exec_batch_is_atomic_across_clients() {
    let server = TestServer::start().await;
    let mut transactor = server.connect().await;
    let mut observer = server.connect().await;

    transactor.round_trip(&["SET", "counter", "0"]).await;
    transactor.round_trip(&["MULTI"]).await;
    for _ in 0..50 {
        transactor.round_trip(&["INCR", "counter"]).await;
    }
    transactor.send(&["EXEC"]).await;

    let reply = transactor.read_value().await;
    let RespValue::Array(replies) = reply else {
        panic!("EXEC must reply with an array");
    };
    assert_eq!(replies.len(), 50);

    // After EXEC the observer sees the final value; intermediate states are
    // never visible because the batch holds the store for its duration.
    assert_eq!(observer.round_trip(&["GET", "counter"]).await, bulk("50"));
}

#[tokio::test]
async fn test_keyspace_notifications_over_wire() {
    let server = TestServer::start().await;
    let mut subscriber = server.connect().await;
    let mut writer = server.connect().await;

    writer
        .round_trip(&["CONFIG", "SET", "notify-keyspace-events", "KEA"])
        .await;

    // Two confirmations arrive back to back, one per channel.
    subscriber
        .round_trip(&["SUBSCRIBE", "__keyspace@0__:k", "__keyevent@0__:set"])
        .await;
    subscriber.read_value().await;

    assert_eq!(writer.round_trip(&["SET", "k", "v"]).await, RespValue::ok());

    // Keyspace message first (key channel, event payload), then keyevent
    // (event channel, key payload).
    assert_eq!(
        subscriber.read_value().await,
        bulk_array(&["message", "__keyspace@0__:k", "set"])
    );
    assert_eq!(
        subscriber.read_value().await,
        bulk_array(&["message", "__keyevent@0__:set", "k"])
    );
}

#[tokio::test]
async fn test_store_command_notification_event_names() {
    let server = TestServer::start().await;
    let mut subscriber = server.connect().await;
    let mut writer = server.connect().await;

    writer
        .round_trip(&["CONFIG", "SET", "notify-keyspace-events", "KEA"])
        .await;
    writer.round_trip(&["SADD", "a", "1", "2"]).await;
    writer.round_trip(&["SADD", "b", "2", "3"]).await;
    writer.round_trip(&["ZADD", "za", "1", "m"]).await;

    subscriber
        .round_trip(&[
            "SUBSCRIBE",
            "__keyevent@0__:sunionstore",
            "__keyevent@0__:sdiffstore",
            "__keyevent@0__:zunionstore",
        ])
        .await;
    subscriber.read_value().await;
    subscriber.read_value().await;

    writer.round_trip(&["SUNIONSTORE", "u", "a", "b"]).await;
    assert_eq!(
        subscriber.read_value().await,
        bulk_array(&["message", "__keyevent@0__:sunionstore", "u"])
    );

    writer.round_trip(&["SDIFFSTORE", "d", "a", "b"]).await;
    assert_eq!(
        subscriber.read_value().await,
        bulk_array(&["message", "__keyevent@0__:sdiffstore", "d"])
    );

    writer.round_trip(&["ZUNIONSTORE", "zu", "1", "za"]).await;
    assert_eq!(
        subscriber.read_value().await,
        bulk_array(&["message", "__keyevent@0__:zunionstore", "zu"])
    );
}

#[tokio::test]
async fn test_xread_block_wakes_on_xadd() {
    let server = TestServer::start().await;
    let mut reader = server.connect().await;
    let mut writer = server.connect().await;

    // `$` pins to the stream state at call time, so only the entry added
    // after blocking is delivered.
    writer.round_trip(&["XADD", "s", "1-0", "old", "1"]).await;
    reader
        .send(&["XREAD", "BLOCK", "0", "STREAMS", "s", "$"])
        .await;
    sleep(Duration::from_millis(50)).await;

    writer.round_trip(&["XADD", "s", "2-0", "fresh", "2"]).await;

    let reply = reader.read_value().await;
    assert_eq!(
        reply,
        RespValue::Array(vec![RespValue::Array(vec![
            bulk("s"),
            RespValue::Array(vec![RespValue::Array(vec![
                bulk("2-0"),
                bulk_array(&["fresh", "2"]),
            ])]),
        ])])
    );
}

#[tokio::test]
async fn test_disconnect_removes_waiters() {
    let server = TestServer::start().await;
    let mut doomed = server.connect().await;
    let mut survivor = server.connect().await;
    let mut pusher = server.connect().await;

    doomed.send(&["BLPOP", "q", "0"]).await;
    sleep(Duration::from_millis(50)).await;
    survivor.send(&["BLPOP", "q", "0"]).await;
    sleep(Duration::from_millis(50)).await;

    drop(doomed);
    sleep(Duration::from_millis(50)).await;

    // The push must reach the surviving waiter, not the dead one.
    pusher.round_trip(&["RPUSH", "q", "v"]).await;
    assert_eq!(survivor.read_value().await, bulk_array(&["q", "v"]));
}
