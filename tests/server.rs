//! End-to-end wire tests: literal RESP in, literal RESP out.

mod support;

use ferrodis::resp::RespValue;
use support::{bulk, bulk_array, TestServer};

#[tokio::test]
async fn test_ping_literal_frames() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.send_raw(b"*1\r\n$4\r\nPING\r\n").await;
    assert_eq!(
        client.read_value().await,
        RespValue::SimpleString("PONG".to_string())
    );
}

#[tokio::test]
async fn test_inline_commands() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.send_raw(b"PING\r\n").await;
    assert_eq!(
        client.read_value().await,
        RespValue::SimpleString("PONG".to_string())
    );

    client.send_raw(b"SET inline value\r\nGET inline\r\n").await;
    assert_eq!(client.read_value().await, RespValue::ok());
    assert_eq!(client.read_value().await, bulk("value"));
}

#[tokio::test]
async fn test_set_incrby_get() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(client.round_trip(&["SET", "x", "10"]).await, RespValue::ok());
    assert_eq!(
        client.round_trip(&["INCRBY", "x", "5"]).await,
        RespValue::Integer(15)
    );
    assert_eq!(client.round_trip(&["GET", "x"]).await, bulk("15"));
}

#[tokio::test]
async fn test_lpush_lrange() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(
        client.round_trip(&["LPUSH", "l", "a", "b", "c"]).await,
        RespValue::Integer(3)
    );
    assert_eq!(
        client.round_trip(&["LRANGE", "l", "0", "-1"]).await,
        bulk_array(&["c", "b", "a"])
    );
}

#[tokio::test]
async fn test_zadd_zrangebyscore() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(
        client
            .round_trip(&["ZADD", "z", "1", "a", "2", "b", "3", "c"])
            .await,
        RespValue::Integer(3)
    );
    assert_eq!(
        client.round_trip(&["ZRANGEBYSCORE", "z", "2", "+inf"]).await,
        bulk_array(&["b", "c"])
    );
}

#[tokio::test]
async fn test_multi_exec_wire() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(client.round_trip(&["MULTI"]).await, RespValue::ok());
    assert_eq!(
        client.round_trip(&["SET", "a", "1"]).await,
        RespValue::SimpleString("QUEUED".to_string())
    );
    assert_eq!(
        client.round_trip(&["INCR", "a"]).await,
        RespValue::SimpleString("QUEUED".to_string())
    );
    assert_eq!(
        client.round_trip(&["EXEC"]).await,
        RespValue::Array(vec![RespValue::ok(), RespValue::Integer(2)])
    );
    assert_eq!(client.round_trip(&["GET", "a"]).await, bulk("2"));
}

#[tokio::test]
async fn test_hello_returns_server_map() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let reply = client.round_trip(&["HELLO", "3"]).await;
    let RespValue::Map(pairs) = reply else {
        panic!("HELLO 3 must reply with a map, got {:?}", reply);
    };

    let field_names: Vec<String> = pairs
        .iter()
        .map(|(key, _)| match key {
            RespValue::BulkString(name) => String::from_utf8(name.to_vec()).unwrap(),
            other => panic!("unexpected key type {:?}", other),
        })
        .collect();
    assert_eq!(
        field_names,
        vec!["server", "version", "proto", "id", "mode", "role", "modules"]
    );

    // RESP3 now applies to this session: a missing GET is the RESP3 null.
    client.send(&["GET", "missing"]).await;
    assert_eq!(client.read_value().await, RespValue::Null);
}

#[tokio::test]
async fn test_pipelined_requests_reply_in_order() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client
        .send_raw(
            b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\n1\r\n*2\r\n$4\r\nINCR\r\n$1\r\nk\r\n*2\r\n$3\r\nGET\r\n$1\r\nk\r\n",
        )
        .await;

    assert_eq!(client.read_value().await, RespValue::ok());
    assert_eq!(client.read_value().await, RespValue::Integer(2));
    assert_eq!(client.read_value().await, bulk("2"));
}

#[tokio::test]
async fn test_request_split_across_packets() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    // One request delivered byte-dribbled across writes.
    let request = b"*2\r\n$4\r\nECHO\r\n$5\r\nhello\r\n";
    for chunk in request.chunks(3) {
        client.send_raw(chunk).await;
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
    }
    assert_eq!(client.read_value().await, bulk("hello"));
}

#[tokio::test]
async fn test_protocol_error_closes_connection() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.send_raw(b"*abc\r\n").await;
    let raw = client.read_until_close().await;
    let text = String::from_utf8_lossy(&raw);
    assert!(text.starts_with("-ERR Protocol error"), "got {:?}", text);
}

#[tokio::test]
async fn test_unknown_command_and_arity_errors() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    let reply = client.round_trip(&["FROBNICATE"]).await;
    assert!(matches!(
        reply,
        RespValue::Error(message) if message.starts_with("ERR unknown command")
    ));

    let reply = client.round_trip(&["GET"]).await;
    assert!(matches!(
        reply,
        RespValue::Error(message) if message.contains("wrong number of arguments")
    ));
}

#[tokio::test]
async fn test_wrongtype_error_code() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client.round_trip(&["LPUSH", "l", "x"]).await;
    let reply = client.round_trip(&["GET", "l"]).await;
    assert!(matches!(
        reply,
        RespValue::Error(message) if message.starts_with("WRONGTYPE")
    ));
}

#[tokio::test]
async fn test_select_isolates_connections() {
    let server = TestServer::start().await;
    let mut first = server.connect().await;
    let mut second = server.connect().await;

    first.round_trip(&["SET", "k", "zero"]).await;
    second.round_trip(&["SELECT", "1"]).await;
    assert_eq!(
        second.round_trip(&["GET", "k"]).await,
        RespValue::NullBulkString
    );
    second.round_trip(&["SET", "k", "one"]).await;

    assert_eq!(first.round_trip(&["GET", "k"]).await, bulk("zero"));
    assert_eq!(
        first.round_trip(&["DBSIZE"]).await,
        RespValue::Integer(1)
    );
}

#[tokio::test]
async fn test_quit_closes_cleanly() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    assert_eq!(client.round_trip(&["QUIT"]).await, RespValue::ok());
    assert!(client.is_closed().await);
}

#[tokio::test]
async fn test_requirepass_flow() {
    let server = TestServer::start_with(|options| {
        options.requirepass = Some("sekrit".to_string());
    })
    .await;
    let mut client = server.connect().await;

    let reply = client.round_trip(&["GET", "k"]).await;
    assert!(matches!(
        reply,
        RespValue::Error(message) if message.starts_with("NOAUTH")
    ));

    assert_eq!(
        client.round_trip(&["AUTH", "sekrit"]).await,
        RespValue::ok()
    );
    assert_eq!(
        client.round_trip(&["GET", "k"]).await,
        RespValue::NullBulkString
    );
}

#[tokio::test]
async fn test_client_reply_modes_over_wire() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    // OFF: neither the toggle nor subsequent commands reply.
    client.send(&["CLIENT", "REPLY", "OFF"]).await;
    client.send(&["SET", "silent", "1"]).await;
    client.send(&["CLIENT", "REPLY", "ON"]).await;
    assert_eq!(client.read_value().await, RespValue::ok());

    // SKIP: swallows itself plus exactly one command.
    client.send(&["CLIENT", "REPLY", "SKIP"]).await;
    client.send(&["SET", "skipped", "1"]).await;
    client.send(&["GET", "silent"]).await;
    assert_eq!(client.read_value().await, bulk("1"));
}

#[tokio::test]
async fn test_binary_safe_values() {
    let server = TestServer::start().await;
    let mut client = server.connect().await;

    client
        .send_raw(b"*3\r\n$3\r\nSET\r\n$3\r\nbin\r\n$5\r\na\x00b\xffc\r\n")
        .await;
    assert_eq!(client.read_value().await, RespValue::ok());

    client.send(&["STRLEN", "bin"]).await;
    assert_eq!(client.read_value().await, RespValue::Integer(5));

    client.send(&["GET", "bin"]).await;
    assert_eq!(
        client.read_value().await,
        RespValue::BulkString(bytes::Bytes::from(&b"a\x00b\xffc"[..]))
    );
}
