//! Shared helpers for the end-to-end tests: start a server on a private
//! port, speak raw RESP over TCP, parse replies with the crate's own reply
//! parser.
#![allow(dead_code)]

use std::io::Cursor;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

use ferrodis::resp::{RespError, RespValue};
use ferrodis::server::{Server, ServerOptions};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

static PORT_COUNTER: AtomicU16 = AtomicU16::new(0);

/// Each test binary gets its own port band so parallel test processes do
/// not collide.
fn next_port() -> u16 {
    let base = 21_000 + (std::process::id() % 15_000) as u16;
    base + PORT_COUNTER.fetch_add(1, Ordering::SeqCst)
}

pub struct TestServer {
    pub port: u16,
}

impl TestServer {
    /// Boots a server task on a fresh port and waits until it accepts.
    pub async fn start() -> TestServer {
        Self::start_with(|_| {}).await
    }

    pub async fn start_with(configure: impl FnOnce(&mut ServerOptions)) -> TestServer {
        let port = next_port();
        let mut options = ServerOptions {
            port,
            ..ServerOptions::default()
        };
        configure(&mut options);

        tokio::spawn(async move {
            let _ = Server::new(options).run().await;
        });

        // Poll until the listener is up.
        for _ in 0..100 {
            if TcpStream::connect(("127.0.0.1", port)).await.is_ok() {
                return TestServer { port };
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("server did not start on port {}", port);
    }

    pub async fn connect(&self) -> Client {
        let stream = TcpStream::connect(("127.0.0.1", self.port))
            .await
            .expect("connect to test server");
        Client {
            stream,
            buffer: Vec::new(),
        }
    }
}

pub struct Client {
    stream: TcpStream,
    buffer: Vec<u8>,
}

impl Client {
    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("write");
        self.stream.flush().await.expect("flush");
    }

    /// Encodes `parts` as a RESP array request.
    pub async fn send(&mut self, parts: &[&str]) {
        let mut request = format!("*{}\r\n", parts.len()).into_bytes();
        for part in parts {
            request.extend_from_slice(format!("${}\r\n", part.len()).as_bytes());
            request.extend_from_slice(part.as_bytes());
            request.extend_from_slice(b"\r\n");
        }
        self.send_raw(&request).await;
    }

    /// Reads one typed reply, waiting up to two seconds.
    pub async fn read_value(&mut self) -> RespValue {
        loop {
            let mut cursor = Cursor::new(self.buffer.as_slice());
            match RespValue::parse(&mut cursor) {
                Ok(value) => {
                    let consumed = cursor.position() as usize;
                    self.buffer.drain(..consumed);
                    return value;
                }
                Err(RespError::Incomplete) => {}
                Err(e) => panic!("protocol error in reply: {:?}", e),
            }

            let mut chunk = [0u8; 4096];
            let read = timeout(Duration::from_secs(2), self.stream.read(&mut chunk))
                .await
                .expect("timed out waiting for reply")
                .expect("read");
            if read == 0 {
                panic!("connection closed while waiting for reply");
            }
            self.buffer.extend_from_slice(&chunk[..read]);
        }
    }

    /// Sends a command and returns its single reply.
    pub async fn round_trip(&mut self, parts: &[&str]) -> RespValue {
        self.send(parts).await;
        self.read_value().await
    }

    /// Reads raw bytes until the connection closes or the timeout fires.
    pub async fn read_until_close(&mut self) -> Vec<u8> {
        let mut collected = std::mem::take(&mut self.buffer);
        loop {
            let mut chunk = [0u8; 4096];
            match timeout(Duration::from_secs(2), self.stream.read(&mut chunk)).await {
                Ok(Ok(0)) | Err(_) => return collected,
                Ok(Ok(read)) => collected.extend_from_slice(&chunk[..read]),
                Ok(Err(_)) => return collected,
            }
        }
    }

    /// True when the next read observes a clean close.
    pub async fn is_closed(&mut self) -> bool {
        let mut chunk = [0u8; 16];
        matches!(
            timeout(Duration::from_secs(2), self.stream.read(&mut chunk)).await,
            Ok(Ok(0))
        )
    }
}

pub fn bulk(text: &str) -> RespValue {
    RespValue::bulk_from_string(text)
}

pub fn bulk_array(items: &[&str]) -> RespValue {
    RespValue::Array(items.iter().map(|item| bulk(item)).collect())
}
