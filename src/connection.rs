//! Per-connection task.
//!
//! Each accepted socket gets one of these loops: read bytes into the decode
//! buffer, drain complete requests through the executor, write replies back
//! through the shared writer half (shared so pub/sub deliveries interleave
//! safely), and clean up session state on the way out.

use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::commands;
use crate::resp::{decode_request, RespError, RespValue};
use crate::server::ServerState;
use crate::session::Session;
use crate::store::Store;

pub async fn handle_client_connection(
    stream: TcpStream,
    address: String,
    store: Arc<Mutex<Store>>,
    server: Arc<RwLock<ServerState>>,
) {
    let (mut reader, writer) = stream.into_split();
    let writer = Arc::new(Mutex::new(writer));

    let handle = {
        let mut server_guard = server.write().await;
        server_guard.register_client(address.clone(), Some(Arc::clone(&writer)))
    };
    let mut session = Session::new(handle.id);

    let mut buffer = BytesMut::with_capacity(4 * 1024);

    'connection: loop {
        // Drain every complete request already buffered (pipelining).
        loop {
            match decode_request(&mut buffer) {
                Ok(Some(args)) => {
                    // A blocking command may park for a long time; race it
                    // against the socket so a disconnect drops the parked
                    // wait instead of leaving it to win a future wake-up.
                    let reply = if commands::is_blocking_request(&args) {
                        tokio::select! {
                            reply = commands::handle_request(
                                args, &mut session, &handle, &store, &server
                            ) => reply,
                            _ = drain_until_close(&mut reader, &mut buffer) => {
                                break 'connection;
                            }
                        }
                    } else {
                        commands::handle_request(args, &mut session, &handle, &store, &server)
                            .await
                    };

                    if let Some(frame) = reply {
                        if write_frame(&writer, &frame).await.is_err() {
                            break 'connection;
                        }
                    }

                    if session.should_close || handle.kill_pending() {
                        break 'connection;
                    }
                }
                Ok(None) => break,
                Err(error) => {
                    // Protocol errors are fatal to the connection.
                    let frame = protocol_error_frame(&error, session.protocol_version);
                    let _ = write_frame(&writer, &frame).await;
                    break 'connection;
                }
            }
        }

        tokio::select! {
            read = reader.read_buf(&mut buffer) => {
                match read {
                    Ok(0) => break 'connection,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(client = handle.id, "read failed: {}", e);
                        break 'connection;
                    }
                }
            }
            _ = handle.kill_signal.notified() => {
                break 'connection;
            }
        }

        if handle.kill_pending() {
            break 'connection;
        }
    }

    commands::disconnect_cleanup(&session, &store, &server).await;
    debug!(client = handle.id, %address, "connection closed");
}

/// Keeps buffering pipelined input and resolves only when the peer goes
/// away, so it can be raced against a parked blocking command.
async fn drain_until_close(
    reader: &mut tokio::net::tcp::OwnedReadHalf,
    buffer: &mut BytesMut,
) {
    loop {
        match reader.read_buf(buffer).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}

fn protocol_error_frame(error: &RespError, protocol_version: u8) -> Vec<u8> {
    RespValue::Error(format!("ERR {}", error)).encode(protocol_version)
}

async fn write_frame(
    writer: &Arc<Mutex<OwnedWriteHalf>>,
    frame: &[u8],
) -> tokio::io::Result<()> {
    let mut writer_guard = writer.lock().await;
    writer_guard.write_all(frame).await?;
    writer_guard.flush().await
}
