//! Server state and the accept loop.
//!
//! [`ServerState`] owns everything that is not the keyspace: configuration,
//! the ACL table, the pub/sub registry, the connected-client table, the
//! client-tracking table, and the info counters. [`Server`] binds the TCP
//! listener, spawns one task per connection, and runs the active-expiry
//! sampler.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;

use bytes::Bytes;
use rand::distr::{Alphanumeric, SampleString};
use rand::seq::IteratorRandom;
use regex::Regex;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpListener;
use tokio::sync::{Mutex, Notify, RwLock};
use tracing::{debug, error, info};

use crate::acl::AclTable;
use crate::config::Config;
use crate::connection::handle_client_connection;
use crate::pubsub::PubSub;
use crate::store::{now_ms, Store};

/// Errors that can occur during command-line argument parsing.
#[derive(Error, Debug, PartialEq, Clone)]
pub enum CliError {
    #[error("Invalid command line flag")]
    InvalidCommandLineFlag,
    #[error("Invalid port flag value")]
    InvalidPortFlagValue,
    #[error("Invalid host flag value")]
    InvalidHostFlagValue,
    #[error("Invalid databases flag value")]
    InvalidDatabasesFlagValue,
}

/// Startup options, parsed from the command line.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerOptions {
    pub host: String,
    pub port: u16,
    pub databases: usize,
    pub requirepass: Option<String>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            host: "127.0.0.1".to_string(),
            port: 6379,
            databases: 16,
            requirepass: None,
        }
    }
}

impl ServerOptions {
    /// Parses `--host`, `--port`, `--databases` and `--requirepass` flags.
    pub fn from_args<I: IntoIterator<Item = String>>(args: I) -> Result<Self, CliError> {
        let mut iter = args.into_iter().skip(1);
        let mut options = ServerOptions::default();

        while let Some(arg) = iter.next() {
            match arg.as_str() {
                "--host" => {
                    let Some(host) = iter.next() else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };
                    options.host = validate_host(&host)?;
                }
                "--port" => {
                    let Some(port) = iter.next() else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };
                    options.port = validate_port(&port)?;
                }
                "--databases" => {
                    let Some(count) = iter.next() else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };
                    options.databases = count
                        .parse::<usize>()
                        .ok()
                        .filter(|&count| (1..=1024).contains(&count))
                        .ok_or(CliError::InvalidDatabasesFlagValue)?;
                }
                "--requirepass" => {
                    let Some(password) = iter.next() else {
                        return Err(CliError::InvalidCommandLineFlag);
                    };
                    options.requirepass = Some(password);
                }
                _ => return Err(CliError::InvalidCommandLineFlag),
            }
        }

        Ok(options)
    }
}

fn validate_port(port: &str) -> Result<u16, CliError> {
    port.parse::<u16>()
        .ok()
        .filter(|&port| port >= 1)
        .ok_or(CliError::InvalidPortFlagValue)
}

fn validate_host(host: &str) -> Result<String, CliError> {
    let ipv4_regex = Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})$").unwrap();
    let hostname_regex = Regex::new(r"^[a-zA-Z0-9\-\.]+$").unwrap();

    let valid = if let Some(caps) = ipv4_regex.captures(host) {
        caps.iter().skip(1).all(|octet| {
            octet
                .map(|m| m.as_str().parse::<u16>().map(|v| v <= 255).unwrap_or(false))
                .unwrap_or(false)
        })
    } else {
        hostname_regex.is_match(host)
    };

    if !valid {
        return Err(CliError::InvalidHostFlagValue);
    }
    Ok(host.to_string())
}

/// The cross-visible face of one connection, held in the client table so
/// other sessions (CLIENT LIST, CLIENT KILL, PUBLISH) can reach it.
#[derive(Debug)]
pub struct ClientHandle {
    pub id: u64,
    pub address: String,
    pub name: StdMutex<String>,
    /// Absent for sessions without a socket (unit tests drive the executor
    /// directly).
    pub writer: Option<Arc<Mutex<OwnedWriteHalf>>>,
    pub protocol_version: AtomicU8,
    pub database_index: AtomicUsize,
    pub created_at_ms: u64,
    pub last_command: StdMutex<String>,
    pub kill_requested: AtomicBool,
    pub kill_signal: Notify,
    pub no_evict: AtomicBool,
    pub no_touch: AtomicBool,
}

impl ClientHandle {
    /// Writes one frame through this client's serialized writer.
    pub async fn send(&self, frame: &[u8]) -> tokio::io::Result<()> {
        let Some(writer) = &self.writer else {
            return Ok(());
        };
        let mut writer = writer.lock().await;
        writer.write_all(frame).await?;
        writer.flush().await
    }

    pub fn request_kill(&self) {
        self.kill_requested.store(true, Ordering::SeqCst);
        self.kill_signal.notify_waiters();
    }

    pub fn kill_pending(&self) -> bool {
        self.kill_requested.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_received: u64,
    pub commands_processed: u64,
    pub expired_keys: u64,
    pub keyspace_hits: u64,
    pub keyspace_misses: u64,
}

#[derive(Debug)]
pub struct ServerState {
    pub config: Config,
    pub acl: AclTable,
    pub pubsub: PubSub,
    pub clients: HashMap<u64, Arc<ClientHandle>>,
    next_client_id: u64,
    pub run_id: String,
    pub start_time_ms: u64,
    pub stats: ServerStats,
    /// (database, key) → clients that read it with tracking on.
    tracking_table: HashMap<(usize, Bytes), HashSet<u64>>,
    pub shutdown: Arc<Notify>,
}

impl ServerState {
    pub fn new(options: &ServerOptions) -> Self {
        let mut config = Config::new();
        config.set_startup("bind", &options.host);
        config.set_startup("port", &options.port.to_string());
        config.set_startup("databases", &options.databases.to_string());
        if let Some(password) = &options.requirepass {
            config.set_startup("requirepass", password);
        }

        ServerState {
            config,
            acl: AclTable::new(),
            pubsub: PubSub::new(),
            clients: HashMap::new(),
            next_client_id: 0,
            run_id: Alphanumeric.sample_string(&mut rand::rng(), 40),
            start_time_ms: now_ms(),
            stats: ServerStats::default(),
            tracking_table: HashMap::new(),
            shutdown: Arc::new(Notify::new()),
        }
    }

    pub fn register_client(
        &mut self,
        address: String,
        writer: Option<Arc<Mutex<OwnedWriteHalf>>>,
    ) -> Arc<ClientHandle> {
        self.next_client_id += 1;
        self.stats.connections_received += 1;

        let handle = Arc::new(ClientHandle {
            id: self.next_client_id,
            address,
            name: StdMutex::new(String::new()),
            writer,
            protocol_version: AtomicU8::new(2),
            database_index: AtomicUsize::new(0),
            created_at_ms: now_ms(),
            last_command: StdMutex::new(String::new()),
            kill_requested: AtomicBool::new(false),
            kill_signal: Notify::new(),
            no_evict: AtomicBool::new(false),
            no_touch: AtomicBool::new(false),
        });
        self.clients.insert(handle.id, Arc::clone(&handle));
        handle
    }

    pub fn unregister_client(&mut self, client_id: u64) {
        self.clients.remove(&client_id);
        self.pubsub.remove_client(client_id);
        self.drop_client_tracking(client_id);
    }

    /// Records that a tracking client read a key.
    pub fn track_key_read(&mut self, database_index: usize, key: Bytes, client_id: u64) {
        self.tracking_table
            .entry((database_index, key))
            .or_default()
            .insert(client_id);
    }

    /// Clients to invalidate after a mutation; the tracking entry is
    /// consumed (each read re-arms it).
    pub fn take_tracking_readers(&mut self, database_index: usize, key: &Bytes) -> Vec<u64> {
        self.tracking_table
            .remove(&(database_index, key.clone()))
            .map(|readers| readers.into_iter().collect())
            .unwrap_or_default()
    }

    pub fn drop_client_tracking(&mut self, client_id: u64) {
        for readers in self.tracking_table.values_mut() {
            readers.remove(&client_id);
        }
        self.tracking_table.retain(|_, readers| !readers.is_empty());
    }
}

pub struct Server {
    options: ServerOptions,
}

impl Server {
    pub fn new(options: ServerOptions) -> Self {
        Server { options }
    }

    /// Binds the listener and serves until SHUTDOWN. Returns cleanly so the
    /// binary can exit 0.
    pub async fn run(&self) -> Result<(), std::io::Error> {
        let store = Arc::new(Mutex::new(Store::new(self.options.databases)));
        let server = Arc::new(RwLock::new(ServerState::new(&self.options)));

        let address = format!("{}:{}", self.options.host, self.options.port);
        let listener = TcpListener::bind(&address).await?;
        info!(%address, "listening");

        let shutdown = {
            let server_guard = server.read().await;
            Arc::clone(&server_guard.shutdown)
        };

        spawn_active_expiry(Arc::clone(&store), Arc::clone(&server));

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, client_address)) => {
                            debug!(%client_address, "accepted connection");
                            let store_clone = Arc::clone(&store);
                            let server_clone = Arc::clone(&server);

                            tokio::spawn(async move {
                                handle_client_connection(
                                    stream,
                                    client_address.to_string(),
                                    store_clone,
                                    server_clone,
                                )
                                .await;
                            });
                        }
                        Err(e) => {
                            error!("accept failed: {}", e);
                            break;
                        }
                    }
                }
                _ = shutdown.notified() => {
                    info!("shutdown requested");
                    break;
                }
            }
        }

        // Unblock every parked client so their tasks can observe the close.
        {
            let mut store_guard = store.lock().await;
            let connected: Vec<u64> = {
                let server_guard = server.read().await;
                server_guard.clients.keys().copied().collect()
            };
            for client_id in connected {
                store_guard.unblock_client(client_id, crate::store::Wake::Unblocked);
            }
        }

        Ok(())
    }
}

const EXPIRY_SAMPLE_SIZE: usize = 20;
const EXPIRY_INTERVAL_MS: u64 = 100;

/// The active-expiry sampler: every tick, sample up to 20 keys with a TTL
/// per database and delete the due ones; repeat immediately while more than
/// a quarter of the sample was due.
fn spawn_active_expiry(store: Arc<Mutex<Store>>, server: Arc<RwLock<ServerState>>) {
    tokio::spawn(async move {
        let mut ticker =
            tokio::time::interval(std::time::Duration::from_millis(EXPIRY_INTERVAL_MS));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let (events, expired_total) = {
                let mut store_guard = store.lock().await;
                let now = now_ms();
                let mut expired_total = 0u64;

                for database_index in 0..store_guard.database_count() {
                    loop {
                        let database = store_guard.database(database_index);
                        let sampled: Vec<Bytes> = database
                            .keys_with_expiry()
                            .cloned()
                            .choose_multiple(&mut rand::rng(), EXPIRY_SAMPLE_SIZE);

                        if sampled.is_empty() {
                            break;
                        }

                        let sample_size = sampled.len();
                        let mut expired = 0;
                        for key in sampled {
                            if database.expire_if_due(&key, now) {
                                expired += 1;
                            }
                        }
                        expired_total += expired as u64;

                        if expired * 4 <= sample_size {
                            break;
                        }
                    }
                }

                (store_guard.drain_events(), expired_total)
            };

            if expired_total > 0 {
                let mut server_guard = server.write().await;
                server_guard.stats.expired_keys += expired_total;
            }

            if !events.is_empty() {
                crate::effects::process_mutations(&store, &server, events).await;
            }
        }
    });
}
