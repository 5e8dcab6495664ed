use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::net::TcpListener;
use tokio::task::JoinHandle;

use crate::config::ServerConfig;
use crate::connection::{self, ConnectionHandle};
use crate::error::ChatResult;
use crate::metrics::PerformanceCounter;
use crate::protocol::Message;
use crate::room_registry::RoomRegistry;
use crate::scheduler::QosScheduler;
use crate::tls;
use crate::user_store::UserStore;

/// Aggregates every collaborator the connection/router layer needs, injected as one concrete
/// value rather than process-wide singletons (§9 "global server state").
///
/// Grounded on the Python original's `ChatServer` (same aggregation, same startup sequencing:
/// bind, spawn background tasks, accept loop) and the teacher's `build_rocket` (constructing
/// every collaborator up front and handing out shared references to them).
pub struct Server {
    pub config: ServerConfig,
    pub users: UserStore,
    pub rooms: RoomRegistry,
    pub scheduler: Arc<QosScheduler>,
    pub metrics: PerformanceCounter,
    pub connections: Mutex<HashMap<u64, Arc<ConnectionHandle>>>,
    /// One entry per accepted socket's TLS-handshake-plus-read-loop task, so shutdown can
    /// cancel every reader per §5 ("server shutdown cancels all readers") instead of relying
    /// on the surrounding runtime to tear them down when the process exits. Pruned of finished
    /// entries on each accept rather than left to grow for the life of the server.
    reader_tasks: Mutex<Vec<JoinHandle<()>>>,
    next_id: AtomicU64,
    started_at: Instant,
}

impl Server {
    pub fn new(config: ServerConfig) -> ChatResult<Self> {
        let users = UserStore::new(&config.user_db_path)?;
        let scheduler = QosScheduler::spawn(config.max_concurrent);
        Ok(Server {
            config,
            users,
            rooms: RoomRegistry::new(),
            scheduler,
            metrics: PerformanceCounter::new(),
            connections: Mutex::new(HashMap::new()),
            reader_tasks: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            started_at: Instant::now(),
        })
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Snapshot current room members (by connection, not by Room Registry), send to each
    /// independently, and schedule teardown for anyone whose send failed. One recipient's
    /// broken connection never aborts delivery to the others (§4.6 fan-out semantics).
    pub fn fanout(self: &Arc<Self>, room_id: &str, exclude: Option<u64>, message: &Message) {
        let snapshot: Vec<Arc<ConnectionHandle>> = {
            let connections = self.connections.lock().unwrap();
            connections
                .values()
                .filter(|c| Some(c.id) != exclude)
                .filter(|c| c.current_room().as_deref() == Some(room_id))
                .cloned()
                .collect()
        };

        let mut broken = Vec::new();
        for conn in snapshot {
            if conn.send(message.clone()).is_err() {
                broken.push(conn);
            }
        }
        for conn in broken {
            connection::teardown(self, &conn);
        }
    }

    fn next_connection_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Binds, spawns the liveness reaper, and accepts connections until `shutdown` resolves.
    /// After the accept loop stops, waits for the scheduler to drain in-flight work before
    /// returning, per §5's shutdown sequencing.
    pub async fn run(self: Arc<Self>, shutdown: impl Future<Output = ()>) -> ChatResult<()> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        tracing::info!(addr = %self.config.bind_addr, "listening");
        self.serve(listener, shutdown).await
    }

    /// Same as `run`, but accepts an already-bound listener. Split out so tests can bind to
    /// an ephemeral port (`127.0.0.1:0`) and learn the assigned port via `TcpListener::local_addr`
    /// before the accept loop starts.
    pub async fn serve(
        self: Arc<Self>,
        listener: TcpListener,
        shutdown: impl Future<Output = ()>,
    ) -> ChatResult<()> {
        let acceptor = tls::load_acceptor(&self.config.cert_path, &self.config.key_path)?;

        crate::reaper::spawn(self.clone());
        crate::metrics::spawn_report(self.clone());

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            tracing::warn!(error = %e, "accept failed");
                            continue;
                        }
                    };
                    let acceptor = acceptor.clone();
                    let server = self.clone();
                    let id = self.next_connection_id();
                    let task = tokio::spawn(async move {
                        match acceptor.accept(stream).await {
                            Ok(tls_stream) => connection::handle(tls_stream, id, server).await,
                            Err(e) => tracing::warn!(error = %e, %peer_addr, "tls handshake failed"),
                        }
                    });
                    let mut reader_tasks = self.reader_tasks.lock().unwrap();
                    reader_tasks.retain(|t| !t.is_finished());
                    reader_tasks.push(task);
                }
                _ = &mut shutdown => {
                    tracing::info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        for task in self.reader_tasks.lock().unwrap().drain(..) {
            task.abort();
        }
        tracing::info!("readers cancelled, draining scheduler");

        while self.scheduler.in_flight() > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        tracing::info!("scheduler drained, shutdown complete");
        Ok(())
    }
}
