use std::sync::Arc;
use std::time::Duration;

use crate::connection;
use crate::server::Server;

/// Background liveness sweep, spawned once at server startup.
///
/// Grounded directly on the teacher's `spawn_retention_task` (`src/retention.rs`): a
/// `tokio::spawn`'d loop that sleeps a fixed interval and then runs one sweep, logging what it
/// did. The sweep predicate changes from "messages past a retention window" to "connections
/// past a heartbeat window", and pruning becomes tearing down (§4.7).
pub fn spawn(server: Arc<Server>) {
    tokio::spawn(async move {
        let interval = Duration::from_secs(server.config.reaper_interval_secs);
        let timeout = Duration::from_secs(server.config.heartbeat_timeout_secs);

        loop {
            tokio::time::sleep(interval).await;
            let evicted = sweep(&server, timeout);
            if evicted > 0 {
                tracing::info!(evicted, "liveness reaper evicted stale connections");
            }
        }
    });
}

fn sweep(server: &Arc<Server>, timeout: Duration) -> usize {
    let stale: Vec<_> = {
        let connections = server.connections.lock().unwrap();
        connections
            .values()
            .filter(|handle| handle.is_stale(timeout))
            .cloned()
            .collect()
    };

    for handle in &stale {
        connection::teardown(server, handle);
    }
    stale.len()
}
