pub mod codec;
pub mod config;
pub mod connection;
pub mod error;
pub mod metrics;
pub mod protocol;
pub mod reaper;
pub mod room_registry;
pub mod router;
pub mod scheduler;
pub mod server;
pub mod tls;
pub mod user_store;

use std::sync::Arc;

use config::ServerConfig;
use error::ChatResult;
use server::Server;

/// Convenience constructor reading configuration from the environment, mirroring the
/// teacher's `rocket()`/`rocket_with_db()` pairing: one zero-argument entry point for the
/// common case, one explicit-config entry point for tests and embedders.
pub fn build() -> ChatResult<Arc<Server>> {
    build_with_config(ServerConfig::from_env())
}

pub fn build_with_config(config: ServerConfig) -> ChatResult<Arc<Server>> {
    Ok(Arc::new(Server::new(config)?))
}
