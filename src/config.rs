use std::env;

/// Server configuration, read once at startup. No config file, no config crate —
/// every field has an environment variable and a sensible default.
///
/// Environment variables:
/// - `CHAT_BIND_ADDR` — host:port to listen on (default: `0.0.0.0:8888`)
/// - `CHAT_CERT_PATH` — PEM certificate chain path (default: `certificates/server-cert.pem`)
/// - `CHAT_KEY_PATH` — PEM private key path (default: `certificates/server-key.pem`)
/// - `CHAT_USER_DB_PATH` — JSON user store path (default: `data/users.json`)
/// - `CHAT_MAX_CONCURRENT` — scheduler's bounded worker budget (default: 10)
/// - `CHAT_HEARTBEAT_TIMEOUT_SECS` — liveness window (default: 60)
/// - `CHAT_REAPER_INTERVAL_SECS` — reaper sweep period (default: 30)
/// - `CHAT_MAX_FRAME_SIZE` — codec frame ceiling in bytes (default: 16 MiB)
/// - `CHAT_LOG_DIR` — directory for a daily-rotating log file, in addition to stdout
///   (default: unset, stdout only)
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub cert_path: String,
    pub key_path: String,
    pub user_db_path: String,
    pub max_concurrent: usize,
    pub heartbeat_timeout_secs: u64,
    pub reaper_interval_secs: u64,
    pub max_frame_size: u32,
    pub log_dir: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8888".to_string(),
            cert_path: "certificates/server-cert.pem".to_string(),
            key_path: "certificates/server-key.pem".to_string(),
            user_db_path: "data/users.json".to_string(),
            max_concurrent: 10,
            heartbeat_timeout_secs: 60,
            reaper_interval_secs: 30,
            max_frame_size: 16 * 1024 * 1024,
            log_dir: None,
        }
    }
}

impl ServerConfig {
    /// Build a config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(val) = env::var("CHAT_BIND_ADDR") {
            config.bind_addr = val;
        }
        if let Ok(val) = env::var("CHAT_CERT_PATH") {
            config.cert_path = val;
        }
        if let Ok(val) = env::var("CHAT_KEY_PATH") {
            config.key_path = val;
        }
        if let Ok(val) = env::var("CHAT_USER_DB_PATH") {
            config.user_db_path = val;
        }
        if let Ok(val) = env::var("CHAT_MAX_CONCURRENT")
            && let Ok(n) = val.parse::<usize>()
        {
            config.max_concurrent = n;
        }
        if let Ok(val) = env::var("CHAT_HEARTBEAT_TIMEOUT_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.heartbeat_timeout_secs = n;
        }
        if let Ok(val) = env::var("CHAT_REAPER_INTERVAL_SECS")
            && let Ok(n) = val.parse::<u64>()
        {
            config.reaper_interval_secs = n;
        }
        if let Ok(val) = env::var("CHAT_MAX_FRAME_SIZE")
            && let Ok(n) = val.parse::<u32>()
        {
            config.max_frame_size = n;
        }
        if let Ok(val) = env::var("CHAT_LOG_DIR") {
            config.log_dir = Some(val);
        }

        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "0.0.0.0:8888");
        assert_eq!(config.max_concurrent, 10);
        assert_eq!(config.heartbeat_timeout_secs, 60);
        assert_eq!(config.reaper_interval_secs, 30);
    }
}
