use anyhow::Context;
use embercast::config::ServerConfig;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::from_env();

    // `_log_guard` must outlive the program: it owns the non-blocking writer's background
    // flush thread. The Python original logs to both a rotating file and stdout; this is
    // that split, built the way the pack's telemetry crates build it (registry + layered
    // `fmt` subscribers) rather than reintroducing `println!`.
    let _log_guard = config.log_dir.as_ref().map(|dir| {
        let appender = tracing_appender::rolling::daily(dir, "embercast.log");
        tracing_appender::non_blocking(appender)
    });

    let registry = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer());
    if let Some((file_writer, _)) = &_log_guard {
        registry
            .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_writer.clone()))
            .init();
    } else {
        registry.init();
    }

    let server = embercast::build_with_config(config).context("failed to initialize server")?;

    server
        .run(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("server exited with an error")?;

    Ok(())
}
