use anyhow::{Context, Result};
use blackholio_client::config::{Cli, ClientConfig, FileConfig};
use blackholio_client::credentials::CredentialStore;
use blackholio_client::scene::SceneGraph;
use blackholio_client::session::{ArenaSession, SessionSettings};
use blackholio_sdk::loopback::LoopbackModule;
use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // Use JSON logs when BLACKHOLIO_LOG_JSON=1, human-readable otherwise
    let json_logs = std::env::var("BLACKHOLIO_LOG_JSON").unwrap_or_default() == "1";
    let filter = EnvFilter::from_default_env().add_directive("blackholio_client=info".parse()?);
    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .init();
    }

    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(FileConfig::default_path);
    let file = FileConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let config = ClientConfig::merge(&cli, &file);

    // The service runs in-process; the module answers under the configured name.
    let module = LoopbackModule::new(config.module_name.clone()).with_config(cli.world_size);
    tracing::info!(
        module = %module.module_name(),
        world_size = cli.world_size,
        "hosting module in-process"
    );

    let session = ArenaSession::new(
        SessionSettings::from(&config),
        CredentialStore::new(config.prefs_path.clone()),
        SceneGraph::new(),
    );
    let observer = session.clone();
    session.on_subscription_applied().subscribe(move || {
        tracing::info!(
            identity = ?observer.local_identity(),
            "arena synced"
        );
    });
    session.start(&module)?;

    let mut ticker = tokio::time::interval(config.frame_interval());
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                session.update()?;
                let closed = session.connection().is_none_or(|conn| conn.is_closed());
                if closed {
                    tracing::warn!("connection closed");
                    break;
                }
                if cli.exit_after_setup && !session.borders().is_empty() {
                    break;
                }
            }
            _ = &mut shutdown => {
                tracing::info!("shutting down");
                break;
            }
        }
    }

    for segment in session.borders() {
        tracing::info!(
            side = ?segment.side,
            x = segment.center.x,
            y = segment.center.y,
            w = segment.size.x,
            h = segment.size.y,
            "border"
        );
    }
    session.disconnect();
    Ok(())
}
