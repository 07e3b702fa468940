use anyhow::Result;
use clap::Parser;
use lib_livefeed::loggers::{init_logging, LoggingOptions};
use tokio::signal;

mod live_logic;
use live_logic::{config, feeds};

#[tokio::main]
async fn main() -> Result<()> {
    // Explicitly install the default crypto provider for rustls
    let _ = rustls::crypto::ring::default_provider().install_default();

    let cli = config::Cli::parse();
    let config = config::load_config(&cli)?;

    let _logging = init_logging(&LoggingOptions {
        app_name: "live_tail".to_string(),
        level: config.logging.level.clone(),
        dir: config.logging.dir.clone(),
        keep_files: config.logging.keep_files,
    })?;

    let (shutdown_tx, _) = tokio::sync::broadcast::channel(1);
    let mut tail_handle = tokio::spawn(feeds::run(config, cli.feed, cli.seed, shutdown_tx.subscribe()));

    // Wait for shutdown signal, or the tail giving up on its own
    tokio::select! {
        _ = signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, initiating shutdown.");
        }
        _ = async {
            #[cfg(unix)]
            {
                match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                    Ok(mut term_signal) => {
                        term_signal.recv().await;
                        tracing::info!("SIGTERM received, initiating shutdown.");
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "cannot listen for SIGTERM");
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                // On non-unix platforms, just wait forever.
                std::future::pending::<()>().await;
            }
        } => {}
        finished = &mut tail_handle => {
            return finished?;
        }
    }

    // Send shutdown signal to the tail
    let _ = shutdown_tx.send(());
    tail_handle.await??;

    tracing::info!("Shutdown complete.");
    Ok(())
}
