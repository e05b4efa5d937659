pub mod mirror;
pub mod restore;

use anyhow::Result;
use kafka_offsets_mirror_core::{FilterConfig, FilterPolicy, LoopHandle, LoopStats};
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Build the filter policy from a filter file, or the built-in rules.
pub fn load_filter(path: Option<&str>) -> Result<FilterPolicy> {
    let config = match path {
        Some(path) => {
            info!("Loading filter rules from: {}", path);
            FilterConfig::from_file(path)?
        }
        None => FilterConfig::default(),
    };
    let policy = FilterPolicy::from_config(&config)?;
    info!(rules = policy.rules().len(), "Filter policy ready");
    Ok(policy)
}

/// Wait for SIGINT or SIGTERM, stop the loop, then wait for it to drain.
pub async fn run_until_signal(
    handle: LoopHandle,
    mut task: JoinHandle<kafka_offsets_mirror_core::Result<LoopStats>>,
) -> Result<LoopStats> {
    tokio::select! {
        finished = &mut task => return Ok(finished??),
        _ = shutdown_signal() => {
            info!("Shutdown signal received, stopping");
            handle.stop();
        }
    }

    Ok(task.await??)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
