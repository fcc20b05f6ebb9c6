//! Shutdown signal handling
//!
//! Controllers park their outputs on cancellation, so the process turns
//! SIGINT and SIGTERM into one cooperative stop instead of letting the
//! runtime tear tasks down mid-write.

use tracing::{info, warn};

/// Suspend until the process is asked to stop (Ctrl+C, or SIGTERM on Unix).
pub async fn wait_for_shutdown() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let term = match signal(SignalKind::terminate()) {
            Ok(sig) => Some(sig),
            Err(e) => {
                warn!(
                    "Failed to install SIGTERM handler: {}. Only Ctrl+C will stop the service",
                    e
                );
                None
            }
        };

        tokio::select! {
            _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C"),
            _ = async {
                match term {
                    Some(mut sig) => { sig.recv().await; }
                    None => std::future::pending::<()>().await,
                }
            } => info!("Received SIGTERM"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received Ctrl+C");
    }
}
