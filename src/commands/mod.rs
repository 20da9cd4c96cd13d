pub mod analyze;
pub mod once;
pub mod run;

use log::{info, warn};
use tokio::sync::watch;

/// Shutdown signal that flips to true on Ctrl-C.
pub fn shutdown_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received; stopping at the next safe point");
                let _ = tx.send(true);
            }
            Err(err) => {
                warn!("Unable to listen for Ctrl-C: {err}");
                // Keep the sender alive so the loop is not mistaken for stopped.
                std::future::pending::<()>().await;
            }
        }
    });
    rx
}
