//! SIGINT/SIGTERM handling
//!
//! The first signal requests a graceful drain of the worker pool. A second
//! one exits immediately; abandoned jobs come back when their leases expire.

use futures::StreamExt;
use repoctx_indexing::ShutdownHandle;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use tokio::task::JoinHandle;

/// Exit status used when a second signal forces the process down
const FORCED_EXIT_CODE: i32 = 130;

/// Spawn the listener that turns signals into a pool shutdown
///
/// # Errors
/// Returns an error if the signal handlers cannot be registered
pub fn spawn_shutdown_listener(shutdown: ShutdownHandle) -> anyhow::Result<JoinHandle<()>> {
    let mut signals = Signals::new([SIGINT, SIGTERM])?;

    Ok(tokio::spawn(async move {
        let mut received = 0u32;
        while let Some(signal) = signals.next().await {
            received = received.saturating_add(1);
            if received == 1 {
                tracing::info!(signal, "Shutdown signal received, draining worker pool");
                shutdown.shutdown();
            } else {
                tracing::warn!(signal, "Second shutdown signal received, exiting now");
                std::process::exit(FORCED_EXIT_CODE);
            }
        }
    }))
}
