//! Shutdown signal helpers.

use tokio::sync::watch;

/// Resolve once shutdown has been requested.
///
/// A dropped sender counts as a request, so loops cannot outlive their owner.
pub async fn wait_for_shutdown(shutdown_rx: &mut watch::Receiver<bool>) {
    let _ = shutdown_rx.wait_for(|stop| *stop).await;
}
