//! Queue consumer engine: worker loops, stale guard, pool supervision.

pub mod guard;
pub mod pool;
pub mod worker;

pub use guard::StaleGuard;
pub use pool::{ShutdownHandle, WorkerPool};
pub use worker::Worker;

use std::time::Duration;

use tokio::sync::watch;

/// Sleep for `duration` unless shutdown is signalled first.
/// Returns true if the caller should stop.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, duration: Duration) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        // The only transition is false -> true; a dropped sender also means stop.
        _ = shutdown.changed() => true,
    }
}
