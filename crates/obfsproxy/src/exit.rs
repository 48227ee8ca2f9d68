//! Turn interrupts and termination signals into shutdown requests.

use obfs_relay::ShutdownHandle;

use anyhow::{Context, Result};
use tracing::{info, warn};

/// Wait for SIGTERM.  It never arrives where there's no such thing.
#[cfg(unix)]
async fn terminated() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sig = signal(SignalKind::terminate())?;
    sig.recv().await;
    Ok(())
}

/// Wait for SIGTERM.  It never arrives where there's no such thing.
#[cfg(not(unix))]
async fn terminated() -> std::io::Result<()> {
    std::future::pending().await
}

/// Watch for signals, and ask `handle` to shut the relay down.
///
/// The first interrupt asks for a graceful shutdown, which waits for
/// open circuits to finish.  A second interrupt, or a termination
/// signal at any point, closes everything at once.
pub(crate) async fn watch_signals(handle: ShutdownHandle) -> Result<()> {
    let term = terminated();
    tokio::pin!(term);
    let mut interrupted = false;

    loop {
        tokio::select! {
            r = tokio::signal::ctrl_c() => {
                r.context("Can't wait for interrupts")?;
                if interrupted {
                    warn!("Interrupted again; closing every connection now.");
                    handle.shutdown(true);
                    return Ok(());
                }
                info!("Interrupted; waiting for open connections to finish.  Interrupt again to exit now.");
                interrupted = true;
                handle.shutdown(false);
            }
            r = &mut term => {
                r.context("Can't wait for termination")?;
                warn!("Terminated; closing every connection now.");
                handle.shutdown(true);
                return Ok(());
            }
        }
    }
}
