//! Interrupt Handling
//!
//! Bridges SIGINT/SIGTERM to a [`StopFlag`] so the sampling loop can
//! stop between ticks and still run its cleanup path.

use std::io;
use std::thread;

use log::{info, warn};
use tokio::runtime::Builder;
use tokio::signal::unix::{signal, SignalKind};

use super::sampler::StopFlag;

/// Installs the signal listeners and returns immediately.
///
/// Listeners are registered before this function returns, so a signal
/// arriving right after the call is not lost. After the first signal the
/// process keeps running; the owner of the flag decides when to exit.
pub fn install_interrupt_handler(flag: StopFlag) -> io::Result<()> {
    let runtime = Builder::new_current_thread().enable_io().build()?;

    let (mut sigint, mut sigterm) = runtime.block_on(async {
        Ok::<_, io::Error>((
            signal(SignalKind::interrupt())?,
            signal(SignalKind::terminate())?,
        ))
    })?;

    thread::Builder::new()
        .name("interrupt".to_string())
        .spawn(move || {
            runtime.block_on(async {
                tokio::select! {
                    _ = sigint.recv() => info!("Interrupted by user"),
                    _ = sigterm.recv() => info!("Termination requested"),
                }
            });
            flag.trigger();
        })?;

    Ok(())
}

/// Convenience wrapper that logs instead of failing.
///
/// Without a handler an interrupt terminates the process before cleanup,
/// so the run still works but may leave the accounting group behind.
pub fn try_install_interrupt_handler(flag: StopFlag) {
    if let Err(e) = install_interrupt_handler(flag) {
        warn!("Could not install interrupt handler: {}", e);
    }
}
