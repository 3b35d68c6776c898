//! Unified shutdown handling for pipeline components
//!
//! # Design Principles (KISS)
//! - Single function to set up a Ctrl+C handler with a broadcast channel
//! - Returns (sender, receiver) for component use
//! - Components pass the receiver into their run loops

use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;

/// Shutdown signal type (unit type, just signals "shutdown now")
pub type ShutdownSignal = ();

/// Shutdown channel sender
pub type ShutdownSender = broadcast::Sender<ShutdownSignal>;

/// Shutdown channel receiver
pub type ShutdownReceiver = broadcast::Receiver<ShutdownSignal>;

/// Setup shutdown handling with Ctrl+C signal
///
/// Creates a broadcast channel and spawns a task that sends on Ctrl+C.
/// The caller keeps the sender to trigger shutdown from other places
/// (e.g. a fatal transport error).
pub fn setup_shutdown() -> (ShutdownSender, ShutdownReceiver) {
    let (tx, rx) = broadcast::channel::<ShutdownSignal>(1);

    let tx_clone = tx.clone();
    tokio::spawn(async move {
        signal::ctrl_c().await.expect("Failed to listen for Ctrl+C");
        info!("Ctrl+C received, initiating shutdown");
        let _ = tx_clone.send(());
    });

    (tx, rx)
}
