//! Storage worker threads.
//!
//! Each worker is a named OS thread driving its own current-thread Tokio
//! runtime. It reads `MsgPack` frames from its inbox, runs them through a
//! [`MessageHandler`] one at a time, and writes the encoded responses to its
//! outbox. The loop ends when the inbox is closed and drained.

use std::sync::Arc;
use std::thread::JoinHandle;

use statekeep_core::{decode_packet, encode_packet};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::storage::DurableEngine;
use crate::worker::handler::MessageHandler;

/// Frame sent between the main side and a worker.
pub type Frame = Vec<u8>;

/// Starts a worker thread called `name`.
///
/// # Errors
///
/// Returns the I/O error if the runtime or the thread cannot be created.
pub fn spawn(
    name: String,
    engine: Arc<dyn DurableEngine>,
    inbox: mpsc::UnboundedReceiver<Frame>,
    outbox: mpsc::UnboundedSender<Frame>,
) -> std::io::Result<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    std::thread::Builder::new().name(name).spawn(move || {
        // detect() reads the thread name, so the handler is built in here
        let handler = MessageHandler::new(engine);
        runtime.block_on(run(handler, inbox, outbox));
    })
}

async fn run(
    mut handler: MessageHandler,
    mut inbox: mpsc::UnboundedReceiver<Frame>,
    outbox: mpsc::UnboundedSender<Frame>,
) {
    let thread = handler.environment().thread.clone().unwrap_or_default();
    info!(thread = %thread, "storage worker started");

    while let Some(frame) = inbox.recv().await {
        let packet = match decode_packet(&frame) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(thread = %thread, error = %e, "skipping undecodable frame");
                continue;
            }
        };
        let Some(reply) = handler.handle(packet).await else {
            continue;
        };
        match encode_packet(&reply) {
            Ok(bytes) => {
                if outbox.send(bytes).is_err() {
                    debug!(thread = %thread, "main side closed the outbox");
                    break;
                }
            }
            Err(e) => warn!(thread = %thread, error = %e, "failed to encode response"),
        }
    }

    info!(thread = %thread, worker = %handler.name(), "storage worker stopped");
}
