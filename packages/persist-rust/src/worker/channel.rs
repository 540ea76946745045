//! Main-side handle to one storage worker.
//!
//! Outgoing packets are encoded and pushed onto the worker's inbox. A
//! dispatcher task decodes everything the worker sends back and routes each
//! response to the request that is waiting for it, matched by request id and
//! verified against the store id. A waiting request owns a [`PendingGuard`],
//! so its listener is removed whether it is answered, times out, or is
//! cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use statekeep_core::{decode_packet, encode_packet, Packet, Payload, Signal};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::error::PersistError;
use crate::storage::DurableEngine;
use crate::worker::thread::{self, Frame};

struct PendingRequest {
    store_id: Option<String>,
    reply: oneshot::Sender<Packet>,
}

type PendingMap = Arc<Mutex<HashMap<u64, PendingRequest>>>;

/// Removes a request's listener when the request goes away.
struct PendingGuard<'a> {
    pending: &'a Mutex<HashMap<u64, PendingRequest>>,
    request_id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.request_id);
    }
}

/// Typed request/response channel to one worker thread.
pub struct WorkerHandle {
    name: String,
    tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    pending: PendingMap,
    next_request_id: AtomicU64,
    request_timeout: Duration,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
    dispatcher: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl WorkerHandle {
    /// Starts a worker thread named `name` and its dispatcher task on `runtime`.
    ///
    /// # Errors
    ///
    /// [`PersistError::Spawn`] if the thread cannot be started.
    pub fn spawn(
        name: String,
        engine: Arc<dyn DurableEngine>,
        request_timeout: Duration,
        runtime: &tokio::runtime::Handle,
    ) -> Result<Self, PersistError> {
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let join = thread::spawn(name.clone(), engine, in_rx, out_tx)?;

        let pending: PendingMap = Arc::default();
        let dispatcher = runtime.spawn(dispatch(name.clone(), out_rx, Arc::clone(&pending)));

        Ok(Self {
            name,
            tx: Mutex::new(Some(in_tx)),
            pending,
            next_request_id: AtomicU64::new(1),
            request_timeout,
            thread: Mutex::new(Some(join)),
            dispatcher: Mutex::new(Some(dispatcher)),
        })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of requests still waiting for an answer.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.pending.lock().len()
    }

    /// Sends `packet` without waiting for an answer.
    ///
    /// # Errors
    ///
    /// [`PersistError::Codec`] if the packet cannot be encoded,
    /// [`PersistError::Disconnected`] if the worker is gone.
    pub fn post(&self, packet: &Packet) -> Result<(), PersistError> {
        let frame = encode_packet(packet)?;
        let tx = self.tx.lock();
        let sent = tx.as_ref().map(|tx| tx.send(frame));
        match sent {
            Some(Ok(())) => Ok(()),
            _ => Err(PersistError::Disconnected(self.name.clone())),
        }
    }

    /// Sends `packet` and waits for the matching response.
    ///
    /// # Errors
    ///
    /// [`PersistError::Timeout`] if no response arrives within the request
    /// timeout, [`PersistError::Disconnected`] if the worker goes away first.
    pub async fn request(&self, packet: Packet) -> Result<Packet, PersistError> {
        let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
        let (reply_tx, reply_rx) = oneshot::channel();
        self.pending.lock().insert(
            request_id,
            PendingRequest {
                store_id: packet.store_id.clone(),
                reply: reply_tx,
            },
        );
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id,
        };

        self.post(&packet.with_request_id(request_id))?;

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(PersistError::Disconnected(self.name.clone())),
            Err(_) => Err(PersistError::Timeout {
                worker: self.name.clone(),
                request_id,
                timeout_ms: u64::try_from(self.request_timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }

    /// Sends `packet` and expects the command's success code back.
    ///
    /// # Errors
    ///
    /// The stage error mapped from a FAIL response, or any error of
    /// [`request`](Self::request).
    pub async fn call(&self, packet: Packet) -> Result<Option<Payload>, PersistError> {
        let header = packet.header;
        let store_id = packet.store_id.clone().unwrap_or_default();
        let reply = self.request(packet).await?;
        if Some(reply.header) == header.success_code() {
            return Ok(reply.payload);
        }
        Err(PersistError::from_failure(
            reply.header,
            &store_id,
            reply.failure_report(),
        ))
    }

    /// Closes the inbox, lets the worker drain it, and joins the thread.
    pub async fn shutdown(&self) {
        self.tx.lock().take();
        let join = self.thread.lock().take();
        if let Some(join) = join {
            let joined = tokio::task::spawn_blocking(move || join.join()).await;
            if !matches!(joined, Ok(Ok(()))) {
                warn!(worker = %self.name, "failed to join storage worker");
            }
        }
        let dispatcher = self.dispatcher.lock().take();
        if let Some(dispatcher) = dispatcher {
            let _ = dispatcher.await;
        }
    }
}

impl std::fmt::Debug for WorkerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("name", &self.name)
            .field("pending", &self.pending_requests())
            .finish_non_exhaustive()
    }
}

async fn dispatch(name: String, mut rx: mpsc::UnboundedReceiver<Frame>, pending: PendingMap) {
    while let Some(frame) = rx.recv().await {
        match decode_packet(&frame) {
            Ok(packet) => route(&name, &pending, packet),
            Err(e) => warn!(worker = %name, error = %e, "dropping undecodable response"),
        }
    }
    // wakes every waiter with a closed channel
    pending.lock().clear();
    debug!(worker = %name, "response dispatcher stopped");
}

fn route(name: &str, pending: &Mutex<HashMap<u64, PendingRequest>>, packet: Packet) {
    if let Some(request_id) = packet.request_id {
        let mut pending = pending.lock();
        let matches = pending
            .get(&request_id)
            .is_some_and(|p| p.store_id == packet.store_id);
        if matches {
            if let Some(waiter) = pending.remove(&request_id) {
                let _ = waiter.reply.send(packet);
            }
            return;
        }
    }

    match packet.header {
        Signal::WriteSuccess => {
            debug!(worker = %name, store_id = ?packet.store_id, "write persisted");
        }
        Signal::WriteFail => {
            metrics::counter!("statekeep_write_failures_total").increment(1);
            let reason = packet
                .failure_report()
                .map_or_else(String::new, |r| format!("{}: {}", r.description, r.reason));
            warn!(worker = %name, store_id = ?packet.store_id, %reason, "write failed");
        }
        header => {
            debug!(
                worker = %name,
                ?header,
                store_id = ?packet.store_id,
                request_id = ?packet.request_id,
                "response matched no pending request"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use statekeep_core::{Value, DEFAULT_STATE_KEY};

    use super::*;
    use crate::storage::MemoryEngine;

    fn worker(timeout: Duration) -> WorkerHandle {
        WorkerHandle::spawn(
            "statekeep-worker-0".to_string(),
            Arc::new(MemoryEngine::new()),
            timeout,
            &tokio::runtime::Handle::current(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn request_gets_its_own_response() {
        let worker = worker(Duration::from_secs(5));
        let reply = worker.request(Packet::init("cart")).await.unwrap();
        assert_eq!(reply.header, Signal::InitSuccess);
        assert_eq!(reply.store_id.as_deref(), Some("cart"));
        assert_eq!(worker.pending_requests(), 0);
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn call_maps_failures_to_errors() {
        let worker = worker(Duration::from_secs(5));
        worker.call(Packet::init("cart")).await.unwrap();

        let err = worker.call(Packet::init("cart")).await.unwrap_err();
        assert!(matches!(err, PersistError::AlreadyInitialized { store_id } if store_id == "cart"));

        let err = worker
            .call(Packet::query("nope", DEFAULT_STATE_KEY))
            .await
            .unwrap_err();
        assert!(matches!(err, PersistError::NotInitialized { store_id } if store_id == "nope"));
        worker.shutdown().await;
    }

    #[tokio::test]
    async fn concurrent_requests_for_different_stores_do_not_cross() {
        let worker = worker(Duration::from_secs(5));
        worker.call(Packet::init("a")).await.unwrap();
        worker.call(Packet::init("b")).await.unwrap();
        worker.post(&Packet::write("a", DEFAULT_STATE_KEY, Value::from("A"))).unwrap();
        worker.post(&Packet::write("b", DEFAULT_STATE_KEY, Value::from("B"))).unwrap();

        let (a, b) = tokio::join!(
            worker.call(Packet::query("a", DEFAULT_STATE_KEY)),
            worker.call(Packet::query("b", DEFAULT_STATE_KEY)),
        );
        assert_eq!(a.unwrap(), Some(Payload::Snapshot(Value::from("A"))));
        assert_eq!(b.unwrap(), Some(Payload::Snapshot(Value::from("B"))));
        worker.shutdown().await;
    }

    #[test]
    fn mismatched_store_id_is_not_delivered() {
        let pending: PendingMap = Arc::default();
        let (tx, mut rx) = oneshot::channel();
        pending.lock().insert(
            7,
            PendingRequest {
                store_id: Some("a".to_string()),
                reply: tx,
            },
        );

        let mut stray = Packet::command(Signal::QuerySuccess, "b");
        stray.request_id = Some(7);
        route("w", &pending, stray);
        assert!(rx.try_recv().is_err());
        assert_eq!(pending.lock().len(), 1);

        let mut answer = Packet::command(Signal::QuerySuccess, "a");
        answer.request_id = Some(7);
        route("w", &pending, answer);
        assert_eq!(rx.try_recv().unwrap().store_id.as_deref(), Some("a"));
        assert!(pending.lock().is_empty());
    }

    #[tokio::test]
    async fn requests_after_shutdown_are_disconnected() {
        let worker = worker(Duration::from_secs(5));
        worker.shutdown().await;
        let err = worker.request(Packet::init("cart")).await.unwrap_err();
        assert!(matches!(err, PersistError::Disconnected(_)));
        assert_eq!(worker.pending_requests(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn unanswered_request_times_out_and_cleans_up() {
        let pending: PendingMap = Arc::default();
        let (tx, _rx) = mpsc::unbounded_channel();
        let handle = WorkerHandle {
            name: "silent".to_string(),
            tx: Mutex::new(Some(tx)),
            pending,
            next_request_id: AtomicU64::new(1),
            request_timeout: Duration::from_millis(50),
            thread: Mutex::new(None),
            dispatcher: Mutex::new(None),
        };

        let err = handle.request(Packet::init("cart")).await.unwrap_err();
        assert!(matches!(
            err,
            PersistError::Timeout {
                request_id: 1,
                timeout_ms: 50,
                ..
            }
        ));
        assert_eq!(handle.pending_requests(), 0);
    }
}
