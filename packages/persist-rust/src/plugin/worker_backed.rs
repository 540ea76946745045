//! Worker-backed strategy for `indexedDB` stores.
//!
//! Runs INIT -> QUERY -> merge -> subscribe as a background task, then asks
//! the worker for the namespace descriptor and its environment. The store is
//! usable in memory the whole time; [`Store::restored`] resolves once the
//! protocol, diagnostics included, is over.

use std::sync::Arc;
use std::time::{Duration, Instant};

use statekeep_core::{unwrap, Packet, Payload, Signal, Value};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::error::PersistError;
use crate::plugin::PluginInner;
use crate::store::{PersistConfig, RestoreState, Store, WritePolicy};
use crate::worker::WorkerHandle;

/// Assigns a worker to `store` and starts its protocol task.
pub(crate) fn attach(
    inner: &Arc<PluginInner>,
    store: &Arc<Store>,
    config: &PersistConfig,
) -> Result<(), PersistError> {
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
        PersistError::Spawn(std::io::Error::other(
            "worker-backed stores need a Tokio runtime",
        ))
    })?;
    let worker = inner.pool.assign_worker()?;
    let session = Session {
        inner: Arc::clone(inner),
        worker,
        store: Arc::clone(store),
        config: config.clone(),
        namespace: config.resolve_key(store.id()),
    };
    debug!(store_id = store.id(), worker = session.worker.name(), "store assigned to worker");
    runtime.spawn(session.run());
    Ok(())
}

struct Session {
    inner: Arc<PluginInner>,
    worker: Arc<WorkerHandle>,
    store: Arc<Store>,
    config: PersistConfig,
    namespace: String,
}

impl Session {
    async fn run(self) {
        let started = Instant::now();
        let outcome = self.restore().await;
        match &outcome {
            Ok(()) => {
                metrics::histogram!("statekeep_restore_duration_seconds")
                    .record(started.elapsed().as_secs_f64());
                info!(store_id = self.store.id(), namespace = %self.namespace, "store restored");
            }
            Err(e) => {
                metrics::counter!("statekeep_restore_failures_total").increment(1);
                warn!(
                    store_id = self.store.id(),
                    namespace = %self.namespace,
                    error = %e,
                    "restore failed, store stays in memory only"
                );
            }
        }

        self.collect_diagnostics().await;

        let state = if outcome.is_ok() {
            RestoreState::Restored
        } else {
            RestoreState::Degraded
        };
        self.store.set_restore_state(state);
    }

    async fn restore(&self) -> Result<(), PersistError> {
        let load = self
            .inner
            .status
            .lock()
            .begin_load(self.store.id(), self.inner.elapsed_ms());

        self.worker.call(Packet::init(&self.namespace)).await?;
        let payload = self
            .worker
            .call(Packet::query(&self.namespace, self.config.record_key()))
            .await?;

        if let Some(hook) = &self.config.before_restore {
            hook(&*self.store);
        }
        match payload {
            Some(Payload::Snapshot(snapshot)) => {
                self.store.merge(&snapshot, self.config.persist_readonly);
            }
            None => debug!(store_id = self.store.id(), "nothing persisted yet"),
            Some(other) => warn!(store_id = self.store.id(), ?other, "ignoring unexpected query payload"),
        }
        self.inner
            .status
            .lock()
            .finish_load(load, self.inner.elapsed_ms());
        if let Some(hook) = &self.config.after_restore {
            hook(&*self.store);
        }

        self.subscribe_writes();
        Ok(())
    }

    fn subscribe_writes(&self) {
        let sink = WriteSink {
            worker: Arc::clone(&self.worker),
            namespace: self.namespace.clone(),
            key: self.config.record_key().to_string(),
        };
        let include_read_only = self.config.persist_readonly;

        match self.config.write_policy {
            WritePolicy::Fifo => {
                self.store
                    .subscribe(move |state| sink.send(unwrap(state, include_read_only)));
            }
            WritePolicy::Coalesce { debounce } => {
                let (tx, rx) = watch::channel(None);
                let flush = self.inner.flush.subscribe();
                let writer = tokio::spawn(coalesce(rx, flush, debounce, sink));
                self.inner.writers.lock().push(writer);
                self.store.subscribe(move |state| {
                    tx.send_replace(Some(unwrap(state, include_read_only)));
                });
            }
        }
    }

    async fn collect_diagnostics(&self) {
        let (detail, environment) = tokio::join!(
            self.worker.call(Packet::command(Signal::Detail, &self.namespace)),
            self.worker
                .call(Packet::command(Signal::WorkerDetail, &self.namespace)),
        );

        let mut status = self.inner.status.lock();
        match detail {
            Ok(Some(Payload::StoreDescriptor(descriptor))) => {
                status.register_store_options.push(descriptor);
            }
            Ok(other) => debug!(namespace = %self.namespace, ?other, "no store descriptor"),
            Err(e) => debug!(namespace = %self.namespace, error = %e, "store descriptor unavailable"),
        }
        match environment {
            Ok(Some(Payload::WorkerEnvironment(environment))) => {
                status.worker_environment_simple_desc.push(environment);
            }
            Ok(other) => debug!(namespace = %self.namespace, ?other, "no worker environment"),
            Err(e) => debug!(namespace = %self.namespace, error = %e, "worker environment unavailable"),
        }
    }
}

/// Fire-and-forget WRITE delivery for one store.
struct WriteSink {
    worker: Arc<WorkerHandle>,
    namespace: String,
    key: String,
}

impl WriteSink {
    fn send(&self, snapshot: Value) {
        match self
            .worker
            .post(&Packet::write(&self.namespace, &self.key, snapshot))
        {
            Ok(()) => metrics::counter!("statekeep_writes_sent_total").increment(1),
            Err(e) => warn!(namespace = %self.namespace, error = %e, "failed to send write"),
        }
    }
}

/// Sends the latest snapshot once `debounce` passes without a newer one.
///
/// A flush signal cuts the pending window short: the latest snapshot, if
/// any, is sent right away and the writer stops.
async fn coalesce(
    mut rx: watch::Receiver<Option<Value>>,
    mut flush: watch::Receiver<bool>,
    debounce: Duration,
    sink: WriteSink,
) {
    let mut open = true;
    while open {
        tokio::select! {
            biased;
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
            _ = flush.wait_for(|flushing| *flushing) => break,
        }
        loop {
            tokio::select! {
                biased;
                changed = tokio::time::timeout(debounce, rx.changed()) => match changed {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        open = false;
                        break;
                    }
                    Err(_) => break,
                },
                _ = flush.wait_for(|flushing| *flushing) => {
                    open = false;
                    break;
                }
            }
        }
        let latest = rx.borrow_and_update().clone();
        if let Some(snapshot) = latest {
            sink.send(snapshot);
        }
    }
    debug!(namespace = %sink.namespace, "coalescing writer stopped");
}
