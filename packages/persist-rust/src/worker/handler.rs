//! Worker-side message handler.
//!
//! Owns the `store id -> adapter` map of one worker and turns each command
//! packet into exactly one response packet tagged with the command's store id
//! and request id. Nothing in here panics on input: malformed commands are
//! answered with the command's FAIL code, and codes that are not commands are
//! logged and dropped.

use std::collections::HashMap;
use std::sync::Arc;

use statekeep_core::{Packet, Payload, Signal, WorkerEnvironment};
use tracing::{debug, info, warn};

use crate::error::StorageError;
use crate::storage::{DurableEngine, DurableStoreAdapter};
use crate::worker::environment;

const THREAD_SUFFIX: &str = " --- THREAD";

/// Executes storage commands for the stores assigned to one worker.
pub struct MessageHandler {
    engine: Arc<dyn DurableEngine>,
    adapters: HashMap<String, DurableStoreAdapter>,
    environment: WorkerEnvironment,
}

impl MessageHandler {
    /// Creates a handler for the current thread.
    #[must_use]
    pub fn new(engine: Arc<dyn DurableEngine>) -> Self {
        Self::with_environment(engine, environment::detect())
    }

    #[must_use]
    pub fn with_environment(engine: Arc<dyn DurableEngine>, environment: WorkerEnvironment) -> Self {
        Self {
            engine,
            adapters: HashMap::new(),
            environment,
        }
    }

    /// Worker name, derived from the stores it serves.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.environment.name
    }

    #[must_use]
    pub fn environment(&self) -> &WorkerEnvironment {
        &self.environment
    }

    /// Whether `store_id` has been initialized on this worker.
    #[must_use]
    pub fn serves(&self, store_id: &str) -> bool {
        self.adapters.contains_key(store_id)
    }

    /// Handles one command. Returns `None` only for packets that are not commands.
    pub async fn handle(&mut self, packet: Packet) -> Option<Packet> {
        let header = packet.header;
        let Some(success) = header.success_code().filter(|_| header.is_command()) else {
            warn!(?header, store_id = ?packet.store_id, "dropping non-command packet");
            return None;
        };

        if header == Signal::WorkerDetail {
            let payload = Payload::WorkerEnvironment(self.environment.clone());
            return Some(Packet::reply(&packet, Signal::WorkerDetail, Some(payload)));
        }

        match self.execute(&packet).await {
            Ok(payload) => {
                debug!(?header, store_id = ?packet.store_id, "command done");
                Some(Packet::reply(&packet, success, payload))
            }
            Err(err) => {
                let failure = header.failure_code().unwrap_or(Signal::WriteFail);
                warn!(?header, store_id = ?packet.store_id, error = %err, "command failed");
                Some(Packet::failure(
                    &packet,
                    failure,
                    err.kind(),
                    describe_failure(header),
                    &err,
                ))
            }
        }
    }

    async fn execute(&mut self, packet: &Packet) -> Result<Option<Payload>, StorageError> {
        let store_id = packet
            .store_id
            .as_deref()
            .ok_or(StorageError::Malformed("missing store id"))?;

        match (packet.header, &packet.payload) {
            (Signal::Init, _) => {
                self.init(store_id).await?;
                Ok(None)
            }
            (Signal::Query, Some(Payload::Query { key })) => {
                let value = self.adapter(store_id)?.get(key).await?;
                Ok(value.map(Payload::Snapshot))
            }
            (Signal::Query, _) => Err(StorageError::Malformed("QUERY without a key")),
            (Signal::Write, Some(Payload::Write { key, data })) => {
                self.adapter(store_id)?.set(key, data).await?;
                Ok(None)
            }
            (Signal::Write, _) => Err(StorageError::Malformed("WRITE without data")),
            (Signal::Clear, _) => {
                self.adapter(store_id)?.clear().await?;
                Ok(None)
            }
            (Signal::Detail, _) => {
                let descriptor = self.adapter(store_id)?.describe()?;
                Ok(Some(Payload::StoreDescriptor(descriptor)))
            }
            _ => Err(StorageError::Malformed("unsupported command")),
        }
    }

    async fn init(&mut self, store_id: &str) -> Result<(), StorageError> {
        if self.adapters.contains_key(store_id) {
            return Err(StorageError::AlreadyInitialized(store_id.to_string()));
        }
        let mut adapter = DurableStoreAdapter::new(Arc::clone(&self.engine));
        adapter.init(store_id).await?;
        self.adapters.insert(store_id.to_string(), adapter);
        self.rename(store_id);
        info!(store_id, worker = %self.environment.name, "store initialized");
        Ok(())
    }

    fn rename(&mut self, store_id: &str) {
        let name = &mut self.environment.name;
        *name = if name.is_empty() {
            format!("{store_id}{THREAD_SUFFIX}")
        } else {
            format!("{store_id}, {name}")
        };
    }

    fn adapter(&self, store_id: &str) -> Result<&DurableStoreAdapter, StorageError> {
        self.adapters
            .get(store_id)
            .ok_or(StorageError::NotInitialized)
    }
}

fn describe_failure(header: Signal) -> &'static str {
    match header {
        Signal::Init => "can not init the storage object",
        Signal::Query => "query data fail",
        Signal::Write => "write data fail",
        Signal::Clear => "clear data fail",
        Signal::Detail => "get detail fail",
        _ => "command fail",
    }
}

#[cfg(test)]
mod tests {
    use statekeep_core::{FailureKind, Value, DEFAULT_STATE_KEY};

    use super::*;
    use crate::storage::MemoryEngine;

    fn handler() -> MessageHandler {
        MessageHandler::new(Arc::new(MemoryEngine::new()))
    }

    async fn call(handler: &mut MessageHandler, packet: Packet) -> Packet {
        handler.handle(packet).await.expect("commands are always answered")
    }

    #[tokio::test]
    async fn init_then_query_empty_namespace() {
        let mut handler = handler();

        let reply = call(&mut handler, Packet::init("cart").with_request_id(1)).await;
        assert_eq!(reply.header, Signal::InitSuccess);
        assert_eq!(reply.store_id.as_deref(), Some("cart"));
        assert_eq!(reply.request_id, Some(1));

        let reply = call(&mut handler, Packet::query("cart", DEFAULT_STATE_KEY)).await;
        assert_eq!(reply.header, Signal::QuerySuccess);
        assert!(reply.payload.is_none());
    }

    #[tokio::test]
    async fn write_then_query_returns_snapshot() {
        let mut handler = handler();
        call(&mut handler, Packet::init("counter")).await;

        let snapshot = Value::map([("count", Value::Int(5))]);
        let reply = call(
            &mut handler,
            Packet::write("counter", DEFAULT_STATE_KEY, snapshot.clone()),
        )
        .await;
        assert_eq!(reply.header, Signal::WriteSuccess);

        let reply = call(&mut handler, Packet::query("counter", DEFAULT_STATE_KEY)).await;
        assert_eq!(reply.payload, Some(Payload::Snapshot(snapshot)));
    }

    #[tokio::test]
    async fn double_init_fails_once() {
        let mut handler = handler();
        let first = call(&mut handler, Packet::init("cart")).await;
        let second = call(&mut handler, Packet::init("cart")).await;

        assert_eq!(first.header, Signal::InitSuccess);
        assert_eq!(second.header, Signal::InitFailure);
        let report = second.failure_report().unwrap();
        assert_eq!(report.kind, FailureKind::AlreadyInitialized);
        assert_eq!(report.description, "can not init the storage object");
    }

    #[tokio::test]
    async fn commands_before_init_fail_not_initialized() {
        let mut handler = handler();
        for (packet, expected) in [
            (Packet::query("x", DEFAULT_STATE_KEY), Signal::QueryFail),
            (Packet::write("x", DEFAULT_STATE_KEY, Value::Null), Signal::WriteFail),
            (Packet::command(Signal::Clear, "x"), Signal::WriteFail),
            (Packet::command(Signal::Detail, "x"), Signal::GetDetailFail),
        ] {
            let reply = call(&mut handler, packet).await;
            assert_eq!(reply.header, expected);
            assert_eq!(
                reply.failure_report().map(|r| r.kind),
                Some(FailureKind::NotInitialized)
            );
        }
    }

    #[tokio::test]
    async fn clear_answers_with_write_codes() {
        let mut handler = handler();
        call(&mut handler, Packet::init("cart")).await;
        call(
            &mut handler,
            Packet::write("cart", DEFAULT_STATE_KEY, Value::map([("n", Value::Int(1))])),
        )
        .await;

        let reply = call(&mut handler, Packet::command(Signal::Clear, "cart")).await;
        assert_eq!(reply.header, Signal::WriteSuccess);
        assert!(handler.serves("cart"));

        let reply = call(&mut handler, Packet::query("cart", DEFAULT_STATE_KEY)).await;
        assert!(reply.payload.is_none());
    }

    #[tokio::test]
    async fn detail_answers_once_with_descriptor() {
        let mut handler = handler();
        call(&mut handler, Packet::init("cart")).await;

        let reply = call(&mut handler, Packet::command(Signal::Detail, "cart")).await;
        assert_eq!(reply.header, Signal::GetDetailSuccess);
        let Some(Payload::StoreDescriptor(descriptor)) = reply.payload else {
            panic!("expected a store descriptor, got {:?}", reply.payload);
        };
        assert_eq!(descriptor.store_name, "cart");
        assert_eq!(descriptor.version, 1);
    }

    #[tokio::test]
    async fn worker_name_tracks_initialized_stores() {
        let mut handler = handler();
        assert_eq!(handler.name(), "");
        call(&mut handler, Packet::init("a")).await;
        assert_eq!(handler.name(), "a --- THREAD");
        call(&mut handler, Packet::init("b")).await;
        assert_eq!(handler.name(), "b, a --- THREAD");

        let reply = call(&mut handler, Packet::command(Signal::WorkerDetail, "b")).await;
        assert_eq!(reply.header, Signal::WorkerDetail);
        assert_eq!(reply.store_id.as_deref(), Some("b"));
        let Some(Payload::WorkerEnvironment(env)) = reply.payload else {
            panic!("expected a worker environment");
        };
        assert_eq!(env.name, "b, a --- THREAD");
    }

    #[tokio::test]
    async fn malformed_commands_are_answered_with_fail_codes() {
        let mut handler = handler();
        call(&mut handler, Packet::init("cart")).await;

        let missing_key = Packet::command(Signal::Query, "cart");
        let reply = call(&mut handler, missing_key).await;
        assert_eq!(reply.header, Signal::QueryFail);
        assert_eq!(
            reply.failure_report().map(|r| r.kind),
            Some(FailureKind::Malformed)
        );

        let mut anonymous = Packet::init("ignored");
        anonymous.store_id = None;
        let reply = call(&mut handler, anonymous).await;
        assert_eq!(reply.header, Signal::InitFailure);
        assert!(reply.store_id.is_none());
    }

    #[tokio::test]
    async fn response_codes_are_dropped() {
        let mut handler = handler();
        assert!(handler
            .handle(Packet::command(Signal::QuerySuccess, "cart"))
            .await
            .is_none());
        assert!(handler
            .handle(Packet::command(Signal::InitFailure, "cart"))
            .await
            .is_none());
    }
}
