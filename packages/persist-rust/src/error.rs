//! Error types for the persistence layer.
//!
//! [`StorageError`] is what storage backends and the worker-side handler deal
//! in; it never leaves a worker except as the text of a FAIL packet.
//! [`PersistError`] is what the main side reports to callers.

use statekeep_core::{CodecError, FailureKind, FailureReport, Signal};

/// Errors raised by durable namespaces and synchronous web storages.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("the storage should be initialized before executing other operations")]
    NotInitialized,
    #[error("namespace `{0}` is already initialized")]
    AlreadyInitialized(String),
    #[error("storage quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },
    #[error("malformed command: {0}")]
    Malformed(&'static str),
    #[error("failed to encode value: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode value: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    /// Wraps any backend error as text.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        StorageError::Backend(err.to_string())
    }

    /// Wire classification of this error.
    #[must_use]
    pub fn kind(&self) -> FailureKind {
        match self {
            StorageError::NotInitialized => FailureKind::NotInitialized,
            StorageError::AlreadyInitialized(_) => FailureKind::AlreadyInitialized,
            StorageError::Malformed(_) => FailureKind::Malformed,
            _ => FailureKind::Storage,
        }
    }
}

/// Errors reported by the plugin, the worker pool, and worker channels.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("store `{store_id}` is not initialized")]
    NotInitialized { store_id: String },
    #[error("store `{store_id}` is already initialized")]
    AlreadyInitialized { store_id: String },
    #[error("init failed for store `{store_id}`: {reason}")]
    InitFailure { store_id: String, reason: String },
    #[error("query failed for store `{store_id}`: {reason}")]
    QueryFailure { store_id: String, reason: String },
    #[error("write failed for store `{store_id}`: {reason}")]
    WriteFailure { store_id: String, reason: String },
    #[error("invalid persist config: {0}")]
    InvalidConfig(String),
    #[error("{what} is out of range: {value}")]
    OutOfRange { what: &'static str, value: i64 },
    #[error("request {request_id} to `{worker}` timed out after {timeout_ms}ms")]
    Timeout {
        worker: String,
        request_id: u64,
        timeout_ms: u64,
    },
    #[error("worker `{0}` is disconnected")]
    Disconnected(String),
    #[error("unexpected {header:?} response for store `{store_id}`")]
    UnexpectedResponse { store_id: String, header: Signal },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("storage backend unavailable: {0}")]
    Storage(#[from] StorageError),
    #[error("failed to start storage worker: {0}")]
    Spawn(#[from] std::io::Error),
}

impl PersistError {
    /// Maps a FAIL packet to the error of the stage that sent the command.
    pub(crate) fn from_failure(
        header: Signal,
        store_id: &str,
        report: Option<&FailureReport>,
    ) -> Self {
        let store_id = store_id.to_string();
        match report.map(|r| r.kind) {
            Some(FailureKind::NotInitialized) => return PersistError::NotInitialized { store_id },
            Some(FailureKind::AlreadyInitialized) => {
                return PersistError::AlreadyInitialized { store_id }
            }
            _ => {}
        }
        let reason = report.map_or_else(
            || "no failure report".to_string(),
            |r| format!("{}: {}", r.description, r.reason),
        );
        match header {
            Signal::InitFailure => PersistError::InitFailure { store_id, reason },
            Signal::QueryFail => PersistError::QueryFailure { store_id, reason },
            Signal::WriteFail => PersistError::WriteFailure { store_id, reason },
            other => PersistError::UnexpectedResponse {
                store_id,
                header: other,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_packets_map_to_stage_errors() {
        let report = FailureReport {
            kind: FailureKind::Storage,
            description: "query data fail".to_string(),
            reason: "disk on fire".to_string(),
        };
        let err = PersistError::from_failure(Signal::QueryFail, "cart", Some(&report));
        assert!(matches!(
            &err,
            PersistError::QueryFailure { store_id, reason }
                if store_id == "cart" && reason == "query data fail: disk on fire"
        ));

        let err = PersistError::from_failure(Signal::InitFailure, "cart", None);
        assert!(matches!(err, PersistError::InitFailure { .. }));

        let duplicate = FailureReport {
            kind: FailureKind::AlreadyInitialized,
            description: "can not init the storage object".to_string(),
            reason: "namespace `cart` is already initialized".to_string(),
        };
        let err = PersistError::from_failure(Signal::InitFailure, "cart", Some(&duplicate));
        assert!(matches!(err, PersistError::AlreadyInitialized { store_id } if store_id == "cart"));

        let err = PersistError::from_failure(Signal::GetDetailFail, "cart", None);
        assert!(matches!(
            err,
            PersistError::UnexpectedResponse {
                header: Signal::GetDetailFail,
                ..
            }
        ));
    }

    #[test]
    fn out_of_range_message() {
        let err = PersistError::OutOfRange {
            what: "worker_num",
            value: -1,
        };
        assert_eq!(err.to_string(), "worker_num is out of range: -1");
    }
}
