//! Message schemas exchanged between the main side and storage workers.
//!
//! Every frame crossing a worker boundary is a [`Packet`] encoded with named
//! `MsgPack` serialization (`rmp_serde::to_vec_named()`) and camelCase field
//! names. Nothing else is shared between the two sides.

pub mod signal;

use serde::{Deserialize, Serialize};

use crate::types::Value;

pub use signal::{Signal, UnknownSignal};

/// Record key used for a store's snapshot when no custom key is configured.
pub const DEFAULT_STATE_KEY: &str = "state";

/// Classifies the cause of a FAIL packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureKind {
    /// The store was never initialized on this worker.
    NotInitialized,
    /// INIT was sent twice for the same store.
    AlreadyInitialized,
    /// The command was missing its store id or payload.
    Malformed,
    /// The storage engine failed.
    #[default]
    Storage,
}

/// Human-readable failure carried by FAIL packets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReport {
    #[serde(default)]
    pub kind: FailureKind,
    /// What the worker was trying to do.
    pub description: String,
    /// The underlying cause, rendered as text.
    pub reason: String,
}

/// Configuration descriptor of a durable namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreDescriptor {
    /// Database name the namespace lives in.
    pub name: String,
    /// Namespace name, equal to the store's persistence key.
    pub store_name: String,
    pub version: u32,
    /// Storage driver backing the namespace (`memory`, `redb`).
    pub driver: String,
    pub description: String,
}

/// Static snapshot of a worker's execution environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerEnvironment {
    /// Worker name, extended with every store the worker initialized.
    pub name: String,
    /// OS thread name the worker runs on.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub thread: Option<String>,
    pub os: String,
    pub arch: String,
    pub family: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub language: Option<String>,
    pub hardware_concurrency: usize,
}

/// Command-specific packet body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Payload {
    /// QUERY: which record of the namespace to read.
    Query { key: String },
    /// WRITE: record key and the snapshot to store under it.
    Write { key: String, data: Value },
    /// QUERY_SUCCESS with a stored record. An absent record has no payload.
    Snapshot(Value),
    /// Any FAIL response.
    Failure(FailureReport),
    /// GET_DETAIL_SUCCESS.
    StoreDescriptor(StoreDescriptor),
    /// WORKER_DETAIL answer.
    WorkerEnvironment(WorkerEnvironment),
}

/// The unit of cross-thread communication.
///
/// Responses carry the `store_id` and `request_id` of the request they
/// answer; the main side uses both to route a response to its listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Packet {
    pub header: Signal,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub store_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub request_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub payload: Option<Payload>,
}

impl Packet {
    /// Creates a command addressed to `store_id` with no payload.
    #[must_use]
    pub fn command(header: Signal, store_id: impl Into<String>) -> Self {
        Self {
            header,
            store_id: Some(store_id.into()),
            request_id: None,
            payload: None,
        }
    }

    #[must_use]
    pub fn init(store_id: impl Into<String>) -> Self {
        Self::command(Signal::Init, store_id)
    }

    #[must_use]
    pub fn query(store_id: impl Into<String>, key: impl Into<String>) -> Self {
        Self::command(Signal::Query, store_id).with_payload(Payload::Query { key: key.into() })
    }

    #[must_use]
    pub fn write(store_id: impl Into<String>, key: impl Into<String>, data: Value) -> Self {
        Self::command(Signal::Write, store_id).with_payload(Payload::Write {
            key: key.into(),
            data,
        })
    }

    #[must_use]
    pub fn with_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    #[must_use]
    pub fn with_request_id(mut self, request_id: u64) -> Self {
        self.request_id = Some(request_id);
        self
    }

    /// Builds the response to `request`, copying its correlation fields.
    #[must_use]
    pub fn reply(request: &Packet, header: Signal, payload: Option<Payload>) -> Self {
        Self {
            header,
            store_id: request.store_id.clone(),
            request_id: request.request_id,
            payload,
        }
    }

    /// Builds a FAIL response to `request`.
    #[must_use]
    pub fn failure(
        request: &Packet,
        header: Signal,
        kind: FailureKind,
        description: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::reply(
            request,
            header,
            Some(Payload::Failure(FailureReport {
                kind,
                description: description.into(),
                reason: reason.to_string(),
            })),
        )
    }

    /// Returns the failure report of a FAIL response.
    #[must_use]
    pub fn failure_report(&self) -> Option<&FailureReport> {
        match &self.payload {
            Some(Payload::Failure(report)) => Some(report),
            _ => None,
        }
    }
}

/// Errors from encoding or decoding a frame.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("failed to encode packet: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("failed to decode packet: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encodes a packet into a `MsgPack` frame.
///
/// # Errors
///
/// Returns [`CodecError::Encode`] if serialization fails.
pub fn encode_packet(packet: &Packet) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(packet)?)
}

/// Decodes a `MsgPack` frame into a packet.
///
/// # Errors
///
/// Returns [`CodecError::Decode`] for malformed frames and unknown headers.
pub fn decode_packet(frame: &[u8]) -> Result<Packet, CodecError> {
    Ok(rmp_serde::from_slice(frame)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_packet_survives_the_wire() {
        let packet = Packet::write(
            "counter",
            DEFAULT_STATE_KEY,
            Value::map([("count", Value::Int(5))]),
        )
        .with_request_id(7);

        let decoded = decode_packet(&encode_packet(&packet).unwrap()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn field_names_are_camel_case() {
        let packet = Packet::init("cart").with_request_id(1);
        let frame = encode_packet(&packet).unwrap();
        let generic: serde_json::Value = rmp_serde::from_slice(&frame).unwrap();

        assert_eq!(generic["header"], 6);
        assert_eq!(generic["storeId"], "cart");
        assert_eq!(generic["requestId"], 1);
        assert!(generic.get("payload").is_none());
    }

    #[test]
    fn reply_copies_correlation_fields() {
        let request = Packet::query("a", "state").with_request_id(42);
        let reply = Packet::reply(&request, Signal::QuerySuccess, None);
        assert_eq!(reply.store_id.as_deref(), Some("a"));
        assert_eq!(reply.request_id, Some(42));
        assert!(reply.payload.is_none());

        let failure = Packet::failure(
            &request,
            Signal::QueryFail,
            FailureKind::Storage,
            "query data fail",
            "boom",
        );
        let report = failure.failure_report().unwrap();
        assert_eq!(report.kind, FailureKind::Storage);
        assert_eq!(report.description, "query data fail");
        assert_eq!(report.reason, "boom");
    }

    #[test]
    fn garbage_frame_is_a_decode_error() {
        let err = decode_packet(&[0xc1, 0x00]).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn unknown_header_is_a_decode_error() {
        #[derive(Serialize)]
        #[serde(rename_all = "camelCase")]
        struct RawPacket {
            header: u8,
            store_id: &'static str,
        }
        let frame = rmp_serde::to_vec_named(&RawPacket {
            header: 42,
            store_id: "x",
        })
        .unwrap();
        assert!(decode_packet(&frame).is_err());
    }
}
