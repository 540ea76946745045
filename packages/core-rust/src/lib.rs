//! statekeep core: snapshot values, observable state trees, and the message
//! schemas spoken between the main side and storage workers.

pub mod messages;
pub mod state;
pub mod types;

pub use messages::{
    decode_packet, encode_packet, CodecError, FailureKind, FailureReport, Packet, Payload, Signal,
    StoreDescriptor, WorkerEnvironment, DEFAULT_STATE_KEY,
};
pub use state::{merge_into, unwrap, Field, Observable};
pub use types::Value;

#[cfg(test)]
mod tests {
    #[test]
    fn crate_loads() {
        // Empty body: if this test runs, the crate compiles and loads.
    }
}
