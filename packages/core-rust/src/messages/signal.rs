//! Command and response codes carried in every packet header.
//!
//! The integer values are part of the wire format and must stay stable.

use serde::{Deserialize, Serialize};

/// Header code of a [`Packet`](super::Packet).
///
/// Serializes as its integer discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum Signal {
    /// Read a key of a store's namespace.
    Query = 0,
    QuerySuccess = 1,
    QueryFail = 2,
    /// Overwrite a key of a store's namespace.
    Write = 3,
    WriteSuccess = 4,
    WriteFail = 5,
    /// Create the store's namespace on the worker.
    Init = 6,
    InitSuccess = 7,
    InitFailure = 8,
    /// Empty the store's namespace. Answered with the write codes.
    Clear = 9,
    /// Ask for the namespace descriptor (name, version, driver).
    Detail = 10,
    GetDetailSuccess = 11,
    GetDetailFail = 12,
    /// Ask for the worker environment descriptor. The answer reuses this code.
    WorkerDetail = 13,
}

/// Returned when a header integer does not name a [`Signal`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unknown signal code: {0}")]
pub struct UnknownSignal(pub u8);

impl Signal {
    /// Whether this code is sent main side -> worker.
    ///
    /// `WorkerDetail` travels both ways and counts as a command here.
    #[must_use]
    pub fn is_command(self) -> bool {
        matches!(
            self,
            Signal::Query
                | Signal::Write
                | Signal::Init
                | Signal::Clear
                | Signal::Detail
                | Signal::WorkerDetail
        )
    }

    /// The success code a worker answers this command with.
    #[must_use]
    pub fn success_code(self) -> Option<Signal> {
        match self {
            Signal::Query => Some(Signal::QuerySuccess),
            Signal::Write | Signal::Clear => Some(Signal::WriteSuccess),
            Signal::Init => Some(Signal::InitSuccess),
            Signal::Detail => Some(Signal::GetDetailSuccess),
            Signal::WorkerDetail => Some(Signal::WorkerDetail),
            _ => None,
        }
    }

    /// The failure code a worker answers this command with, if it can fail.
    #[must_use]
    pub fn failure_code(self) -> Option<Signal> {
        match self {
            Signal::Query => Some(Signal::QueryFail),
            Signal::Write | Signal::Clear => Some(Signal::WriteFail),
            Signal::Init => Some(Signal::InitFailure),
            Signal::Detail => Some(Signal::GetDetailFail),
            _ => None,
        }
    }

    /// Whether this code reports a failed command.
    #[must_use]
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            Signal::QueryFail | Signal::WriteFail | Signal::InitFailure | Signal::GetDetailFail
        )
    }
}

impl From<Signal> for u8 {
    fn from(signal: Signal) -> Self {
        signal as u8
    }
}

impl TryFrom<u8> for Signal {
    type Error = UnknownSignal;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        Ok(match code {
            0 => Signal::Query,
            1 => Signal::QuerySuccess,
            2 => Signal::QueryFail,
            3 => Signal::Write,
            4 => Signal::WriteSuccess,
            5 => Signal::WriteFail,
            6 => Signal::Init,
            7 => Signal::InitSuccess,
            8 => Signal::InitFailure,
            9 => Signal::Clear,
            10 => Signal::Detail,
            11 => Signal::GetDetailSuccess,
            12 => Signal::GetDetailFail,
            13 => Signal::WorkerDetail,
            other => return Err(UnknownSignal(other)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_integers_are_stable() {
        let expected = [
            (Signal::Query, 0u8),
            (Signal::QuerySuccess, 1),
            (Signal::QueryFail, 2),
            (Signal::Write, 3),
            (Signal::WriteSuccess, 4),
            (Signal::WriteFail, 5),
            (Signal::Init, 6),
            (Signal::InitSuccess, 7),
            (Signal::InitFailure, 8),
            (Signal::Clear, 9),
            (Signal::Detail, 10),
            (Signal::GetDetailSuccess, 11),
            (Signal::GetDetailFail, 12),
            (Signal::WorkerDetail, 13),
        ];
        for (signal, code) in expected {
            assert_eq!(u8::from(signal), code);
            assert_eq!(Signal::try_from(code), Ok(signal));
        }
    }

    #[test]
    fn unknown_code_is_rejected() {
        assert_eq!(Signal::try_from(14), Err(UnknownSignal(14)));
        assert_eq!(Signal::try_from(255), Err(UnknownSignal(255)));
    }

    #[test]
    fn header_serializes_as_integer() {
        let bytes = rmp_serde::to_vec(&Signal::Detail).unwrap();
        let code: u8 = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(code, 10);

        let bad = rmp_serde::to_vec(&99u8).unwrap();
        assert!(rmp_serde::from_slice::<Signal>(&bad).is_err());
    }

    #[test]
    fn clear_reuses_write_vocabulary() {
        assert_eq!(Signal::Clear.success_code(), Some(Signal::WriteSuccess));
        assert_eq!(Signal::Clear.failure_code(), Some(Signal::WriteFail));
        assert_eq!(Signal::WorkerDetail.failure_code(), None);
        assert!(!Signal::QuerySuccess.is_command());
        assert!(Signal::InitFailure.is_failure());
    }
}
