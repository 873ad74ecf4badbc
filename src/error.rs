use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::task::JoinError;

use crate::backup::{BackupError, EntropyError};
use crate::channel::DecryptError;
use crate::conversation::{CeremonyKind, FormatError};
use crate::relay::RelayError;

/// Boxed error returned by a [`Party`](crate::party::Party) implementation
pub type BoxedError = Box<dyn std::error::Error + Send + Sync>;

/// Error of any operation exposed by this crate
///
/// Every variant maps onto a stable [`ErrorCode`] (see [`Error::code`]) which is what callers
/// should match on when reporting failures to the end user.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{0} ceremony is already running")]
    Busy(CeremonyKind),
    #[error("pairing is not initialized")]
    PairingNotInitialized,
    #[error("pairing has not been completed")]
    NotPaired,
    #[error("no pairing is waiting for confirmation")]
    NoPendingPairing,
    #[error("backup data is invalid")]
    InvalidBackupData(
        #[source]
        #[from]
        BackupError,
    ),
    #[error("stored pairing data is invalid: {0}")]
    InvalidStoredPairing(&'static str),
    #[error("counterparty rejected the {0} ceremony")]
    CounterpartyRejected(CeremonyKind),
    #[error("{kind} conversation expired {overdue:?} ago")]
    Expired { kind: CeremonyKind, overdue: Duration },
    #[error("relay")]
    Relay(
        #[source]
        #[from]
        RelayError,
    ),
    #[error("ceremony engine failed at round {round}")]
    Adapter {
        round: u32,
        #[source]
        reason: AdapterError,
    },
    #[error("message hash must be 32 bytes long, got {0} bytes")]
    InvalidMessageHashLength(usize),
    #[error("invalid message format")]
    InvalidMessageFormat(
        #[source]
        #[from]
        FormatError,
    ),
    #[error("couldn't decrypt counterparty message")]
    Decrypt(
        #[source]
        #[from]
        DecryptError,
    ),
    #[error("device entropy is unavailable")]
    Entropy(
        #[source]
        #[from]
        EntropyError,
    ),
    #[error("counterparty failed to store the backup")]
    BackupFailed,
    #[error("bug occurred")]
    Internal(
        #[source]
        #[from]
        Bug,
    ),
}

/// Reason why the ceremony engine failed
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("party returned an error")]
    Party(#[source] BoxedError),
    #[error("party produced neither a message nor an output")]
    Stalled,
    #[error("advance panicked")]
    Panicked(#[source] JoinError),
}

/// Failures which can only happen due to a bug in this crate
#[derive(Debug, Error)]
pub enum Bug {
    #[error("round driver was already used to run a ceremony")]
    Exhausted,
    #[error("serialize own document")]
    SerializeDocument(#[source] serde_json::Error),
    #[error("serialize distributed key")]
    SerializeKey(#[source] serde_json::Error),
}

/// Stable, enumerable error code
///
/// Values never change between releases, so they can be persisted or sent over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    Relay = 1,
    PairingNotInitialized = 3,
    InvalidBackupData = 4,
    InvalidStoredPairing = 5,
    NotPaired = 7,
    Busy = 8,
    Adapter = 9,
    CounterpartyRejected = 10,
    InvalidMessageHashLength = 12,
    Internal = 19,
    BackupFailed = 20,
    Expired = 21,
    InvalidMessageFormat = 22,
    Decrypt = 23,
    Entropy = 24,
    NoPendingPairing = 25,
}

impl Error {
    pub fn code(&self) -> ErrorCode {
        match self {
            Error::Busy(_) => ErrorCode::Busy,
            Error::PairingNotInitialized => ErrorCode::PairingNotInitialized,
            Error::NotPaired => ErrorCode::NotPaired,
            Error::NoPendingPairing => ErrorCode::NoPendingPairing,
            Error::InvalidBackupData(_) => ErrorCode::InvalidBackupData,
            Error::InvalidStoredPairing(_) => ErrorCode::InvalidStoredPairing,
            Error::CounterpartyRejected(_) => ErrorCode::CounterpartyRejected,
            Error::Expired { .. } => ErrorCode::Expired,
            Error::Relay(_) => ErrorCode::Relay,
            Error::Adapter { .. } => ErrorCode::Adapter,
            Error::InvalidMessageHashLength(_) => ErrorCode::InvalidMessageHashLength,
            Error::InvalidMessageFormat(_) => ErrorCode::InvalidMessageFormat,
            Error::Decrypt(_) => ErrorCode::Decrypt,
            Error::Entropy(_) => ErrorCode::Entropy,
            Error::BackupFailed => ErrorCode::BackupFailed,
            Error::Internal(_) => ErrorCode::Internal,
        }
    }

    /// Only [`Error::Busy`] may succeed if the same call is simply repeated later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Busy(_))
    }

    /// Serializable `{code, message}` pair to hand over to the end user
    pub fn report(&self) -> ErrorReport {
        ErrorReport {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

impl ErrorCode {
    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.as_u16())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorReport {
    pub code: ErrorCode,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_serializes_numeric_code() {
        let report = Error::Busy(CeremonyKind::Keygen).report();
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["code"], 8);
        assert_eq!(json["message"], "keygen ceremony is already running");
    }

    #[test]
    fn only_busy_is_retryable() {
        assert!(Error::Busy(CeremonyKind::Sign).is_retryable());
        assert!(!Error::CounterpartyRejected(CeremonyKind::Sign).is_retryable());
        assert!(!Error::NotPaired.is_retryable());
    }
}
