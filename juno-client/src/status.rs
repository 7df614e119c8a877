//! Client-facing operation outcomes and their mapping from store statuses.

use std::fmt;

use juno_common::OpStatus;

/// Outcome of a completed exchange. Branch on it; it is data, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationStatus {
    Success,
    /// Get, update or delete on an absent key.
    NotFound,
    /// Create on a key that already exists.
    UniqueKeyViolation,
    /// Compare-and-set lost the race; re-read before trying again.
    VersionConflict,
    BadParam,
    RecordLocked,
    NoStorage,
    /// The read succeeded but extending the lifetime failed.
    TtlExtendFailure,
    ServerError,
}

impl OperationStatus {
    /// True when the store processed the request to a definite outcome.
    pub fn is_txn_ok(self) -> bool {
        matches!(
            self,
            OperationStatus::Success
                | OperationStatus::NotFound
                | OperationStatus::UniqueKeyViolation
                | OperationStatus::RecordLocked
                | OperationStatus::VersionConflict
                | OperationStatus::TtlExtendFailure
        )
    }

    /// Statuses worth one more attempt when retry is enabled.
    pub(crate) fn is_retryable(self) -> bool {
        matches!(
            self,
            OperationStatus::RecordLocked
                | OperationStatus::NoStorage
                | OperationStatus::TtlExtendFailure
                | OperationStatus::ServerError
        )
    }
}

impl From<OpStatus> for OperationStatus {
    fn from(status: OpStatus) -> Self {
        match status {
            OpStatus::Ok | OpStatus::Inconsistent => OperationStatus::Success,
            OpStatus::NoKey => OperationStatus::NotFound,
            OpStatus::DupKey => OperationStatus::UniqueKeyViolation,
            OpStatus::BadParam => OperationStatus::BadParam,
            OpStatus::RecordLocked => OperationStatus::RecordLocked,
            OpStatus::NoStorageServer => OperationStatus::NoStorage,
            OpStatus::VersionConflict => OperationStatus::VersionConflict,
            OpStatus::SsReadTtlExtendErr => OperationStatus::TtlExtendFailure,
            _ => OperationStatus::ServerError,
        }
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            OperationStatus::Success => "success",
            OperationStatus::NotFound => "key not found",
            OperationStatus::UniqueKeyViolation => "duplicate key",
            OperationStatus::VersionConflict => "version conflict",
            OperationStatus::BadParam => "bad parameter",
            OperationStatus::RecordLocked => "record locked",
            OperationStatus::NoStorage => "no storage server running",
            OperationStatus::TtlExtendFailure => "failed to extend ttl",
            OperationStatus::ServerError => "internal server error",
        };
        f.write_str(text)
    }
}
