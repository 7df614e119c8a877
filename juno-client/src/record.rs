//! # Records, Requests and Responses
//!
//! Purpose: The values that cross the client API boundary.
//!
//! ## Design Principles
//! 1. **Unforgeable Context**: `RecordContext` has no public constructor. The
//!    only way to obtain one is from a store response, so a compare-and-set
//!    always carries a version the store actually reported.
//! 2. **Immutable Results**: `JunoResponse` is built once per exchange and
//!    only exposes getters.

use bytes::Bytes;

use crate::status::OperationStatus;

/// Snapshot of a record as last observed: key, namespace and version.
///
/// Produced by successful create, get, update and set calls and consumed by
/// `compare_and_set`. A newer read supersedes it; it is never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordContext {
    key: Bytes,
    namespace: String,
    version: u64,
    creation_time: u64,
    time_to_live: u64,
}

impl RecordContext {
    pub(crate) fn new(
        key: Bytes,
        namespace: String,
        version: u64,
        creation_time: u64,
        time_to_live: u64,
    ) -> Self {
        RecordContext {
            key,
            namespace,
            version,
            creation_time,
            time_to_live,
        }
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Version assigned by the store; starts at 1 and grows with each write.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Creation time in epoch seconds, zero if the store did not report it.
    pub fn creation_time(&self) -> u64 {
        self.creation_time
    }

    /// Remaining lifetime in seconds as reported with the response.
    pub fn time_to_live(&self) -> u64 {
        self.time_to_live
    }

    pub(crate) fn key_bytes(&self) -> Bytes {
        self.key.clone()
    }
}

/// Outcome of one completed operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunoResponse {
    status: OperationStatus,
    key: Bytes,
    value: Option<Bytes>,
    context: Option<RecordContext>,
}

impl JunoResponse {
    pub(crate) fn new(
        status: OperationStatus,
        key: Bytes,
        value: Option<Bytes>,
        context: Option<RecordContext>,
    ) -> Self {
        JunoResponse {
            status,
            key,
            value,
            context,
        }
    }

    pub fn status(&self) -> OperationStatus {
        self.status
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    /// Value bytes for reads; `None` when the store returned no value.
    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    /// Context for a later `compare_and_set`, present when the store
    /// reported the record's version.
    pub fn record_context(&self) -> Option<&RecordContext> {
        self.context.as_ref()
    }

    /// Record version, zero when not reported.
    pub fn version(&self) -> u64 {
        self.context.as_ref().map(RecordContext::version).unwrap_or(0)
    }

    /// Remaining lifetime in seconds, zero when not reported.
    pub fn time_to_live(&self) -> u64 {
        self.context.as_ref().map(RecordContext::time_to_live).unwrap_or(0)
    }

    pub fn creation_time(&self) -> u64 {
        self.context.as_ref().map(RecordContext::creation_time).unwrap_or(0)
    }

    pub fn into_value(self) -> Option<Bytes> {
        self.value
    }
}

/// The operations a request can name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Create,
    Get,
    Update,
    Set,
    Destroy,
    CompareAndSet,
}

impl OperationType {
    /// Operations that are safe to send twice.
    pub(crate) fn is_idempotent(self) -> bool {
        matches!(
            self,
            OperationType::Get | OperationType::Set | OperationType::Update | OperationType::Destroy
        )
    }

    pub(crate) fn carries_value(self) -> bool {
        matches!(
            self,
            OperationType::Create
                | OperationType::Update
                | OperationType::Set
                | OperationType::CompareAndSet
        )
    }
}

/// One element of a batch, or the internal form of a single call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JunoRequest {
    op: OperationType,
    key: Bytes,
    value: Option<Bytes>,
    ttl: Option<u32>,
    context: Option<RecordContext>,
}

impl JunoRequest {
    fn build(op: OperationType, key: Bytes, value: Option<Bytes>) -> Self {
        JunoRequest {
            op,
            key,
            value,
            ttl: None,
            context: None,
        }
    }

    pub fn create(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self::build(OperationType::Create, key.into(), Some(value.into()))
    }

    pub fn get(key: impl Into<Bytes>) -> Self {
        Self::build(OperationType::Get, key.into(), None)
    }

    pub fn update(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self::build(OperationType::Update, key.into(), Some(value.into()))
    }

    pub fn set(key: impl Into<Bytes>, value: impl Into<Bytes>) -> Self {
        Self::build(OperationType::Set, key.into(), Some(value.into()))
    }

    pub fn destroy(key: impl Into<Bytes>) -> Self {
        Self::build(OperationType::Destroy, key.into(), None)
    }

    /// Conditional update against the version captured in `context`.
    pub fn compare_and_set(context: &RecordContext, value: impl Into<Bytes>) -> Self {
        JunoRequest {
            op: OperationType::CompareAndSet,
            key: context.key_bytes(),
            value: Some(value.into()),
            ttl: None,
            context: Some(context.clone()),
        }
    }

    /// Lifetime in seconds; for get and update it extends the record,
    /// zero meaning "leave unchanged".
    pub fn with_ttl(mut self, ttl_secs: u32) -> Self {
        self.ttl = Some(ttl_secs);
        self
    }

    pub fn operation(&self) -> OperationType {
        self.op
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }

    pub fn value(&self) -> Option<&[u8]> {
        self.value.as_deref()
    }

    pub fn ttl(&self) -> Option<u32> {
        self.ttl
    }

    pub fn record_context(&self) -> Option<&RecordContext> {
        self.context.as_ref()
    }

    pub(crate) fn key_bytes(&self) -> Bytes {
        self.key.clone()
    }

    pub(crate) fn value_bytes(&self) -> Option<Bytes> {
        self.value.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compare_and_set_takes_key_from_context() {
        let ctx = RecordContext::new(Bytes::from_static(b"42"), "NS1".into(), 3, 100, 50);
        let req = JunoRequest::compare_and_set(&ctx, "new").with_ttl(10);

        assert_eq!(req.operation(), OperationType::CompareAndSet);
        assert_eq!(req.key(), b"42");
        assert_eq!(req.record_context().map(RecordContext::version), Some(3));
        assert_eq!(req.ttl(), Some(10));
    }

    #[test]
    fn test_response_defaults_without_context() {
        let resp =
            JunoResponse::new(OperationStatus::NotFound, Bytes::from_static(b"k"), None, None);
        assert_eq!(resp.version(), 0);
        assert_eq!(resp.value(), None);
        assert!(resp.record_context().is_none());
    }

    #[test]
    fn test_idempotency_classes() {
        assert!(OperationType::Get.is_idempotent());
        assert!(OperationType::Update.is_idempotent());
        assert!(!OperationType::Create.is_idempotent());
        assert!(!OperationType::CompareAndSet.is_idempotent());
        assert!(!OperationType::Destroy.carries_value());
    }
}
