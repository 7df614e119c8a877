//! # Blocking Client
//!
//! Purpose: Synchronous store calls for callers that are not async. Each
//! call runs on the factory's runtime and parks the calling thread until
//! the response arrives.
//!
//! ## Design Principles
//! 1. **Thin Adapter**: Every method builds a `JunoRequest` and hands it to
//!    the shared session; no protocol logic lives here.
//! 2. **Status Is Data**: `NotFound` or `VersionConflict` come back as
//!    `Ok(response)`; `Err` means the call itself failed.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;

use crate::error::JunoResult;
use crate::factory::Dispatch;
use crate::record::{JunoRequest, JunoResponse, RecordContext};

/// Blocking handle. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct JunoClient {
    dispatch: Arc<Dispatch>,
}

impl JunoClient {
    pub(crate) fn new(dispatch: Arc<Dispatch>) -> Self {
        JunoClient { dispatch }
    }

    #[cfg(test)]
    pub(crate) fn dispatch(&self) -> &Arc<Dispatch> {
        &self.dispatch
    }

    /// Runs one request and waits for its response.
    pub fn execute(&self, request: JunoRequest) -> JunoResult<JunoResponse> {
        let session = self.dispatch.session().clone();
        self.dispatch
            .block_on(async move { session.execute(request).await })
    }

    /// Inserts a new record with the default lifetime.
    pub fn create(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> JunoResult<JunoResponse> {
        self.execute(JunoRequest::create(key, value))
    }

    pub fn create_with_ttl(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl_secs: u32,
    ) -> JunoResult<JunoResponse> {
        self.execute(JunoRequest::create(key, value).with_ttl(ttl_secs))
    }

    pub fn get(&self, key: impl Into<Bytes>) -> JunoResult<JunoResponse> {
        self.execute(JunoRequest::get(key))
    }

    /// Reads a record and extends its lifetime to `ttl_secs` if longer.
    pub fn get_with_ttl(&self, key: impl Into<Bytes>, ttl_secs: u32) -> JunoResult<JunoResponse> {
        self.execute(JunoRequest::get(key).with_ttl(ttl_secs))
    }

    pub fn update(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> JunoResult<JunoResponse> {
        self.execute(JunoRequest::update(key, value))
    }

    pub fn update_with_ttl(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl_secs: u32,
    ) -> JunoResult<JunoResponse> {
        self.execute(JunoRequest::update(key, value).with_ttl(ttl_secs))
    }

    /// Creates or overwrites a record.
    pub fn set(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> JunoResult<JunoResponse> {
        self.execute(JunoRequest::set(key, value))
    }

    pub fn set_with_ttl(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl_secs: u32,
    ) -> JunoResult<JunoResponse> {
        self.execute(JunoRequest::set(key, value).with_ttl(ttl_secs))
    }

    pub fn delete(&self, key: impl Into<Bytes>) -> JunoResult<JunoResponse> {
        self.execute(JunoRequest::destroy(key))
    }

    /// Writes `value` only if the record is still at `context`'s version.
    ///
    /// A `VersionConflict` status means someone else wrote first; read again
    /// for a fresh context before retrying.
    pub fn compare_and_set(
        &self,
        context: &RecordContext,
        value: impl Into<Bytes>,
        ttl_secs: u32,
    ) -> JunoResult<JunoResponse> {
        self.execute(JunoRequest::compare_and_set(context, value).with_ttl(ttl_secs))
    }

    /// Runs all requests concurrently.
    ///
    /// The outer error is reserved for failures of the batch as a whole;
    /// element `i` of the vector is the outcome of request `i`.
    pub fn do_batch(
        &self,
        requests: Vec<JunoRequest>,
    ) -> JunoResult<Vec<JunoResult<JunoResponse>>> {
        let session = self.dispatch.session().clone();
        self.dispatch
            .block_on(async move { Ok(session.execute_batch(requests).await) })
    }

    pub fn properties(&self) -> BTreeMap<String, String> {
        self.dispatch.session().properties()
    }
}
