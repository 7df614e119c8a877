//! # Future Client
//!
//! Purpose: Non-blocking calls that start immediately and return a handle
//! to await, poll or cancel.
//!
//! ## Design Principles
//! 1. **Eager Start**: The request is spawned when the method is called, not
//!    when the future is first polled, so several calls overlap naturally.
//! 2. **Shareable Result**: `ResponseFuture` is `Clone`; every clone resolves
//!    to the same outcome.
//! 3. **Runtime Outlives Handles**: Every `ResponseFuture` keeps the factory's
//!    runtime alive, so a pending call survives the factory being dropped.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::task::AbortHandle;

use crate::error::JunoResult;
use crate::factory::{join_result, Dispatch};
use crate::record::{JunoRequest, JunoResponse, RecordContext};

/// Handle to an in-flight call.
///
/// Dropping it does not stop the call; use [`ResponseFuture::cancel`] for
/// that. A cancelled call resolves to `JunoError::Cancelled`.
pub struct ResponseFuture<T: Clone> {
    inner: Shared<BoxFuture<'static, JunoResult<T>>>,
    abort: Arc<AbortHandle>,
    _dispatch: Arc<Dispatch>,
}

impl<T> ResponseFuture<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub(crate) fn spawn<F>(dispatch: Arc<Dispatch>, fut: F) -> Self
    where
        F: Future<Output = JunoResult<T>> + Send + 'static,
    {
        let task = dispatch.handle().spawn(fut);
        let abort = Arc::new(task.abort_handle());
        ResponseFuture {
            inner: task.map(join_result).boxed().shared(),
            abort,
            _dispatch: dispatch,
        }
    }

    /// Stops the call if it has not completed. A connection in the middle
    /// of an exchange is discarded rather than returned to the pool.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.abort.is_finished()
    }
}

impl<T: Clone> Clone for ResponseFuture<T> {
    fn clone(&self) -> Self {
        ResponseFuture {
            inner: self.inner.clone(),
            abort: self.abort.clone(),
            _dispatch: self._dispatch.clone(),
        }
    }
}

impl<T: Clone> Future for ResponseFuture<T> {
    type Output = JunoResult<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.inner).poll(cx)
    }
}

/// Future-returning handle. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct JunoAsyncClient {
    dispatch: Arc<Dispatch>,
}

impl JunoAsyncClient {
    pub(crate) fn new(dispatch: Arc<Dispatch>) -> Self {
        JunoAsyncClient { dispatch }
    }

    pub fn execute(&self, request: JunoRequest) -> ResponseFuture<JunoResponse> {
        let session = self.dispatch.session().clone();
        ResponseFuture::spawn(self.dispatch.clone(), async move {
            session.execute(request).await
        })
    }

    pub fn create(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> ResponseFuture<JunoResponse> {
        self.execute(JunoRequest::create(key, value))
    }

    pub fn create_with_ttl(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl_secs: u32,
    ) -> ResponseFuture<JunoResponse> {
        self.execute(JunoRequest::create(key, value).with_ttl(ttl_secs))
    }

    pub fn get(&self, key: impl Into<Bytes>) -> ResponseFuture<JunoResponse> {
        self.execute(JunoRequest::get(key))
    }

    pub fn get_with_ttl(
        &self,
        key: impl Into<Bytes>,
        ttl_secs: u32,
    ) -> ResponseFuture<JunoResponse> {
        self.execute(JunoRequest::get(key).with_ttl(ttl_secs))
    }

    pub fn update(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> ResponseFuture<JunoResponse> {
        self.execute(JunoRequest::update(key, value))
    }

    pub fn update_with_ttl(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl_secs: u32,
    ) -> ResponseFuture<JunoResponse> {
        self.execute(JunoRequest::update(key, value).with_ttl(ttl_secs))
    }

    pub fn set(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
    ) -> ResponseFuture<JunoResponse> {
        self.execute(JunoRequest::set(key, value))
    }

    pub fn set_with_ttl(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl_secs: u32,
    ) -> ResponseFuture<JunoResponse> {
        self.execute(JunoRequest::set(key, value).with_ttl(ttl_secs))
    }

    pub fn delete(&self, key: impl Into<Bytes>) -> ResponseFuture<JunoResponse> {
        self.execute(JunoRequest::destroy(key))
    }

    pub fn compare_and_set(
        &self,
        context: &RecordContext,
        value: impl Into<Bytes>,
        ttl_secs: u32,
    ) -> ResponseFuture<JunoResponse> {
        self.execute(JunoRequest::compare_and_set(context, value).with_ttl(ttl_secs))
    }

    /// Resolves once every request has finished, in input order.
    pub fn do_batch(
        &self,
        requests: Vec<JunoRequest>,
    ) -> ResponseFuture<Vec<JunoResult<JunoResponse>>> {
        let session = self.dispatch.session().clone();
        ResponseFuture::spawn(self.dispatch.clone(), async move {
            Ok(session.execute_batch(requests).await)
        })
    }

    pub fn properties(&self) -> BTreeMap<String, String> {
        self.dispatch.session().properties()
    }
}
