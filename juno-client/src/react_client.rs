//! # Stream Client
//!
//! Purpose: Calls as lazy streams for callers composing pipelines. Nothing
//! is sent until the stream is polled; dropping it cancels the call.
//!
//! ## Design Principles
//! 1. **Lazy Start**: Each operation is spawned on first poll.
//! 2. **Drop Cancels**: An unfinished call is aborted with its stream, and
//!    its connection is discarded. A live stream keeps the runtime running.
//! 3. **Batch As Stream**: A batch yields one item per request, in request
//!    order, while the requests themselves run concurrently.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::task::AbortHandle;

use crate::error::JunoResult;
use crate::factory::{join_result, Dispatch};
use crate::record::{JunoRequest, JunoResponse, RecordContext};

pub type ResponseStream = BoxStream<'static, JunoResult<JunoResponse>>;

struct AbortOnDrop(AbortHandle);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Spawns the request on the session runtime and waits for it. The guard
/// aborts the task if this future is dropped first.
async fn run(dispatch: Arc<Dispatch>, request: JunoRequest) -> JunoResult<JunoResponse> {
    let session = dispatch.session().clone();
    let task = dispatch
        .handle()
        .spawn(async move { session.execute(request).await });
    let _guard = AbortOnDrop(task.abort_handle());
    join_result(task.await)
}

/// Stream-returning handle. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct JunoReactClient {
    dispatch: Arc<Dispatch>,
}

impl JunoReactClient {
    pub(crate) fn new(dispatch: Arc<Dispatch>) -> Self {
        JunoReactClient { dispatch }
    }

    #[cfg(test)]
    pub(crate) fn dispatch(&self) -> &Arc<Dispatch> {
        &self.dispatch
    }

    /// A single-item stream carrying the outcome of `request`.
    pub fn execute(&self, request: JunoRequest) -> ResponseStream {
        stream::once(run(self.dispatch.clone(), request)).boxed()
    }

    pub fn create(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> ResponseStream {
        self.execute(JunoRequest::create(key, value))
    }

    pub fn create_with_ttl(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl_secs: u32,
    ) -> ResponseStream {
        self.execute(JunoRequest::create(key, value).with_ttl(ttl_secs))
    }

    pub fn get(&self, key: impl Into<Bytes>) -> ResponseStream {
        self.execute(JunoRequest::get(key))
    }

    pub fn get_with_ttl(&self, key: impl Into<Bytes>, ttl_secs: u32) -> ResponseStream {
        self.execute(JunoRequest::get(key).with_ttl(ttl_secs))
    }

    pub fn update(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> ResponseStream {
        self.execute(JunoRequest::update(key, value))
    }

    pub fn update_with_ttl(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl_secs: u32,
    ) -> ResponseStream {
        self.execute(JunoRequest::update(key, value).with_ttl(ttl_secs))
    }

    pub fn set(&self, key: impl Into<Bytes>, value: impl Into<Bytes>) -> ResponseStream {
        self.execute(JunoRequest::set(key, value))
    }

    pub fn set_with_ttl(
        &self,
        key: impl Into<Bytes>,
        value: impl Into<Bytes>,
        ttl_secs: u32,
    ) -> ResponseStream {
        self.execute(JunoRequest::set(key, value).with_ttl(ttl_secs))
    }

    pub fn delete(&self, key: impl Into<Bytes>) -> ResponseStream {
        self.execute(JunoRequest::destroy(key))
    }

    pub fn compare_and_set(
        &self,
        context: &RecordContext,
        value: impl Into<Bytes>,
        ttl_secs: u32,
    ) -> ResponseStream {
        self.execute(JunoRequest::compare_and_set(context, value).with_ttl(ttl_secs))
    }

    /// One item per request, in request order. A failed element does not
    /// end the stream.
    pub fn do_batch(&self, requests: Vec<JunoRequest>) -> ResponseStream {
        let dispatch = self.dispatch.clone();
        let width = requests.len().max(1);
        stream::iter(requests)
            .map(move |request| run(dispatch.clone(), request))
            .buffered(width)
            .boxed()
    }

    pub fn properties(&self) -> BTreeMap<String, String> {
        self.dispatch.session().properties()
    }
}
