//! # Client Factory
//!
//! Purpose: Build the three client flavors over one shared session, so they
//! share the connection pool, metrics and configuration.
//!
//! ## Design Principles
//! 1. **One Session Per Factory**: Clients are cheap handles; the pool lives
//!    in the session and outlives any single client.
//! 2. **Explicit Runtime Ownership**: A factory either owns a small runtime
//!    or borrows the caller's handle; an owned runtime is shut down when the
//!    last client referencing it goes away.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinError;
use tracing::info;

use crate::async_client::JunoAsyncClient;
use crate::client::JunoClient;
use crate::config::ClientConfig;
use crate::error::{JunoError, JunoResult};
use crate::metrics::MetricsSnapshot;
use crate::react_client::JunoReactClient;
use crate::session::Session;
use crate::transport::{Connector, TcpConnector};

const RUNTIME_WORKERS: usize = 2;

/// Session plus the runtime its IO runs on.
pub(crate) struct Dispatch {
    session: Arc<Session>,
    handle: Handle,
    runtime: Option<Runtime>,
}

impl Dispatch {
    pub(crate) fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Spawns the future on the session runtime and waits for it from a
    /// thread outside any runtime.
    pub(crate) fn block_on<T, F>(&self, fut: F) -> JunoResult<T>
    where
        F: Future<Output = JunoResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        if Handle::try_current().is_ok() {
            return Err(JunoError::Runtime(
                "blocking client used inside an async runtime; use the async client".into(),
            ));
        }
        let task = self.handle.spawn(fut);
        join_result(futures::executor::block_on(task))
    }
}

impl Drop for Dispatch {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Flattens a spawned task's outcome.
pub(crate) fn join_result<T>(joined: Result<JunoResult<T>, JoinError>) -> JunoResult<T> {
    match joined {
        Ok(result) => result,
        Err(err) if err.is_cancelled() => Err(JunoError::Cancelled),
        Err(err) => Err(JunoError::Runtime(format!("task failed: {err}"))),
    }
}

/// Entry point: validates the configuration once and hands out clients.
///
/// ```no_run
/// use juno_client::{ClientConfig, JunoClientFactory};
///
/// let config = ClientConfig::new("junoserv.example.com", 8080, "orders", "NS1");
/// let factory = JunoClientFactory::new(config)?;
/// let client = factory.blocking_client();
/// let response = client.get("42")?;
/// println!("{:?}", response.status());
/// # Ok::<(), juno_client::JunoError>(())
/// ```
#[derive(Clone)]
pub struct JunoClientFactory {
    dispatch: Arc<Dispatch>,
}

impl JunoClientFactory {
    /// Builds a factory that owns a small multi-threaded runtime.
    pub fn new(config: ClientConfig) -> JunoResult<Self> {
        Self::with_connector(config, Arc::new(TcpConnector))
    }

    pub fn with_connector(config: ClientConfig, connector: Arc<dyn Connector>) -> JunoResult<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(RUNTIME_WORKERS)
            .thread_name("juno-client")
            .enable_all()
            .build()
            .map_err(|err| JunoError::Runtime(format!("failed to start runtime: {err}")))?;
        let handle = runtime.handle().clone();
        Self::build(config, connector, handle, Some(runtime))
    }

    /// Builds a factory whose IO runs on the caller's runtime.
    pub fn with_handle(config: ClientConfig, handle: Handle) -> JunoResult<Self> {
        Self::with_handle_and_connector(config, handle, Arc::new(TcpConnector))
    }

    pub fn with_handle_and_connector(
        config: ClientConfig,
        handle: Handle,
        connector: Arc<dyn Connector>,
    ) -> JunoResult<Self> {
        Self::build(config, connector, handle, None)
    }

    fn build(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        handle: Handle,
        runtime: Option<Runtime>,
    ) -> JunoResult<Self> {
        let session = Session::new(config, connector)?;
        info!(
            pool = %session.config().pool_id(),
            namespace = %session.config().record_namespace,
            owned_runtime = runtime.is_some(),
            "juno client factory ready"
        );
        Ok(JunoClientFactory {
            dispatch: Arc::new(Dispatch {
                session: Arc::new(session),
                handle,
                runtime,
            }),
        })
    }

    pub fn blocking_client(&self) -> JunoClient {
        JunoClient::new(self.dispatch.clone())
    }

    pub fn async_client(&self) -> JunoAsyncClient {
        JunoAsyncClient::new(self.dispatch.clone())
    }

    pub fn react_client(&self) -> JunoReactClient {
        JunoReactClient::new(self.dispatch.clone())
    }

    /// Effective configuration as `juno.*` property names.
    pub fn properties(&self) -> BTreeMap<String, String> {
        self.dispatch.session.properties()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.dispatch.session.metrics().snapshot()
    }

    /// Connections currently parked in the pool.
    pub fn idle_connections(&self) -> usize {
        self.dispatch.session.idle_connections()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_invalid_config() {
        let config = ClientConfig::new("", 8080, "orders", "NS1");
        assert!(matches!(JunoClientFactory::new(config), Err(JunoError::Config(_))));
    }

    #[test]
    fn test_clients_share_one_session() {
        let factory =
            JunoClientFactory::new(ClientConfig::new("127.0.0.1", 8080, "orders", "NS1")).unwrap();
        let blocking = factory.blocking_client();
        let react = factory.react_client();
        assert!(Arc::ptr_eq(blocking.dispatch().session(), react.dispatch().session()));
        assert_eq!(
            factory.properties().get("juno.server.port").map(String::as_str),
            Some("8080")
        );
    }

    #[tokio::test]
    async fn test_blocking_call_inside_runtime_is_refused() {
        let factory = JunoClientFactory::with_handle(
            ClientConfig::new("127.0.0.1", 8080, "orders", "NS1"),
            Handle::current(),
        )
        .unwrap();
        let err = factory.blocking_client().get("42").unwrap_err();
        assert!(matches!(err, JunoError::Runtime(_)));
    }

    #[test]
    fn test_join_errors_map_to_cancelled() {
        let runtime = Builder::new_current_thread().enable_all().build().unwrap();
        let joined = runtime.block_on(async {
            let task = tokio::spawn(async {
                tokio::time::sleep(std::time::Duration::from_secs(60)).await;
                Ok::<(), JunoError>(())
            });
            task.abort();
            task.await
        });
        assert!(matches!(join_result(joined), Err(JunoError::Cancelled)));
    }
}
