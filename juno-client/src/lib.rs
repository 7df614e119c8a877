//! # Juno Client
//!
//! Purpose: Client library for a Juno-style replicated key-value store.
//! Records are versioned and expire; writes can be made conditional on the
//! version a caller last read.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: One small pool of long-lived connections per
//!    factory, shared by every client it hands out.
//! 2. **Three Calling Styles, One Core**: Blocking, future and stream clients
//!    are adapters over the same session and produce identical results.
//! 3. **Status As Data**: Store outcomes are `OperationStatus` values on a
//!    response; `JunoError` is reserved for calls that did not complete.
//! 4. **Optimistic Concurrency**: `RecordContext` can only come from a store
//!    response and drives `compare_and_set`.
//!
//! ## Usage
//!
//! ```no_run
//! use juno_client::{ClientConfig, JunoClientFactory, OperationStatus};
//!
//! let factory = JunoClientFactory::new(ClientConfig::new("127.0.0.1", 8080, "orders", "NS1"))?;
//! let client = factory.blocking_client();
//!
//! let created = client.create("42", "pending")?;
//! if let Some(ctx) = created.record_context() {
//!     let cas = client.compare_and_set(ctx, "shipped", 0)?;
//!     if cas.status() == OperationStatus::VersionConflict {
//!         // someone else wrote first; read again and decide
//!     }
//! }
//! # Ok::<(), juno_client::JunoError>(())
//! ```

mod async_client;
mod client;
mod config;
mod error;
mod factory;
mod metrics;
mod pool;
mod react_client;
mod record;
mod session;
mod status;
mod transport;

pub use async_client::{JunoAsyncClient, ResponseFuture};
pub use client::JunoClient;
pub use config::ClientConfig;
pub use error::{JunoError, JunoResult, TimeoutPhase};
pub use factory::JunoClientFactory;
pub use metrics::{LatencySnapshot, MetricsSnapshot};
pub use react_client::{JunoReactClient, ResponseStream};
pub use record::{JunoRequest, JunoResponse, OperationType, RecordContext};
pub use status::OperationStatus;
pub use transport::{AsyncStream, BoxedStream, Connector, TcpConnector};
