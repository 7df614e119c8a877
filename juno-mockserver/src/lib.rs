//! # Juno Mock Store
//!
//! Purpose: A single-process stand-in for a Juno store cluster, speaking the
//! same wire protocol, for client tests and local development.
//!
//! ## Design Principles
//! 1. **Same Wire, Simple Storage**: Messages go through `juno-common` exactly
//!    as a real store would see them; storage is an in-memory sharded map.
//! 2. **Self-Contained Handle**: `MockServer::spawn` runs on its own thread and
//!    runtime so blocking tests can use it without an async context.
//! 3. **Fault Injection**: Tests can queue statuses and add reply latency to
//!    exercise retries, timeouts and cancellation.

pub mod server;
pub mod store;

use std::io;
use std::net::{SocketAddr, TcpListener as StdTcpListener};
use std::sync::Arc;
use std::thread::JoinHandle;

use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tracing::{info, warn};

pub use server::{ServerOptions, ServerState};
pub use store::{RecordStore, RecordView, StoreResult};

/// A running mock store bound to a local port. Stops on drop.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<ServerState>,
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
}

impl MockServer {
    /// Starts a server on `127.0.0.1` with an ephemeral port.
    pub fn spawn() -> io::Result<Self> {
        Self::spawn_with(ServerOptions::default())
    }

    pub fn spawn_with(options: ServerOptions) -> io::Result<Self> {
        Self::bind("127.0.0.1:0", options)
    }

    pub fn bind(addr: &str, options: ServerOptions) -> io::Result<Self> {
        let listener = StdTcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        let state = Arc::new(ServerState::new(options));
        let (tx, rx) = oneshot::channel();

        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let thread_state = Arc::clone(&state);
        let join = std::thread::Builder::new()
            .name("juno-mockserver".into())
            .spawn(move || {
                runtime.block_on(async move {
                    let listener = match TcpListener::from_std(listener) {
                        Ok(listener) => listener,
                        Err(err) => {
                            warn!(error = %err, "failed to register listener");
                            return;
                        }
                    };
                    tokio::select! {
                        result = server::serve(listener, thread_state) => {
                            if let Err(err) = result {
                                warn!(error = %err, "accept loop stopped");
                            }
                        }
                        _ = rx => {}
                    }
                });
            })?;

        info!(%addr, "mock store listening");
        Ok(MockServer {
            addr,
            state,
            shutdown: Some(tx),
            join: Some(join),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}
