//! # Connection Pool
//!
//! Purpose: Share a bounded set of store connections between every call a
//! client factory makes, whatever the calling style.
//!
//! ## Design Principles
//! 1. **Object Pool Pattern**: Keep a bounded set of reusable connections.
//! 2. **Minimal Locking**: Hold the mutex only while moving idle connections.
//! 3. **Bounded Waiting**: A full pool makes callers wait for a slot, up to the
//!    connect plus response timeout.
//! 4. **Replace, Don't Repair**: A connection whose exchange did not finish
//!    cleanly (error, timeout or cancellation) is dropped, never reused; one
//!    older than the configured lifetime is replaced at checkout.
//!
//! ## Load Balancer Bypass
//!
//! When enabled, each new connection through the load balancer sends a `Nop`
//! ping. The store answers with its own address in the source info field;
//! if that is a routable IPv4 address the pool connects there directly and
//! drops the balancer connection. Failed direct dials back off exponentially.

use std::collections::VecDeque;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use juno_common::{MetaField, OpCode, OperationMessage, SourceInfo};
use parking_lot::Mutex;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::error::{JunoError, JunoResult, TimeoutPhase};
use crate::metrics::ClientMetrics;
use crate::transport::{Connection, Connector};

/// App name the store recognizes as a client-internal ping.
const PING_APP_NAME: &str = "JunoInternal";
const BYPASS_INITIAL_BACKOFF: Duration = Duration::from_millis(337_500);
const BYPASS_MAX_BACKOFF: Duration = Duration::from_millis(86_400_000);

#[derive(Debug)]
struct BypassState {
    next_attempt: Option<Instant>,
    backoff: Duration,
}

impl BypassState {
    fn new() -> Self {
        BypassState {
            next_attempt: None,
            backoff: BYPASS_INITIAL_BACKOFF,
        }
    }

    fn is_due(&self, now: Instant) -> bool {
        self.next_attempt.map_or(true, |at| now >= at)
    }

    fn record_failure(&mut self, now: Instant) {
        self.next_attempt = Some(now + self.backoff);
        self.backoff = (self.backoff * 2).min(BYPASS_MAX_BACKOFF);
    }

    fn record_success(&mut self) {
        self.next_attempt = None;
        self.backoff = BYPASS_INITIAL_BACKOFF;
    }
}

struct PoolInner {
    config: Arc<ClientConfig>,
    connector: Arc<dyn Connector>,
    metrics: Arc<ClientMetrics>,
    local_ip: IpAddr,
    permits: Arc<Semaphore>,
    idle: Mutex<VecDeque<Connection>>,
    bypass: Mutex<BypassState>,
}

/// Connection pool handle.
#[derive(Clone)]
pub(crate) struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    pub(crate) fn new(
        config: Arc<ClientConfig>,
        connector: Arc<dyn Connector>,
        metrics: Arc<ClientMetrics>,
        local_ip: IpAddr,
    ) -> Self {
        let size = config.connection_pool_size.max(1);
        ConnectionPool {
            inner: Arc::new(PoolInner {
                config,
                connector,
                metrics,
                local_ip,
                permits: Arc::new(Semaphore::new(size)),
                idle: Mutex::new(VecDeque::with_capacity(size)),
                bypass: Mutex::new(BypassState::new()),
            }),
        }
    }

    /// Waits for a free slot, then reuses an idle connection or dials one.
    pub(crate) async fn acquire(&self) -> JunoResult<PooledConnection> {
        let config = &self.inner.config;
        let wait = config.connect_timeout() + config.response_timeout();
        let permit = match timeout(wait, self.inner.permits.clone().acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(JunoError::Runtime("connection pool closed".into())),
            Err(_) => {
                return Err(JunoError::Timeout {
                    phase: TimeoutPhase::Acquire,
                    after: wait,
                })
            }
        };

        let conn = match self.pop_idle() {
            Some(conn) => conn,
            None => self.dial().await?,
        };
        Ok(PooledConnection {
            pool: self.inner.clone(),
            conn: Some(conn),
            valid: true,
            _permit: permit,
        })
    }

    pub(crate) fn idle_count(&self) -> usize {
        self.inner.idle.lock().len()
    }

    fn pop_idle(&self) -> Option<Connection> {
        let lifetime = self.inner.config.connection_lifetime();
        let mut idle = self.inner.idle.lock();
        while let Some(conn) = idle.pop_front() {
            if conn.opened_at().elapsed() < lifetime {
                return Some(conn);
            }
            debug!(peer = conn.peer(), "recycling connection past its lifetime");
        }
        None
    }

    async fn dial(&self) -> JunoResult<Connection> {
        match self.dial_once().await {
            Ok(conn) => Ok(conn),
            Err(err) if self.inner.config.reconnect_on_fail && err.is_transient() => {
                warn!(error = %err, "connect failed; reconnecting once");
                self.dial_once().await
            }
            Err(err) => Err(err),
        }
    }

    async fn dial_once(&self) -> JunoResult<Connection> {
        let config = &self.inner.config;
        let balancer = config.server_addr();
        let mut conn = self.connect(&balancer).await?;
        if !self.bypass_due() {
            return Ok(conn);
        }

        match self.ping(&mut conn).await {
            Ok(Some(ip)) => {
                let direct = SocketAddr::new(ip, config.port).to_string();
                match self.connect(&direct).await {
                    Ok(direct_conn) => {
                        info!(balancer = %balancer, direct = %direct, "bypassing load balancer");
                        self.inner.bypass.lock().record_success();
                        Ok(direct_conn)
                    }
                    Err(err) => {
                        warn!(
                            direct = %direct,
                            error = %err,
                            "direct connect failed; staying on load balancer"
                        );
                        self.inner.bypass.lock().record_failure(Instant::now());
                        Ok(conn)
                    }
                }
            }
            Ok(None) => Ok(conn),
            Err(err) => {
                warn!(error = %err, "load balancer ping failed; reconnecting without bypass");
                self.inner.bypass.lock().record_failure(Instant::now());
                self.connect(&balancer).await
            }
        }
    }

    fn bypass_due(&self) -> bool {
        let config = &self.inner.config;
        config.bypass_load_balancer
            && !is_loopback_host(&config.host)
            && self.inner.bypass.lock().is_due(Instant::now())
    }

    /// Asks the store behind the balancer for its address.
    async fn ping(&self, conn: &mut Connection) -> JunoResult<Option<IpAddr>> {
        let mut ping = OperationMessage::request(OpCode::Nop, 0);
        ping.meta.push(MetaField::SourceInfo(SourceInfo::new(
            self.inner.local_ip,
            0,
            PING_APP_NAME,
        )));
        let limit = self.inner.config.response_timeout();
        let response = timeout(limit, conn.exchange(&mut ping))
            .await
            .map_err(|_| JunoError::Timeout {
                phase: TimeoutPhase::Response,
                after: limit,
            })??;
        Ok(response
            .meta
            .source_info()
            .map(|info| info.ip)
            .filter(|ip| is_redirect_target(*ip)))
    }

    async fn connect(&self, addr: &str) -> JunoResult<Connection> {
        let limit = self.inner.config.connect_timeout();
        let stream = match timeout(limit, self.inner.connector.connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(err)) => return Err(JunoError::connection(addr, err)),
            Err(_) => {
                return Err(JunoError::Timeout {
                    phase: TimeoutPhase::Connect,
                    after: limit,
                })
            }
        };
        self.inner.metrics.record_connect();
        debug!(peer = addr, "connected");
        Ok(Connection::new(stream, addr.to_string()))
    }
}

fn is_loopback_host(host: &str) -> bool {
    matches!(host, "127.0.0.1" | "::1")
}

fn is_redirect_target(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => !v4.is_loopback() && !v4.is_unspecified(),
        IpAddr::V6(_) => false,
    }
}

/// RAII checkout returning the connection to the pool on drop.
///
/// The connection goes back only if its last exchange completed; otherwise
/// the stream may hold part of a late response and is dropped.
pub(crate) struct PooledConnection {
    pool: Arc<PoolInner>,
    conn: Option<Connection>,
    valid: bool,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// Runs one exchange bounded by `limit`.
    pub(crate) async fn exchange(
        &mut self,
        request: &mut OperationMessage,
        limit: Duration,
    ) -> JunoResult<OperationMessage> {
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| JunoError::Runtime("connection already released".into()))?;
        self.valid = false;
        let response = match timeout(limit, conn.exchange(request)).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(JunoError::Timeout {
                    phase: TimeoutPhase::Response,
                    after: limit,
                })
            }
        };
        self.valid = true;
        Ok(response)
    }

    pub(crate) fn peer(&self) -> &str {
        self.conn.as_ref().map(Connection::peer).unwrap_or_default()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let conn = match self.conn.take() {
            Some(conn) => conn,
            None => return,
        };
        if self.valid {
            self.pool.idle.lock().push_back(conn);
        } else {
            warn!(peer = conn.peer(), "discarding connection after incomplete exchange");
        }
    }
}
