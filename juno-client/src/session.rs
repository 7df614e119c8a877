//! # Session
//!
//! Purpose: The one place that turns a `JunoRequest` into an exchange with
//! the store and the exchange back into a `JunoResponse`. The blocking,
//! future and stream clients are thin wrappers around it.
//!
//! ## Design Principles
//! 1. **Single Core**: Validation, message building, retry and status mapping
//!    live here only, so every calling style has the same semantics.
//! 2. **Validate Before IO**: Bad keys, values and lifetimes fail with
//!    `IllegalArgument` before a connection is touched.
//! 3. **Conflicts Are Final**: Compare-and-set and create are never retried;
//!    a version conflict goes back to the caller, who must re-read.
//!
//! ## Request Shape
//!
//! ```text
//! meta:    [Version]  [CreationTime]  [TimeToLive]  CorrelationId  RequestId  SourceInfo
//!          (CAS)      (create/set)    (non-zero)
//! payload: namespace, key, value (create/update/set/CAS)
//! ```

use std::collections::BTreeMap;
use std::io;
use std::net::{IpAddr, Ipv4Addr, UdpSocket};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use futures::future::join_all;
use juno_common::{MetaField, OpCode, OperationMessage, PayloadComponent, SourceInfo};
use tracing::debug;
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::error::{JunoError, JunoResult};
use crate::metrics::{ClientMetrics, RequestTimer};
use crate::pool::ConnectionPool;
use crate::record::{JunoRequest, JunoResponse, OperationType, RecordContext};
use crate::status::OperationStatus;
use crate::transport::Connector;

/// Shared state behind every client handed out by one factory.
pub(crate) struct Session {
    config: Arc<ClientConfig>,
    pool: ConnectionPool,
    metrics: Arc<ClientMetrics>,
    local_ip: IpAddr,
    opaque: AtomicU32,
}

impl Session {
    pub(crate) fn new(config: ClientConfig, connector: Arc<dyn Connector>) -> JunoResult<Self> {
        config.validate()?;
        if config.use_ssl && !connector.is_secure() {
            return Err(JunoError::Config(
                "use_ssl is set but the connector does not provide TLS".into(),
            ));
        }

        let config = Arc::new(config);
        let metrics = Arc::new(ClientMetrics::new());
        let local_ip = local_ipv4(&config);
        let pool = ConnectionPool::new(config.clone(), connector, metrics.clone(), local_ip);
        debug!(pool = %config.pool_id(), local_ip = %local_ip, "session created");
        Ok(Session {
            config,
            pool,
            metrics,
            local_ip,
            opaque: AtomicU32::new(1),
        })
    }

    pub(crate) fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub(crate) fn metrics(&self) -> &ClientMetrics {
        &self.metrics
    }

    pub(crate) fn properties(&self) -> BTreeMap<String, String> {
        self.config.properties()
    }

    pub(crate) fn idle_connections(&self) -> usize {
        self.pool.idle_count()
    }

    /// Runs one request, applying the retry policy.
    pub(crate) async fn execute(&self, request: JunoRequest) -> JunoResult<JunoResponse> {
        let ttl = self.effective_ttl(&request)?;
        let first = self.attempt(&request, ttl).await;
        if !self.config.operation_retry || !request.operation().is_idempotent() {
            return first;
        }

        let retry = match &first {
            Ok(response) => response.status().is_retryable(),
            Err(err) => err.is_transient(),
        };
        if !retry {
            return first;
        }
        debug!(op = ?request.operation(), "retrying once after transient failure");
        self.metrics.record_retry();
        self.attempt(&request, ttl).await
    }

    /// Runs every request concurrently; results keep the input order and one
    /// failure does not affect the others.
    pub(crate) async fn execute_batch(
        &self,
        requests: Vec<JunoRequest>,
    ) -> Vec<JunoResult<JunoResponse>> {
        join_all(requests.into_iter().map(|request| self.execute(request))).await
    }

    async fn attempt(&self, request: &JunoRequest, ttl: u32) -> JunoResult<JunoResponse> {
        let mut message = self.build_message(request, ttl, self.next_opaque());
        let timer = RequestTimer::start(&self.metrics);
        let result = self.round_trip(&mut message).await;
        timer.finish(result.is_err());
        Ok(self.map_response(request, result?))
    }

    async fn round_trip(&self, message: &mut OperationMessage) -> JunoResult<OperationMessage> {
        let mut conn = self.pool.acquire().await?;
        debug!(
            opcode = ?message.opcode(),
            opaque = message.opaque(),
            peer = conn.peer(),
            "sending request"
        );
        conn.exchange(message, self.config.response_timeout()).await
    }

    fn next_opaque(&self) -> u32 {
        // Zero is reserved for the load balancer ping.
        match self.opaque.fetch_add(1, Ordering::Relaxed) {
            0 => self.opaque.fetch_add(1, Ordering::Relaxed),
            opaque => opaque,
        }
    }

    /// Checks the request against the configured limits and resolves the
    /// lifetime to send; zero means no lifetime field.
    fn effective_ttl(&self, request: &JunoRequest) -> JunoResult<u32> {
        let config = &self.config;
        let key = request.key();
        if key.is_empty() {
            return Err(JunoError::illegal("key must not be empty"));
        }
        if key.len() > config.max_key_size {
            return Err(JunoError::illegal(format!(
                "key length {} exceeds the maximum of {} bytes",
                key.len(),
                config.max_key_size
            )));
        }

        let op = request.operation();
        if op.carries_value() {
            let len = request.value().map_or(0, <[u8]>::len);
            if len > config.max_value_size {
                return Err(JunoError::illegal(format!(
                    "value length {len} exceeds the maximum of {} bytes",
                    config.max_value_size
                )));
            }
        }

        if op == OperationType::CompareAndSet {
            let context = request
                .record_context()
                .ok_or_else(|| JunoError::illegal("compare-and-set requires a record context"))?;
            if context.version() < 1 {
                return Err(JunoError::illegal("record context version must be at least 1"));
            }
            if context.namespace() != config.record_namespace {
                return Err(JunoError::illegal(format!(
                    "record context belongs to namespace {:?}, client uses {:?}",
                    context.namespace(),
                    config.record_namespace
                )));
            }
        }

        let ttl = match op {
            OperationType::Create | OperationType::Set => {
                request.ttl().unwrap_or(config.default_lifetime_secs)
            }
            OperationType::Destroy => 0,
            _ => request.ttl().unwrap_or(0),
        };
        if ttl > config.max_lifetime_secs {
            return Err(JunoError::illegal(format!(
                "lifetime {ttl}s exceeds the maximum of {}s",
                config.max_lifetime_secs
            )));
        }
        if op == OperationType::Create && ttl == 0 {
            return Err(JunoError::illegal("create requires a lifetime greater than zero"));
        }
        Ok(ttl)
    }

    fn build_message(&self, request: &JunoRequest, ttl: u32, opaque: u32) -> OperationMessage {
        let op = request.operation();
        let opcode = match op {
            OperationType::Create => OpCode::Create,
            OperationType::Get => OpCode::Get,
            OperationType::Update | OperationType::CompareAndSet => OpCode::Update,
            OperationType::Set => OpCode::Set,
            OperationType::Destroy => OpCode::Destroy,
        };

        let mut message = OperationMessage::request(opcode, opaque);
        let meta = &mut message.meta;
        if let Some(context) = request.record_context() {
            meta.push(MetaField::Version(context.version()));
        }
        if matches!(op, OperationType::Create | OperationType::Set) {
            meta.push(MetaField::CreationTime(epoch_secs()));
        }
        if ttl > 0 {
            meta.push(MetaField::TimeToLive(u64::from(ttl)));
        }
        meta.push(MetaField::CorrelationId(Bytes::from(Uuid::new_v4().to_string())));
        meta.push(MetaField::RequestId(*Uuid::new_v4().as_bytes()));
        meta.push(MetaField::SourceInfo(SourceInfo::new(
            self.local_ip,
            0,
            Bytes::from(self.config.app_name.clone()),
        )));

        let mut payload = PayloadComponent::new(
            Bytes::from(self.config.record_namespace.clone()),
            request.key_bytes(),
        );
        if op.carries_value() {
            payload.value = Some(request.value_bytes().unwrap_or_default());
        }
        message.payload = payload;
        message
    }

    fn map_response(&self, request: &JunoRequest, response: OperationMessage) -> JunoResponse {
        let status = OperationStatus::from(response.status());
        let meta = &response.meta;
        let context = match (status, meta.version()) {
            (OperationStatus::Success, Some(version)) if version > 0 => Some(RecordContext::new(
                request.key_bytes(),
                self.config.record_namespace.clone(),
                version,
                meta.creation_time().unwrap_or(0),
                meta.time_to_live().unwrap_or(0),
            )),
            _ => None,
        };
        if let Some(handling) = meta.request_handling_time() {
            debug!(?status, opaque = response.opaque(), handling, "response received");
        }
        let value = response.payload.value;
        JunoResponse::new(status, request.key_bytes(), value, context)
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Address this host uses to reach the store, for the source info field.
fn local_ipv4(config: &ClientConfig) -> IpAddr {
    let discover = || -> io::Result<IpAddr> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        socket.connect(config.server_addr())?;
        Ok(socket.local_addr()?.ip())
    };
    match discover() {
        Ok(ip @ IpAddr::V4(_)) => ip,
        _ => IpAddr::V4(Ipv4Addr::LOCALHOST),
    }
}
