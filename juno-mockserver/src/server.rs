//! # TCP Server
//!
//! Accept Juno protocol connections, decode operation messages, and apply
//! them to the record store. Expired records are purged on a timer while
//! the accept loop runs.

use std::collections::VecDeque;
use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use bytes::BytesMut;
use juno_common::{MetaField, OpCode, OpStatus, OperationMessage, SourceInfo};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::store::{RecordStore, RecordView};

/// App name the store puts in its ping replies.
const SERVER_APP_NAME: &str = "JunoServ";
/// Lifetime for set requests that carry none.
const DEFAULT_SET_TTL: Duration = Duration::from_secs(1800);
const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(30);

/// Tunables for a mock store instance.
#[derive(Debug, Clone, Default)]
pub struct ServerOptions {
    /// Address reported in ping replies; defaults to the accepting socket's.
    pub advertise_ip: Option<IpAddr>,
    /// Delay before every reply.
    pub response_delay: Duration,
    /// How often expired records are swept; zero means every 30 seconds.
    pub purge_interval: Duration,
}

impl ServerOptions {
    fn purge_every(&self) -> Duration {
        if self.purge_interval.is_zero() {
            DEFAULT_PURGE_INTERVAL
        } else {
            self.purge_interval
        }
    }
}

/// Shared state for every connection of one server.
#[derive(Debug)]
pub struct ServerState {
    store: RecordStore,
    options: ServerOptions,
    injected: Mutex<VecDeque<OpStatus>>,
    requests: AtomicU64,
}

impl ServerState {
    pub fn new(options: ServerOptions) -> Self {
        ServerState {
            store: RecordStore::new(),
            options,
            injected: Mutex::new(VecDeque::new()),
            requests: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &RecordStore {
        &self.store
    }

    /// Queues statuses to answer the next record operations with, in order,
    /// without touching the store.
    pub fn inject_statuses(&self, statuses: impl IntoIterator<Item = OpStatus>) {
        self.injected.lock().extend(statuses);
    }

    /// Record operations received, pings excluded.
    pub fn request_count(&self) -> u64 {
        self.requests.load(Ordering::Relaxed)
    }
}

/// Accepts connections until the listener fails, sweeping expired records
/// between accepts.
pub async fn serve(listener: TcpListener, state: Arc<ServerState>) -> io::Result<()> {
    let mut purge = tokio::time::interval(state.options.purge_every());
    purge.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                debug!(%peer, "accepted connection");
                let state = Arc::clone(&state);
                tokio::spawn(async move {
                    if let Err(err) = handle_connection(stream, state).await {
                        debug!(%peer, error = %err, "connection closed with error");
                    }
                });
            }
            _ = purge.tick() => {
                let removed = state.store.purge_expired(Instant::now());
                if removed > 0 {
                    debug!(removed, "purged expired records");
                }
            }
        }
    }
}

/// Handles a single TCP client connection.
pub async fn handle_connection(stream: TcpStream, state: Arc<ServerState>) -> io::Result<()> {
    let mut stream = stream;
    stream.set_nodelay(true)?;
    let local_ip = stream.local_addr()?.ip();
    let local_port = stream.local_addr()?.port();
    let mut buffer = BytesMut::with_capacity(8 * 1024);
    let mut out = BytesMut::with_capacity(1024);

    loop {
        let bytes = stream.read_buf(&mut buffer).await?;
        if bytes == 0 {
            break;
        }

        loop {
            let size = match OperationMessage::peek_size(&buffer) {
                Ok(Some(size)) if buffer.len() >= size => size,
                Ok(_) => break,
                Err(err) => {
                    warn!(error = %err, "malformed frame; closing connection");
                    return Ok(());
                }
            };
            let frame = buffer.split_to(size);
            let request = match OperationMessage::read_buf(&frame) {
                Ok(request) => request,
                Err(err) => {
                    warn!(error = %err, "undecodable message; closing connection");
                    return Ok(());
                }
            };

            let mut response = dispatch(&state, &request, (local_ip, local_port));
            if !state.options.response_delay.is_zero() {
                tokio::time::sleep(state.options.response_delay).await;
            }
            out.clear();
            if let Err(err) = response.write_buf(&mut out) {
                warn!(error = %err, "failed to encode response");
                return Ok(());
            }
            stream.write_all(&out).await?;
        }
    }

    Ok(())
}

/// Applies one request and builds its response.
pub fn dispatch(
    state: &ServerState,
    request: &OperationMessage,
    local: (IpAddr, u16),
) -> OperationMessage {
    let started = Instant::now();
    if request.opcode() == OpCode::Nop {
        return handle_ping(state, request, local);
    }

    state.requests.fetch_add(1, Ordering::Relaxed);
    let injected = state.injected.lock().pop_front();
    let outcome = match injected {
        Some(status) => Err(status),
        None => apply(state, request),
    };

    let mut response = match outcome {
        Ok(view) => {
            let mut response = OperationMessage::response_to(request, OpStatus::Ok);
            if let Some(view) = view {
                push_record(&mut response, request, view);
            }
            response
        }
        Err(status) => OperationMessage::response_to(request, status),
    };
    let elapsed = u64::try_from(started.elapsed().as_micros()).unwrap_or(u64::MAX);
    response.meta.push(MetaField::RequestHandlingTime(elapsed));
    debug!(
        opcode = ?request.opcode(),
        status = ?response.status(),
        opaque = request.opaque(),
        "handled request"
    );
    response
}

fn handle_ping(
    state: &ServerState,
    request: &OperationMessage,
    local: (IpAddr, u16),
) -> OperationMessage {
    let (local_ip, local_port) = local;
    let ip = state.options.advertise_ip.unwrap_or(local_ip);
    let mut response = OperationMessage::response_to(request, OpStatus::Ok);
    response
        .meta
        .push(MetaField::SourceInfo(SourceInfo::new(ip, local_port, SERVER_APP_NAME)));
    response
}

fn apply(state: &ServerState, request: &OperationMessage) -> Result<Option<RecordView>, OpStatus> {
    let payload = &request.payload;
    if payload.key.is_empty() {
        return Err(OpStatus::BadParam);
    }
    let store = &state.store;
    let ns = payload.namespace.clone();
    let key = payload.key.clone();
    let value = payload.value.clone().unwrap_or_default();
    let meta = &request.meta;
    let ttl = meta
        .time_to_live()
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    match request.opcode() {
        OpCode::Create => {
            let ttl = ttl.ok_or(OpStatus::BadParam)?;
            let created = meta.creation_time().unwrap_or_else(epoch_secs);
            store.create(ns, key, value, ttl, created).map(Some)
        }
        OpCode::Get => store.get(ns, key, ttl).map(Some),
        OpCode::Update => store
            .update(ns, key, value, meta.version().filter(|v| *v > 0), ttl)
            .map(Some),
        OpCode::Set => {
            let created = meta.creation_time().unwrap_or_else(epoch_secs);
            store
                .set(ns, key, value, ttl.unwrap_or(DEFAULT_SET_TTL), created)
                .map(Some)
        }
        OpCode::Destroy => store.destroy(ns, key).map(|()| None),
        other => {
            info!(opcode = ?other, "unsupported opcode");
            Err(OpStatus::NotSupported)
        }
    }
}

fn push_record(response: &mut OperationMessage, request: &OperationMessage, view: RecordView) {
    let meta = &mut response.meta;
    meta.push(MetaField::Version(view.version));
    meta.push(MetaField::CreationTime(view.creation_time));
    meta.push(MetaField::TimeToLive(view.ttl_secs));
    if request.opcode() == OpCode::Get {
        response.payload.namespace = request.payload.namespace.clone();
        response.payload.key = request.payload.key.clone();
        response.payload.value = Some(view.value);
    }
}

fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::net::Ipv4Addr;

    use bytes::Bytes;
    use juno_common::PayloadComponent;

    use super::*;

    const LOCAL: (IpAddr, u16) = (IpAddr::V4(Ipv4Addr::LOCALHOST), 8080);

    fn request(
        opcode: OpCode,
        key: &'static str,
        value: Option<&'static str>,
    ) -> OperationMessage {
        let mut msg = OperationMessage::request(opcode, 5);
        let mut payload = PayloadComponent::new("NS1", key);
        payload.value = value.map(|v| Bytes::from_static(v.as_bytes()));
        msg.payload = payload;
        msg
    }

    #[test]
    fn test_ping_reports_advertised_address() {
        let state = ServerState::new(ServerOptions {
            advertise_ip: Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7))),
            ..ServerOptions::default()
        });
        let response = dispatch(&state, &OperationMessage::request(OpCode::Nop, 0), LOCAL);
        let info = response.meta.source_info().unwrap();
        assert_eq!(info.ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));
        assert_eq!(info.port, 8080);
        assert_eq!(state.request_count(), 0);
    }

    #[test]
    fn test_create_requires_ttl_and_reports_version() {
        let state = ServerState::new(ServerOptions::default());
        let mut create = request(OpCode::Create, "k", Some("v"));
        let response = dispatch(&state, &create, LOCAL);
        assert_eq!(response.status(), OpStatus::BadParam);

        create.meta.push(MetaField::TimeToLive(60));
        let response = dispatch(&state, &create, LOCAL);
        assert_eq!(response.status(), OpStatus::Ok);
        assert_eq!(response.opaque(), 5);
        assert_eq!(response.meta.version(), Some(1));
        assert_eq!(response.meta.time_to_live(), Some(60));
        assert!(response.meta.request_handling_time().is_some());
    }

    #[test]
    fn test_get_returns_value_and_conditional_update_conflicts() {
        let state = ServerState::new(ServerOptions::default());
        let mut set = request(OpCode::Set, "k", Some("v1"));
        set.meta.push(MetaField::TimeToLive(60));
        dispatch(&state, &set, LOCAL);

        let get = dispatch(&state, &request(OpCode::Get, "k", None), LOCAL);
        assert_eq!(get.payload.value, Some(Bytes::from_static(b"v1")));

        let mut stale = request(OpCode::Update, "k", Some("v2"));
        stale.meta.push(MetaField::Version(7));
        assert_eq!(dispatch(&state, &stale, LOCAL).status(), OpStatus::VersionConflict);
    }

    #[test]
    fn test_injected_statuses_come_first() {
        let state = ServerState::new(ServerOptions::default());
        state.inject_statuses([OpStatus::RecordLocked]);
        let get = request(OpCode::Get, "k", None);
        assert_eq!(dispatch(&state, &get, LOCAL).status(), OpStatus::RecordLocked);
        assert_eq!(dispatch(&state, &get, LOCAL).status(), OpStatus::NoKey);
        assert_eq!(state.request_count(), 2);
    }

    #[tokio::test]
    async fn test_serve_purges_expired_records() {
        let state = Arc::new(ServerState::new(ServerOptions {
            purge_interval: Duration::from_millis(10),
            ..ServerOptions::default()
        }));
        let ns = Bytes::from_static(b"NS1");
        state
            .store()
            .set(ns.clone(), Bytes::from_static(b"gone"), Bytes::new(), Duration::ZERO, 0)
            .unwrap();
        state
            .store()
            .set(ns, Bytes::from_static(b"kept"), Bytes::new(), Duration::from_secs(60), 0)
            .unwrap();
        assert_eq!(state.store().len(), 2);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let server = tokio::spawn(serve(listener, Arc::clone(&state)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        server.abort();
        assert_eq!(state.store().len(), 1);
    }
}
