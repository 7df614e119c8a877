use std::net::TcpListener;
use std::thread;
use std::time::Duration;

use futures::executor::block_on;
use futures::{FutureExt, StreamExt};

use juno_client::{
    ClientConfig, JunoClientFactory, JunoError, JunoRequest, OperationStatus, TimeoutPhase,
};
use juno_common::OpStatus;
use juno_mockserver::{MockServer, ServerOptions};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}

fn config(port: u16) -> ClientConfig {
    init_tracing();
    ClientConfig::new("127.0.0.1", port, "orders", "NS1")
}

fn factory(server: &MockServer) -> JunoClientFactory {
    JunoClientFactory::new(config(server.port())).expect("factory")
}

#[test]
fn create_get_update_delete_flow() {
    let server = MockServer::spawn().expect("server");
    let client = factory(&server).blocking_client();

    let created = client.create("k1", "v1").expect("create");
    assert_eq!(created.status(), OperationStatus::Success);
    assert_eq!(created.version(), 1);

    let read = client.get("k1").expect("get");
    assert_eq!(read.status(), OperationStatus::Success);
    assert_eq!(read.value(), Some(&b"v1"[..]));
    assert_eq!(read.version(), 1);

    let updated = client.update("k1", "v2").expect("update");
    assert_eq!(updated.version(), 2);

    let dup = client.create("k1", "again").expect("duplicate create");
    assert_eq!(dup.status(), OperationStatus::UniqueKeyViolation);
    assert!(dup.record_context().is_none());

    assert_eq!(client.delete("k1").expect("delete").status(), OperationStatus::Success);
    assert_eq!(client.get("k1").expect("get").status(), OperationStatus::NotFound);
    assert_eq!(client.delete("k1").expect("delete").status(), OperationStatus::NotFound);
    assert_eq!(client.update("k1", "v3").expect("update").status(), OperationStatus::NotFound);
}

#[test]
fn compare_and_set_detects_stale_context() {
    let server = MockServer::spawn().expect("server");
    let client = factory(&server).blocking_client();

    let created = client.create("order", "pending").expect("create");
    let stale = created.record_context().expect("context").clone();

    client.set("order", "packed").expect("set");
    let conflict = client.compare_and_set(&stale, "shipped", 0).expect("cas");
    assert_eq!(conflict.status(), OperationStatus::VersionConflict);
    assert_eq!(client.get("order").expect("get").value(), Some(&b"packed"[..]));

    let fresh = client.get("order").expect("get");
    let ctx = fresh.record_context().expect("context");
    assert_eq!(ctx.version(), 2);
    assert_eq!(ctx.namespace(), "NS1");
    let cas = client.compare_and_set(ctx, "shipped", 0).expect("cas");
    assert_eq!(cas.status(), OperationStatus::Success);
    assert_eq!(cas.version(), 3);

    let after = client.get("order").expect("get");
    assert_eq!(after.value(), Some(&b"shipped"[..]));
    assert_eq!(after.version(), 3);
    assert_eq!(after.record_context().expect("context").version(), 3);
}

#[test]
fn lifetimes_are_sent_and_extended() {
    let server = MockServer::spawn().expect("server");
    let client = factory(&server).blocking_client();

    let created = client.create_with_ttl("short", "v", 100).expect("create");
    assert_eq!(created.time_to_live(), 100);

    let extended = client.get_with_ttl("short", 1000).expect("get");
    assert_eq!(extended.time_to_live(), 1000);

    let unchanged = client.get("short").expect("get");
    assert!(unchanged.time_to_live() > 900);

    let set = client.set("default", "v").expect("set");
    assert_eq!(set.time_to_live(), 259_200);
}

#[test]
fn batch_keeps_order_and_isolates_failures() {
    let server = MockServer::spawn().expect("server");
    let client = factory(&server).blocking_client();
    client.create("present", "p").expect("create");

    let results = client
        .do_batch(vec![
            JunoRequest::get("present"),
            JunoRequest::get("missing"),
            JunoRequest::get(""),
            JunoRequest::set("written", "w"),
        ])
        .expect("batch");

    assert_eq!(results.len(), 4);
    let first = results[0].as_ref().expect("first");
    assert_eq!(first.key(), b"present");
    assert_eq!(first.value(), Some(&b"p"[..]));
    assert_eq!(
        results[1].as_ref().expect("second").status(),
        OperationStatus::NotFound
    );
    assert!(matches!(results[2], Err(JunoError::IllegalArgument(_))));
    assert_eq!(
        results[3].as_ref().expect("fourth").status(),
        OperationStatus::Success
    );
    assert_eq!(client.get("written").expect("get").value(), Some(&b"w"[..]));
}

#[test]
fn calling_styles_agree() {
    let server = MockServer::spawn().expect("server");
    let factory = factory(&server);
    let blocking = factory.blocking_client();
    let future = factory.async_client();
    let react = factory.react_client();

    blocking.set("shared", "value").expect("set");

    let from_blocking = blocking.get("shared").expect("blocking get");
    let from_future = block_on(future.get("shared")).expect("future get");
    let from_stream = block_on(react.get("shared").next())
        .expect("stream item")
        .expect("stream get");
    assert_eq!(from_blocking, from_future);
    assert_eq!(from_future, from_stream);

    let batch: Vec<_> = block_on(
        react
            .do_batch(vec![
                JunoRequest::get("shared"),
                JunoRequest::get("nothing"),
                JunoRequest::create("fresh", "f"),
            ])
            .collect(),
    );
    let statuses: Vec<_> = batch
        .iter()
        .map(|item| item.as_ref().expect("item").status())
        .collect();
    assert_eq!(
        statuses,
        vec![
            OperationStatus::Success,
            OperationStatus::NotFound,
            OperationStatus::Success
        ]
    );

    let future_batch = block_on(future.do_batch(vec![JunoRequest::get("fresh")])).expect("batch");
    assert_eq!(
        future_batch[0].as_ref().expect("item").value(),
        Some(&b"f"[..])
    );
}

#[test]
fn response_future_clones_share_outcome() {
    let server = MockServer::spawn().expect("server");
    let client = factory(&server).async_client();

    let pending = client.create("k", "v");
    let copy = pending.clone();
    let first = block_on(pending).expect("first");
    let second = block_on(copy).expect("second");
    assert_eq!(first, second);
    assert_eq!(server.state().request_count(), 1);
}

#[test]
fn properties_reflect_configuration() {
    let server = MockServer::spawn().expect("server");
    let factory = factory(&server);
    let props = factory.blocking_client().properties();

    assert_eq!(props.get("juno.server.host").map(String::as_str), Some("127.0.0.1"));
    assert_eq!(
        props.get("juno.server.port"),
        Some(&server.port().to_string())
    );
    assert_eq!(props.get("juno.application_name").map(String::as_str), Some("orders"));
    assert_eq!(props.get("juno.record_namespace").map(String::as_str), Some("NS1"));
    assert_eq!(props.get("juno.connection.pool_size").map(String::as_str), Some("1"));
    assert_eq!(props, factory.react_client().properties());
}

#[test]
fn invalid_arguments_never_reach_the_store() {
    let server = MockServer::spawn().expect("server");
    let client = factory(&server).blocking_client();

    assert!(matches!(client.get(""), Err(JunoError::IllegalArgument(_))));
    assert!(matches!(
        client.set(vec![b'k'; 129], "v"),
        Err(JunoError::IllegalArgument(_))
    ));
    assert!(matches!(
        client.set("k", vec![0u8; 204_801]),
        Err(JunoError::IllegalArgument(_))
    ));
    assert!(matches!(
        client.create_with_ttl("k", "v", 0),
        Err(JunoError::IllegalArgument(_))
    ));
    assert!(matches!(
        client.set_with_ttl("k", "v", 259_201),
        Err(JunoError::IllegalArgument(_))
    ));
    assert_eq!(server.state().request_count(), 0);
}

#[test]
fn retries_idempotent_operations_once() {
    let server = MockServer::spawn().expect("server");
    let mut cfg = config(server.port());
    cfg.operation_retry = true;
    let factory = JunoClientFactory::new(cfg).expect("factory");
    let client = factory.blocking_client();

    server.state().inject_statuses([OpStatus::RecordLocked]);
    let read = client.get("absent").expect("get");
    assert_eq!(read.status(), OperationStatus::NotFound);
    assert_eq!(factory.metrics().retries_total, 1);
    assert_eq!(server.state().request_count(), 2);

    server.state().inject_statuses([OpStatus::RecordLocked]);
    let created = client.create("k", "v").expect("create");
    assert_eq!(created.status(), OperationStatus::RecordLocked);
    assert_eq!(factory.metrics().retries_total, 1);
    assert_eq!(server.state().request_count(), 3);
}

#[test]
fn retry_disabled_returns_first_status() {
    let server = MockServer::spawn().expect("server");
    let factory = factory(&server);
    let client = factory.blocking_client();

    server.state().inject_statuses([OpStatus::NoStorageServer]);
    let read = client.get("absent").expect("get");
    assert_eq!(read.status(), OperationStatus::NoStorage);
    assert_eq!(factory.metrics().retries_total, 0);
}

#[test]
fn connections_are_reused() {
    let server = MockServer::spawn().expect("server");
    let factory = factory(&server);
    let client = factory.blocking_client();

    for i in 0..10 {
        client.set(format!("key-{i}"), "v").expect("set");
    }
    let metrics = factory.metrics();
    assert_eq!(metrics.connections_opened, 1);
    assert_eq!(metrics.requests_total, 10);
    assert_eq!(metrics.inflight, 0);
    assert_eq!(factory.idle_connections(), 1);
}

#[test]
fn concurrent_calls_share_a_bounded_pool() {
    let server = MockServer::spawn().expect("server");
    let mut cfg = config(server.port());
    cfg.connection_pool_size = 3;
    cfg.response_timeout_ms = 2000;
    let factory = JunoClientFactory::new(cfg).expect("factory");
    let client = factory.async_client();

    let pending: Vec<_> = (0..20)
        .map(|i| client.set(format!("key-{i}"), "v"))
        .collect();
    for result in block_on(futures::future::join_all(pending)) {
        assert_eq!(result.expect("set").status(), OperationStatus::Success);
    }
    assert!(factory.metrics().connections_opened <= 3);
    assert_eq!(server.state().store().len(), 20);
}

#[test]
fn slow_response_times_out_and_discards_connection() {
    let server = MockServer::spawn_with(ServerOptions {
        response_delay: Duration::from_millis(300),
        ..ServerOptions::default()
    })
    .expect("server");
    let mut cfg = config(server.port());
    cfg.response_timeout_ms = 50;
    let factory = JunoClientFactory::new(cfg).expect("factory");

    let err = factory.blocking_client().get("k").unwrap_err();
    assert!(matches!(
        err,
        JunoError::Timeout {
            phase: TimeoutPhase::Response,
            ..
        }
    ));
    assert!(err.is_transient());
    assert_eq!(factory.idle_connections(), 0);
    assert_eq!(factory.metrics().errors_total, 1);
}

#[test]
fn cancelled_future_reports_cancelled() {
    let server = MockServer::spawn_with(ServerOptions {
        response_delay: Duration::from_millis(300),
        ..ServerOptions::default()
    })
    .expect("server");
    let mut cfg = config(server.port());
    cfg.response_timeout_ms = 2000;
    let factory = JunoClientFactory::new(cfg).expect("factory");

    let pending = factory.async_client().get("k");
    thread::sleep(Duration::from_millis(50));
    pending.cancel();
    assert!(matches!(block_on(pending), Err(JunoError::Cancelled)));
    assert_eq!(factory.idle_connections(), 0);
}

#[test]
fn unreachable_store_is_a_connection_error() {
    let port = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.local_addr().expect("addr").port()
    };
    let client = JunoClientFactory::new(config(port))
        .expect("factory")
        .blocking_client();

    let err = client.get("k").unwrap_err();
    assert!(matches!(err, JunoError::Connection { .. }));
}

#[test]
fn hostname_endpoint_pings_before_use() {
    let server = MockServer::spawn().expect("server");
    let mut cfg = config(server.port());
    cfg.host = "localhost".into();
    let factory = JunoClientFactory::new(cfg).expect("factory");
    let client = factory.blocking_client();

    // The store reports a loopback address, so the balancer connection is kept.
    client.set("k", "v").expect("set");
    assert_eq!(client.get("k").expect("get").value(), Some(&b"v"[..]));
    assert_eq!(factory.metrics().connections_opened, 1);
    assert_eq!(server.state().request_count(), 2);
}

#[test]
fn pending_calls_outlive_their_factory() {
    let server = MockServer::spawn_with(ServerOptions {
        response_delay: Duration::from_millis(50),
        ..ServerOptions::default()
    })
    .expect("server");

    let (pending, stream) = {
        let factory = factory(&server);
        let pending = factory.async_client().set("k", "v");
        let stream = factory.react_client().get("k");
        (pending, stream)
    };

    let set = block_on(pending).expect("set after factory drop");
    assert_eq!(set.status(), OperationStatus::Success);

    let mut stream = stream;
    let read = block_on(stream.next())
        .expect("stream item")
        .expect("get after factory drop");
    assert_eq!(read.value(), Some(&b"v"[..]));
}

#[test]
fn stream_sends_nothing_until_polled() {
    let server = MockServer::spawn().expect("server");
    let react = factory(&server).react_client();

    let mut stream = react.set("lazy", "v");
    thread::sleep(Duration::from_millis(100));
    assert_eq!(server.state().request_count(), 0);

    let item = block_on(stream.next()).expect("stream item").expect("set");
    assert_eq!(item.status(), OperationStatus::Success);
    assert_eq!(server.state().request_count(), 1);
    assert!(block_on(stream.next()).is_none());
}

#[test]
fn dropped_stream_aborts_the_exchange() {
    let server = MockServer::spawn_with(ServerOptions {
        response_delay: Duration::from_millis(300),
        ..ServerOptions::default()
    })
    .expect("server");
    let mut cfg = config(server.port());
    cfg.response_timeout_ms = 2000;
    let factory = JunoClientFactory::new(cfg).expect("factory");

    let mut stream = factory.react_client().get("k");
    assert!(stream.next().now_or_never().is_none());
    thread::sleep(Duration::from_millis(50));
    drop(stream);
    thread::sleep(Duration::from_millis(400));

    assert_eq!(server.state().request_count(), 1);
    assert_eq!(factory.idle_connections(), 0);
    assert_eq!(factory.metrics().inflight, 0);
}
