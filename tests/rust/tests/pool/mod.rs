//! Connection Pool / Preloader integration tests
//!
//! Timing properties run on a paused clock: sleeps in fake connects
//! advance virtual time, so elapsed durations are exact.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use lazymux_core::{BackendDescriptor, GatewayError};
use lazymux_gateway::pool::{ConnectionPool, ConnectionStatus, PoolConfig, TransportFactory};
use pretty_assertions::assert_eq;
use tests::fixtures::{descriptor, lazy_descriptor, simple_tools};
use tests::harness::{pool, test_pool_config};
use tests::{FakeBackend, FakeFactory};
use tokio::time::Instant;

fn slow(name: &str, delay: Duration) -> FakeBackend {
    FakeBackend::new(name)
        .with_tools(simple_tools(&["ping"]))
        .with_connect_delay(delay)
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_acquires_share_one_connect() {
    let factory = Arc::new(
        FakeFactory::new().with_backend(slow("todoist", Duration::from_millis(500))),
    );
    let pool = pool(&factory, vec![lazy_descriptor("todoist")]);

    let results = join_all((0..20).map(|_| pool.acquire("todoist"))).await;

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(factory.backend("todoist").connects(), 1);
    let status = &pool.status()[0];
    assert_eq!(status.state, ConnectionStatus::Ready);
    assert_eq!(status.connect_attempts, 1);
    assert_eq!(status.tool_count, Some(1));
}

#[tokio::test(start_paused = true)]
async fn test_preload_runs_backends_concurrently() {
    let factory = Arc::new(
        FakeFactory::new()
            .with_backend(slow("a", Duration::from_secs(3)))
            .with_backend(slow("b", Duration::from_secs(3)))
            .with_backend(slow("c", Duration::from_secs(3))),
    );
    let pool = pool(
        &factory,
        vec![descriptor("a"), descriptor("b"), descriptor("c")],
    );

    let started = Instant::now();
    let report = pool.preload().wait().await;

    assert_eq!(report.ready, vec!["a", "b", "c"]);
    assert!(report.failed.is_empty());
    // Sequential warm-up would take 9s
    assert!(started.elapsed() < Duration::from_secs(4), "{:?}", started.elapsed());
}

#[tokio::test(start_paused = true)]
async fn test_preload_fast_fails_slow_backend() {
    let factory = Arc::new(
        FakeFactory::new()
            .with_backend(slow("context7", Duration::from_secs(120)))
            .with_backend(slow("todoist", Duration::from_millis(100))),
    );
    let pool = pool(&factory, vec![descriptor("context7"), descriptor("todoist")]);

    let started = Instant::now();
    let report = pool.preload().wait().await;
    let elapsed = started.elapsed();

    assert_eq!(report.ready, vec!["todoist"]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, "context7");
    assert!(elapsed >= Duration::from_secs(5) && elapsed < Duration::from_secs(6), "{:?}", elapsed);

    // Later callers see the recorded failure; no reconnect is attempted
    let err = pool.acquire("context7").await.unwrap_err();
    assert!(matches!(err, GatewayError::BackendConnectionUnavailable { .. }));
    assert_eq!(factory.backend("context7").connects(), 1);
    assert!(pool.acquire("todoist").await.is_ok());
}

#[tokio::test(start_paused = true)]
async fn test_lazy_backends_are_not_preloaded() {
    let factory = Arc::new(
        FakeFactory::new()
            .with_backend(slow("eager", Duration::ZERO))
            .with_backend(slow("lazy", Duration::ZERO)),
    );
    let pool = pool(&factory, vec![descriptor("eager"), lazy_descriptor("lazy")]);

    let handle = pool.preload();
    assert_eq!(handle.backends(), vec!["eager"]);
    let report = handle.wait().await;
    assert_eq!(report.total(), 1);

    assert_eq!(factory.backend("lazy").connects(), 0);
    pool.acquire("lazy").await.unwrap();
    assert_eq!(factory.backend("lazy").connects(), 1);
}

#[tokio::test]
async fn test_connect_failure_is_reported_then_sticky() {
    let factory = Arc::new(
        FakeFactory::new().with_backend(FakeBackend::new("broken").failing_connect("refused")),
    );
    let pool = pool(&factory, vec![lazy_descriptor("broken")]);

    let first = pool.acquire("broken").await.unwrap_err();
    assert!(matches!(first, GatewayError::BackendConnectFailed { .. }));
    assert!(first.to_string().contains("refused"));

    let second = pool.acquire("broken").await.unwrap_err();
    assert!(matches!(second, GatewayError::BackendConnectionUnavailable { .. }));
    assert_eq!(factory.backend("broken").connects(), 1);

    let status = &pool.status()[0];
    assert_eq!(status.state, ConnectionStatus::Failed);
    assert!(status.last_error.as_deref().unwrap_or_default().contains("refused"));
}

#[tokio::test]
async fn test_tool_listing_failure_is_protocol_error() {
    let factory = Arc::new(
        FakeFactory::new().with_backend(FakeBackend::new("odd").failing_list("garbage listing")),
    );
    let pool = pool(&factory, vec![lazy_descriptor("odd")]);

    let err = pool.acquire("odd").await.unwrap_err();
    assert!(matches!(err, GatewayError::BackendProtocolError { .. }));
}

#[tokio::test]
async fn test_unknown_backend_is_unavailable() {
    let factory = Arc::new(FakeFactory::new());
    let pool = pool(&factory, vec![]);
    let err = pool.acquire("ghost").await.unwrap_err();
    assert!(matches!(err, GatewayError::BackendConnectionUnavailable { .. }));
    assert_eq!(err.backend(), Some("ghost"));
}

#[tokio::test]
async fn test_empty_stdio_command_is_misconfigured() {
    let pool = ConnectionPool::new(
        vec![BackendDescriptor::stdio("empty", "", vec![])],
        Arc::new(TransportFactory::default()),
        PoolConfig::default(),
    );

    let err = pool.acquire("empty").await.unwrap_err();
    assert!(matches!(err, GatewayError::BackendMisconfigured { .. }));

    let status = &pool.status()[0];
    assert_eq!(status.state, ConnectionStatus::Failed);
    assert_eq!(status.connect_attempts, 0);
}

#[tokio::test]
async fn test_unsafe_stdio_command_is_misconfigured() {
    let pool = ConnectionPool::new(
        vec![
            BackendDescriptor::stdio("chained", "node; rm -rf /", vec![]),
            BackendDescriptor::stdio("unlisted", "bash", vec!["-c".to_string(), "true".to_string()]),
        ],
        Arc::new(TransportFactory::default()),
        PoolConfig::default(),
    );

    for name in ["chained", "unlisted"] {
        let err = pool.acquire(name).await.unwrap_err();
        assert!(
            matches!(err, GatewayError::BackendMisconfigured { .. }),
            "{}: {:?}",
            name,
            err
        );
    }
}

#[tokio::test(start_paused = true)]
async fn test_acquire_gives_up_but_connect_continues() {
    let factory = Arc::new(
        FakeFactory::new().with_backend(slow("slow", Duration::from_secs(10))),
    );
    let config = PoolConfig {
        acquire_timeout: Duration::from_secs(1),
        ..test_pool_config()
    };
    let pool = ConnectionPool::new(vec![lazy_descriptor("slow")], factory.clone(), config);

    let err = pool.acquire("slow").await.unwrap_err();
    assert!(matches!(err, GatewayError::BackendConnectionUnavailable { .. }));
    assert_eq!(pool.status()[0].state, ConnectionStatus::Connecting);

    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(pool.acquire("slow").await.is_ok());
    assert_eq!(factory.backend("slow").connects(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_caller_does_not_abort_connect() {
    let factory = Arc::new(
        FakeFactory::new().with_backend(slow("todoist", Duration::from_secs(2))),
    );
    let pool = pool(&factory, vec![lazy_descriptor("todoist")]);

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire("todoist").await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    waiter.abort();

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert_eq!(pool.status()[0].state, ConnectionStatus::Ready);
    assert!(pool.acquire("todoist").await.is_ok());
    assert_eq!(factory.backend("todoist").connects(), 1);
}

#[tokio::test]
async fn test_status_lists_every_backend_sorted() {
    let factory = Arc::new(
        FakeFactory::new()
            .with_backend(slow("b", Duration::ZERO))
            .with_backend(slow("a", Duration::ZERO)),
    );
    let pool = pool(&factory, vec![lazy_descriptor("b"), lazy_descriptor("a")]);

    let statuses = pool.status();
    let names: Vec<&str> = statuses.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
    assert!(statuses.iter().all(|s| s.state == ConnectionStatus::Cold && s.lazy));

    let json = serde_json::to_value(&statuses[0]).unwrap();
    assert_eq!(json["state"], "cold");
    assert_eq!(json["transport"], "streamable-http");
}
