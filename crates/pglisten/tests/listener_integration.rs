//! Integration tests for listener and fan-out against the in-memory broker.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

use pglisten::{Fanout, Listener, ListenerConfig, MemoryBroker, Notification, Subscription};

const TIMEOUT: Duration = Duration::from_secs(2);

/// Log sink collecting formatted events in memory.
#[derive(Clone, Default)]
struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl CapturedLogs {
    fn dispatch(&self) -> tracing::Dispatch {
        let subscriber = tracing_subscriber::fmt()
            .with_writer(self.clone())
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .finish();
        tracing::Dispatch::new(subscriber)
    }

    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for CapturedLogs {
    type Writer = CapturedLogs;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

struct TestContext {
    broker: Arc<MemoryBroker>,
    listener: Listener,
    logs: CapturedLogs,
}

impl TestContext {
    fn new() -> Self {
        Self::with_retry_interval(Duration::from_millis(50))
    }

    fn with_retry_interval(interval: Duration) -> Self {
        let broker = Arc::new(MemoryBroker::new());
        let logs = CapturedLogs::default();
        let config = ListenerConfig::new()
            .with_retry_interval(interval)
            .with_dispatch(logs.dispatch());
        let listener = Listener::start(broker.clone(), config);

        Self {
            broker,
            listener,
            logs,
        }
    }
}

async fn next(sub: &mut Subscription) -> Notification {
    tokio::time::timeout(TIMEOUT, sub.recv())
        .await
        .expect("timed out waiting for notification")
        .expect("subscription closed")
}

/// Next non-reset notification.
async fn next_payload(sub: &mut Subscription) -> String {
    loop {
        let notification = next(sub).await;
        if !notification.is_reset() {
            return notification.payload;
        }
    }
}

#[tokio::test]
async fn test_single_channel_roundtrip() {
    let ctx = TestContext::new();

    let mut orders = ctx.listener.subscribe("orders").unwrap();
    assert_eq!(next(&mut orders).await, Notification::reset());

    ctx.broker.notify("orders", "42");
    assert_eq!(
        next(&mut orders).await,
        Notification {
            payload: "42".to_string(),
            connection_reset: false,
        }
    );

    ctx.listener.stop().await;
    assert_eq!(ctx.broker.open_connections(), 0);
}

#[tokio::test]
async fn test_channels_are_isolated() {
    let ctx = TestContext::new();

    let mut a = ctx.listener.subscribe("a").unwrap();
    let mut b = ctx.listener.subscribe("b").unwrap();
    assert!(ctx.broker.wait_for_listen("a", TIMEOUT).await);
    assert!(ctx.broker.wait_for_listen("b", TIMEOUT).await);

    ctx.broker.notify("a", "for a");
    ctx.broker.notify("b", "for b");

    assert_eq!(next_payload(&mut a).await, "for a");
    assert_eq!(next_payload(&mut b).await, "for b");
    assert!(a.try_recv().is_none());
    assert!(b.try_recv().is_none());

    ctx.listener.stop().await;
}

#[tokio::test]
async fn test_reconnect_after_connection_failure() {
    let ctx = TestContext::new();

    // both subscribed before the supervision task first runs: one connection
    let mut a = ctx.listener.subscribe("a").unwrap();
    let mut b = ctx.listener.subscribe("b").unwrap();
    assert!(next(&mut a).await.is_reset());
    assert!(next(&mut b).await.is_reset());
    let acquired = ctx.broker.acquired();
    assert_eq!(acquired, 1);

    ctx.broker.break_connections();

    assert!(next(&mut a).await.is_reset());
    assert!(next(&mut b).await.is_reset());
    assert_eq!(ctx.broker.acquired(), acquired + 1);
    assert!(ctx.logs.contents().contains("dispatcher failed"));

    ctx.broker.notify("a", "after reconnect");
    assert_eq!(next(&mut a).await, Notification::new("after reconnect"));

    ctx.listener.stop().await;
    assert_eq!(ctx.broker.open_connections(), 0);
}

#[tokio::test]
async fn test_unavailable_server_is_retried() {
    let ctx = TestContext::new();
    ctx.broker.set_available(false);

    let mut sub = ctx.listener.subscribe("orders").unwrap();
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(sub.try_recv().is_none());
    assert!(ctx.broker.acquire_attempts() >= 2);

    ctx.broker.set_available(true);
    assert!(next(&mut sub).await.is_reset());
    assert!(ctx.logs.contents().contains("memory broker unavailable"));

    ctx.listener.stop().await;
}

#[tokio::test]
async fn test_every_subscription_starts_with_reset() {
    let ctx = TestContext::new();

    let mut first = ctx.listener.subscribe("first").unwrap();
    assert!(next(&mut first).await.is_reset());

    let mut kept = Vec::new();
    for round in 0..5 {
        let name = format!("channel-{round}");
        let mut sub = ctx.listener.subscribe(name.as_str()).unwrap();
        assert!(next(&mut sub).await.is_reset(), "round {round}");

        if round % 2 == 0 {
            sub.release();
        } else {
            kept.push(sub);
        }
    }

    // a name released earlier can be subscribed again and starts over
    let mut again = ctx.listener.subscribe("channel-0").unwrap();
    assert!(next(&mut again).await.is_reset());

    assert_eq!(
        ctx.listener.channels(),
        vec!["channel-0", "channel-1", "channel-3", "first"]
    );

    ctx.listener.stop().await;
}

#[tokio::test]
async fn test_stop_leaves_subscriptions_silent() {
    let ctx = TestContext::new();

    let mut sub = ctx.listener.subscribe("orders").unwrap();
    assert!(next(&mut sub).await.is_reset());

    ctx.listener.stop().await;
    assert!(!ctx.broker.is_listening("orders"));
    assert_eq!(ctx.broker.notify("orders", "ignored"), 0);
    assert!(sub.try_recv().is_none());
    assert!(ctx.logs.contents().contains("listener stopped"));
}

#[tokio::test]
async fn test_fanout_of_listener_subscription() {
    let ctx = TestContext::new();

    let source = ctx.listener.subscribe("events").unwrap();
    let fanout = Fanout::start(source);
    let mut first = fanout.listen();
    let mut second = fanout.listen();

    assert!(next(&mut first).await.is_reset());
    assert!(next(&mut second).await.is_reset());

    ctx.broker.notify("events", "x");
    assert_eq!(next(&mut first).await, Notification::new("x"));
    assert_eq!(next(&mut second).await, Notification::new("x"));

    second.release();
    ctx.broker.notify("events", "y");
    assert_eq!(next(&mut first).await, Notification::new("y"));
    assert_eq!(second.try_recv(), None);
    assert_eq!(fanout.len(), 1);

    fanout.stop().await;
    ctx.listener.stop().await;
}
