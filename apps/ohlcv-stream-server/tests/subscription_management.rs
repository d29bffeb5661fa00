//! Subscription Management Integration Tests
//!
//! Drives the stream hub directly with an in-memory upstream and a paused
//! clock: shared pollers, cadence recomputation, cleanup, slow consumers,
//! upstream failures and shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use rust_decimal_macros::dec;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use ohlcv_stream_server::domain::streaming::SnapshotFrame;
use ohlcv_stream_server::infrastructure::broadcast::OutboundQueue;
use ohlcv_stream_server::{
    Bar, BarFetcher, CadenceChange, FetchError, HubConfig, HubError, InMemoryBarSource, Interval,
    OutboundMessage, ServerConfig, StreamHub, TopicKey,
};

fn bar(close: rust_decimal::Decimal) -> Bar {
    Bar {
        datetime: Utc.with_ymd_and_hms(2024, 5, 1, 14, 30, 0).unwrap(),
        open: close,
        high: close,
        low: close,
        close,
        volume: dec!(1000),
    }
}

fn setup(config: HubConfig) -> (Arc<StreamHub>, Arc<InMemoryBarSource>) {
    let source = Arc::new(InMemoryBarSource::new(vec![bar(dec!(189.5))]));
    let fetcher = Arc::new(BarFetcher::new(
        Arc::clone(&source) as Arc<dyn ohlcv_stream_server::BarSource>,
        Duration::from_secs(10),
    ));
    let hub = StreamHub::new(fetcher, config, CancellationToken::new());
    (hub, source)
}

fn aapl() -> TopicKey {
    TopicKey::new("AAPL", "NASDAQ", Interval::Min1)
}

async fn next_frame(queue: &OutboundQueue, within: Duration) -> OutboundMessage {
    timeout(within, queue.recv())
        .await
        .expect("frame within deadline")
        .expect("queue open")
        .as_ref()
        .clone()
}

fn snapshot(message: &OutboundMessage) -> &SnapshotFrame {
    match message {
        OutboundMessage::Snapshot(frame) => frame,
        other => panic!("expected snapshot, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn shared_topic_polls_once_at_fastest_cadence() {
    let (hub, source) = setup(HubConfig::default());
    let (first, first_queue) = hub.open_connection().unwrap();
    let (second, second_queue) = hub.open_connection().unwrap();

    assert_eq!(
        hub.subscribe(first, aapl(), Duration::from_secs(60)).unwrap(),
        CadenceChange::Started(Duration::from_secs(60))
    );
    hub.subscribe(second, aapl(), Duration::from_secs(30)).unwrap();
    assert_eq!(hub.poller_cadence(&aapl()), Some(Duration::from_secs(30)));
    assert_eq!(hub.stats().pollers, 1);

    let a = next_frame(&first_queue, Duration::from_secs(31)).await;
    let b = next_frame(&second_queue, Duration::from_secs(1)).await;
    assert_eq!(a, b);
    assert_eq!(snapshot(&a).bar.close, dec!(189.5));
    assert_eq!(snapshot(&a).symbol, "AAPL");
    assert_eq!(source.request_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn cadence_slows_when_fastest_subscriber_leaves() {
    let (hub, _source) = setup(HubConfig::default());
    let (slow, _slow_queue) = hub.open_connection().unwrap();
    let (fast, _fast_queue) = hub.open_connection().unwrap();

    hub.subscribe(slow, aapl(), Duration::from_secs(60)).unwrap();
    hub.subscribe(fast, aapl(), Duration::from_secs(30)).unwrap();
    let generation = hub.poller_generation(&aapl()).unwrap();

    assert!(hub.remove_connection(fast));
    assert_eq!(hub.poller_cadence(&aapl()), Some(Duration::from_secs(60)));
    assert_ne!(hub.poller_generation(&aapl()), Some(generation));
    assert_eq!(hub.stats().pollers, 1);
}

#[tokio::test(start_paused = true)]
async fn last_subscriber_leaving_stops_polling() {
    let (hub, source) = setup(HubConfig::default());
    let (conn, queue) = hub.open_connection().unwrap();

    hub.subscribe(conn, aapl(), Duration::from_secs(5)).unwrap();
    next_frame(&queue, Duration::from_secs(6)).await;
    let fetched = source.request_count();

    assert_eq!(hub.unsubscribe(conn, &aapl()), CadenceChange::Stopped);
    assert_eq!(hub.stats().pollers, 0);

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(source.request_count(), fetched);
    assert!(queue.is_empty());
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_without_interval_removes_every_interval() {
    let (hub, _source) = setup(HubConfig::default());
    let (conn, _queue) = hub.open_connection().unwrap();

    hub.subscribe(conn, aapl(), Duration::from_secs(60)).unwrap();
    hub.subscribe(conn, TopicKey::new("AAPL", "NASDAQ", Interval::Daily), Duration::from_secs(60))
        .unwrap();
    hub.subscribe(conn, TopicKey::new("MSFT", "NASDAQ", Interval::Min1), Duration::from_secs(60))
        .unwrap();

    let removed = hub.unsubscribe_matching(conn, "AAPL", "NASDAQ", None);
    assert_eq!(removed.len(), 2);
    assert_eq!(
        hub.topics_for(conn),
        vec![TopicKey::new("MSFT", "NASDAQ", Interval::Min1)]
    );
    assert_eq!(hub.stats().pollers, 1);
}

#[tokio::test(start_paused = true)]
async fn slow_consumer_keeps_latest_frames() {
    let (hub, source) = setup(HubConfig {
        queue_capacity: 2,
        ..HubConfig::default()
    });
    let (conn, queue) = hub.open_connection().unwrap();
    hub.subscribe(conn, aapl(), Duration::from_secs(1)).unwrap();

    for close in [dec!(1), dec!(2), dec!(3), dec!(4), dec!(5)] {
        source.push_response(Ok(vec![bar(close)]));
    }
    tokio::time::sleep(Duration::from_millis(5_500)).await;

    assert_eq!(source.request_count(), 5);
    assert_eq!(queue.len(), 2);
    assert_eq!(queue.dropped_count(), 3);
    assert_eq!(hub.stats().frames_dropped, 3);

    let closes: Vec<_> = std::iter::from_fn(|| queue.try_recv())
        .map(|frame| snapshot(&frame).bar.close)
        .collect();
    assert_eq!(closes, vec![dec!(4), dec!(5)]);
}

#[tokio::test(start_paused = true)]
async fn failures_reach_subscribers_and_recover() {
    let (hub, source) = setup(HubConfig::default());
    let (conn, queue) = hub.open_connection().unwrap();
    source.push_response(Err(FetchError::Unavailable("connection refused".into())));

    hub.subscribe(conn, aapl(), Duration::from_secs(10)).unwrap();

    let error = next_frame(&queue, Duration::from_secs(11)).await;
    match &error {
        OutboundMessage::Error(frame) => {
            assert_eq!(frame.symbol.as_deref(), Some("AAPL"));
            assert_eq!(frame.exchange.as_deref(), Some("NASDAQ"));
        }
        other => panic!("expected error frame, got {other:?}"),
    }
    assert_eq!(hub.stats().failing_topics, 1);
    assert_eq!(hub.topic_statuses()[0].poller.consecutive_failures, 1);

    // Retried after the initial backoff rather than a full cadence.
    let recovered = next_frame(&queue, Duration::from_secs(6)).await;
    assert_eq!(snapshot(&recovered).bar.close, dec!(189.5));
    assert_eq!(hub.stats().failing_topics, 0);
}

#[tokio::test(start_paused = true)]
async fn consecutive_timeouts_are_tagged_then_snapshot_resumes() {
    let (hub, source) = setup(HubConfig::default());
    let (conn, queue) = hub.open_connection().unwrap();
    source.set_delay(Some(Duration::from_secs(11)));

    hub.subscribe(conn, aapl(), Duration::from_secs(1)).unwrap();

    // Fetches time out at 11s, 26s and 46s (backoff 5s, 10s, 20s between).
    for within in [12, 16, 21] {
        match next_frame(&queue, Duration::from_secs(within)).await {
            OutboundMessage::Error(frame) => {
                assert!(frame.error.contains("timed out"), "{}", frame.error);
                assert_eq!(frame.symbol.as_deref(), Some("AAPL"));
                assert_eq!(frame.exchange.as_deref(), Some("NASDAQ"));
                assert_eq!(frame.interval, Some(Interval::Min1));
            }
            other => panic!("expected error frame, got {other:?}"),
        }
    }
    assert_eq!(hub.topic_statuses()[0].poller.consecutive_failures, 3);

    source.set_delay(None);
    let recovered = next_frame(&queue, Duration::from_secs(21)).await;
    assert_eq!(snapshot(&recovered).symbol, "AAPL");
    assert_eq!(hub.stats().failing_topics, 0);
    assert_eq!(queue.dropped_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn zero_backoff_setting_does_not_spin_failing_poller() {
    let config = ServerConfig::from_lookup(|key| match key {
        "UPSTREAM_BASE_URL" => Some("http://bars.local".to_string()),
        "POLL_BACKOFF_INITIAL_MS" => Some("0".to_string()),
        _ => None,
    })
    .unwrap();
    let (hub, source) = setup(config.hub_config());
    source.set_fallback(Err(FetchError::Unavailable("connection refused".into())));
    let (conn, queue) = hub.open_connection().unwrap();

    hub.subscribe(conn, aapl(), Duration::from_secs(1)).unwrap();
    tokio::time::sleep(Duration::from_millis(1_500)).await;

    assert_eq!(source.request_count(), 1);
    assert_eq!(queue.len(), 1);
    assert_eq!(queue.dropped_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn shutdown_stops_everything() {
    let (hub, source) = setup(HubConfig::default());
    let (conn, queue) = hub.open_connection().unwrap();
    hub.subscribe(conn, aapl(), Duration::from_secs(5)).unwrap();

    hub.shutdown();
    assert!(queue.is_closed());
    assert_eq!(hub.stats().pollers, 0);
    assert_eq!(hub.open_connection().unwrap_err(), HubError::ShuttingDown);

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(source.request_count(), 0);
    assert!(hub.remove_connection(conn));
    assert_eq!(hub.stats().connections, 0);
}
