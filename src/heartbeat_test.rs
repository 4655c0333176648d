use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use super::*;

fn counting_ping(count: Arc<AtomicUsize>) -> impl FnMut() -> std::future::Ready<Result<Duration, SessionError>> + Send {
    move || {
        count.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Ok(Duration::ZERO))
    }
}

#[tokio::test]
async fn pings_repeatedly_until_stopped() {
    let count = Arc::new(AtomicUsize::new(0));
    let (_delay_tx, delay_rx) = watch::channel(Some(Duration::from_millis(5)));

    let heartbeat = Heartbeat::spawn(CancellationToken::new(), delay_rx, counting_ping(count.clone()), || {});
    tokio::time::sleep(Duration::from_millis(60)).await;
    heartbeat.stop().await;

    let after_stop = count.load(Ordering::SeqCst);
    assert!(after_stop >= 3, "expected several pings, got {after_stop}");

    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(count.load(Ordering::SeqCst), after_stop, "no ping may follow stop");
}

#[tokio::test]
async fn disabled_delay_never_pings() {
    let count = Arc::new(AtomicUsize::new(0));
    let (_delay_tx, delay_rx) = watch::channel(None);

    let heartbeat = Heartbeat::spawn(CancellationToken::new(), delay_rx, counting_ping(count.clone()), || {});
    tokio::time::sleep(Duration::from_millis(20)).await;
    heartbeat.stop().await;

    assert_eq!(count.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn disabling_delay_ends_loop_after_current_ping() {
    let count = Arc::new(AtomicUsize::new(0));
    let (delay_tx, delay_rx) = watch::channel(Some(Duration::from_millis(5)));

    let heartbeat = Heartbeat::spawn(CancellationToken::new(), delay_rx, counting_ping(count.clone()), || {});
    tokio::time::sleep(Duration::from_millis(20)).await;
    delay_tx.send_replace(None);
    tokio::time::sleep(Duration::from_millis(20)).await;

    let settled = count.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(count.load(Ordering::SeqCst), settled);
    assert!(heartbeat.task.is_finished());
    heartbeat.stop().await;
}

#[tokio::test]
async fn stop_interrupts_a_ping_in_flight() {
    let (_delay_tx, delay_rx) = watch::channel(Some(Duration::from_millis(5)));
    let ping = || std::future::pending::<Result<Duration, SessionError>>();

    let heartbeat = Heartbeat::spawn(CancellationToken::new(), delay_rx, ping, || {});
    tokio::time::sleep(Duration::from_millis(10)).await;

    tokio::time::timeout(Duration::from_millis(200), heartbeat.stop())
        .await
        .expect("stop must not wait for an unanswered ping");
}

#[tokio::test]
async fn timeout_reports_stall_and_exits() {
    let stalled = Arc::new(AtomicBool::new(false));
    let flag = stalled.clone();
    let (_delay_tx, delay_rx) = watch::channel(Some(Duration::from_millis(5)));
    let ping = || std::future::ready(Err(SessionError::Timeout(Duration::from_millis(1))));

    let heartbeat = Heartbeat::spawn(CancellationToken::new(), delay_rx, ping, move || flag.store(true, Ordering::SeqCst));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(stalled.load(Ordering::SeqCst));
    assert!(heartbeat.task.is_finished());
    heartbeat.stop().await;
}

#[tokio::test]
async fn closed_connection_ends_loop_without_stall() {
    let stalled = Arc::new(AtomicBool::new(false));
    let flag = stalled.clone();
    let (_delay_tx, delay_rx) = watch::channel(Some(Duration::from_millis(5)));
    let ping = || std::future::ready(Err(SessionError::Closed));

    let heartbeat = Heartbeat::spawn(CancellationToken::new(), delay_rx, ping, move || flag.store(true, Ordering::SeqCst));
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(!stalled.load(Ordering::SeqCst));
    assert!(heartbeat.task.is_finished());
    heartbeat.stop().await;
}

#[tokio::test]
async fn parent_cancellation_stops_loop() {
    let count = Arc::new(AtomicUsize::new(0));
    let parent = CancellationToken::new();
    let (_delay_tx, delay_rx) = watch::channel(Some(Duration::from_millis(5)));

    let heartbeat = Heartbeat::spawn(parent.child_token(), delay_rx, counting_ping(count.clone()), || {});
    parent.cancel();
    tokio::time::sleep(Duration::from_millis(20)).await;

    assert!(heartbeat.task.is_finished());
    heartbeat.stop().await;
}

#[tokio::test]
async fn decode_rejection_keeps_loop_running() {
    let count = Arc::new(AtomicUsize::new(0));
    let counter = count.clone();
    let (_delay_tx, delay_rx) = watch::channel(Some(Duration::from_millis(5)));
    let ping = move || {
        counter.fetch_add(1, Ordering::SeqCst);
        std::future::ready(Err(SessionError::Decode("bad frame".into())))
    };

    let heartbeat = Heartbeat::spawn(CancellationToken::new(), delay_rx, ping, || {});
    tokio::time::sleep(Duration::from_millis(40)).await;

    assert!(count.load(Ordering::SeqCst) >= 3, "loop must keep pinging after a decode rejection");
    assert!(!heartbeat.task.is_finished());
    heartbeat.stop().await;
}
