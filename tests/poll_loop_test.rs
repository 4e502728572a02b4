//! Background poll loop start/stop behaviour

mod common;

use std::time::Duration;

use common::*;
use factory_tasks::poller;

const PERIOD: Duration = Duration::from_millis(30);

async fn wait_for(mut check: impl FnMut() -> bool) {
    for _ in 0..100 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("condition not met within 2s");
}

#[tokio::test]
async fn polls_until_remote_change_is_adopted() {
    let server = start_fake_server().await;
    let sync = connected(&server, "line-4").await;
    let handle = poller::spawn(sync.clone(), PERIOD);

    let theirs = vec![new_task("Posted from the tablet")];
    server.store.put_tasks("line-4", &theirs);

    wait_for(|| sync.tasks() == theirs).await;
    assert!(server.store.gets() >= 2);
    handle.stop().await;
}

#[tokio::test]
async fn first_poll_waits_one_period() {
    let server = start_fake_server().await;
    let sync = connected(&server, "line-4").await;
    let gets = server.store.gets();

    let handle = poller::spawn(sync.clone(), Duration::from_millis(300));
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(server.store.gets(), gets);
    handle.stop().await;
}

#[tokio::test]
async fn disconnect_ends_the_loop() {
    let server = start_fake_server().await;
    let sync = connected(&server, "line-4").await;
    let baseline = server.store.gets();
    let handle = poller::spawn(sync.clone(), PERIOD);

    wait_for(|| server.store.gets() > baseline).await;
    sync.disconnect();
    wait_for(|| handle.is_finished()).await;

    let gets = server.store.gets();
    tokio::time::sleep(PERIOD * 5).await;
    assert_eq!(server.store.gets(), gets);
}

#[tokio::test]
async fn stopping_the_handle_ends_the_loop() {
    let server = start_fake_server().await;
    let sync = connected(&server, "line-4").await;
    let baseline = server.store.gets();
    let handle = poller::spawn(sync.clone(), PERIOD);

    wait_for(|| server.store.gets() > baseline).await;
    handle.stop().await;

    let gets = server.store.gets();
    tokio::time::sleep(PERIOD * 5).await;
    assert_eq!(server.store.gets(), gets);
    assert!(sync.active_bucket().is_some());
}

#[tokio::test]
async fn dropping_the_handle_ends_the_loop() {
    let server = start_fake_server().await;
    let sync = connected(&server, "line-4").await;
    let baseline = server.store.gets();
    let handle = poller::spawn(sync.clone(), PERIOD);

    wait_for(|| server.store.gets() > baseline).await;
    drop(handle);
    tokio::time::sleep(PERIOD * 2).await;

    let gets = server.store.gets();
    tokio::time::sleep(PERIOD * 5).await;
    assert_eq!(server.store.gets(), gets);
}

#[tokio::test]
async fn inactive_session_never_polls() {
    let server = start_fake_server().await;
    let (_, sync) = coordinator(&server.url);

    let handle = poller::spawn(sync, PERIOD);
    wait_for(|| handle.is_finished()).await;

    assert_eq!(server.store.gets(), 0);
}

#[tokio::test]
async fn slow_polls_never_overlap() {
    let server = start_fake_server().await;
    let sync = connected(&server, "line-4").await;
    let baseline = server.store.gets();
    server.store.delay_gets(Duration::from_millis(120));

    let handle = poller::spawn(sync.clone(), PERIOD);
    tokio::time::sleep(Duration::from_millis(500)).await;
    handle.stop().await;

    assert!(server.store.gets() >= baseline + 2);
    assert_eq!(server.store.max_gets_in_flight(), 1);
}

#[tokio::test]
async fn zero_period_is_clamped() {
    let server = start_fake_server().await;
    let sync = connected(&server, "line-4").await;
    let baseline = server.store.gets();

    let handle = poller::spawn(sync.clone(), Duration::ZERO);
    wait_for(|| server.store.gets() > baseline + 2).await;

    assert!(!handle.is_finished());
    handle.stop().await;
}
