//! Control-plane and frontier tests across worker processes
//!
//! Two `Frontier` handles on the same database file stand in for two
//! processes sharing the queue.

use crate::support::{create_test_config, wait_for, TestFleet};
use std::sync::Arc;
use std::time::Duration;
use sumi_fleet::frontier::{partition_name, ControlAction, ControlScope, Frontier};
use tokio_util::sync::CancellationToken;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[tokio::test]
async fn test_pause_cancels_in_flight_job_and_requeues_it() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/slow"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw("<html><body>slow page</body></html>", "text/html")
                .set_delay(Duration::from_secs(5)),
        )
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path());
    let fleet = TestFleet::new(&config);
    let url = format!("{}/slow", server.uri());
    fleet.frontier.add_url(&url, 0, None).unwrap();

    let pool = fleet.worker_pool(&config);
    let shutdown = CancellationToken::new();
    let running = {
        let pool = Arc::clone(&pool);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { pool.run(shutdown).await })
    };

    wait_for(Duration::from_secs(5), "the job to be in flight", || pool.active_jobs() == 1).await;

    fleet.frontier.pause(ControlScope::Global).unwrap();

    let frontier = Arc::clone(&fleet.frontier);
    wait_for(Duration::from_secs(3), "the cancelled job to be re-queued", || {
        pool.active_jobs() == 0 && frontier.counts().unwrap().waiting == 1
    })
    .await;

    // Nothing is claimed while paused
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(pool.active_jobs(), 0);

    shutdown.cancel();
    running.await.unwrap().unwrap();

    let queued = fleet.frontier.waiting_jobs(10).unwrap();
    assert_eq!(queued.len(), 1);
    assert_eq!(queued[0].job.url, url);
    assert_eq!(queued[0].attempts_made, 0);
    assert_eq!(fleet.frontier.counts().unwrap().failed, 0);
}

#[tokio::test]
async fn test_shutdown_requeues_in_flight_job() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path());
    let fleet = TestFleet::new(&config);
    let url = format!("{}/page", server.uri());
    fleet.frontier.add_url(&url, 0, None).unwrap();

    let pool = fleet.worker_pool(&config);
    let shutdown = CancellationToken::new();
    let running = {
        let pool = Arc::clone(&pool);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { pool.run(shutdown).await })
    };

    wait_for(Duration::from_secs(5), "the job to be in flight", || pool.active_jobs() == 1).await;
    shutdown.cancel();
    running.await.unwrap().unwrap();

    let counts = fleet.frontier.counts().unwrap();
    assert_eq!(counts.waiting, 1);
    assert_eq!(counts.active, 0);
}

#[test]
fn test_stop_is_terminal_until_resume() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path());
    let frontier = Frontier::open(&config).unwrap();

    frontier.add_url("https://example.com/a", 0, None).unwrap();
    frontier.add_url("https://example.org/b", 1, None).unwrap();

    frontier.stop().unwrap();
    assert!(frontier.is_stopped().unwrap());
    assert_eq!(frontier.counts().unwrap().pending(), 0);

    // Still stopped after new work arrives, and across a reopen
    frontier.add_url("https://example.com/c", 0, None).unwrap();
    let other_process = Frontier::open(&config).unwrap();
    assert!(other_process.is_stopped().unwrap());
    for partition in 0..other_process.partition_count() {
        assert!(other_process.claim(partition).unwrap().is_none());
    }

    other_process.resume(ControlScope::Global).unwrap();
    assert!(!frontier.is_stopped().unwrap());

    let partition = frontier.partition_for("example.com");
    let claimed = frontier.claim(partition).unwrap().expect("job claimable after resume");
    assert_eq!(claimed.job.url, "https://example.com/c");
}

#[tokio::test]
async fn test_signals_relay_between_processes() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path());
    let operator = Frontier::open(&config).unwrap();
    let worker = Frontier::open(&config).unwrap();

    let mut signals = worker.control().subscribe();

    operator.pause(ControlScope::Global).unwrap();
    operator.empty().unwrap();

    assert_eq!(worker.control().poll_remote().unwrap(), 2);
    assert_eq!(signals.recv().await.unwrap().action, ControlAction::Pause);
    assert_eq!(signals.recv().await.unwrap().action, ControlAction::Empty);

    // Already relayed signals are not delivered twice
    assert_eq!(worker.control().poll_remote().unwrap(), 0);
    assert!(worker.is_paused().unwrap());
}

#[test]
fn test_partition_routing_is_shared_across_processes() {
    let dir = tempfile::tempdir().unwrap();
    let config = create_test_config(dir.path());
    let first = Frontier::open(&config).unwrap();
    let second = Frontier::open(&config).unwrap();

    first.add_url("http://example.com/page1", 0, None).unwrap();
    second.add_url("http://example.com/page2", 0, None).unwrap();

    let jobs = first.waiting_jobs(10).unwrap();
    assert_eq!(jobs.len(), 2);
    assert_eq!(jobs[0].partition, jobs[1].partition);
    assert_eq!(jobs[0].partition, partition_name(second.partition_for("example.com")));
}
