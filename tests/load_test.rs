//! Load testing for the forward proxy.

use std::time::{Duration, Instant};

use forward_proxy::WorkMode;

mod common;

#[tokio::test]
async fn test_load_performance() {
    // 1. Setup mock upstream
    let upstream = common::start_mock_backend(&[], b"Hello from upstream".to_vec()).await;

    // 2. Start proxy
    let mut config = common::test_config();
    config.speed_limiter.enabled = false;
    let (mut server, proxy) = common::start_proxy(config, WorkMode::Public).await;

    // 3. Run load
    let concurrency = 20;
    let requests_per_task = 25;
    let total_requests = concurrency * requests_per_task;

    let client = common::proxied_client(proxy);
    let start = Instant::now();

    let mut tasks = Vec::new();
    for _ in 0..concurrency {
        let client = client.clone();
        let url = format!("http://{upstream}/");
        tasks.push(tokio::spawn(async move {
            let mut latencies = Vec::new();
            for _ in 0..requests_per_task {
                let req_start = Instant::now();
                if let Ok(res) = client.get(&url).send().await {
                    if res.status().is_success() && res.bytes().await.is_ok() {
                        latencies.push(req_start.elapsed());
                    }
                }
            }
            latencies
        }));
    }

    let mut latencies = Vec::new();
    for task in tasks {
        latencies.extend(task.await.unwrap());
    }
    let elapsed = start.elapsed();

    // 4. Report
    latencies.sort();
    let succeeded = latencies.len();
    let p99 = latencies
        .get(succeeded.saturating_sub(1) * 99 / 100)
        .copied()
        .unwrap_or_default();
    println!(
        "{succeeded}/{total_requests} requests in {elapsed:?} ({:.0} req/s), p99 {p99:?}",
        succeeded as f64 / elapsed.as_secs_f64()
    );

    assert_eq!(succeeded, total_requests, "every request should succeed");
    assert!(p99 < Duration::from_secs(2));

    // 5. Every connection is released once the clients are done
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(server.active_connections(), 0);

    server.stop().await.unwrap();
}
