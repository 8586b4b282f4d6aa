//! §8 scenario 4 ("concurrent jobs"): the proxy, the HTTP tester, and the
//! scanner run at once, each publishing its own events and terminating with
//! its own status, and the history files end up holding exactly the
//! successful counts each job reported.

use std::time::Duration;

use rotaproxyd::core::jobs::{HttpTestRequest, ScannerRequest};
use rotaproxyd::core::prober::ProbeOptions;
use rotaproxyd::core::types::{InboundSpec, JobStatus, ProxyStartConfig};
use rotaproxyd::core::ProxyStatus;

use super::support::{test_manager, wait_until_async};

fn proxy_cfg(pool: Vec<&str>) -> ProxyStartConfig {
    ProxyStartConfig {
        inbound: InboundSpec {
            protocol: "socks5".to_string(),
            addr: "127.0.0.1".to_string(),
            port: 0,
            orig_link: None,
        },
        pool: pool.into_iter().map(|s| s.to_string()).collect(),
        interval_s: 3600,
        options: ProbeOptions::default(),
    }
}

#[tokio::test]
async fn proxy_http_test_and_scanner_run_concurrently_and_terminate_independently() {
    let dir = tempfile::tempdir().unwrap();
    let manager = test_manager(dir.path());

    manager
        .start_proxy(proxy_cfg(vec![
            "socks5://a.example:1080",
            "socks5://b.example:1080",
        ]))
        .await
        .unwrap();

    let links: Vec<String> = (0..6).map(|i| format!("https://example.com/{i}")).collect();
    manager
        .start_http_test(HttpTestRequest {
            links,
            thread_count: 3,
            options: ProbeOptions::default(),
        })
        .await
        .unwrap();

    manager
        .start_scanner(ScannerRequest {
            cidr_list: vec!["104.16.0.0/29".to_string()],
            probe_options: ProbeOptions::default(),
            concurrency: 2,
            top_n: None,
        })
        .await
        .unwrap();

    assert!(
        wait_until_async(
            || async { manager.proxy_status().await == ProxyStatus::Running },
            Duration::from_secs(2)
        )
        .await,
        "proxy must reach running while the other two jobs are also in flight"
    );

    assert!(
        wait_until_async(
            || async { manager.http_test_status().await == JobStatus::Idle },
            Duration::from_secs(5)
        )
        .await,
        "http test job must reach a terminal idle status"
    );
    assert!(
        wait_until_async(
            || async { manager.scanner_status().await == JobStatus::Idle },
            Duration::from_secs(5)
        )
        .await,
        "scanner job must reach a terminal idle status"
    );

    let http_history = manager.http_test_history().await.unwrap();
    assert_eq!(
        http_history.len(),
        6,
        "all 6 links succeed against the mock prober"
    );

    let scan_history = manager.scan_history().await.unwrap();
    assert_eq!(
        scan_history.len(),
        8,
        "104.16.0.0/29 expands to exactly 8 addresses, all reachable against the mock prober"
    );

    // The proxy is independent of the two finite jobs and must still be
    // running after they have both completed.
    assert!(manager.proxy_details().await.is_ok());

    manager.stop_proxy().await.unwrap();
}
