//! Cloudflare edge IP scanner (§4.6): expands a list of CIDRs into
//! individual addresses and probes them with a bounded worker pool.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::core::cidr::expand_cidr;
use crate::core::events::{Event, EventBus};
use crate::core::history::HistoryStore;
use crate::core::prober::{ProbeOptions, Prober};
use crate::core::ranges::fetch_ranges;
use crate::core::types::{JobStatus, JobTerminalStatus, ScanResult};

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerRequest {
    pub cidr_list: Vec<String>,
    #[serde(default)]
    pub probe_options: ProbeOptions,
    pub concurrency: usize,
    #[serde(default)]
    pub top_n: Option<usize>,
}

pub struct ScannerHandles {
    pub stop: CancellationToken,
    pub status: Arc<ArcSwap<JobStatus>>,
    pub join: JoinHandle<()>,
}

pub fn spawn(
    req: ScannerRequest,
    prober: Arc<dyn Prober>,
    history: Arc<HistoryStore>,
    events: Arc<EventBus>,
) -> ScannerHandles {
    let stop = CancellationToken::new();
    let status = Arc::new(ArcSwap::from_pointee(JobStatus::Running));

    let inner = tokio::spawn(run(
        req,
        prober,
        history,
        events.clone(),
        stop.clone(),
        status.clone(),
    ));
    let join = tokio::spawn(supervise(inner, events, status.clone()));

    ScannerHandles { stop, status, join }
}

/// Mirrors `http_test::supervise`: catches a panic in the job's own task,
/// converts it into a `Fatal` log event plus a terminal `cfscan_status`, and
/// resets `status` to `idle` (§7, §9).
async fn supervise(inner: JoinHandle<()>, events: Arc<EventBus>, status: Arc<ArcSwap<JobStatus>>) {
    if let Err(e) = inner.await {
        warn!(error = %e, "scanner job panicked");
        events.publish(Event::log(
            "ScannerJob",
            format!("fatal: job panicked: {e}"),
        ));
        status.store(Arc::new(JobStatus::Idle));
        events.publish(Event::CfscanStatus {
            status: JobTerminalStatus::Stopped,
        });
    }
}

async fn run(
    req: ScannerRequest,
    prober: Arc<dyn Prober>,
    history: Arc<HistoryStore>,
    events: Arc<EventBus>,
    stop: CancellationToken,
    status: Arc<ArcSwap<JobStatus>>,
) {
    let cidr_list = if req.cidr_list.is_empty() {
        fetch_ranges().await
    } else {
        req.cidr_list.clone()
    };

    let mut total: u64 = 0;
    let mut iters = Vec::new();
    for cidr in &cidr_list {
        match expand_cidr(cidr) {
            Ok(iter) => {
                total += iter.len();
                iters.push(iter);
            }
            Err(e) => {
                events.publish(Event::log("ScannerJob", format!("skipping {cidr}: {e}")));
            }
        }
    }

    let concurrency = req.concurrency.max(1);
    let (tx, rx) = tokio::sync::mpsc::channel::<std::net::IpAddr>(concurrency);
    let rx = Arc::new(tokio::sync::Mutex::new(rx));

    let feeder = {
        let stop = stop.clone();
        tokio::spawn(async move {
            'outer: for iter in iters {
                for ip in iter {
                    if stop.is_cancelled() {
                        break 'outer;
                    }
                    if tx.send(ip).await.is_err() {
                        break 'outer;
                    }
                }
            }
        })
    };

    let tested = Arc::new(AtomicU64::new(0));
    let successes = Arc::new(tokio::sync::Mutex::new(Vec::<ScanResult>::new()));
    let mut workers = Vec::with_capacity(concurrency);

    for _ in 0..concurrency {
        let rx = rx.clone();
        let prober = prober.clone();
        let events = events.clone();
        let tested = tested.clone();
        let successes = successes.clone();
        let stop = stop.clone();
        let options = req.probe_options.clone();

        workers.push(tokio::spawn(async move {
            loop {
                let ip = { rx.lock().await.recv().await };
                let Some(ip) = ip else { break };
                let cancel = stop.child_token();
                let result = match prober.probe(&ip.to_string(), &options, cancel).await {
                    Ok(health) => ScanResult {
                        ip: ip.to_string(),
                        delay_ms: Some(health.delay_ms),
                        loss_pct: 0.0,
                        location: health.location,
                    },
                    Err(_) => ScanResult {
                        ip: ip.to_string(),
                        delay_ms: None,
                        loss_pct: 100.0,
                        location: None,
                    },
                };

                let succeeded = result.delay_ms.is_some();
                events.publish(Event::CfscanResult {
                    result: result.clone(),
                });
                if succeeded {
                    successes.lock().await.push(result);
                }

                let done = tested.fetch_add(1, Ordering::SeqCst) + 1;
                events.publish(Event::CfScanProgress { tested: done, total });
            }
        }));
    }

    let _ = feeder.await;
    for worker in workers {
        let _ = worker.await;
    }

    let mut rows = Arc::try_unwrap(successes)
        .map(|m| m.into_inner())
        .unwrap_or_default();

    if !rows.is_empty() {
        if let Err(e) = history.append_scan_results(&rows).await {
            events.publish(Event::log(
                "ScannerJob",
                format!("failed writing history: {e}"),
            ));
        }
    }

    if let Some(top_n) = req.top_n {
        rows.sort_by(|a, b| a.delay_ms.unwrap_or(u64::MAX).cmp(&b.delay_ms.unwrap_or(u64::MAX)));
        rows.truncate(top_n);
        events.publish(Event::log(
            "ScannerJob",
            format!("top {} results: {:?}", rows.len(), rows),
        ));
    }

    let terminal = if stop.is_cancelled() {
        JobTerminalStatus::Stopped
    } else {
        JobTerminalStatus::Finished
    };

    status.store(Arc::new(JobStatus::Idle));
    events.publish(Event::CfscanStatus { status: terminal });
}
