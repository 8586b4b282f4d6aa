//! The rotation state machine (§4.4) — the hardest subsystem in the
//! daemon. Drives [`ProxyCore`] without operator involvement, reacting to
//! time, forced rotation, and liveness failures.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant as TokioInstant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::RotationDefaults;
use crate::core::events::{Event, EventBus};
use crate::core::prober::Prober;
use crate::core::proxy_core::{ProxyCore, ProxyCoreHandle};
use crate::core::types::{OutboundHealth, ProxyInstance, ProxyStartConfig, RotationState};

const PROXY_DETAILS_HEARTBEAT: Duration = Duration::from_secs(5);

pub struct RotationHandles {
    pub rotate_now: Arc<Notify>,
    pub stop: CancellationToken,
    pub snapshot: Arc<ArcSwap<ProxyInstance>>,
    pub join: JoinHandle<()>,
}

pub fn spawn(
    cfg: ProxyStartConfig,
    prober: Arc<dyn Prober>,
    proxy_core: Arc<dyn ProxyCore>,
    events: Arc<EventBus>,
    defaults: RotationDefaults,
) -> RotationHandles {
    let rotate_now = Arc::new(Notify::new());
    let stop = CancellationToken::new();
    let total = cfg.pool.len();
    let snapshot = Arc::new(ArcSwap::from_pointee(ProxyInstance {
        inbound: cfg.inbound.clone(),
        active: None,
        pool: cfg.pool.clone(),
        interval_s: cfg.interval_s,
        rotation_state: RotationState::Probing,
        next_rotation_at: None,
        total,
    }));

    let join = tokio::spawn(run(
        cfg,
        prober,
        proxy_core,
        events,
        rotate_now.clone(),
        stop.clone(),
        snapshot.clone(),
        defaults,
    ));

    RotationHandles {
        rotate_now,
        stop,
        snapshot,
        join,
    }
}

async fn run(
    cfg: ProxyStartConfig,
    prober: Arc<dyn Prober>,
    proxy_core: Arc<dyn ProxyCore>,
    events: Arc<EventBus>,
    rotate_now: Arc<Notify>,
    stop: CancellationToken,
    snapshot: Arc<ArcSwap<ProxyInstance>>,
    defaults: RotationDefaults,
) {
    let backoff_initial = Duration::from_secs(defaults.backoff_initial_s);
    let backoff_cap = Duration::from_secs(defaults.backoff_cap_s);

    let mut state = RotationState::Probing;
    let mut active_idx: Option<usize> = None;
    let mut core_handle: Option<ProxyCoreHandle> = None;
    let mut backoff = backoff_initial;

    publish_status(&events, state);

    loop {
        state = match state {
            RotationState::Probing | RotationState::Switching => {
                match sweep_or_retain_active(&cfg, &prober, active_idx, &stop).await {
                    Some((idx, health)) => {
                        if core_handle.is_none() {
                            match proxy_core
                                .bind_inbound(&cfg.inbound, health.config.clone())
                                .await
                            {
                                Ok(handle) => core_handle = Some(handle),
                                Err(e) => {
                                    warn!(error = %e, "inbound bind failed");
                                    events.publish(Event::log(
                                        "RotationEngine",
                                        format!("inbound bind failed: {e}"),
                                    ));
                                    break;
                                }
                            }
                        } else {
                            proxy_core
                                .swap_outbound(core_handle.as_ref().unwrap(), health.config.clone());
                        }

                        active_idx = Some(idx);
                        backoff = backoff_initial;
                        activate(&cfg, &snapshot, health);
                        publish_status(&events, RotationState::Active);
                        publish_details(&events, &snapshot);
                        RotationState::Active
                    }
                    None => {
                        set_state(&snapshot, RotationState::Stalled);
                        publish_status(&events, RotationState::Stalled);
                        RotationState::Stalled
                    }
                }
            }
            RotationState::Active => {
                let next = wait_while_active(
                    &cfg,
                    active_idx.expect("active state always has an active index"),
                    &prober,
                    &rotate_now,
                    &stop,
                    &snapshot,
                    &events,
                    &defaults,
                )
                .await;

                // §4.4: every state change is published, including the
                // transient `active → switching` edge the sweep that
                // follows never surfaces on its own (§8 scenario 1).
                if next == RotationState::Switching {
                    set_state(&snapshot, RotationState::Switching);
                    publish_status(&events, RotationState::Switching);
                }
                next
            }
            RotationState::Stalled => {
                let next = tokio::select! {
                    _ = stop.cancelled() => RotationState::Stopping,
                    _ = rotate_now.notified() => RotationState::Probing,
                    _ = tokio::time::sleep(backoff) => {
                        backoff = (backoff * 2).min(backoff_cap);
                        RotationState::Probing
                    }
                };

                // Re-entry into `probing` (forced or backoff-driven) is
                // also a state change that must be published (§4.4).
                if next == RotationState::Probing {
                    set_state(&snapshot, RotationState::Probing);
                    publish_status(&events, RotationState::Probing);
                }
                next
            }
            RotationState::Stopping | RotationState::Stopped | RotationState::Idle => break,
        };

        if stop.is_cancelled() && !matches!(state, RotationState::Stopping | RotationState::Stopped)
        {
            state = RotationState::Stopping;
        }

        if state == RotationState::Stopping {
            break;
        }
    }

    if let Some(handle) = core_handle {
        proxy_core.close(handle).await;
    }

    set_state(&snapshot, RotationState::Stopped);
    publish_status(&events, RotationState::Stopped);
    info!("rotation engine stopped");
}

/// Waits while `Active`, returning the next state to transition to. Also
/// runs the background liveness prober and the ≥5s `proxy_details`
/// heartbeat (§4.4).
async fn wait_while_active(
    cfg: &ProxyStartConfig,
    active_idx: usize,
    prober: &Arc<dyn Prober>,
    rotate_now: &Notify,
    stop: &CancellationToken,
    snapshot: &Arc<ArcSwap<ProxyInstance>>,
    events: &Arc<EventBus>,
    defaults: &RotationDefaults,
) -> RotationState {
    let total = cfg.pool.len();
    let rotation_disabled = cfg.interval_s == 0 || total <= 1;
    let rotation_deadline = if rotation_disabled {
        None
    } else {
        Some(TokioInstant::now() + Duration::from_secs(cfg.interval_s))
    };

    let liveness_interval =
        Duration::from_secs((cfg.interval_s / 4).max(defaults.liveness_probe_floor_s));
    let mut liveness_ticker = tokio::time::interval(liveness_interval);
    liveness_ticker.tick().await;

    let mut publish_ticker = tokio::time::interval(PROXY_DETAILS_HEARTBEAT);
    publish_ticker.tick().await;

    let mut consecutive_failures = 0u32;

    loop {
        tokio::select! {
            _ = stop.cancelled() => return RotationState::Stopping,
            _ = rotate_now.notified() => return RotationState::Switching,
            _ = async { tokio::time::sleep_until(rotation_deadline.unwrap()).await },
                if rotation_deadline.is_some() => return RotationState::Switching,
            _ = liveness_ticker.tick() => {
                let cancel = stop.child_token();
                match prober.probe(&cfg.pool[active_idx], &cfg.options, cancel).await {
                    Ok(_) => consecutive_failures = 0,
                    Err(_) => {
                        consecutive_failures += 1;
                        if consecutive_failures >= defaults.failure_threshold {
                            return RotationState::Switching;
                        }
                    }
                }
            }
            _ = publish_ticker.tick() => {
                publish_details(events, snapshot);
            }
        }
    }
}

/// One pass through `pool`, starting just after `active_idx` (or 0),
/// skipping the active candidate unless it is the sole member (§4.4).
async fn sweep(
    cfg: &ProxyStartConfig,
    prober: &Arc<dyn Prober>,
    active_idx: Option<usize>,
    stop: &CancellationToken,
) -> Option<(usize, OutboundHealth)> {
    let total = cfg.pool.len();
    if total == 0 {
        return None;
    }

    let start = active_idx.map(|i| (i + 1) % total).unwrap_or(0);
    for step in 0..total {
        let idx = (start + step) % total;
        if Some(idx) == active_idx && total > 1 {
            continue;
        }
        if stop.is_cancelled() {
            return None;
        }

        let cancel = stop.child_token();
        if let Ok(health) = prober.probe(&cfg.pool[idx], &cfg.options, cancel).await {
            return Some((idx, health));
        }
    }

    None
}

/// Wraps [`sweep`] with the fallback §8 scenario 2 describes: a forced or
/// liveness-triggered rotation that finds no *other* healthy candidate
/// falls back to re-probing the still-installed incumbent rather than
/// stalling outright. Only a genuinely unreachable incumbent (or a cold
/// start with no incumbent at all) stalls.
async fn sweep_or_retain_active(
    cfg: &ProxyStartConfig,
    prober: &Arc<dyn Prober>,
    active_idx: Option<usize>,
    stop: &CancellationToken,
) -> Option<(usize, OutboundHealth)> {
    if let Some(found) = sweep(cfg, prober, active_idx, stop).await {
        return Some(found);
    }

    let idx = active_idx?;
    if stop.is_cancelled() {
        return None;
    }
    let cancel = stop.child_token();
    prober
        .probe(&cfg.pool[idx], &cfg.options, cancel)
        .await
        .ok()
        .map(|health| (idx, health))
}

fn activate(cfg: &ProxyStartConfig, snapshot: &Arc<ArcSwap<ProxyInstance>>, health: OutboundHealth) {
    let next_rotation_at = if cfg.interval_s == 0 || cfg.pool.len() <= 1 {
        None
    } else {
        Some(chrono::Utc::now().timestamp() + cfg.interval_s as i64)
    };

    snapshot.store(Arc::new(ProxyInstance {
        inbound: cfg.inbound.clone(),
        active: Some(health),
        pool: cfg.pool.clone(),
        interval_s: cfg.interval_s,
        rotation_state: RotationState::Active,
        next_rotation_at,
        total: cfg.pool.len(),
    }));
}

fn set_state(snapshot: &Arc<ArcSwap<ProxyInstance>>, state: RotationState) {
    let current = snapshot.load_full();
    snapshot.store(Arc::new(ProxyInstance {
        rotation_state: state,
        ..(*current).clone()
    }));
}

fn publish_status(events: &Arc<EventBus>, state: RotationState) {
    events.publish(Event::ProxyStatus { status: state });
}

fn publish_details(events: &Arc<EventBus>, snapshot: &Arc<ArcSwap<ProxyInstance>>) {
    events.publish(Event::ProxyDetails {
        instance: (*snapshot.load_full()).clone(),
    });
}
