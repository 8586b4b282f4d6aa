//! The wire-level proxy runtime (§4.3). Binds a local listener and forwards
//! traffic to whatever outbound is currently recorded as active. Full
//! SOCKS/HTTP framing is explicitly out of scope (§1); this reference
//! implementation plain-forwards bytes to a fresh TCP connection per accept.

use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;
use tokio::io::copy_bidirectional;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::types::{InboundSpec, ProxyConfig};

#[derive(Debug, Error)]
pub enum ProxyCoreError {
    #[error("failed to bind inbound listener on {0}: {1}")]
    BindFailed(String, std::io::Error),
    #[error("handle already closed")]
    Closed,
}

/// Opaque handle to a bound listener. `SwapOutbound` takes this, not the
/// listener itself, so the listening socket is never exposed to callers.
pub struct ProxyCoreHandle {
    pub(crate) outbound: Arc<ArcSwap<ProxyConfig>>,
    pub(crate) accept_loop: JoinHandle<()>,
    pub(crate) cancel: CancellationToken,
}

/// `BindInbound` / `SwapOutbound` / `Close` (§4.3). A single local TCP
/// listener is bound once and never rebound; outbound selection is read at
/// accept time from an epoch-numbered `arc-swap` pointer (§9 design note).
#[async_trait::async_trait]
pub trait ProxyCore: Send + Sync {
    async fn bind_inbound(
        &self,
        inbound: &InboundSpec,
        initial_outbound: ProxyConfig,
    ) -> Result<ProxyCoreHandle, ProxyCoreError>;

    fn swap_outbound(&self, handle: &ProxyCoreHandle, config: ProxyConfig);

    async fn close(&self, handle: ProxyCoreHandle);
}

pub struct TcpProxyCore;

impl TcpProxyCore {
    pub fn new() -> Self {
        Self
    }
}

impl Default for TcpProxyCore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl ProxyCore for TcpProxyCore {
    async fn bind_inbound(
        &self,
        inbound: &InboundSpec,
        initial_outbound: ProxyConfig,
    ) -> Result<ProxyCoreHandle, ProxyCoreError> {
        let bind_addr: SocketAddr = format!("{}:{}", inbound.addr, inbound.port)
            .parse()
            .map_err(|e: std::net::AddrParseError| {
                ProxyCoreError::BindFailed(
                    inbound.addr.clone(),
                    std::io::Error::new(std::io::ErrorKind::InvalidInput, e),
                )
            })?;

        let listener = TcpListener::bind(bind_addr)
            .await
            .map_err(|e| ProxyCoreError::BindFailed(inbound.addr.clone(), e))?;

        let outbound = Arc::new(ArcSwap::from_pointee(initial_outbound));
        let cancel = CancellationToken::new();

        let accept_outbound = outbound.clone();
        let accept_cancel = cancel.clone();
        let accept_loop = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    accepted = listener.accept() => {
                        let (downstream, peer) = match accepted {
                            Ok(pair) => pair,
                            Err(e) => {
                                warn!(error = %e, "inbound accept failed");
                                continue;
                            }
                        };
                        let target = accept_outbound.load_full();
                        tokio::spawn(forward(downstream, peer, target));
                    }
                }
            }
        });

        Ok(ProxyCoreHandle {
            outbound,
            accept_loop,
            cancel,
        })
    }

    fn swap_outbound(&self, handle: &ProxyCoreHandle, config: ProxyConfig) {
        handle.outbound.store(Arc::new(config));
    }

    async fn close(&self, handle: ProxyCoreHandle) {
        handle.cancel.cancel();
        handle.accept_loop.abort();
        let _ = handle.accept_loop.await;
    }
}

/// Opens a fresh connection to `target` and pipes bytes both ways. Errors
/// are logged and dropped: a single failed forward must not affect the
/// listener or any other in-flight connection.
async fn forward(mut downstream: TcpStream, peer: SocketAddr, target: Arc<ProxyConfig>) {
    let upstream_addr = target.as_str();
    let mut upstream = match TcpStream::connect(upstream_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%peer, outbound = %upstream_addr, error = %e, "outbound connect failed");
            return;
        }
    };

    match copy_bidirectional(&mut downstream, &mut upstream).await {
        Ok((to_upstream, to_downstream)) => {
            debug!(%peer, to_upstream, to_downstream, "connection closed");
        }
        Err(e) => {
            debug!(%peer, error = %e, "connection forwarding ended");
        }
    }
}
