pub mod cidr;
pub mod debug_logger;
pub mod events;
pub mod history;
pub mod jobs;
pub mod manager;
pub mod prober;
pub mod proxy_core;
pub mod ranges;
pub mod rotation;
pub mod types;

pub use debug_logger::DebugLogger;
pub use events::{Event, EventBus, EventKind};
pub use history::HistoryStore;
pub use manager::{ProxyStatus, ServiceManager};
pub use prober::{IsahcProber, ProbeOptions, Prober};
pub use proxy_core::{ProxyCore, ProxyCoreError, TcpProxyCore};
