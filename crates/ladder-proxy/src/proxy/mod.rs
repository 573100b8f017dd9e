//! Inbound HTTP server.
//!
//! # Module Structure
//!
//! - `server` - ProxyServer struct and main run loop
//! - `handler` - routing under the mount point and chain execution
//! - `network` - Network listener utilities (SO_REUSEPORT)
//! - `metrics_server` - Prometheus scrape endpoint

mod handler;
mod metrics_server;
mod network;
mod server;

pub use metrics_server::run_metrics_server;
pub use network::create_reusable_listener;
pub use server::ProxyServer;
