//! Reachability probe for dev servers started by a run.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::trace;

/// Default connect timeout for [`check_port`].
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortStatus {
    pub port: u16,
    pub open: bool,
}

/// Whether something accepts TCP connections on `127.0.0.1:<port>`.
pub async fn check_port(port: u16, timeout: Duration) -> PortStatus {
    let open = matches!(
        tokio::time::timeout(timeout, TcpStream::connect(("127.0.0.1", port))).await,
        Ok(Ok(_))
    );
    trace!(port, open, "Probed port");
    PortStatus { port, open }
}
