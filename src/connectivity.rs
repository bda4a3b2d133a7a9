//! Internet reachability probe run before a job starts.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpStream;
use tracing::debug;

/// Public DNS resolver used as the reachability target.
pub const DEFAULT_PROBE_ADDR: &str = "8.8.8.8:53";

/// Upper bound for one probe.
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Whether a TCP connection to `addr` succeeds within `timeout`.
pub async fn check_internet(addr: SocketAddr, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(addr)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(%addr, error = %e, "connectivity probe failed");
            false
        }
        Err(_) => {
            debug!(%addr, timeout_ms = timeout.as_millis(), "connectivity probe timed out");
            false
        }
    }
}

/// [`check_internet`] against [`DEFAULT_PROBE_ADDR`].
pub async fn has_internet() -> bool {
    match DEFAULT_PROBE_ADDR.parse() {
        Ok(addr) => check_internet(addr, DEFAULT_PROBE_TIMEOUT).await,
        Err(_) => false,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_reachable_listener() {
        let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
            return;
        };
        let addr = listener.local_addr().unwrap();
        assert!(check_internet(addr, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn test_closed_port_is_unreachable() {
        let Ok(listener) = TcpListener::bind("127.0.0.1:0").await else {
            return;
        };
        let addr = listener.local_addr().unwrap();
        drop(listener);
        assert!(!check_internet(addr, Duration::from_secs(1)).await);
    }
}
