use std::time::Duration;

use tokio::net::TcpStream;

use crate::protocol::error::{MrpcError, Result};
use crate::transport::BoxedConnection;

/// Dials `address` on `network`.
///
/// # Arguments
///
/// * `network` - `"tcp"` or `"unix"`
/// * `address` - The address to connect to
/// * `timeout` - Upper bound on connection establishment
///
/// # Returns
///
/// A boxed connection ready to be handed to a codec
pub async fn connect(network: &str, address: &str, timeout: Duration) -> Result<BoxedConnection> {
    match network {
        "tcp" | "tcp4" | "tcp6" => Ok(Box::new(connect_tcp(address, timeout).await?)),
        #[cfg(unix)]
        "unix" => Ok(Box::new(connect_unix(address, timeout).await?)),
        other => Err(MrpcError::Connection(format!("unsupported network '{}'", other))),
    }
}

/// Connects over TCP, trying each resolved address until one succeeds.
pub async fn connect_tcp(address: &str, timeout: Duration) -> Result<TcpStream> {
    let socket_addrs = tokio::net::lookup_host(address)
        .await
        .map_err(|e| MrpcError::Connection(format!("Invalid address '{}': {}", address, e)))?;

    let mut last_err = None;
    for socket_addr in socket_addrs {
        match tokio::time::timeout(timeout, TcpStream::connect(socket_addr)).await {
            Ok(Ok(stream)) => {
                stream
                    .set_nodelay(true)
                    .map_err(|e| map_io_error(e, "set_nodelay", timeout))?;
                tracing::debug!(%socket_addr, "connected");
                return Ok(stream);
            }
            Ok(Err(e)) => last_err = Some(map_io_error(e, "connect", timeout)),
            Err(_) => last_err = Some(MrpcError::Timeout(timeout.as_millis() as u64)),
        }
    }

    Err(match last_err {
        Some(MrpcError::Timeout(ms)) => MrpcError::Timeout(ms),
        Some(e) => MrpcError::Connection(format!("Failed to connect to {}: {}", address, e)),
        None => MrpcError::Connection(format!("Failed to connect to {}: no addresses resolved", address)),
    })
}

/// Connects to a Unix domain socket at `path`.
#[cfg(unix)]
pub async fn connect_unix(path: &str, timeout: Duration) -> Result<tokio::net::UnixStream> {
    match tokio::time::timeout(timeout, tokio::net::UnixStream::connect(path)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(e)) => Err(MrpcError::Connection(format!("Failed to connect to {}: {}", path, e))),
        Err(_) => Err(MrpcError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Maps I/O errors to specific error types for better error reporting.
fn map_io_error(err: std::io::Error, context: &str, timeout: Duration) -> MrpcError {
    match err.kind() {
        std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
            MrpcError::Timeout(timeout.as_millis() as u64)
        }
        std::io::ErrorKind::ConnectionRefused
        | std::io::ErrorKind::ConnectionReset
        | std::io::ErrorKind::ConnectionAborted
        | std::io::ErrorKind::NotConnected => MrpcError::Connection(format!("{}: {}", context, err)),
        _ => MrpcError::Io(err),
    }
}
