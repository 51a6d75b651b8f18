//! Transport Layer
//!
//! The runtime works over any ordered, reliable byte stream. This module names
//! that abstraction ([`Connection`]) and provides the dialers used by the
//! client.
//!
//! # Supported networks
//!
//! - `"tcp"` - TCP, the address is `host:port`
//! - `"unix"` - Unix domain sockets, the address is a filesystem path (unix only)
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use mrpc_common::transport;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let conn = transport::connect("tcp", "127.0.0.1:9000", Duration::from_secs(5)).await?;
//! # Ok(())
//! # }
//! ```

pub mod tcp;

pub use tcp::{connect, connect_tcp};

#[cfg(unix)]
pub use tcp::connect_unix;

use tokio::io::{AsyncRead, AsyncWrite};

/// A bidirectional byte stream a codec can run over.
pub trait Connection: AsyncRead + AsyncWrite + Unpin + Send + 'static {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send + 'static> Connection for T {}

/// Type-erased connection owned by a codec.
pub type BoxedConnection = Box<dyn Connection>;
