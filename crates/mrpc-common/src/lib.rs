//! mrpc Common Types, Codecs and Transport
//!
//! This crate provides the wire protocol shared by the mrpc client and server.
//!
//! # Wire protocol
//!
//! A connection starts with an 8-byte preamble:
//!
//! ```text
//! [magic: u32 big-endian = 0x5a2b71c3] [codec type: u32 big-endian]
//! ```
//!
//! After that the stream is a sequence of messages, each a header frame
//! followed by a body frame. A frame is `[4-byte length as u32 big-endian] +
//! [payload]`, where the payload is encoded by the connection's codec.
//!
//! # Components
//!
//! - [`protocol`] - Header, preamble and error types
//! - [`codec`] - Codecs and the process-wide codec registry
//! - [`transport`] - Connection abstraction and dialers
//!
//! # Example
//!
//! ```
//! use mrpc_common::{Header, Preamble, MAGIC};
//! use mrpc_common::codec::JSON_CODEC;
//!
//! let preamble = Preamble::new(JSON_CODEC);
//! assert_eq!(preamble.magic, MAGIC);
//!
//! let header = Header::request(1, "Arith.Add");
//! assert!(!header.is_error());
//! ```

pub mod codec;
pub mod protocol;
pub mod transport;

pub use protocol::*;
