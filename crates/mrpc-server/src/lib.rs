//! mrpc Server
//!
//! This crate exposes methods of ordinary Rust values as remote procedures.
//! A type implements [`RpcService`] to list its methods, is registered on a
//! [`Server`], and the server then answers `"Service.Method"` calls arriving
//! on any number of connections.

pub mod server;
pub mod service;

pub use server::Server;
pub use service::{MethodType, Methods, RpcService, Service};
