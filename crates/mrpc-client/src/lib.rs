//! mrpc Client
//!
//! A [`Client`] owns one connection and multiplexes any number of concurrent
//! calls over it, matching responses to calls by sequence number.
//!
//! - [`Client::call`] waits for the reply
//! - [`Client::go_call`] returns a [`Call`] future immediately
//! - [`Client::go_call_with`] delivers a [`Completion`] on a shared channel
//! - [`Client::call_timeout`] adds a deadline on the reply

pub mod call;
pub mod client;
pub mod config;

pub use call::{Call, Completion};
pub use client::Client;
pub use config::ClientConfig;
