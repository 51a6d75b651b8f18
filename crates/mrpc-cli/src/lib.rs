//! # mrpc CLI
//!
//! Command-line front end for the mrpc runtime.
//!
//! ## Key Commands
//!
//! - `mrpc serve`: Serve the demo `Arith` service over TCP
//! - `mrpc call`: Make an RPC call (outputs raw JSON for scripting)

pub mod arith;
