pub mod error;
pub mod header;
pub mod preamble;


pub use error::{MrpcError, Result};
pub use header::{Header, Seq};
pub use preamble::{Preamble, MAGIC, PREAMBLE_LEN};
