//! Message header sent in front of every request and response body.

use serde::{Deserialize, Serialize};

/// Sequence number assigned by the client, echoed back by the server.
pub type Seq = u64;

/// Per-message envelope.
///
/// A header is always written immediately before its body, and the pair is
/// never split by another writer on the same connection.
///
/// # Fields
///
/// - `seq`: unique per in-flight call on a connection
/// - `service_method`: the procedure name, `"Service.Method"`
/// - `error`: empty on success; otherwise a call-level failure, in which case
///   the body that follows is a placeholder and must be discarded
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Header {
    pub seq: Seq,
    pub service_method: String,
    pub error: String,
}

impl Header {
    /// Creates the header for an outgoing request.
    pub fn request(seq: Seq, service_method: impl Into<String>) -> Self {
        Header {
            seq,
            service_method: service_method.into(),
            error: String::new(),
        }
    }

    /// Turns this header into an error-bearing response header.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = error.into();
        self
    }

    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }
}
