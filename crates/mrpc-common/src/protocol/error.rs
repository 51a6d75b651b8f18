use thiserror::Error;

#[derive(Error, Debug)]
pub enum MrpcError {
    #[error("connection shut down")]
    Shutdown,

    #[error("client already closed")]
    AlreadyClosed,

    #[error("invalid codec type {0}")]
    InvalidCodec(u32),

    #[error("codec type {0} is already registered")]
    DuplicateCodec(u32),

    #[error("invalid magic number {0:#x}")]
    InvalidMagic(u32),

    #[error("rpc server: duplicated service {0}")]
    DuplicateService(String),

    #[error("rpc server: {0} is not a valid service name")]
    InvalidServiceName(String),

    #[error("rpc server: service/method request ill-formed: {0}")]
    IllFormedRequest(String),

    #[error("rpc server: cannot find service {0}")]
    ServiceNotFound(String),

    #[error("rpc server: cannot find method {method} on service {service}")]
    MethodNotFound { service: String, method: String },

    /// Call-level failure reported by the remote side in the response header.
    #[error("{0}")]
    Call(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] postcard::Error),

    #[error("JSON serialization error: {0}")]
    JsonSerialization(#[from] serde_json::Error),

    #[error("Message too large: {size} bytes (max {max} bytes)")]
    MessageTooLarge { size: usize, max: usize },

    #[error("Request timeout after {0}ms")]
    Timeout(u64),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("connection closed by peer")]
    Eof,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MrpcError {
    /// Returns `true` when the error leaves the connection unusable.
    ///
    /// Everything else is scoped to a single call and the connection keeps
    /// serving other calls.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            MrpcError::Shutdown
                | MrpcError::AlreadyClosed
                | MrpcError::InvalidCodec(_)
                | MrpcError::InvalidMagic(_)
                | MrpcError::MessageTooLarge { .. }
                | MrpcError::Connection(_)
                | MrpcError::Eof
                | MrpcError::Io(_)
        )
    }

    /// Returns `true` for a clean end-of-stream at a frame boundary.
    pub fn is_eof(&self) -> bool {
        matches!(self, MrpcError::Eof)
    }
}

pub type Result<T> = std::result::Result<T, MrpcError>;
