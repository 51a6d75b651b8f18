//! Client configuration.

use std::time::Duration;

use mrpc_common::codec::{lookup_codec, CodecType, DEFAULT_CODEC};
use mrpc_common::{MrpcError, Result};

/// Settings used by [`Client::dial_with_config`](crate::Client::dial_with_config).
///
/// # Fields
///
/// - `codec_type` - Codec announced in the preamble (default: binary)
/// - `connect_timeout` - Upper bound on establishing the connection (default: 5 seconds)
///
/// # Example
///
/// ```
/// use mrpc_client::ClientConfig;
/// use mrpc_common::codec::JSON_CODEC;
/// use std::time::Duration;
///
/// let config = ClientConfig::new()
///     .with_codec_type(JSON_CODEC)
///     .with_connect_timeout(Duration::from_secs(1));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub codec_type: CodecType,
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            codec_type: DEFAULT_CODEC,
            connect_timeout: Duration::from_secs(5),
        }
    }
}

impl ClientConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_codec_type(mut self, codec_type: CodecType) -> Self {
        self.codec_type = codec_type;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` if the connect timeout is zero
    /// - `InvalidCodec` if no codec is registered under `codec_type`
    pub fn validate(&self) -> Result<()> {
        if self.connect_timeout.is_zero() {
            return Err(MrpcError::InvalidConfig(
                "connect timeout must be greater than zero".to_string(),
            ));
        }

        if lookup_codec(self.codec_type).is_none() {
            return Err(MrpcError::InvalidCodec(self.codec_type));
        }

        Ok(())
    }
}
