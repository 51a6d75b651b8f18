//! Connection preamble exchanged once, before any header or body.
//!
//! ```text
//! bytes 0..3  magic number (u32 big-endian)
//! bytes 4..7  codec type tag (u32 big-endian)
//! ```

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::protocol::error::{MrpcError, Result};

/// Identifies a connection as speaking this protocol.
pub const MAGIC: u32 = 0x5a2b_71c3;

/// Size of the preamble on the wire.
pub const PREAMBLE_LEN: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    pub magic: u32,
    pub codec_type: u32,
}

impl Preamble {
    /// Creates a preamble announcing `codec_type`.
    pub fn new(codec_type: u32) -> Self {
        Preamble {
            magic: MAGIC,
            codec_type,
        }
    }

    pub fn to_bytes(&self) -> [u8; PREAMBLE_LEN] {
        let mut buf = [0u8; PREAMBLE_LEN];
        buf[..4].copy_from_slice(&self.magic.to_be_bytes());
        buf[4..].copy_from_slice(&self.codec_type.to_be_bytes());
        buf
    }

    pub fn from_bytes(buf: [u8; PREAMBLE_LEN]) -> Self {
        Preamble {
            magic: u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]),
            codec_type: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }

    /// Fails with `InvalidMagic` unless the magic number matches [`MAGIC`].
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(MrpcError::InvalidMagic(self.magic));
        }
        Ok(())
    }

    /// Writes the preamble and flushes it.
    pub async fn write_to<W: AsyncWrite + Unpin + ?Sized>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.to_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Reads exactly [`PREAMBLE_LEN`] bytes; a short read is an error.
    ///
    /// The magic number is not checked here, see [`Preamble::validate`].
    pub async fn read_from<R: AsyncRead + Unpin + ?Sized>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; PREAMBLE_LEN];
        reader.read_exact(&mut buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                MrpcError::Connection("short read on preamble".to_string())
            } else {
                MrpcError::Io(e)
            }
        })?;
        Ok(Self::from_bytes(buf))
    }
}
