use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader, BufWriter, ReadHalf, WriteHalf};

use crate::codec::format::{Body, Format};
use crate::codec::CodecType;
use crate::protocol::error::{MrpcError, Result};
use crate::protocol::Header;
use crate::transport::BoxedConnection;

/// Maximum size of a single header or body frame (100 MB)
pub const MAX_FRAME_SIZE: usize = 100 * 1024 * 1024;

/// A codec bound to one connection.
///
/// Every header and every body travels as its own frame:
///
/// ```text
/// [4-byte length as u32 big-endian] [payload]
/// ```
///
/// Framing is what allows a body to be skipped without knowing its type.
///
/// The codec is split into a [`CodecReader`] and a [`CodecWriter`] so that one
/// task can keep reading while others write. Neither half is safe for
/// concurrent use on its own; callers put the writer behind their send lock.
pub struct Codec {
    codec_type: CodecType,
    reader: CodecReader,
    writer: CodecWriter,
}

impl Codec {
    /// Wraps a connection, encoding messages with `format`.
    pub fn new(conn: BoxedConnection, codec_type: CodecType, format: Format) -> Self {
        let (read_half, write_half) = tokio::io::split(conn);

        Self {
            codec_type,
            reader: CodecReader {
                inner: BufReader::new(read_half),
                format,
            },
            writer: CodecWriter {
                inner: BufWriter::new(write_half),
                format,
                closed: false,
            },
        }
    }

    pub fn codec_type(&self) -> CodecType {
        self.codec_type
    }

    pub fn format(&self) -> Format {
        self.reader.format
    }

    /// Separates the read and write halves.
    pub fn split(self) -> (CodecReader, CodecWriter) {
        (self.reader, self.writer)
    }

    pub async fn read_header(&mut self) -> Result<Header> {
        self.reader.read_header().await
    }

    pub async fn read_body<T: DeserializeOwned>(&mut self) -> Result<T> {
        self.reader.read_body().await
    }

    pub async fn discard_body(&mut self) -> Result<()> {
        self.reader.discard_body().await
    }

    pub async fn write(&mut self, header: &Header, body: &dyn Body) -> Result<()> {
        self.writer.write(header, body).await
    }

    pub async fn close(&mut self) -> Result<()> {
        self.writer.close().await
    }
}

/// Read half of a [`Codec`].
pub struct CodecReader {
    inner: BufReader<ReadHalf<BoxedConnection>>,
    format: Format,
}

impl CodecReader {
    pub fn format(&self) -> Format {
        self.format
    }

    /// Reads the next header.
    ///
    /// A peer that closed the connection between messages yields
    /// [`MrpcError::Eof`]. A header that cannot be decoded leaves no way to
    /// tell which call it belongs to, so it is reported as a connection error.
    pub async fn read_header(&mut self) -> Result<Header> {
        let frame = self.read_frame().await?;
        self.format
            .decode(&frame)
            .map_err(|e| MrpcError::Connection(format!("malformed header: {}", e)))
    }

    /// Reads the next body and decodes it as `T`.
    ///
    /// A decode failure consumes the frame, so the stream stays aligned and
    /// the error only concerns this message.
    pub async fn read_body<T: DeserializeOwned>(&mut self) -> Result<T> {
        let frame = self.read_frame().await?;
        self.format.decode(&frame)
    }

    /// Reads the next body without decoding it.
    pub async fn read_raw_body(&mut self) -> Result<Vec<u8>> {
        self.read_frame().await
    }

    /// Reads the next body and drops it.
    pub async fn discard_body(&mut self) -> Result<()> {
        self.read_frame().await.map(drop)
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        // Only a stream ending exactly on a frame boundary is a clean EOF
        let mut len_buf = [0u8; 4];
        len_buf[0] = match self.inner.read_u8().await {
            Ok(byte) => byte,
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(MrpcError::Eof);
            }
            Err(e) => return Err(MrpcError::Io(e)),
        };
        self.inner
            .read_exact(&mut len_buf[1..])
            .await
            .map_err(truncated)?;

        let len = u32::from_be_bytes(len_buf) as usize;

        // Validate length to prevent allocation of excessively large buffers
        if len > MAX_FRAME_SIZE {
            return Err(MrpcError::MessageTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }

        let mut buf = vec![0u8; len];
        self.inner.read_exact(&mut buf).await.map_err(truncated)?;

        Ok(buf)
    }
}

fn truncated(e: std::io::Error) -> MrpcError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        MrpcError::Connection("connection closed in the middle of a frame".to_string())
    } else {
        MrpcError::Io(e)
    }
}

/// Write half of a [`Codec`].
pub struct CodecWriter {
    inner: BufWriter<WriteHalf<BoxedConnection>>,
    format: Format,
    closed: bool,
}

impl CodecWriter {
    pub fn format(&self) -> Format {
        self.format
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Writes `header` followed by `body` and flushes both.
    ///
    /// A half-written stream cannot be recovered, so any encode or I/O failure
    /// shuts the connection down before the error is returned. Writes after
    /// that fail with [`MrpcError::Shutdown`].
    pub async fn write(&mut self, header: &Header, body: &dyn Body) -> Result<()> {
        if self.closed {
            return Err(MrpcError::Shutdown);
        }

        let result = match body.encode_with(self.format) {
            Ok(body) => self.write_message(header, &body).await,
            Err(e) => Err(e),
        };
        self.check(header, result).await
    }

    /// Like [`write`](Self::write), for a body already encoded in this
    /// writer's format.
    pub async fn write_encoded(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        if self.closed {
            return Err(MrpcError::Shutdown);
        }

        let result = self.write_message(header, body).await;
        self.check(header, result).await
    }

    async fn check(&mut self, header: &Header, result: Result<()>) -> Result<()> {
        if let Err(e) = &result {
            tracing::warn!(
                seq = header.seq,
                service_method = %header.service_method,
                "rpc codec: write failed, closing connection: {}",
                e
            );
            self.abort().await;
        }
        result
    }

    async fn write_message(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        let header = self.format.encode(header)?;

        self.write_frame(&header).await?;
        self.write_frame(body).await?;
        self.inner.flush().await?;

        Ok(())
    }

    async fn write_frame(&mut self, data: &[u8]) -> Result<()> {
        if data.len() > MAX_FRAME_SIZE {
            return Err(MrpcError::MessageTooLarge {
                size: data.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        let len = data.len() as u32;
        self.inner.write_all(&len.to_be_bytes()).await?;
        self.inner.write_all(data).await?;
        Ok(())
    }

    /// Flushes what is buffered and shuts the connection down. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.inner.shutdown().await?;
        Ok(())
    }

    /// Shuts the connection down without flushing.
    ///
    /// For a writer left with a partial message, typically after a write was
    /// interrupted: the buffered bytes are dropped and the peer sees the
    /// stream end instead of a corrupt frame. Idempotent.
    pub async fn abort(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        let _ = self.inner.get_mut().shutdown().await;
    }
}
