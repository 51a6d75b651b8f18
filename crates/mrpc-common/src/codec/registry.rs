//! Process-wide table mapping codec type tags to codec constructors.
//!
//! The table is seeded with the built-in codecs on first use. Both the client
//! and the server consult it: the client to build its codec before sending the
//! preamble, the server to build one from the tag it received.

use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use crate::codec::{Codec, CodecType, Format, BINARY_CODEC, JSON_CODEC};
use crate::protocol::error::{MrpcError, Result};
use crate::transport::BoxedConnection;

/// Builds a codec bound to a connection.
pub type NewCodecFn = fn(BoxedConnection) -> Codec;

fn registry() -> &'static RwLock<HashMap<CodecType, NewCodecFn>> {
    static REGISTRY: OnceLock<RwLock<HashMap<CodecType, NewCodecFn>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut codecs: HashMap<CodecType, NewCodecFn> = HashMap::new();
        codecs.insert(BINARY_CODEC, new_binary_codec);
        codecs.insert(JSON_CODEC, new_json_codec);
        RwLock::new(codecs)
    })
}

/// Registers a constructor under `codec_type`.
///
/// # Errors
///
/// Returns `DuplicateCodec` if the tag is already taken, including by one of
/// the built-in codecs.
pub fn register_codec(codec_type: CodecType, new_codec: NewCodecFn) -> Result<()> {
    let mut codecs = registry().write().unwrap_or_else(PoisonError::into_inner);
    if codecs.contains_key(&codec_type) {
        return Err(MrpcError::DuplicateCodec(codec_type));
    }
    codecs.insert(codec_type, new_codec);
    tracing::debug!(codec_type, "registered codec");
    Ok(())
}

/// Looks up the constructor registered under `codec_type`.
pub fn lookup_codec(codec_type: CodecType) -> Option<NewCodecFn> {
    registry()
        .read()
        .unwrap_or_else(PoisonError::into_inner)
        .get(&codec_type)
        .copied()
}

/// The default codec: postcard-encoded headers and bodies.
pub fn new_binary_codec(conn: BoxedConnection) -> Codec {
    Codec::new(conn, BINARY_CODEC, Format::Binary)
}

/// JSON-encoded headers and bodies.
pub fn new_json_codec(conn: BoxedConnection) -> Codec {
    Codec::new(conn, JSON_CODEC, Format::Json)
}
