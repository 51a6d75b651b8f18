//! Message codecs.
//!
//! A codec turns headers and bodies into frames on a connection. Which codec a
//! connection uses is decided by the type tag in its preamble, resolved through
//! the [registry](registry).

pub mod format;
pub mod framed;
pub mod registry;


pub use format::{Body, Format};
pub use framed::{Codec, CodecReader, CodecWriter, MAX_FRAME_SIZE};
pub use registry::{lookup_codec, new_binary_codec, new_json_codec, register_codec, NewCodecFn};

/// Codec type tag carried in the connection preamble.
pub type CodecType = u32;

/// Tag of the binary (postcard) codec.
pub const BINARY_CODEC: CodecType = 0;

/// Tag of the JSON codec.
pub const JSON_CODEC: CodecType = 1;

/// Codec used when none is configured.
pub const DEFAULT_CODEC: CodecType = BINARY_CODEC;
