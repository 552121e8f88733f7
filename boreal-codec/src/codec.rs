use std::str::FromStr;

use crate::error::{CodecError, CodecResult};

/// Per-frame compression codec.
///
/// The codec name is recorded in the container header; resolving an
/// unknown name is an "unsupported codec" error, never a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Codec {
    Null,
    #[default]
    Zstd,
}

impl Codec {
    pub const fn name(&self) -> &'static str {
        match self {
            Codec::Null => "null",
            Codec::Zstd => "zstd",
        }
    }

    pub fn compress(&self, raw: &[u8]) -> CodecResult<Vec<u8>> {
        match self {
            Codec::Null => Ok(raw.to_vec()),
            Codec::Zstd => zstd::encode_all(raw, 0).map_err(CodecError::Compression),
        }
    }

    pub fn decompress(&self, compressed: &[u8]) -> CodecResult<Vec<u8>> {
        match self {
            Codec::Null => Ok(compressed.to_vec()),
            Codec::Zstd => zstd::decode_all(compressed).map_err(CodecError::Compression),
        }
    }
}

impl FromStr for Codec {
    type Err = CodecError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "null" => Ok(Codec::Null),
            "zstd" => Ok(Codec::Zstd),
            other => Err(CodecError::UnsupportedCodec(other.to_string())),
        }
    }
}

impl std::fmt::Display for Codec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
