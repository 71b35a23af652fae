//! Brick payload codecs

use crate::error::{DownsampleError, Result};
use flate2::read::{DeflateDecoder, DeflateEncoder};
use flate2::Compression as FlateCompression;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::Read;
use std::str::FromStr;

/// Compression methods a project can use for its bricks
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum CompressionMethod {
    /// Raw voxels
    None = 0,
    /// Deflate/ZIP compression
    Deflate = 1,
    /// Run-length encoding
    Rle = 2,
    /// Zstandard compression
    #[default]
    Zstd = 3,
}

impl CompressionMethod {
    pub fn name(&self) -> &'static str {
        match self {
            CompressionMethod::None => "none",
            CompressionMethod::Deflate => "deflate",
            CompressionMethod::Rle => "rle",
            CompressionMethod::Zstd => "zstd",
        }
    }
}

impl fmt::Display for CompressionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for CompressionMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "raw" => Ok(CompressionMethod::None),
            "deflate" | "zip" => Ok(CompressionMethod::Deflate),
            "rle" => Ok(CompressionMethod::Rle),
            "zstd" => Ok(CompressionMethod::Zstd),
            other => Err(format!(
                "unknown compression '{}' (expected none, deflate, rle or zstd)",
                other
            )),
        }
    }
}

/// Compression level (0-9, where 0 is no compression and 9 is maximum)
#[derive(Debug, Clone, Copy)]
pub struct CompressionLevel(u8);

impl CompressionLevel {
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for CompressionLevel {
    fn default() -> Self {
        Self(3)
    }
}

/// Encodes and decodes brick payloads
pub trait Compressor: Send + Sync {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>>;

    /// `expected_size` is a capacity hint; the caller verifies the real length.
    fn decompress(&self, data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>>;

    fn method(&self) -> CompressionMethod;
}

#[derive(Debug, Default)]
pub struct NoneCompressor;

impl Compressor for NoneCompressor {
    fn compress(&self, data: &[u8], _level: CompressionLevel) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn decompress(&self, data: &[u8], _expected_size: Option<usize>) -> Result<Vec<u8>> {
        Ok(data.to_vec())
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::None
    }
}

#[derive(Debug, Default)]
pub struct DeflateCompressor;

impl Compressor for DeflateCompressor {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        let mut encoder = DeflateEncoder::new(data, FlateCompression::new(level.value() as u32));
        let mut compressed = Vec::new();
        encoder
            .read_to_end(&mut compressed)
            .map_err(|e| DownsampleError::Compression(e.to_string()))?;
        Ok(compressed)
    }

    fn decompress(&self, data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>> {
        let mut decoder = DeflateDecoder::new(data);
        let mut decompressed = Vec::with_capacity(expected_size.unwrap_or_default());
        decoder
            .read_to_end(&mut decompressed)
            .map_err(|e| DownsampleError::Decompression(e.to_string()))?;
        Ok(decompressed)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Deflate
    }
}

#[derive(Debug, Default)]
pub struct ZstdCompressor;

impl Compressor for ZstdCompressor {
    fn compress(&self, data: &[u8], level: CompressionLevel) -> Result<Vec<u8>> {
        zstd::encode_all(data, level.value() as i32)
            .map_err(|e| DownsampleError::Compression(e.to_string()))
    }

    fn decompress(&self, data: &[u8], _expected_size: Option<usize>) -> Result<Vec<u8>> {
        zstd::decode_all(data).map_err(|e| DownsampleError::Decompression(e.to_string()))
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Zstd
    }
}

/// Byte-wise run-length encoding: `(count, value)` pairs, runs capped at 255.
#[derive(Debug, Default)]
pub struct RleCompressor;

impl Compressor for RleCompressor {
    fn compress(&self, data: &[u8], _level: CompressionLevel) -> Result<Vec<u8>> {
        let mut compressed = Vec::new();
        let mut rest = data;

        while let Some(&value) = rest.first() {
            let run = rest
                .iter()
                .take(u8::MAX as usize)
                .take_while(|&&b| b == value)
                .count();
            compressed.push(run as u8);
            compressed.push(value);
            rest = &rest[run..];
        }

        Ok(compressed)
    }

    fn decompress(&self, data: &[u8], expected_size: Option<usize>) -> Result<Vec<u8>> {
        if data.len() % 2 != 0 {
            return Err(DownsampleError::Decompression(
                "RLE data must have even length".to_string(),
            ));
        }

        let mut decompressed = Vec::with_capacity(expected_size.unwrap_or_default());
        for pair in data.chunks_exact(2) {
            decompressed.extend(std::iter::repeat(pair[1]).take(pair[0] as usize));
        }

        Ok(decompressed)
    }

    fn method(&self) -> CompressionMethod {
        CompressionMethod::Rle
    }
}

/// Get a compressor for a given method
pub fn get_compressor(method: CompressionMethod) -> Box<dyn Compressor> {
    match method {
        CompressionMethod::None => Box::new(NoneCompressor),
        CompressionMethod::Deflate => Box::new(DeflateCompressor),
        CompressionMethod::Rle => Box::new(RleCompressor),
        CompressionMethod::Zstd => Box::new(ZstdCompressor),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A sparse brick: mostly background with one bright stripe.
    fn sparse_brick() -> Vec<u8> {
        let mut brick = vec![0u8; 16 * 16 * 16];
        for voxel in brick.iter_mut().skip(16 * 16 * 8).take(16 * 16) {
            *voxel = 200;
        }
        brick
    }

    #[test]
    fn test_every_method_restores_brick() {
        let brick = sparse_brick();
        for method in [
            CompressionMethod::None,
            CompressionMethod::Deflate,
            CompressionMethod::Rle,
            CompressionMethod::Zstd,
        ] {
            let compressor = get_compressor(method);
            assert_eq!(compressor.method(), method);
            let packed = compressor
                .compress(&brick, CompressionLevel::default())
                .unwrap();
            let unpacked = compressor.decompress(&packed, Some(brick.len())).unwrap();
            assert_eq!(unpacked, brick, "method {}", method);
        }
    }

    #[test]
    fn test_sparse_brick_shrinks() {
        let brick = sparse_brick();
        for method in [
            CompressionMethod::Deflate,
            CompressionMethod::Rle,
            CompressionMethod::Zstd,
        ] {
            let packed = get_compressor(method)
                .compress(&brick, CompressionLevel::default())
                .unwrap();
            assert!(packed.len() < brick.len() / 4, "method {}", method);
        }
    }

    #[test]
    fn test_rle_splits_long_runs() {
        let packed = RleCompressor
            .compress(&[7u8; 300], CompressionLevel::default())
            .unwrap();
        assert_eq!(packed, vec![255, 7, 45, 7]);
        assert!(RleCompressor.decompress(&[1, 2, 3], None).is_err());
        assert!(RleCompressor
            .compress(&[], CompressionLevel::default())
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("ZSTD".parse::<CompressionMethod>(), Ok(CompressionMethod::Zstd));
        assert_eq!("zip".parse::<CompressionMethod>(), Ok(CompressionMethod::Deflate));
        assert_eq!("none".parse::<CompressionMethod>(), Ok(CompressionMethod::None));
        assert!("lz4".parse::<CompressionMethod>().is_err());
        assert_eq!(CompressionMethod::default(), CompressionMethod::Zstd);
        assert_eq!(CompressionMethod::Rle.to_string(), "rle");
    }
}
