use std::io::{self, Read};

use flate2::read::MultiGzDecoder;
use strata_error::{StrataResult, strata_bail, strata_err};

use super::BlockDecompressor;
use crate::Codec;

/// Fill `dst` from `reader`, failing if the stream holds more than `dst.len()` bytes.
fn read_to_fill(mut reader: impl Read, dst: &mut [u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < dst.len() {
        match reader.read(&mut dst[written..]) {
            Ok(0) => return Ok(written),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    let mut trailing = [0u8; 1];
    if reader.read(&mut trailing)? != 0 {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("stream inflates past {} bytes", dst.len()),
        ));
    }
    Ok(written)
}

#[derive(Debug, Default)]
pub struct SnappyDecompressor;

impl BlockDecompressor for SnappyDecompressor {
    fn codec(&self) -> Codec {
        Codec::Snappy
    }

    fn decompress_into(&self, src: &[u8], dst: &mut [u8]) -> StrataResult<usize> {
        let len = snap::raw::decompress_len(src)
            .map_err(|e| strata_err!(InvalidSerde: "invalid snappy block: {e}"))?;
        if len != dst.len() {
            strata_bail!(
                InvalidSerde: "snappy block inflates to {len} bytes, expected {}",
                dst.len()
            );
        }
        snap::raw::Decoder::new()
            .decompress(src, dst)
            .map_err(|e| strata_err!(InvalidSerde: "invalid snappy block: {e}"))
    }
}

#[derive(Debug, Default)]
pub struct GzipDecompressor;

impl BlockDecompressor for GzipDecompressor {
    fn codec(&self) -> Codec {
        Codec::Gzip
    }

    fn decompress_into(&self, src: &[u8], dst: &mut [u8]) -> StrataResult<usize> {
        read_to_fill(MultiGzDecoder::new(src), dst)
            .map_err(|e| strata_err!(InvalidSerde: "invalid gzip stream: {e}"))
    }
}

#[derive(Debug, Default)]
pub struct ZstdDecompressor;

impl BlockDecompressor for ZstdDecompressor {
    fn codec(&self) -> Codec {
        Codec::Zstd
    }

    fn decompress_into(&self, src: &[u8], dst: &mut [u8]) -> StrataResult<usize> {
        zstd::bulk::decompress_to_buffer(src, dst)
            .map_err(|e| strata_err!(InvalidSerde: "invalid zstd frame: {e}"))
    }
}

/// A single LZ4 block without framing.
#[derive(Debug, Default)]
pub struct Lz4RawDecompressor;

impl BlockDecompressor for Lz4RawDecompressor {
    fn codec(&self) -> Codec {
        Codec::Lz4Raw
    }

    fn decompress_into(&self, src: &[u8], dst: &mut [u8]) -> StrataResult<usize> {
        lz4_flex::block::decompress_into(src, dst)
            .map_err(|e| strata_err!(InvalidSerde: "invalid lz4 block: {e}"))
    }
}

/// The legacy `LZ4` codec.
///
/// Writers disagree on its framing. Blocks are tried as Hadoop framed blocks first, then as an
/// LZ4 frame, then as a raw block.
#[derive(Debug, Default)]
pub struct Lz4HadoopDecompressor;

impl Lz4HadoopDecompressor {
    /// Hadoop framing: repeated big-endian (decompressed length, compressed length) prefixes.
    fn try_hadoop(src: &[u8], dst: &mut [u8]) -> Option<usize> {
        const PREFIX: usize = 8;
        let mut input = src;
        let mut written = 0;
        while !input.is_empty() {
            if input.len() < PREFIX {
                return None;
            }
            let expected = u32::from_be_bytes(input[..4].try_into().ok()?) as usize;
            let compressed = u32::from_be_bytes(input[4..8].try_into().ok()?) as usize;
            input = &input[PREFIX..];
            if compressed > input.len() || written + expected > dst.len() {
                return None;
            }
            let n = lz4_flex::block::decompress_into(
                &input[..compressed],
                &mut dst[written..written + expected],
            )
            .ok()?;
            if n != expected {
                return None;
            }
            written += n;
            input = &input[compressed..];
        }
        Some(written)
    }
}

impl BlockDecompressor for Lz4HadoopDecompressor {
    fn codec(&self) -> Codec {
        Codec::Lz4
    }

    fn decompress_into(&self, src: &[u8], dst: &mut [u8]) -> StrataResult<usize> {
        if let Some(written) = Self::try_hadoop(src, dst) {
            return Ok(written);
        }
        if let Ok(written) = read_to_fill(lz4_flex::frame::FrameDecoder::new(src), dst) {
            return Ok(written);
        }
        lz4_flex::block::decompress_into(src, dst)
            .map_err(|e| strata_err!(InvalidSerde: "invalid lz4 block: {e}"))
    }
}
