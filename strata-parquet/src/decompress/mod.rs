//! Batch decompression of page bodies.
//!
//! Every compressed page of a read is inflated into one arena whose size is the sum of the
//! pages' declared uncompressed sizes. Pages are grouped by codec and each group is handed to
//! the codec's [`BlockDecompressor`] as a single batch.

mod codecs;

use std::collections::HashMap;
use std::fmt::Debug;
use std::sync::Arc;

pub use codecs::*;
use rayon::prelude::*;
use strata_buffer::{Alignment, ByteBuffer, MemoryPool, Reservation};
use strata_error::{ContextExt, StrataResult, strata_bail, strata_err};
use strata_io::ALIGNMENT;

use crate::chunk::ColumnChunkDescriptor;
use crate::page_header::{PageData, PageTable};
use crate::{Codec, PageKind};

/// One page body to inflate.
#[derive(Debug)]
pub struct BlockTask<'a> {
    /// Index of the page in the page table, for error messages.
    pub page: usize,
    pub src: &'a [u8],
    /// Sized to exactly the declared uncompressed length.
    pub dst: &'a mut [u8],
}

/// A decompressor for one block codec.
pub trait BlockDecompressor: Send + Sync + Debug {
    fn codec(&self) -> Codec;

    /// Inflate `src` into `dst`, returning the number of bytes written.
    ///
    /// Output that would not fit in `dst` is an error.
    fn decompress_into(&self, src: &[u8], dst: &mut [u8]) -> StrataResult<usize>;

    /// Inflate a batch of blocks. Each block must fill its destination exactly.
    fn decompress_batch(&self, tasks: &mut [BlockTask<'_>]) -> StrataResult<()> {
        tasks.par_iter_mut().try_for_each(|task| {
            let written = self
                .decompress_into(task.src, task.dst)
                .with_context(|| format!("{} page {}", self.codec(), task.page))?;
            if written != task.dst.len() {
                strata_bail!(
                    InvalidSerde: "{} page {} inflated to {written} bytes, its header declares {}",
                    self.codec(),
                    task.page,
                    task.dst.len()
                );
            }
            Ok(())
        })
    }
}

/// The decompressors available to a reader, by codec.
#[derive(Clone, Debug)]
pub struct CodecRegistry {
    codecs: HashMap<Codec, Arc<dyn BlockDecompressor>>,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(Arc::new(SnappyDecompressor));
        registry.register(Arc::new(GzipDecompressor));
        registry.register(Arc::new(ZstdDecompressor));
        registry.register(Arc::new(Lz4RawDecompressor));
        registry.register(Arc::new(Lz4HadoopDecompressor));
        registry
    }
}

impl CodecRegistry {
    /// A registry without any codec. Only uncompressed chunks can be read with it.
    pub fn empty() -> Self {
        Self {
            codecs: HashMap::new(),
        }
    }

    /// Register `decompressor`, replacing any other for its codec.
    pub fn register(&mut self, decompressor: Arc<dyn BlockDecompressor>) -> &mut Self {
        self.codecs.insert(decompressor.codec(), decompressor);
        self
    }

    pub fn get(&self, codec: Codec) -> StrataResult<&Arc<dyn BlockDecompressor>> {
        self.codecs.get(&codec).ok_or_else(|| {
            strata_err!(NotImplemented: format!("{codec} decompression"), "strata-parquet")
        })
    }
}

/// Inflated page bodies, addressed by [`PageData::Arena`] ranges.
#[derive(Debug)]
pub(crate) struct DecompressedPages {
    arena: ByteBuffer,
    _reservation: Option<Reservation>,
}

impl DecompressedPages {
    pub fn arena(&self) -> &ByteBuffer {
        &self.arena
    }
}

/// Point every page at its decodable bytes, inflating compressed pages into a shared arena.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all))]
pub(crate) fn decompress_pages(
    table: &mut PageTable,
    chunks: &[ColumnChunkDescriptor],
    buffers: &[ByteBuffer],
    codecs: &CodecRegistry,
    pool: &MemoryPool,
) -> StrataResult<DecompressedPages> {
    let mut arena_len = 0usize;
    for (idx, page) in table.pages.iter_mut().enumerate() {
        let chunk = &chunks[page.chunk];
        let stored_raw = chunk.codec == Codec::Uncompressed
            || (page.kind == PageKind::DataV2 && !page.is_compressed);
        if stored_raw {
            if page.compressed_len != page.uncompressed_len {
                strata_bail!(
                    InvalidSerde: "uncompressed page {idx} stores {} bytes, its header declares {}",
                    page.compressed_len,
                    page.uncompressed_len
                );
            }
            page.data = PageData::Chunk(page.chunk_range());
        } else {
            page.data = PageData::Arena(arena_len..arena_len + page.uncompressed_len);
            arena_len += page.uncompressed_len;
        }
    }

    if arena_len == 0 {
        return Ok(DecompressedPages {
            arena: ByteBuffer::empty(),
            _reservation: None,
        });
    }

    let (mut arena, reservation) = pool
        .alloc_zeroed_aligned::<u8>(arena_len, Alignment::new(ALIGNMENT))?
        .into_parts();

    // Carve the arena into one destination per compressed page, in page order.
    let mut tasks: HashMap<Codec, Vec<BlockTask<'_>>> = HashMap::new();
    let mut rest = arena.as_mut_slice();
    for (idx, page) in table.pages.iter().enumerate() {
        let PageData::Arena(range) = &page.data else {
            continue;
        };
        let (dst, tail) = rest.split_at_mut(range.len());
        rest = tail;

        let chunk = &chunks[page.chunk];
        let src = &buffers[page.chunk].as_slice()[page.chunk_range()];
        let (src, dst) = if page.kind == PageKind::DataV2 {
            // V2 levels are never compressed.
            let levels = page.levels_len();
            let (level_dst, value_dst) = dst.split_at_mut(levels);
            level_dst.copy_from_slice(&src[..levels]);
            (&src[levels..], value_dst)
        } else {
            (src, dst)
        };
        tasks.entry(chunk.codec).or_default().push(BlockTask {
            page: idx,
            src,
            dst,
        });
    }

    let mut num_pages = 0;
    for (codec, mut batch) in tasks {
        let decompressor = codecs.get(codec)?;
        num_pages += batch.len();
        log::debug!("decompressing {} {codec} pages", batch.len());
        decompressor.decompress_batch(&mut batch)?;
    }
    log::debug!("decompressed {num_pages} pages into {arena_len} bytes");

    Ok(DecompressedPages {
        arena: arena.freeze(),
        _reservation: Some(reservation),
    })
}
