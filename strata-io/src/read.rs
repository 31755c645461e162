use std::io;
use std::ops::Range;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::{BoxFuture, FutureExt};
use strata_buffer::ByteBuffer;

/// A source of bytes that supports asynchronous positional reads.
///
/// The trait is object safe so a single read can mix local files, memory buffers and remote
/// objects behind `Arc<dyn ReadAt>`. Returned futures own everything they need and may be moved
/// to an IO dispatcher thread.
pub trait ReadAt: Send + Sync + 'static {
    /// Request an asynchronous positional read of `range`.
    ///
    /// If the source does not hold the requested number of bytes, the returned future completes
    /// with an [`UnexpectedEof`][io::ErrorKind::UnexpectedEof].
    fn read_byte_range(&self, range: Range<u64>) -> BoxFuture<'static, io::Result<ByteBuffer>>;

    /// Asynchronously get the number of readable bytes.
    fn size(&self) -> BoxFuture<'static, io::Result<u64>>;

    /// Hints at how reads against this source should be scheduled.
    fn performance_hint(&self) -> PerformanceHint {
        PerformanceHint::default()
    }
}

/// How reads against a source should be coalesced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformanceHint {
    coalescing_window: u64,
}

impl Default for PerformanceHint {
    fn default() -> Self {
        Self {
            coalescing_window: 1 << 20,
        }
    }
}

impl PerformanceHint {
    /// A hint with the given coalescing window in bytes.
    pub fn new(coalescing_window: u64) -> Self {
        Self { coalescing_window }
    }

    /// Creates a new instance with a profile appropriate for fast local storage, like memory or
    /// files on NVMe devices.
    pub fn local() -> Self {
        Self::new(0)
    }

    /// The maximum distance between two reads that should be coalesced into a single operation.
    pub fn coalescing_window(&self) -> u64 {
        self.coalescing_window
    }
}

fn slice_in_memory(bytes: &Bytes, range: Range<u64>) -> io::Result<ByteBuffer> {
    let len = bytes.len() as u64;
    if range.start > range.end || range.end > len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("read of {range:?} is past the end of a {len} byte buffer"),
        ));
    }
    // Both bounds are within `len`, which is a usize.
    #[allow(clippy::cast_possible_truncation)]
    let range = range.start as usize..range.end as usize;
    Ok(ByteBuffer::from(bytes.slice(range)))
}

impl<T: ReadAt + ?Sized> ReadAt for Arc<T> {
    fn read_byte_range(&self, range: Range<u64>) -> BoxFuture<'static, io::Result<ByteBuffer>> {
        T::read_byte_range(self, range)
    }

    fn size(&self) -> BoxFuture<'static, io::Result<u64>> {
        T::size(self)
    }

    fn performance_hint(&self) -> PerformanceHint {
        T::performance_hint(self)
    }
}

impl ReadAt for Bytes {
    fn read_byte_range(&self, range: Range<u64>) -> BoxFuture<'static, io::Result<ByteBuffer>> {
        futures::future::ready(slice_in_memory(self, range)).boxed()
    }

    fn size(&self) -> BoxFuture<'static, io::Result<u64>> {
        futures::future::ready(Ok(self.len() as u64)).boxed()
    }

    fn performance_hint(&self) -> PerformanceHint {
        PerformanceHint::local()
    }
}

impl ReadAt for ByteBuffer {
    fn read_byte_range(&self, range: Range<u64>) -> BoxFuture<'static, io::Result<ByteBuffer>> {
        self.inner().read_byte_range(range)
    }

    fn size(&self) -> BoxFuture<'static, io::Result<u64>> {
        futures::future::ready(Ok(self.len() as u64)).boxed()
    }

    fn performance_hint(&self) -> PerformanceHint {
        PerformanceHint::local()
    }
}
