use std::io;
use std::ops::Range;

use futures::future::{BoxFuture, FutureExt};
use strata_buffer::ByteBuffer;

use crate::{PerformanceHint, ReadAt};

/// An adapter that offsets all reads by a fixed amount.
///
/// Useful when a columnar file is embedded in a larger blob and chunk byte ranges are relative to
/// the start of the file.
#[derive(Debug, Clone)]
pub struct OffsetReadAt<R> {
    read: R,
    offset: u64,
}

impl<R: ReadAt> OffsetReadAt<R> {
    /// Wrap `read` so that position 0 maps to `offset` in the inner source.
    pub fn new(read: R, offset: u64) -> Self {
        Self { read, offset }
    }
}

impl<R: ReadAt> ReadAt for OffsetReadAt<R> {
    fn read_byte_range(&self, range: Range<u64>) -> BoxFuture<'static, io::Result<ByteBuffer>> {
        self.read
            .read_byte_range(range.start + self.offset..range.end + self.offset)
    }

    fn size(&self) -> BoxFuture<'static, io::Result<u64>> {
        let offset = self.offset;
        self.read
            .size()
            .map(move |len| len.map(|len| len.saturating_sub(offset)))
            .boxed()
    }

    fn performance_hint(&self) -> PerformanceHint {
        self.read.performance_hint()
    }
}
