use std::fs::File;
use std::io;
use std::ops::{Deref, Range};
use std::os::unix::fs::FileExt;
use std::path::Path;
use std::sync::Arc;

use futures::future::{self, BoxFuture, FutureExt};
use strata_buffer::{Alignment, ByteBuffer, ByteBufferMut};

use crate::{ALIGNMENT, PerformanceHint, ReadAt};

/// A cheaply cloneable, readonly file.
///
/// We use this because the builtin tokio `File` type is not `Clone` and does not implement a
/// `read_exact_at` operation.
#[derive(Debug, Clone)]
pub struct TokioFile(Arc<File>);

impl TokioFile {
    /// Open a file on the current file system.
    ///
    /// The `TokioFile` takes ownership of the file descriptor, and can be cloned
    /// many times without opening a new file descriptor. When the last instance
    /// of the `TokioFile` is dropped, the file descriptor is closed.
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let f = File::open(path)?;

        Ok(Self(Arc::new(f)))
    }

    fn read_exact_range(&self, range: Range<u64>) -> io::Result<ByteBuffer> {
        let len = usize::try_from(range.end.saturating_sub(range.start))
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "range too large"))?;
        let mut buffer = ByteBufferMut::zeroed_aligned(len, Alignment::new(ALIGNMENT));
        self.read_exact_at(buffer.as_mut_slice(), range.start)?;
        Ok(buffer.freeze())
    }
}

// Implement deref coercion for non-mut `File` methods on `TokioFile`.
impl Deref for TokioFile {
    type Target = File;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl ReadAt for TokioFile {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    fn read_byte_range(&self, range: Range<u64>) -> BoxFuture<'static, io::Result<ByteBuffer>> {
        future::ready(self.read_exact_range(range)).boxed()
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    fn size(&self) -> BoxFuture<'static, io::Result<u64>> {
        let this = self.clone();
        async move { this.metadata().map(|metadata| metadata.len()) }.boxed()
    }

    fn performance_hint(&self) -> PerformanceHint {
        PerformanceHint::local()
    }
}
