use std::io;
use std::ops::Range;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt};
use futures_util::StreamExt;
use object_store::path::Path;
use object_store::{GetOptions, GetRange, ObjectStore};
use strata_buffer::{Alignment, ByteBuffer, ByteBufferMut};

use crate::{ALIGNMENT, PerformanceHint, ReadAt};

/// Positional reads against one object of an [`ObjectStore`].
#[derive(Clone)]
pub struct ObjectStoreReadAt {
    object_store: Arc<dyn ObjectStore>,
    location: Path,
}

impl ObjectStoreReadAt {
    /// Read from the object at `location`.
    pub fn new(object_store: Arc<dyn ObjectStore>, location: Path) -> Self {
        Self {
            object_store,
            location,
        }
    }
}

impl ReadAt for ObjectStoreReadAt {
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    fn read_byte_range(&self, range: Range<u64>) -> BoxFuture<'static, io::Result<ByteBuffer>> {
        let object_store = self.object_store.clone();
        let location = self.location.clone();

        async move {
            let len = usize::try_from(range.end.saturating_sub(range.start))
                .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "range too large"))?;
            let mut buf = ByteBufferMut::with_capacity_aligned(len, Alignment::new(ALIGNMENT));

            let response = object_store
                .get_opts(
                    &location,
                    GetOptions {
                        range: Some(GetRange::Bounded(range.clone())),
                        ..Default::default()
                    },
                )
                .await
                .map_err(io::Error::other)?;

            let mut byte_stream = response.into_stream();
            while let Some(bytes) = byte_stream.next().await {
                let bytes = bytes.map_err(io::Error::other)?;
                buf.extend_from_slice(&bytes);
            }

            if buf.len() != len {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("object {location} returned {} of {len} bytes", buf.len()),
                ));
            }

            Ok(buf.freeze())
        }
        .boxed()
    }

    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self)))]
    fn size(&self) -> BoxFuture<'static, io::Result<u64>> {
        let object_store = self.object_store.clone();
        let location = self.location.clone();

        async move {
            object_store
                .head(&location)
                .await
                .map(|obj| obj.size)
                .map_err(io::Error::other)
        }
        .boxed()
    }

    fn performance_hint(&self) -> PerformanceHint {
        PerformanceHint::default()
    }
}
