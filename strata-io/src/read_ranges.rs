use std::io;
use std::ops::Range;
use std::sync::Arc;

use futures::FutureExt;
use futures_util::{StreamExt, TryStreamExt, stream};
use strata_buffer::ByteBuffer;

use crate::{IoDispatcher, ReadAt};

/// Default bound on the number of concurrent reads issued against one source.
pub const MAX_BUFFERED_READS: usize = 16;

/// Reads a batch of byte ranges from one source, coalescing nearby ranges into single requests.
#[derive(Clone)]
pub struct ReadRanges {
    read: Arc<dyn ReadAt>,
    dispatcher: Arc<IoDispatcher>,
    max_gap: u64,
    max_in_flight: usize,
}

impl ReadRanges {
    /// Coalesce ranges of `read` that are at most `max_gap` bytes apart.
    pub fn new(read: Arc<dyn ReadAt>, dispatcher: Arc<IoDispatcher>, max_gap: u64) -> Self {
        Self {
            read,
            dispatcher,
            max_gap,
            max_in_flight: MAX_BUFFERED_READS,
        }
    }

    /// Bound the number of requests in flight at once.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight.max(1);
        self
    }

    /// The requests that [`Self::read_byte_ranges`] will issue for `ranges`.
    pub fn plan(&self, ranges: &[Range<u64>]) -> Vec<Range<u64>> {
        merge_ranges(ranges.to_vec(), self.max_gap)
    }

    /// Read every range, returning one buffer per input range in input order.
    ///
    /// Fails as soon as any request fails. A request that returns fewer bytes than asked for
    /// surfaces as [`UnexpectedEof`][io::ErrorKind::UnexpectedEof].
    #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, fields(ranges = ranges.len())))]
    pub async fn read_byte_ranges(&self, ranges: Vec<Range<u64>>) -> io::Result<Vec<ByteBuffer>> {
        let merged_ranges = self.plan(&ranges);
        log::trace!(
            "reading {} ranges with {} requests",
            ranges.len(),
            merged_ranges.len()
        );

        let read_ranges = stream::iter(merged_ranges.iter().cloned())
            .map(|r| {
                let reader = self.read.clone();
                let dispatched = self
                    .dispatcher
                    .dispatch(move || async move { reader.read_byte_range(r).await })
                    .map_err(io::Error::other);
                async move {
                    dispatched?
                        .map(|result| result.map_err(io::Error::other).and_then(|b| b))
                        .await
                }
            })
            .buffered(self.max_in_flight)
            .try_collect::<Vec<_>>()
            .await?;

        let mut result_bytes = Vec::with_capacity(ranges.len());
        for range in ranges {
            let read_idx = merged_ranges
                .partition_point(|mr| mr.start <= range.start)
                .saturating_sub(1);

            let read_range_start = merged_ranges[read_idx].start;
            let read_bytes = &read_ranges[read_idx];
            let start = usize::try_from(range.start - read_range_start).map_err(io::Error::other)?;
            let end = usize::try_from(range.end - read_range_start).map_err(io::Error::other)?;
            if end > read_bytes.len() {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!(
                        "read of {range:?} returned only {} bytes",
                        read_bytes.len().saturating_sub(start)
                    ),
                ));
            }
            result_bytes.push(read_bytes.slice(start..end));
        }

        Ok(result_bytes)
    }
}

/// Sort `ranges` and merge the ones that overlap or are at most `max_gap` bytes apart.
pub fn merge_ranges(mut ranges: Vec<Range<u64>>, max_gap: u64) -> Vec<Range<u64>> {
    if ranges.is_empty() {
        return Vec::new();
    }

    ranges.sort_unstable_by_key(|r| r.start);
    let mut merged_ranges = Vec::with_capacity(ranges.len());

    let mut start_idx = 0;
    let mut end_idx = 1;

    while start_idx < ranges.len() {
        let mut range_end = ranges[start_idx].end;

        while end_idx < ranges.len()
            && ranges[end_idx]
                .start
                .checked_sub(range_end)
                .is_none_or(|gap| gap <= max_gap)
        {
            range_end = range_end.max(ranges[end_idx].end);
            end_idx += 1;
        }

        merged_ranges.push(ranges[start_idx].start..range_end);
        start_idx = end_idx;
        end_idx += 1;
    }

    merged_ranges
}
