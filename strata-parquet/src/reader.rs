use std::sync::Arc;
use std::time::Instant;

use futures::channel::oneshot;
use futures::future::try_join_all;
use strata_buffer::{ByteBuffer, MemoryPool};
use strata_error::{ResultExt, StrataError, StrataResult, strata_bail, strata_err};
use strata_io::{ReadAt, ReadRanges};
use strata_metrics::{Counter, StrataMetrics, Timer};

use crate::chunk::{ColumnChunkDescriptor, ReadPlan, plan_read};
use crate::column::{Column, Table, TableMetadata};
use crate::decode::{decode_dictionaries, decode_pages};
use crate::decompress::{CodecRegistry, decompress_pages};
use crate::nesting::PageNesting;
use crate::output::OutputBuffers;
use crate::page_header::{PageBodies, PageData, count_page_headers, decode_page_headers};
use crate::preprocess::{compute_page_rows, compute_page_starts, size_pages};
use crate::{ReadMetadata, ReaderOptions, Schema};

struct ReadMetrics {
    requests: Arc<Counter>,
    coalesced: Arc<Counter>,
    fetched_bytes: Arc<Counter>,
    pages: Arc<Counter>,
    decompressed_pages: Arc<Counter>,
    decompressed_bytes: Arc<Counter>,
    decoded_pages: Arc<Counter>,
    fetch: Arc<Timer>,
    headers: Arc<Timer>,
    decompress: Arc<Timer>,
    preprocess: Arc<Timer>,
    decode: Arc<Timer>,
}

impl From<&StrataMetrics> for ReadMetrics {
    fn from(metrics: &StrataMetrics) -> Self {
        Self {
            requests: metrics.counter("strata.fetch.requests"),
            coalesced: metrics.counter("strata.fetch.coalesced"),
            fetched_bytes: metrics.counter("strata.fetch.bytes"),
            pages: metrics.counter("strata.pages.total"),
            decompressed_pages: metrics.counter("strata.pages.decompressed"),
            decompressed_bytes: metrics.counter("strata.decompress.bytes"),
            decoded_pages: metrics.counter("strata.pages.decoded"),
            fetch: metrics.timer("strata.read.fetch"),
            headers: metrics.timer("strata.read.headers"),
            decompress: metrics.timer("strata.read.decompress"),
            preprocess: metrics.timer("strata.read.preprocess"),
            decode: metrics.timer("strata.read.decode"),
        }
    }
}

fn count(counter: &Counter, n: usize) {
    if let Ok(n) = n.try_into() {
        counter.add(n);
    }
}

/// Decodes row windows of one or more Parquet sources into [`Table`]s.
///
/// Every source shares the schema of the [`ReadMetadata`]; rows are numbered across sources in
/// source order, then row group order.
pub struct ParquetReader {
    sources: Vec<Arc<dyn ReadAt>>,
    metadata: ReadMetadata,
    options: ReaderOptions,
}

impl ParquetReader {
    pub fn try_new(
        sources: Vec<Arc<dyn ReadAt>>,
        metadata: ReadMetadata,
        options: ReaderOptions,
    ) -> StrataResult<Self> {
        if sources.len() != metadata.sources().len() {
            strata_bail!(
                "{} sources were given for metadata describing {}",
                sources.len(),
                metadata.sources().len()
            );
        }
        let metadata = match &options.projection {
            Some(columns) => metadata.with_projection(columns)?,
            None => metadata,
        };
        let metadata = if options.binary_as_strings {
            metadata.with_binary_as_strings()
        } else {
            metadata
        };
        Ok(Self {
            sources,
            metadata,
            options,
        })
    }

    /// The schema of the columns this reader produces.
    pub fn schema(&self) -> &Schema {
        self.metadata.schema()
    }

    pub fn metadata(&self) -> &ReadMetadata {
        &self.metadata
    }

    pub fn options(&self) -> &ReaderOptions {
        &self.options
    }

    /// Read `num_rows` rows (all remaining rows when `None`) after skipping `skip_rows`.
    ///
    /// `row_groups` selects row groups per source; an empty outer list or an empty list for a
    /// source selects all of them. Unless `uses_custom_row_bounds` is set, the row window is
    /// ignored and every selected row is read.
    #[cfg_attr(feature = "tracing", tracing::instrument(skip(self, row_groups)))]
    pub async fn read(
        &self,
        skip_rows: usize,
        num_rows: Option<usize>,
        uses_custom_row_bounds: bool,
        row_groups: &[Vec<usize>],
    ) -> StrataResult<Table> {
        let plan = plan_read(
            &self.metadata,
            skip_rows,
            num_rows,
            uses_custom_row_bounds,
            row_groups,
        )?;
        let metadata = TableMetadata {
            column_names: self.schema().column_names(),
            num_rows: plan.window.num,
            row_groups: plan.row_groups.clone(),
        };
        let metrics = ReadMetrics::from(self.options.metrics());

        let buffers = if plan.chunks.is_empty() {
            Vec::new()
        } else {
            let started = Instant::now();
            let buffers = self.fetch(&plan.chunks, &metrics).await?;
            metrics.fetch.update(started.elapsed());
            buffers
        };

        let schema = self.schema().clone();
        let codecs = self.options.codecs.clone();
        let pool = self.options.memory_pool();
        let columns = self
            .spawn_blocking(move || decode_chunks(&schema, &plan, &buffers, &codecs, &pool, &metrics))
            .await?;
        Ok(Table { columns, metadata })
    }

    /// [`Self::read`], blocking the current thread until it completes.
    pub fn read_blocking(
        &self,
        skip_rows: usize,
        num_rows: Option<usize>,
        uses_custom_row_bounds: bool,
        row_groups: &[Vec<usize>],
    ) -> StrataResult<Table> {
        futures::executor::block_on(self.read(
            skip_rows,
            num_rows,
            uses_custom_row_bounds,
            row_groups,
        ))
    }

    /// Fetch every chunk, one coalesced batch of range reads per source.
    async fn fetch(
        &self,
        chunks: &[ColumnChunkDescriptor],
        metrics: &ReadMetrics,
    ) -> StrataResult<Vec<ByteBuffer>> {
        let mut by_source = vec![Vec::new(); self.sources.len()];
        for (idx, chunk) in chunks.iter().enumerate() {
            by_source[chunk.source].push(idx);
        }

        let dispatcher = self.options.dispatcher()?;
        let reads = by_source
            .into_iter()
            .enumerate()
            .filter(|(_, indices)| !indices.is_empty())
            .map(|(source, indices)| {
                let read = self.sources[source].clone();
                let window = self
                    .options
                    .coalescing_window
                    .unwrap_or_else(|| read.performance_hint().coalescing_window());
                let ranges = ReadRanges::new(read, dispatcher.clone(), window)
                    .with_max_in_flight(self.options.max_in_flight_reads);
                let byte_ranges = indices
                    .iter()
                    .map(|idx| chunks[*idx].byte_range.clone())
                    .collect::<Vec<_>>();
                let requests = ranges.plan(&byte_ranges).len();
                count(&metrics.requests, requests);
                count(&metrics.coalesced, byte_ranges.len() - requests);
                async move {
                    let buffers = ranges
                        .read_byte_ranges(byte_ranges)
                        .await
                        .map_err(|e| StrataError::from(e).with_context(format!("reading source {source}")))?;
                    Ok::<_, StrataError>((indices, buffers))
                }
            });

        let mut fetched = vec![ByteBuffer::empty(); chunks.len()];
        for (indices, buffers) in try_join_all(reads).await? {
            for (idx, buffer) in indices.into_iter().zip(buffers) {
                fetched[idx] = buffer;
            }
        }
        let bytes = fetched.iter().map(ByteBuffer::len).sum::<usize>();
        count(&metrics.fetched_bytes, bytes);
        log::debug!("fetched {} column chunks, {bytes} bytes", chunks.len());
        Ok(fetched)
    }

    /// Run `f` on the reader's thread pool and await its result.
    async fn spawn_blocking<R, F>(&self, f: F) -> StrataResult<R>
    where
        R: Send + 'static,
        F: FnOnce() -> StrataResult<R> + Send + 'static,
    {
        let (send, recv) = oneshot::channel();
        let task = move || {
            // The read was dropped if nobody is listening.
            let _ = send.send(f());
        };
        match &self.options.thread_pool {
            Some(pool) => pool.spawn(task),
            None => rayon::spawn(task),
        }
        ResultExt::flatten(
            recv.await
                .map_err(|_| strata_err!(AssertionFailed: "decode task ended without a result")),
        )
    }
}

/// The CPU stages of a read, from raw chunks to finished columns.
fn decode_chunks(
    schema: &Schema,
    plan: &ReadPlan,
    buffers: &[ByteBuffer],
    codecs: &CodecRegistry,
    pool: &MemoryPool,
    metrics: &ReadMetrics,
) -> StrataResult<Vec<Column>> {
    let chunks = &plan.chunks;
    let window = plan.window;

    let started = Instant::now();
    let counts = count_page_headers(chunks, buffers)?;
    let mut table = decode_page_headers(chunks, buffers, &counts)?;
    metrics.headers.update(started.elapsed());
    count(&metrics.pages, table.len());

    let started = Instant::now();
    let decompressed = decompress_pages(&mut table, chunks, buffers, codecs, pool)?;
    metrics.decompress.update(started.elapsed());
    count(
        &metrics.decompressed_pages,
        table
            .pages
            .iter()
            .filter(|p| matches!(p.data, PageData::Arena(_)))
            .count(),
    );
    count(&metrics.decompressed_bytes, decompressed.arena().len());

    let bodies = PageBodies {
        buffers,
        arena: decompressed.arena().as_slice(),
    };

    let started = Instant::now();
    compute_page_rows(&mut table, chunks, bodies)?;
    let dictionaries = decode_dictionaries(&table, chunks, bodies, pool)?;
    let mut nesting = PageNesting::try_new(table.len(), schema.max_depth(), pool)?;
    size_pages(schema, chunks, &table, bodies, &dictionaries, window, &mut nesting)?;
    let sizes = compute_page_starts(schema, chunks, &table, window, &mut nesting)?;
    metrics.preprocess.update(started.elapsed());

    let started = Instant::now();
    let mut output = OutputBuffers::try_new(schema, &sizes, pool)?;
    let targets = output.page_targets(schema, chunks, &table, &nesting)?;
    let decoded = decode_pages(
        schema,
        chunks,
        &table,
        bodies,
        &dictionaries,
        window,
        &mut nesting,
        targets,
    )?;
    metrics.decode.update(started.elapsed());
    count(&metrics.decoded_pages, decoded);
    log::debug!(
        "decoded {decoded} of {} pages into {} rows, peak working memory {} bytes",
        table.len(),
        window.num,
        pool.peak()
    );

    output.finish(schema, &sizes)
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use strata_error::ErrorKind;

    use super::*;
    use crate::metadata::{ColumnChunkMetadata, RowGroupMetadata, SourceMetadata};
    use crate::test_util::{PLAIN, data_page_v1, plain_i32};
    use crate::{Codec, PhysicalType, Repetition, SchemaNode};

    /// One source of `groups` required int32 row groups, each a single page.
    fn source(groups: &[&[i32]]) -> (Arc<dyn ReadAt>, SourceMetadata) {
        let mut bytes = Vec::new();
        let mut row_groups = Vec::new();
        for values in groups {
            let start = bytes.len() as u64;
            bytes.extend(data_page_v1(values.len() as i32, PLAIN, &plain_i32(values)));
            row_groups.push(RowGroupMetadata {
                num_rows: values.len(),
                columns: vec![ColumnChunkMetadata {
                    byte_range: start..bytes.len() as u64,
                    codec: Codec::Uncompressed,
                    num_values: values.len() as u64,
                }],
            });
        }
        (Arc::new(Bytes::from(bytes)), SourceMetadata { row_groups })
    }

    fn reader(sources: Vec<(Arc<dyn ReadAt>, SourceMetadata)>, options: ReaderOptions) -> ParquetReader {
        let schema = Schema::try_new(vec![SchemaNode::primitive(
            "x",
            Repetition::Required,
            PhysicalType::Int32,
        )])
        .unwrap();
        let (reads, metadata): (Vec<_>, Vec<_>) = sources.into_iter().unzip();
        ParquetReader::try_new(reads, ReadMetadata::try_new(schema, metadata).unwrap(), options)
            .unwrap()
    }

    #[tokio::test]
    async fn rows_are_numbered_across_sources() {
        let reader = reader(
            vec![source(&[&[0, 1, 2], &[3, 4]]), source(&[&[5, 6, 7]])],
            ReaderOptions::default(),
        );
        let table = reader.read(2, Some(5), true, &[]).await.unwrap();
        assert_eq!(table.num_rows(), 5);
        assert_eq!(table.metadata.row_groups, vec![vec![0, 1], vec![0]]);
        let x = table.column("x").unwrap();
        assert_eq!(x.values::<i32>().unwrap().as_slice(), &[2, 3, 4, 5, 6]);
        assert!(x.validity().is_none());
    }

    #[tokio::test]
    async fn zero_rows_skips_the_fetch() {
        let metrics = StrataMetrics::default();
        let reader = reader(
            vec![source(&[&[1, 2]])],
            ReaderOptions::default().with_metrics(metrics.clone()),
        );
        let table = reader.read(0, Some(0), true, &[]).await.unwrap();
        assert_eq!(table.num_rows(), 0);
        assert_eq!(table.columns[0].len(), 0);
        assert_eq!(metrics.counter("strata.fetch.requests").count(), 0);
    }

    #[tokio::test]
    async fn metrics_count_requests_and_pages() {
        let metrics = StrataMetrics::default();
        let reader = reader(
            vec![source(&[&[1, 2], &[3]])],
            ReaderOptions::default()
                .with_metrics(metrics.clone())
                .with_coalescing_window(1 << 20),
        );
        reader.read(0, None, false, &[]).await.unwrap();
        assert_eq!(metrics.counter("strata.fetch.requests").count(), 1);
        assert_eq!(metrics.counter("strata.fetch.coalesced").count(), 1);
        assert_eq!(metrics.counter("strata.pages.total").count(), 2);
        assert_eq!(metrics.counter("strata.pages.decoded").count(), 2);
    }

    #[test]
    fn source_count_must_match_metadata() {
        let schema = Schema::try_new(vec![SchemaNode::primitive(
            "x",
            Repetition::Required,
            PhysicalType::Int32,
        )])
        .unwrap();
        let metadata = ReadMetadata::try_new(schema, vec![SourceMetadata::default()]).unwrap();
        let err = ParquetReader::try_new(Vec::new(), metadata, ReaderOptions::default())
            .err()
            .unwrap();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn blocking_reads_on_a_dedicated_pool() {
        let pool = Arc::new(rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap());
        let dispatcher = Arc::new(strata_io::IoDispatcher::new_tokio(2).unwrap());
        let reader = reader(
            vec![source(&[&[1, 2, 3]])],
            ReaderOptions::default()
                .with_thread_pool(pool)
                .with_io_dispatcher(dispatcher),
        );
        let table = reader.read_blocking(1, None, true, &[]).unwrap();
        assert_eq!(
            table.columns[0].values::<i32>().unwrap().as_slice(),
            &[2, 3]
        );
    }

    #[tokio::test]
    async fn io_errors_name_the_source() {
        let (_, metadata) = source(&[&[1, 2, 3]]);
        let truncated: Arc<dyn ReadAt> = Arc::new(Bytes::from_static(&[0u8; 4]));
        let reader = reader(vec![(truncated, metadata)], ReaderOptions::default());
        let err = reader.read(0, None, false, &[]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("source 0"));
    }
}
