use std::sync::Arc;

use rayon::ThreadPool;
use strata_buffer::MemoryPool;
use strata_error::StrataResult;
use strata_io::{IoDispatcher, MAX_BUFFERED_READS};
use strata_metrics::StrataMetrics;

use crate::decompress::CodecRegistry;

/// Configuration of a [`ParquetReader`][crate::ParquetReader].
#[derive(Clone, Debug)]
pub struct ReaderOptions {
    pub(crate) max_in_flight_reads: usize,
    pub(crate) coalescing_window: Option<u64>,
    pub(crate) memory_limit: Option<usize>,
    pub(crate) projection: Option<Vec<String>>,
    pub(crate) binary_as_strings: bool,
    pub(crate) io_dispatcher: Option<Arc<IoDispatcher>>,
    pub(crate) thread_pool: Option<Arc<ThreadPool>>,
    pub(crate) codecs: CodecRegistry,
    pub(crate) metrics: StrataMetrics,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            max_in_flight_reads: MAX_BUFFERED_READS,
            coalescing_window: None,
            memory_limit: None,
            projection: None,
            binary_as_strings: false,
            io_dispatcher: None,
            thread_pool: None,
            codecs: CodecRegistry::default(),
            metrics: StrataMetrics::default(),
        }
    }
}

impl ReaderOptions {
    /// Bound the number of concurrent range reads issued against each source.
    pub fn with_max_in_flight_reads(mut self, max_in_flight_reads: usize) -> Self {
        self.max_in_flight_reads = max_in_flight_reads.max(1);
        self
    }

    /// Merge chunk reads that are at most `window` bytes apart, overriding each source's own
    /// performance hint.
    pub fn with_coalescing_window(mut self, window: u64) -> Self {
        self.coalescing_window = Some(window);
        self
    }

    /// Fail a read with an allocation error once its working memory would exceed `bytes`.
    pub fn with_memory_limit(mut self, bytes: usize) -> Self {
        self.memory_limit = Some(bytes);
        self
    }

    /// Only decode the named top-level columns.
    pub fn with_projection<S: Into<String>>(mut self, columns: impl IntoIterator<Item = S>) -> Self {
        self.projection = Some(columns.into_iter().map(Into::into).collect());
        self
    }

    /// Return byte array columns without a text annotation as strings.
    pub fn with_binary_as_strings(mut self, binary_as_strings: bool) -> Self {
        self.binary_as_strings = binary_as_strings;
        self
    }

    pub fn with_io_dispatcher(mut self, dispatcher: Arc<IoDispatcher>) -> Self {
        self.io_dispatcher = Some(dispatcher);
        self
    }

    /// Run decompression and decoding on `pool` instead of rayon's global pool.
    pub fn with_thread_pool(mut self, pool: Arc<ThreadPool>) -> Self {
        self.thread_pool = Some(pool);
        self
    }

    pub fn with_codecs(mut self, codecs: CodecRegistry) -> Self {
        self.codecs = codecs;
        self
    }

    pub fn with_metrics(mut self, metrics: StrataMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &StrataMetrics {
        &self.metrics
    }

    pub(crate) fn dispatcher(&self) -> StrataResult<Arc<IoDispatcher>> {
        match &self.io_dispatcher {
            Some(dispatcher) => Ok(dispatcher.clone()),
            None => IoDispatcher::shared(),
        }
    }

    /// A fresh memory budget for one read.
    pub(crate) fn memory_pool(&self) -> MemoryPool {
        self.memory_limit
            .map_or_else(MemoryPool::unbounded, MemoryPool::with_limit)
    }
}
