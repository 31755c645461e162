#![deny(missing_docs)]
//! Strata metrics
//!
//! A thin, cloneable handle over a `witchcraft-metrics` registry. Every reader shares one
//! registry per options instance, so counters accumulate across reads.

use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

use witchcraft_metrics::{Metric, MetricRegistry, Metrics, MetricsIter};
// re-export exposed metric types
pub use witchcraft_metrics::{Counter, Histogram, MetricId, Timer};

/// A metric registry for various performance metrics.
#[derive(Clone, Default)]
pub struct StrataMetrics {
    registry: Arc<MetricRegistry>,
    default_tags: Arc<DefaultTags>,
}

/// Default tags for metrics used in [`StrataMetrics`].
#[derive(Default, Debug, Clone)]
pub struct DefaultTags(BTreeMap<Cow<'static, str>, Cow<'static, str>>);

impl<K, V> From<&[(K, V)]> for DefaultTags
where
    K: Clone + Into<Cow<'static, str>>,
    V: Clone + Into<Cow<'static, str>>,
{
    fn from(pairs: &[(K, V)]) -> Self {
        DefaultTags(
            pairs
                .iter()
                .map(|(k, v)| (k.clone().into(), v.clone().into()))
                .collect(),
        )
    }
}

impl StrataMetrics {
    /// Create a new [`StrataMetrics`] instance over an existing registry.
    pub fn new(registry: Arc<MetricRegistry>, default_tags: impl Into<DefaultTags>) -> Self {
        Self {
            registry,
            default_tags: Arc::new(default_tags.into()),
        }
    }

    /// Create an empty metric registry with default tags.
    pub fn default_with_tags(default_tags: impl Into<DefaultTags>) -> Self {
        Self::new(Arc::default(), default_tags)
    }

    /// Returns the counter with the specified ID, creating a default instance if absent.
    ///
    /// # Panics
    ///
    /// Panics if a metric is registered with the ID that is not a counter.
    pub fn counter<T>(&self, id: T) -> Arc<Counter>
    where
        T: Into<MetricId>,
    {
        self.registry.counter(id)
    }

    /// Returns the histogram with the specified ID, creating a default instance if absent.
    ///
    /// # Panics
    ///
    /// Panics if a metric is registered with the ID that is not a histogram.
    pub fn histogram<T>(&self, id: T) -> Arc<Histogram>
    where
        T: Into<MetricId>,
    {
        self.registry.histogram(id)
    }

    /// Returns the timer with the specified ID, creating a default instance if absent.
    ///
    /// # Panics
    ///
    /// Panics if a metric is registered with the ID that is not a timer.
    pub fn timer<T>(&self, id: T) -> Arc<Timer>
    where
        T: Into<MetricId>,
    {
        self.registry.timer(id)
    }

    /// Run `f`, recording its wall time in the timer `id`.
    pub fn time<T, R>(&self, id: T, f: impl FnOnce() -> R) -> R
    where
        T: Into<MetricId>,
    {
        let timer = self.timer(id);
        let _guard = timer.time();
        f()
    }

    /// Returns a snapshot of the metrics in the registry.
    ///
    /// Modifications to the registry after this method is called will not affect the state of the returned `MetricsSnapshot`.
    pub fn metrics(&self) -> MetricsSnapshot<'_> {
        MetricsSnapshot {
            snapshot: self.registry.metrics(),
            default_tags: &self.default_tags,
        }
    }
}

impl Debug for StrataMetrics {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrataMetrics")
            .field("default_tags", &self.default_tags)
            .finish_non_exhaustive()
    }
}

/// A snapshot of the metrics in a registry with default tags.
pub struct MetricsSnapshot<'a> {
    snapshot: Metrics,
    default_tags: &'a DefaultTags,
}

impl MetricsSnapshot<'_> {
    /// Create an iterator over the metrics snapshot.
    pub fn iter(&self) -> StrataMetricsIter<'_> {
        StrataMetricsIter {
            iter: self.snapshot.iter(),
            default_tags: self.default_tags,
        }
    }
}

/// Metrics Iterator that applies the default tags to each metric in the inner iterator.
pub struct StrataMetricsIter<'a> {
    iter: MetricsIter<'a>,
    default_tags: &'a DefaultTags,
}

impl<'a> Iterator for StrataMetricsIter<'a> {
    type Item = (MetricId, &'a Metric);

    #[inline]
    fn next(&mut self) -> Option<(MetricId, &'a Metric)> {
        self.iter.next().map(|(k, v)| {
            let mut metric_id = k.clone();
            for (tag_key, tag_value) in self.default_tags.0.iter() {
                metric_id = metric_id.with_tag(tag_key.clone(), tag_value.clone())
            }

            (metric_id, v)
        })
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}
