use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

/// Engine-wide counters.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Counter {
    CacheHits,
    CacheMisses,
    CacheRejectedPuts,
    PartitionReads,
    ReadRetries,
    FetchFailures,
    CyclesStarted,
    CyclesDropped,
    QueriesStarted,
    QueriesApplied,
    QueriesSuperseded,
    QueriesErrored,
    EnvelopesPublished,
    EnvelopesIgnored,
}

impl Counter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Counter::CacheHits => "cache.hits",
            Counter::CacheMisses => "cache.misses",
            Counter::CacheRejectedPuts => "cache.rejected_puts",
            Counter::PartitionReads => "fetch.reads",
            Counter::ReadRetries => "fetch.retries",
            Counter::FetchFailures => "fetch.failures",
            Counter::CyclesStarted => "cycle.started",
            Counter::CyclesDropped => "cycle.dropped",
            Counter::QueriesStarted => "query.started",
            Counter::QueriesApplied => "query.applied",
            Counter::QueriesSuperseded => "query.superseded",
            Counter::QueriesErrored => "query.errored",
            Counter::EnvelopesPublished => "broadcast.published",
            Counter::EnvelopesIgnored => "broadcast.ignored",
        }
    }
}

/// Engine-wide value distributions.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Series {
    ReadAttempts,
    PartitionBytes,
    QueryMillis,
    TableRows,
}

impl Series {
    pub fn as_str(&self) -> &'static str {
        match self {
            Series::ReadAttempts => "fetch.attempts",
            Series::PartitionBytes => "partition.bytes",
            Series::QueryMillis => "query.ms",
            Series::TableRows => "table.rows",
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, Serialize)]
pub struct Histogram {
    pub count: u64,
    pub sum: i64,
    pub min: i64,
    pub max: i64,
}

impl Histogram {
    pub fn record(&mut self, value: i64) {
        if self.count == 0 {
            self.min = value;
            self.max = value;
        } else {
            self.min = self.min.min(value);
            self.max = self.max.max(value);
        }
        self.count += 1;
        self.sum = self.sum.saturating_add(value);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub counters: Vec<(&'static str, u64)>,
    pub histograms: Vec<(&'static str, Histogram)>,
}

/// Counter and histogram storage keyed by typed names.
///
/// Snapshots are sorted by metric name so logs and the status route are stable.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Metrics {
    counters: BTreeMap<Counter, u64>,
    histograms: BTreeMap<Series, Histogram>,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn counter(&self, counter: Counter) -> u64 {
        self.counters.get(&counter).copied().unwrap_or(0)
    }

    pub fn inc(&mut self, counter: Counter, by: u64) {
        *self.counters.entry(counter).or_insert(0) += by;
    }

    pub fn record(&mut self, series: Series, value: i64) {
        self.histograms.entry(series).or_default().record(value);
    }

    pub fn histogram(&self, series: Series) -> Option<Histogram> {
        self.histograms.get(&series).copied()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut counters: Vec<_> = self
            .counters
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        counters.sort_by(|a, b| a.0.cmp(b.0));

        let mut histograms: Vec<_> = self
            .histograms
            .iter()
            .map(|(k, v)| (k.as_str(), *v))
            .collect();
        histograms.sort_by(|a, b| a.0.cmp(b.0));

        MetricsSnapshot {
            counters,
            histograms,
        }
    }
}

/// Cloneable handle to one `Metrics` instance shared by every component.
#[derive(Debug, Default, Clone)]
pub struct SharedMetrics {
    inner: Arc<Mutex<Metrics>>,
}

impl SharedMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc(&self, counter: Counter) {
        self.inner.lock().inc(counter, 1);
    }

    pub fn inc_by(&self, counter: Counter, by: u64) {
        self.inner.lock().inc(counter, by);
    }

    pub fn record(&self, series: Series, value: i64) {
        self.inner.lock().record(series, value);
    }

    pub fn counter(&self, counter: Counter) -> u64 {
        self.inner.lock().counter(counter)
    }

    pub fn histogram(&self, series: Series) -> Option<Histogram> {
        self.inner.lock().histogram(series)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        self.inner.lock().snapshot()
    }
}
