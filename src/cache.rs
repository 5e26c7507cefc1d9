use crate::source::{ProjectRecord, Route, RouteSource};
use arc_swap::ArcSwapOption;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Routes partitioned by how they are served, keyed by prefix.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RoutingTable {
    pub redirect: HashMap<String, Route>,
    pub proxy: HashMap<String, Route>,
}

impl RoutingTable {
    /// Build a table from source records. Unusable records are logged and
    /// left out; they never fail the batch.
    pub fn from_records(records: Vec<ProjectRecord>) -> Self {
        let mut table = Self::default();

        for (index, record) in records.into_iter().enumerate() {
            let label = record.lab_url.clone().unwrap_or_default();
            let route = match record.into_route() {
                Ok(route) => route,
                Err(reason) => {
                    tracing::warn!(index, lab_url = %label, "Skipping project record: {}", reason);
                    continue;
                }
            };

            let partition = if route.proxied {
                &mut table.proxy
            } else {
                &mut table.redirect
            };
            if let Some(previous) = partition.insert(route.prefix.clone(), route) {
                tracing::debug!(prefix = %previous.prefix, "Duplicate prefix, later record wins");
            }
        }

        table
    }

    pub fn len(&self) -> usize {
        self.redirect.len() + self.proxy.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All known prefixes across both partitions, sorted.
    pub fn prefixes(&self) -> Vec<String> {
        let mut prefixes: Vec<String> = self
            .redirect
            .keys()
            .chain(self.proxy.keys())
            .cloned()
            .collect();
        prefixes.sort();
        prefixes.dedup();
        prefixes
    }
}

#[derive(Debug)]
pub struct CacheRecord {
    pub table: Arc<RoutingTable>,
    pub fetched_at: Instant,
    /// `None` never expires.
    pub expires_at: Option<Instant>,
}

impl CacheRecord {
    fn is_fresh(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |expires_at| now < expires_at)
    }
}

/// Time-bounded cache over a [`RouteSource`].
///
/// Readers load the current record without locking; a refresh swaps in a
/// whole new record, so a request sees either the old table or the new one.
/// Concurrent misses may each fetch; the last successful swap wins.
///
/// After a failed refresh the stale table is served for `retry_backoff`
/// before the source is asked again.
#[derive(Clone)]
pub struct RouteTableCache {
    inner: Arc<Inner>,
}

struct Inner {
    source: Arc<dyn RouteSource>,
    ttl: Duration,
    retry_backoff: Duration,
    record: ArcSwapOption<CacheRecord>,
}

impl RouteTableCache {
    pub fn new(source: Arc<dyn RouteSource>, ttl: Duration) -> Self {
        Self::with_retry_backoff(source, ttl, DEFAULT_RETRY_BACKOFF.min(ttl))
    }

    pub fn with_retry_backoff(
        source: Arc<dyn RouteSource>,
        ttl: Duration,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                ttl,
                retry_backoff,
                record: ArcSwapOption::empty(),
            }),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.inner.ttl
    }

    pub async fn get_table(&self) -> Arc<RoutingTable> {
        self.get_table_at(Instant::now()).await
    }

    /// Return the cached table if it has not expired at `now`, otherwise
    /// refresh. Never fails: a failed refresh falls back to the
    /// previous table, or to an empty one on a cold start.
    pub async fn get_table_at(&self, now: Instant) -> Arc<RoutingTable> {
        if let Some(record) = self.inner.record.load_full() {
            if record.is_fresh(now) {
                tracing::debug!("Route table cache hit");
                return record.table.clone();
            }
        }

        tracing::debug!("Route table cache miss, refreshing");
        self.refresh_at(now).await
    }

    /// Fetch from the source now, regardless of the cached record's age.
    pub async fn refresh(&self) -> Arc<RoutingTable> {
        self.refresh_at(Instant::now()).await
    }

    async fn refresh_at(&self, now: Instant) -> Arc<RoutingTable> {
        match self.inner.source.fetch_projects().await {
            Ok(records) => {
                let table = Arc::new(RoutingTable::from_records(records));
                tracing::info!(
                    redirect = table.redirect.len(),
                    proxy = table.proxy.len(),
                    "Loaded route table from {}",
                    self.inner.source.describe()
                );
                self.inner.record.store(Some(Arc::new(CacheRecord {
                    table: table.clone(),
                    fetched_at: now,
                    expires_at: now.checked_add(self.inner.ttl),
                })));
                table
            }
            Err(e) => {
                tracing::error!(
                    "Failed to fetch routes from {}: {}",
                    self.inner.source.describe(),
                    e
                );
                // Hold the stale table a little longer. A record a concurrent
                // refresh just stored keeps its own, later expiry.
                let retry_at = now.checked_add(self.inner.retry_backoff);
                self.inner.record.rcu(|current| {
                    current.as_ref().map(|record| {
                        Arc::new(CacheRecord {
                            table: record.table.clone(),
                            fetched_at: record.fetched_at,
                            expires_at: later(record.expires_at, retry_at),
                        })
                    })
                });

                match self.inner.record.load_full() {
                    Some(record) => record.table.clone(),
                    None => Arc::new(RoutingTable::default()),
                }
            }
        }
    }

    /// The current record, if any refresh has ever succeeded.
    pub fn snapshot(&self) -> Option<Arc<CacheRecord>> {
        self.inner.record.load_full()
    }
}

fn later(a: Option<Instant>, b: Option<Instant>) -> Option<Instant> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        _ => None,
    }
}
