//! Two-phase plan/execute resolver

use super::{BatchLoader, SearchLoader};
use anet_common::{Error, Result};
use futures::future::{join_all, BoxFuture};
use sqlx::SqlitePool;
use std::any::{Any, TypeId};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::marker::PhantomData;
use std::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

/// Per-loader execution counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoaderStats {
    /// Bulk statements issued
    pub bulk_queries: usize,
    /// Distinct keys sent to the store
    pub keys: usize,
    /// Bulk statements that failed
    pub failures: usize,
}

impl LoaderStats {
    fn merge(&mut self, other: &LoaderStats) {
        self.bulk_queries += other.bulk_queries;
        self.keys += other.keys;
        self.failures += other.failures;
    }
}

/// Execution counters by loader name
#[derive(Debug, Clone, Default)]
pub struct ResolverStats {
    pub loaders: BTreeMap<&'static str, LoaderStats>,
}

impl ResolverStats {
    fn record(&mut self, name: &'static str, stats: &LoaderStats) {
        self.loaders.entry(name).or_default().merge(stats);
    }

    /// Counters for one loader (zero if it never ran)
    pub fn loader(&self, name: &str) -> LoaderStats {
        self.loaders.get(name).copied().unwrap_or_default()
    }

    /// Total bulk statements across loaders
    pub fn bulk_queries(&self) -> usize {
        self.loaders.values().map(|s| s.bulk_queries).sum()
    }
}

/// Handle to one registered id/foreign-key lookup
pub struct Ticket<L> {
    index: usize,
    _loader: PhantomData<fn() -> L>,
}

impl<L> Clone for Ticket<L> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<L> Copy for Ticket<L> {}

/// Handle to one registered search lookup
pub struct SearchTicket<S> {
    index: usize,
    _loader: PhantomData<fn() -> S>,
}

impl<S> Clone for SearchTicket<S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for SearchTicket<S> {}

struct ExecutedBatch {
    type_id: TypeId,
    name: &'static str,
    stats: LoaderStats,
    results: Box<dyn Any + Send + Sync>,
}

trait PendingBatch: Send {
    fn execute<'a>(self: Box<Self>, pool: &'a SqlitePool) -> BoxFuture<'a, ExecutedBatch>;

    fn as_any_mut(&mut self) -> &mut dyn Any;
}

struct KeyBatch<L: BatchLoader> {
    loader: L,
    keys: Vec<L::Key>,
}

struct KeyResults<L: BatchLoader> {
    keys: Vec<L::Key>,
    rows: std::result::Result<HashMap<L::Key, Vec<L::Value>>, String>,
}

impl<L: BatchLoader> PendingBatch for KeyBatch<L> {
    fn execute<'a>(self: Box<Self>, pool: &'a SqlitePool) -> BoxFuture<'a, ExecutedBatch> {
        Box::pin(async move {
            let KeyBatch { loader, keys } = *self;
            let distinct = distinct_in_order(&keys);
            debug!(loader = L::NAME, keys = keys.len(), distinct = distinct.len(), "Executing bulk query");

            let mut stats = LoaderStats {
                bulk_queries: 1,
                keys: distinct.len(),
                failures: 0,
            };
            let rows = match loader.load(pool, &distinct).await {
                Ok(_) if distinct.is_empty() => Ok(HashMap::new()),
                Ok(rows) => Ok(group_rows(rows)),
                Err(e) => {
                    warn!(loader = L::NAME, error = %e, "Bulk query failed");
                    stats.failures = 1;
                    Err(e.to_string())
                }
            };

            ExecutedBatch {
                type_id: TypeId::of::<KeyBatch<L>>(),
                name: L::NAME,
                stats,
                results: Box::new(KeyResults::<L> { keys, rows }),
            }
        })
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

struct SearchBatch<S: SearchLoader> {
    loader: S,
    keys: Vec<(Uuid, S::Query)>,
}

type PartitionRows<V> = std::result::Result<HashMap<Uuid, Vec<V>>, String>;

struct SearchResults<S: SearchLoader> {
    keys: Vec<(Uuid, S::Query)>,
    partitions: HashMap<S::Query, PartitionRows<S::Value>>,
}

impl<S: SearchLoader> PendingBatch for SearchBatch<S> {
    fn execute<'a>(self: Box<Self>, pool: &'a SqlitePool) -> BoxFuture<'a, ExecutedBatch> {
        Box::pin(async move {
            let SearchBatch { loader, keys } = *self;

            // Group owners by structurally equal query, first-seen order
            let mut partitions: Vec<(S::Query, Vec<Uuid>)> = Vec::new();
            let mut index: HashMap<S::Query, usize> = HashMap::new();
            for (owner, query) in &keys {
                let slot = *index.entry(query.clone()).or_insert_with(|| {
                    partitions.push((query.clone(), Vec::new()));
                    partitions.len() - 1
                });
                let owners = &mut partitions[slot].1;
                if !owners.contains(owner) {
                    owners.push(*owner);
                }
            }
            debug!(loader = S::NAME, partitions = partitions.len(), "Executing search partitions");

            let outcomes = join_all(
                partitions
                    .iter()
                    .map(|(query, owners)| loader.search(pool, query, owners)),
            )
            .await;

            let mut stats = LoaderStats::default();
            let mut results = HashMap::new();
            for ((query, owners), outcome) in partitions.into_iter().zip(outcomes) {
                stats.bulk_queries += 1;
                stats.keys += owners.len();
                let rows = match outcome {
                    Ok(rows) => Ok(group_rows(rows)),
                    Err(e) => {
                        warn!(loader = S::NAME, query = ?query, error = %e, "Search partition failed");
                        stats.failures += 1;
                        Err(e.to_string())
                    }
                };
                results.insert(query, rows);
            }

            ExecutedBatch {
                type_id: TypeId::of::<SearchBatch<S>>(),
                name: S::NAME,
                stats,
                results: Box::new(SearchResults::<S> {
                    keys,
                    partitions: results,
                }),
            }
        })
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn distinct_in_order<K: Clone + Eq + std::hash::Hash>(keys: &[K]) -> Vec<K> {
    let mut seen = HashSet::with_capacity(keys.len());
    keys.iter().filter(|k| seen.insert(*k)).cloned().collect()
}

fn group_rows<K: Eq + std::hash::Hash, V>(rows: Vec<(K, V)>) -> HashMap<K, Vec<V>> {
    let mut grouped: HashMap<K, Vec<V>> = HashMap::new();
    for (key, value) in rows {
        grouped.entry(key).or_default().push(value);
    }
    grouped
}

/// Keys collected for one resolution round
///
/// Registration takes `&self`, so concurrent tasks of one request may share a
/// plan. Executing consumes it, which closes registration.
#[derive(Default)]
pub struct LoadPlan {
    batches: Mutex<HashMap<TypeId, Box<dyn PendingBatch>>>,
}

impl LoadPlan {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one key against a loader
    pub fn load<L: BatchLoader>(&self, loader: L, key: L::Key) -> Ticket<L> {
        self.with_key_batch(loader, |batch| {
            batch.keys.push(key);
            Ticket {
                index: batch.keys.len() - 1,
                _loader: PhantomData,
            }
        })
    }

    /// Register several keys against a loader, in order
    ///
    /// Registering an empty list still schedules the loader's sentinel query.
    pub fn load_all<L, I>(&self, loader: L, keys: I) -> Vec<Ticket<L>>
    where
        L: BatchLoader,
        I: IntoIterator<Item = L::Key>,
    {
        self.with_key_batch(loader, |batch| {
            keys.into_iter()
                .map(|key| {
                    batch.keys.push(key);
                    Ticket {
                        index: batch.keys.len() - 1,
                        _loader: PhantomData,
                    }
                })
                .collect()
        })
    }

    /// Register one `(owner, query)` search key
    pub fn search<S: SearchLoader>(&self, loader: S, owner: Uuid, query: S::Query) -> SearchTicket<S> {
        let mut batches = self.batches.lock().unwrap_or_else(|e| e.into_inner());
        let slot = batches
            .entry(TypeId::of::<SearchBatch<S>>())
            .or_insert_with(|| {
                Box::new(SearchBatch::<S> {
                    loader,
                    keys: Vec::new(),
                })
            });
        let batch = slot
            .as_any_mut()
            .downcast_mut::<SearchBatch<S>>()
            .expect("search batch is keyed by its own TypeId");
        batch.keys.push((owner, query));
        SearchTicket {
            index: batch.keys.len() - 1,
            _loader: PhantomData,
        }
    }

    /// Number of distinct loaders registered
    pub fn loader_count(&self) -> usize {
        self.batches.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.loader_count() == 0
    }

    fn with_key_batch<L: BatchLoader, T>(&self, loader: L, f: impl FnOnce(&mut KeyBatch<L>) -> T) -> T {
        let mut batches = self.batches.lock().unwrap_or_else(|e| e.into_inner());
        let slot = batches.entry(TypeId::of::<KeyBatch<L>>()).or_insert_with(|| {
            Box::new(KeyBatch::<L> {
                loader,
                keys: Vec::new(),
            })
        });
        let batch = slot
            .as_any_mut()
            .downcast_mut::<KeyBatch<L>>()
            .expect("key batch is keyed by its own TypeId");
        f(batch)
    }
}

/// Results of one executed plan
#[derive(Default)]
pub struct Resolved {
    batches: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
    stats: ResolverStats,
}

impl Resolved {
    /// Rows for one ticket; empty when nothing matched
    pub fn get<L: BatchLoader>(&self, ticket: &Ticket<L>) -> Result<&[L::Value]> {
        let results = self.key_results::<L>()?;
        let key = results.keys.get(ticket.index).ok_or_else(|| {
            Error::Internal(format!("Ticket for {} does not belong to this plan", L::NAME))
        })?;
        Ok(lookup(&results.rows, key, L::NAME)?)
    }

    /// First row for one ticket, if any
    pub fn first<L: BatchLoader>(&self, ticket: &Ticket<L>) -> Result<Option<&L::Value>> {
        Ok(self.get(ticket)?.first())
    }

    /// One result list per registered key of a loader, in registration order
    pub fn in_order<L: BatchLoader>(&self) -> Result<Vec<&[L::Value]>> {
        let results = self.key_results::<L>()?;
        results
            .keys
            .iter()
            .map(|key| lookup(&results.rows, key, L::NAME))
            .collect()
    }

    /// Rows for one search ticket
    pub fn search<S: SearchLoader>(&self, ticket: &SearchTicket<S>) -> Result<&[S::Value]> {
        let results = self
            .batches
            .get(&TypeId::of::<SearchBatch<S>>())
            .and_then(|b| b.downcast_ref::<SearchResults<S>>())
            .ok_or_else(|| Error::Internal(format!("Search loader {} was not part of this plan", S::NAME)))?;
        let (owner, query) = results.keys.get(ticket.index).ok_or_else(|| {
            Error::Internal(format!("Ticket for {} does not belong to this plan", S::NAME))
        })?;
        let partition = results
            .partitions
            .get(query)
            .ok_or_else(|| Error::Internal(format!("Missing partition in {}", S::NAME)))?;
        lookup(partition, owner, S::NAME)
    }

    /// Counters for this round
    pub fn stats(&self) -> &ResolverStats {
        &self.stats
    }

    fn key_results<L: BatchLoader>(&self) -> Result<&KeyResults<L>> {
        self.batches
            .get(&TypeId::of::<KeyBatch<L>>())
            .and_then(|b| b.downcast_ref::<KeyResults<L>>())
            .ok_or_else(|| Error::Internal(format!("Loader {} was not part of this plan", L::NAME)))
    }
}

fn lookup<'r, K: Eq + std::hash::Hash, V>(
    rows: &'r std::result::Result<HashMap<K, Vec<V>>, String>,
    key: &K,
    loader: &'static str,
) -> Result<&'r [V]> {
    match rows {
        Ok(map) => Ok(map.get(key).map(Vec::as_slice).unwrap_or(&[])),
        Err(reason) => Err(Error::BatchLoad {
            loader,
            reason: reason.clone(),
        }),
    }
}

/// Request-scoped batched resolver
///
/// One instance per inbound call. Holds no cache; only execution counters
/// survive between rounds.
pub struct BatchResolver {
    pool: SqlitePool,
    stats: Mutex<ResolverStats>,
}

impl BatchResolver {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            stats: Mutex::new(ResolverStats::default()),
        }
    }

    /// Start a resolution round
    pub fn plan(&self) -> LoadPlan {
        LoadPlan::new()
    }

    /// Execute every bulk query of a plan concurrently and join them all
    pub async fn execute(&self, plan: LoadPlan) -> Resolved {
        let batches = plan.batches.into_inner().unwrap_or_else(|e| e.into_inner());
        let executed = join_all(batches.into_values().map(|batch| batch.execute(&self.pool))).await;

        let mut resolved = Resolved::default();
        let mut totals = self.stats.lock().unwrap_or_else(|e| e.into_inner());
        for batch in executed {
            resolved.stats.record(batch.name, &batch.stats);
            totals.record(batch.name, &batch.stats);
            resolved.batches.insert(batch.type_id, batch.results);
        }
        resolved
    }

    /// Single-key round
    pub async fn load<L>(&self, loader: L, key: L::Key) -> Result<Vec<L::Value>>
    where
        L: BatchLoader,
        L::Value: Clone,
    {
        let plan = self.plan();
        let ticket = plan.load(loader, key);
        let resolved = self.execute(plan).await;
        Ok(resolved.get(&ticket)?.to_vec())
    }

    /// Many keys of one loader in one round, results in key order
    pub async fn load_many<L>(&self, loader: L, keys: Vec<L::Key>) -> Result<Vec<Vec<L::Value>>>
    where
        L: BatchLoader,
        L::Value: Clone,
    {
        let plan = self.plan();
        plan.load_all(loader, keys);
        let resolved = self.execute(plan).await;
        Ok(resolved
            .in_order::<L>()?
            .into_iter()
            .map(<[L::Value]>::to_vec)
            .collect())
    }

    /// Single search round
    pub async fn search<S>(&self, loader: S, owner: Uuid, query: S::Query) -> Result<Vec<S::Value>>
    where
        S: SearchLoader,
        S::Value: Clone,
    {
        let plan = self.plan();
        let ticket = plan.search(loader, owner, query);
        let resolved = self.execute(plan).await;
        Ok(resolved.search(&ticket)?.to_vec())
    }

    /// Counters accumulated over every round of this resolver
    pub fn stats(&self) -> ResolverStats {
        self.stats.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_distinct_in_order_keeps_first_occurrence() {
        assert_eq!(distinct_in_order(&[3, 1, 3, 2, 1]), vec![3, 1, 2]);
        assert!(distinct_in_order::<u8>(&[]).is_empty());
    }

    #[test]
    fn test_group_rows_preserves_row_order_per_key() {
        let grouped = group_rows(vec![(1, "a"), (2, "b"), (1, "c")]);
        assert_eq!(grouped[&1], vec!["a", "c"]);
        assert_eq!(grouped[&2], vec!["b"]);
    }

    #[test]
    fn test_lookup_miss_is_empty_and_failure_is_batch_error() {
        let ok: std::result::Result<HashMap<u8, Vec<u8>>, String> = Ok(HashMap::new());
        assert!(lookup(&ok, &1, "test").unwrap().is_empty());

        let failed: std::result::Result<HashMap<u8, Vec<u8>>, String> = Err("boom".to_string());
        match lookup(&failed, &1, "test") {
            Err(Error::BatchLoad { loader, reason }) => {
                assert_eq!(loader, "test");
                assert_eq!(reason, "boom");
            }
            other => panic!("expected BatchLoad, got {:?}", other.map(|v| v.len())),
        }
    }
}
