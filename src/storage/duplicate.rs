//! Collapsing the versions of a key read from several units.
//!
//! Input tuples arrive oldest unit first. Resolvers keep that order stable
//! so the later of two equal versions wins.

use super::types::{Tuple, TupleStoreConfig, now_ms};

use std::collections::HashMap;

pub trait DuplicateResolver: Send + Sync {
    fn resolve(&self, tuples: Vec<Tuple>) -> Vec<Tuple>;
}

fn group_by_key(tuples: Vec<Tuple>) -> Vec<Vec<Tuple>> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: HashMap<String, Vec<Tuple>> = HashMap::new();

    for tuple in tuples {
        if !groups.contains_key(&tuple.key) {
            order.push(tuple.key.clone());
        }
        groups.entry(tuple.key.clone()).or_default().push(tuple);
    }

    order
        .into_iter()
        .filter_map(|key| groups.remove(&key))
        .collect()
}

/// Newest version per key; a newest tombstone hides the key.
pub struct NewestTupleResolver;

impl DuplicateResolver for NewestTupleResolver {
    fn resolve(&self, tuples: Vec<Tuple>) -> Vec<Tuple> {
        group_by_key(tuples)
            .into_iter()
            .filter_map(|versions| versions.into_iter().max_by_key(|t| t.version_timestamp))
            .filter(|t| !t.is_deleted())
            .collect()
    }
}

/// All distinct versions newer than the key's latest tombstone, newest first.
pub struct AllVersionsResolver;

impl DuplicateResolver for AllVersionsResolver {
    fn resolve(&self, tuples: Vec<Tuple>) -> Vec<Tuple> {
        let mut result = Vec::new();

        for mut versions in group_by_key(tuples) {
            let deleted_at = versions
                .iter()
                .filter(|t| t.is_deleted())
                .map(|t| t.version_timestamp)
                .max();

            versions.retain(|t| !t.is_deleted());
            if let Some(deleted_at) = deleted_at {
                versions.retain(|t| t.version_timestamp > deleted_at);
            }

            // Same version seen in two units (e.g. replayed log and segment)
            versions.sort_by(|a, b| b.version_timestamp.cmp(&a.version_timestamp));
            versions.dedup_by(|a, b| a.version_timestamp == b.version_timestamp && a.data == b.data);

            result.extend(versions);
        }

        result
    }
}

/// Keeps at most `versions` entries per key; expects newest-first input.
pub struct VersionLimitResolver {
    pub versions: usize,
}

impl DuplicateResolver for VersionLimitResolver {
    fn resolve(&self, tuples: Vec<Tuple>) -> Vec<Tuple> {
        group_by_key(tuples)
            .into_iter()
            .flat_map(|versions| versions.into_iter().take(self.versions))
            .collect()
    }
}

/// Drops versions older than `ttl_ms`.
pub struct TtlResolver {
    pub ttl_ms: u64,
}

impl DuplicateResolver for TtlResolver {
    fn resolve(&self, tuples: Vec<Tuple>) -> Vec<Tuple> {
        let cutoff = now_ms().saturating_sub(self.ttl_ms);
        tuples
            .into_iter()
            .filter(|t| t.version_timestamp >= cutoff)
            .collect()
    }
}

/// Applies resolvers in sequence.
pub struct ChainedResolver {
    resolvers: Vec<Box<dyn DuplicateResolver>>,
}

impl DuplicateResolver for ChainedResolver {
    fn resolve(&self, tuples: Vec<Tuple>) -> Vec<Tuple> {
        self.resolvers
            .iter()
            .fold(tuples, |acc, resolver| resolver.resolve(acc))
    }
}

/// Resolver selected by a table's configuration.
pub fn resolver_for(config: &TupleStoreConfig) -> Box<dyn DuplicateResolver> {
    let mut resolvers: Vec<Box<dyn DuplicateResolver>> = Vec::new();

    if config.allow_duplicates {
        resolvers.push(Box::new(AllVersionsResolver));
        if config.versions > 0 {
            resolvers.push(Box::new(VersionLimitResolver {
                versions: config.versions,
            }));
        }
    } else {
        resolvers.push(Box::new(NewestTupleResolver));
    }

    if config.ttl_ms > 0 {
        resolvers.push(Box::new(TtlResolver { ttl_ms: config.ttl_ms }));
    }

    if resolvers.len() == 1
        && let Some(single) = resolvers.pop()
    {
        return single;
    }

    Box::new(ChainedResolver { resolvers })
}
