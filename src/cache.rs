//! Per-connection prepared statement cache.

use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;

use crate::statement::PreparedStatement;

/// LRU map from rewritten SQL text to a named server-side statement.
///
/// Evicted entries are handed back to the caller, which owns closing them
/// on the server.
#[derive(Debug)]
pub struct StatementCache {
    entries: Option<LruCache<String, Arc<PreparedStatement>>>,
    counter: u64,
}

impl StatementCache {
    /// A capacity of 0 disables caching; every execution then parses an
    /// unnamed statement.
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: NonZeroUsize::new(capacity).map(LruCache::new),
            counter: 0,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.entries.is_some()
    }

    /// Look up `sql`, marking it most recently used.
    pub fn get(&mut self, sql: &str) -> Option<Arc<PreparedStatement>> {
        self.entries.as_mut()?.get(sql).cloned()
    }

    /// True when `sql` has an entry. Recency is left untouched.
    pub fn contains(&self, sql: &str) -> bool {
        self.entries.as_ref().is_some_and(|entries| entries.contains(sql))
    }

    /// Next server-side statement name.
    pub fn next_name(&mut self) -> String {
        self.counter += 1;
        format!("_ngs_{}", self.counter)
    }

    /// Insert a statement. Returns the entry pushed out to make room (or
    /// replaced under the same key), which must be closed on the server.
    pub fn insert(
        &mut self,
        sql: String,
        stmt: Arc<PreparedStatement>,
    ) -> Option<Arc<PreparedStatement>> {
        let entries = self.entries.as_mut()?;
        entries
            .push(sql, stmt)
            .map(|(_, evicted)| evicted)
    }

    pub fn remove(&mut self, sql: &str) -> Option<Arc<PreparedStatement>> {
        self.entries.as_mut()?.pop(sql)
    }

    pub fn len(&self) -> usize {
        self.entries.as_ref().map_or(0, LruCache::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every entry, returning them for closing.
    pub fn clear(&mut self) -> Vec<Arc<PreparedStatement>> {
        match self.entries.as_mut() {
            Some(entries) => {
                let mut drained = Vec::with_capacity(entries.len());
                while let Some((_, stmt)) = entries.pop_lru() {
                    drained.push(stmt);
                }
                drained
            }
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stmt(cache: &mut StatementCache, sql: &str) -> Arc<PreparedStatement> {
        Arc::new(PreparedStatement::new(
            cache.next_name(),
            sql.to_owned(),
            Vec::new(),
            Vec::new(),
        ))
    }

    #[test]
    fn test_hit_and_eviction_order() {
        let mut cache = StatementCache::new(2);
        let a = stmt(&mut cache, "a");
        let b = stmt(&mut cache, "b");
        assert!(cache.insert("a".into(), a).is_none());
        assert!(cache.insert("b".into(), b).is_none());

        // touching "a" makes "b" the eviction candidate
        assert_eq!(cache.get("a").unwrap().name(), "_ngs_1");
        let c = stmt(&mut cache, "c");
        let evicted = cache.insert("c".into(), c).unwrap();
        assert_eq!(evicted.sql(), "b");
        assert!(cache.get("b").is_none());
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_contains_keeps_recency() {
        let mut cache = StatementCache::new(2);
        let a = stmt(&mut cache, "a");
        let b = stmt(&mut cache, "b");
        cache.insert("a".into(), a);
        cache.insert("b".into(), b);
        assert!(cache.contains("a"));
        assert!(!cache.contains("z"));

        // "a" stays least recently used
        let c = stmt(&mut cache, "c");
        assert_eq!(cache.insert("c".into(), c).unwrap().sql(), "a");
        assert!(!StatementCache::new(0).contains("a"));
    }

    #[test]
    fn test_replace_returns_old_entry() {
        let mut cache = StatementCache::new(4);
        let first = stmt(&mut cache, "q");
        let second = stmt(&mut cache, "q");
        cache.insert("q".into(), first);
        let old = cache.insert("q".into(), second).unwrap();
        assert_eq!(old.name(), "_ngs_1");
        assert_eq!(cache.get("q").unwrap().name(), "_ngs_2");
    }

    #[test]
    fn test_disabled_cache() {
        let mut cache = StatementCache::new(0);
        assert!(!cache.is_enabled());
        let s = stmt(&mut cache, "x");
        assert!(cache.insert("x".into(), s).is_none());
        assert!(cache.get("x").is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_clear_drains_everything() {
        let mut cache = StatementCache::new(3);
        for sql in ["a", "b"] {
            let s = stmt(&mut cache, sql);
            cache.insert(sql.into(), s);
        }
        assert_eq!(cache.clear().len(), 2);
        assert!(cache.remove("a").is_none());
    }
}
