//! Process-wide registry sharing between connections to the same server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError, Weak};

use super::registry::{FormatSettings, TypeRegistry};

/// Identifies servers whose catalogs can be assumed identical.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RegistryKey {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub server_version: String,
    pub client_encoding: String,
}

/// Hands out one live [`TypeRegistry`] per [`RegistryKey`].
///
/// Entries are weak: a registry lives as long as some connection uses it.
#[derive(Debug, Default)]
pub struct SharedRegistryCache {
    entries: Mutex<HashMap<RegistryKey, Weak<TypeRegistry>>>,
}

impl SharedRegistryCache {
    pub fn global() -> &'static SharedRegistryCache {
        static GLOBAL: OnceLock<SharedRegistryCache> = OnceLock::new();
        GLOBAL.get_or_init(SharedRegistryCache::default)
    }

    /// The shared registry for `key`, created with `settings` if none is alive.
    ///
    /// A live registry whose settings differ is not returned; the caller gets
    /// a private one instead and the shared entry is left alone.
    pub fn get_or_create(&self, key: RegistryKey, settings: FormatSettings) -> Arc<TypeRegistry> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, weak| weak.strong_count() > 0);
        if let Some(existing) = entries.get(&key).and_then(Weak::upgrade) {
            if *existing.settings() == settings {
                tracing::debug!(host = %key.host, database = %key.database, "reusing type registry");
                return existing;
            }
            return Arc::new(existing.fork(settings));
        }
        let registry = Arc::new(TypeRegistry::new(settings));
        entries.insert(key, Arc::downgrade(&registry));
        registry
    }

    pub fn len(&self) -> usize {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.retain(|_, weak| weak.strong_count() > 0);
        entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Swap in a private copy when a ParameterStatus changes formatting.
///
/// Returns true if the registry was replaced.
pub fn diverge(registry: &mut Arc<TypeRegistry>, name: &str, value: &str) -> bool {
    let mut settings = registry.settings().clone();
    if !settings.apply(name, value) {
        return false;
    }
    tracing::debug!(name, value, "formatting setting changed; forking type registry");
    *registry = Arc::new(registry.fork(settings));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::types::oid;
    use crate::types::registry::TypeDescriptor;

    fn key(db: &str) -> RegistryKey {
        RegistryKey {
            host: "localhost".into(),
            port: 5432,
            database: db.into(),
            server_version: "16.2".into(),
            client_encoding: "UTF8".into(),
        }
    }

    #[test]
    fn test_same_key_shares() {
        let cache = SharedRegistryCache::default();
        let a = cache.get_or_create(key("app"), FormatSettings::default());
        let b = cache.get_or_create(key("app"), FormatSettings::default());
        assert!(Arc::ptr_eq(&a, &b));
        let c = cache.get_or_create(key("other"), FormatSettings::default());
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_registrations_are_visible_to_sharers() {
        let cache = SharedRegistryCache::default();
        let a = cache.get_or_create(key("app"), FormatSettings::default());
        let b = cache.get_or_create(key("app"), FormatSettings::default());
        a.register(TypeDescriptor::enumeration(77_000, "mood"));
        assert!(b.lookup(77_000).is_some());
    }

    #[test]
    fn test_dead_entries_pruned() {
        let cache = SharedRegistryCache::default();
        let a = cache.get_or_create(key("app"), FormatSettings::default());
        drop(a);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_divergence_forks() {
        let cache = SharedRegistryCache::default();
        let shared = cache.get_or_create(key("app"), FormatSettings::default());
        let mut mine = Arc::clone(&shared);
        assert!(!diverge(&mut mine, "DateStyle", "ISO, MDY"));
        assert!(Arc::ptr_eq(&mine, &shared));
        assert!(diverge(&mut mine, "IntervalStyle", "iso_8601"));
        assert!(!Arc::ptr_eq(&mine, &shared));
        assert_eq!(shared.settings().interval_style, "postgres");
        assert!(mine.lookup(oid::INT4).is_some());
    }
}
