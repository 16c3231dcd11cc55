//! Plans the catalog queries that teach the type registry about OIDs it
//! has not seen, such as enums, domains, composites and their arrays.
//!
//! Each round looks up the pending OIDs in `pg_type`, then the attributes
//! of any composites among them. Loading may reveal further unknown OIDs
//! (element types, domain bases, range subtypes, attribute types), which
//! become the next round.

use crate::error::{Error, Result};
use crate::protocol::types::Oid;
use crate::types::TypeRegistry;
use crate::types::registry::{
    CatalogAttribute, CatalogType, catalog_attribute_query, catalog_type_query,
};

/// Upper bound on nested lookups for one refresh.
pub const MAX_ROUNDS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InFlight {
    Types,
    Attributes,
}

#[derive(Debug)]
pub struct CatalogRefresh {
    pending: Vec<Oid>,
    composites: Vec<CatalogType>,
    in_flight: Option<InFlight>,
    rounds: usize,
}

impl CatalogRefresh {
    pub fn new(mut missing: Vec<Oid>) -> Self {
        missing.sort_unstable();
        missing.dedup();
        missing.retain(|oid| *oid != 0);
        Self {
            pending: missing,
            composites: Vec::new(),
            in_flight: None,
            rounds: 0,
        }
    }

    /// The next query to run as a simple query, or `None` when done.
    pub fn next_query(&mut self) -> Option<String> {
        if !self.composites.is_empty() {
            let relids: Vec<Oid> = self.composites.iter().map(|t| t.relid).collect();
            self.in_flight = Some(InFlight::Attributes);
            return Some(catalog_attribute_query(&relids));
        }
        if self.pending.is_empty() || self.rounds >= MAX_ROUNDS {
            return None;
        }
        self.rounds += 1;
        self.in_flight = Some(InFlight::Types);
        tracing::debug!(round = self.rounds, oids = ?self.pending, "refreshing type catalog");
        Some(catalog_type_query(&self.pending))
    }

    /// Feed the text rows returned for the last query.
    pub fn ingest(&mut self, registry: &TypeRegistry, rows: &[Vec<Option<String>>]) -> Result<()> {
        let rows: Vec<Vec<Option<&str>>> = rows
            .iter()
            .map(|r| r.iter().map(Option::as_deref).collect())
            .collect();
        match self.in_flight.take() {
            Some(InFlight::Types) => {
                let types = rows
                    .iter()
                    .map(|r| CatalogType::from_text_row(r))
                    .collect::<Result<Vec<_>>>()?;
                self.pending.clear();
                let (composites, others): (Vec<_>, Vec<_>) =
                    types.into_iter().partition(|t| t.kind == 'c');
                self.load(registry, &others, &[]);
                self.composites = composites;
                Ok(())
            }
            Some(InFlight::Attributes) => {
                let attrs = rows
                    .iter()
                    .map(|r| CatalogAttribute::from_text_row(r))
                    .collect::<Result<Vec<_>>>()?;
                let composites = std::mem::take(&mut self.composites);
                self.load(registry, &composites, &attrs);
                Ok(())
            }
            None => Err(Error::Protocol("no catalog query in flight".into())),
        }
    }

    fn load(&mut self, registry: &TypeRegistry, types: &[CatalogType], attrs: &[CatalogAttribute]) {
        let mut referenced = registry.load_catalog_rows(types, attrs);
        self.pending.append(&mut referenced);
        self.pending.sort_unstable();
        self.pending.dedup();
    }

    /// True when every referenced OID has been loaded.
    pub fn is_complete(&self) -> bool {
        self.pending.is_empty() && self.composites.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(values: &[&str]) -> Vec<Option<String>> {
        values.iter().map(|v| Some(v.to_string())).collect()
    }

    #[test]
    fn test_enum_array_takes_two_rounds() {
        let registry = TypeRegistry::default();
        let mut refresh = CatalogRefresh::new(vec![90001]);

        let q = refresh.next_query().unwrap();
        assert!(q.contains("IN (90001)"));
        refresh
            .ingest(&registry, &[row(&["90001", "_mood", "b", "A", "90000", "0", ",", "0", "0"])])
            .unwrap();
        assert!(!refresh.is_complete());

        let q = refresh.next_query().unwrap();
        assert!(q.contains("IN (90000)"));
        refresh
            .ingest(&registry, &[row(&["90000", "mood", "e", "E", "0", "0", ",", "0", "0"])])
            .unwrap();
        assert!(refresh.is_complete());
        assert!(refresh.next_query().is_none());
        assert!(registry.contains(90000) && registry.contains(90001));
    }

    #[test]
    fn test_composite_fetches_attributes() {
        let registry = TypeRegistry::default();
        let mut refresh = CatalogRefresh::new(vec![70000]);
        refresh.next_query().unwrap();
        refresh
            .ingest(&registry, &[row(&["70000", "pair", "c", "C", "0", "0", ",", "70001", "0"])])
            .unwrap();
        assert!(!registry.contains(70000));

        let q = refresh.next_query().unwrap();
        assert!(q.contains("pg_attribute") && q.contains("70001"));
        refresh
            .ingest(&registry, &[row(&["70001", "a", "23"]), row(&["70001", "b", "25"])])
            .unwrap();
        assert!(registry.contains(70000));
        assert!(refresh.is_complete());
    }

    #[test]
    fn test_round_limit() {
        let registry = TypeRegistry::default();
        let mut refresh = CatalogRefresh::new(vec![1]);
        for i in 0..MAX_ROUNDS {
            refresh.next_query().unwrap();
            // each domain points at another unknown base
            let oid = (100_000 + i).to_string();
            let base = (100_001 + i).to_string();
            refresh
                .ingest(&registry, &[row(&[&oid, "d", "d", "U", "0", &base, ",", "0", "0"])])
                .unwrap();
        }
        assert!(refresh.next_query().is_none());
        assert!(!refresh.is_complete());
    }

    #[test]
    fn test_ingest_without_query() {
        let mut refresh = CatalogRefresh::new(vec![5]);
        assert!(refresh.ingest(&TypeRegistry::default(), &[]).is_err());
    }
}
