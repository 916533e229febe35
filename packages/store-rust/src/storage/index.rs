//! In-memory ordered indexes from key values to record positions.
//!
//! One [`IndexSet`] belongs to each indexed store. It holds a `BTreeMap` per
//! declared index name; each key maps to the positions of the records that
//! carry it, in write order. Nothing here is persisted: indexes are rebuilt
//! from scratch whenever a store is created.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;
use verdant_core::{IndexKey, IndexKind, Position};

use crate::error::{StoreError, StoreResult};

/// One named index.
#[derive(Debug, Default)]
struct KeyIndex {
    entries: BTreeMap<IndexKey, Vec<Position>>,
    /// Kinds of the keys present. Usually a single kind.
    kinds: Vec<IndexKind>,
    len: usize,
}

impl KeyIndex {
    fn insert(&mut self, key: IndexKey, position: Position) {
        let kind = key.kind();
        if !self.kinds.contains(&kind) {
            self.kinds.push(kind);
        }
        self.entries.entry(key).or_default().push(position);
        self.len += 1;
    }

    fn accepts(&self, kind: IndexKind) -> bool {
        self.kinds.contains(&kind)
    }

    /// Positions in descending key order; equal keys keep write order.
    fn descending(&self) -> impl Iterator<Item = Position> + '_ {
        self.entries
            .iter()
            .rev()
            .flat_map(|(_, positions)| positions.iter().copied())
    }
}

/// All indexes of one store, keyed by index name.
#[derive(Debug)]
pub(crate) struct IndexSet {
    primary: &'static str,
    indexes: BTreeMap<&'static str, KeyIndex>,
}

impl IndexSet {
    /// Creates empty indexes for `primary` and every name in `secondary`.
    pub(crate) fn new(
        primary: &'static str,
        secondary: impl IntoIterator<Item = &'static str>,
    ) -> Self {
        let mut indexes = BTreeMap::new();
        indexes.insert(primary, KeyIndex::default());
        for name in secondary {
            indexes.entry(name).or_insert_with(KeyIndex::default);
        }
        Self { primary, indexes }
    }

    /// Adds `position` under `key` in index `name`. Undeclared names are ignored.
    pub(crate) fn insert(&mut self, name: &str, key: IndexKey, position: Position) {
        if let Some(index) = self.indexes.get_mut(name) {
            index.insert(key, position);
        }
    }

    /// Number of positions held by index `name`.
    #[cfg(test)]
    pub(crate) fn len(&self, name: &str) -> usize {
        self.indexes.get(name).map_or(0, |index| index.len)
    }

    /// Drops every entry, keeping the declared names.
    pub(crate) fn clear(&mut self) {
        for index in self.indexes.values_mut() {
            *index = KeyIndex::default();
        }
    }

    /// Positions for page `page_number` of index `name` (primary if `None`).
    ///
    /// Keys are walked in descending order; the first `page_number * page_size`
    /// positions are skipped and the next `page_size` returned.
    pub(crate) fn page(
        &self,
        name: Option<&str>,
        page_number: u32,
        page_size: u32,
    ) -> StoreResult<Vec<Position>> {
        if page_size == 0 {
            return Err(StoreError::InvalidArgument(
                "page size must be greater than zero".to_string(),
            ));
        }
        let index = self.named(name.unwrap_or(self.primary))?;
        let skip = (page_number as usize).saturating_mul(page_size as usize);
        Ok(index.descending().skip(skip).take(page_size as usize).collect())
    }

    /// Up to `limit` positions whose key in index `name` equals `value`.
    ///
    /// An empty index, or one that holds no keys of `value`'s kind, yields an
    /// empty result rather than an error.
    pub(crate) fn find(
        &self,
        name: &str,
        value: &IndexKey,
        limit: usize,
    ) -> StoreResult<Vec<Position>> {
        check_limit(limit)?;
        let index = self.named(name)?;
        if index.len == 0 {
            return Ok(Vec::new());
        }
        if !index.accepts(value.kind()) {
            debug!(
                index = name,
                lookup_kind = %value.kind(),
                "lookup value type does not match index keys"
            );
            return Ok(Vec::new());
        }
        Ok(index
            .entries
            .get(value)
            .map(|positions| positions.iter().take(limit).copied().collect())
            .unwrap_or_default())
    }

    /// Up to `limit` positions matching `value` in any index.
    ///
    /// Scans every index, so it costs one lookup per declared index. A record
    /// matched through several indexes is returned once.
    pub(crate) fn find_any(&self, value: &IndexKey, limit: usize) -> StoreResult<Vec<Position>> {
        check_limit(limit)?;
        let mut seen = HashSet::new();
        let mut found = Vec::new();

        for (name, index) in &self.indexes {
            if !index.accepts(value.kind()) {
                continue;
            }
            let Some(positions) = index.entries.get(value) else {
                continue;
            };
            debug!(index = *name, matches = positions.len(), "find_any hit");
            for position in positions {
                if seen.insert(*position) {
                    found.push(*position);
                    if found.len() == limit {
                        return Ok(found);
                    }
                }
            }
        }
        Ok(found)
    }

    fn named(&self, name: &str) -> StoreResult<&KeyIndex> {
        self.indexes.get(name).ok_or_else(|| StoreError::IndexNotFound {
            index: name.to_string(),
        })
    }
}

fn check_limit(limit: usize) -> StoreResult<()> {
    if limit == 0 {
        return Err(StoreError::InvalidArgument(
            "limit must be greater than zero".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn pos(n: u64) -> Position {
        Position {
            offset: n * 10,
            length: 10,
        }
    }

    /// Builds a set where record `i` has primary key `i` and fitness `fitness[i]`.
    fn build(fitness: &[i64]) -> IndexSet {
        let mut set = IndexSet::new("id", ["fitness"]);
        for (i, f) in fitness.iter().enumerate() {
            let p = pos(i as u64);
            set.insert("id", IndexKey::from(i as i64), p);
            set.insert("fitness", IndexKey::from(*f), p);
        }
        set
    }

    #[test]
    fn page_walks_keys_descending() {
        let set = build(&[5, 1, 9]);
        let page = set.page(Some("fitness"), 0, 3).unwrap();
        assert_eq!(page, vec![pos(2), pos(0), pos(1)]);
    }

    #[test]
    fn page_defaults_to_primary() {
        let set = build(&[5, 1, 9]);
        assert_eq!(set.page(None, 0, 2).unwrap(), vec![pos(2), pos(1)]);
        assert_eq!(set.page(None, 1, 2).unwrap(), vec![pos(0)]);
        assert!(set.page(None, 2, 2).unwrap().is_empty());
    }

    #[test]
    fn equal_keys_keep_write_order() {
        let set = build(&[3, 3, 3]);
        let page = set.page(Some("fitness"), 0, 3).unwrap();
        assert_eq!(page, vec![pos(0), pos(1), pos(2)]);
    }

    #[test]
    fn zero_page_size_is_invalid() {
        let set = build(&[1]);
        assert!(matches!(
            set.page(None, 0, 0),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn unknown_index_is_error() {
        let set = build(&[1]);
        assert!(matches!(
            set.page(Some("height"), 0, 1),
            Err(StoreError::IndexNotFound { index }) if index == "height"
        ));
        assert!(matches!(
            set.find("height", &IndexKey::from(1), 1),
            Err(StoreError::IndexNotFound { .. })
        ));
    }

    #[test]
    fn find_respects_limit_and_order() {
        let set = build(&[7, 2, 7, 7]);
        let hits = set.find("fitness", &IndexKey::from(7), 2).unwrap();
        assert_eq!(hits, vec![pos(0), pos(2)]);
    }

    #[test]
    fn find_type_mismatch_is_empty() {
        let set = build(&[7]);
        let hits = set.find("fitness", &IndexKey::from("7"), 5).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn find_on_empty_index_is_empty() {
        let set = IndexSet::new("id", ["fitness"]);
        assert!(set.find("fitness", &IndexKey::from(1), 1).unwrap().is_empty());
    }

    #[test]
    fn find_zero_limit_is_invalid() {
        let set = build(&[1]);
        assert!(matches!(
            set.find("fitness", &IndexKey::from(1), 0),
            Err(StoreError::InvalidArgument(_))
        ));
    }

    #[test]
    fn find_any_deduplicates_across_indexes() {
        // Record 1 has id 1 and fitness 1: it matches in both indexes.
        let set = build(&[4, 1, 1]);
        let hits = set.find_any(&IndexKey::from(1), 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.contains(&pos(1)));
        assert!(hits.contains(&pos(2)));
    }

    #[test]
    fn find_any_stops_at_limit() {
        let set = build(&[1, 1, 1, 1]);
        assert_eq!(set.find_any(&IndexKey::from(1), 3).unwrap().len(), 3);
    }

    #[test]
    fn clear_keeps_declared_names() {
        let mut set = build(&[1, 2]);
        set.clear();
        assert_eq!(set.len("fitness"), 0);
        assert!(set.page(Some("fitness"), 0, 1).unwrap().is_empty());
    }

    #[test]
    fn shared_index_name_collects_both_fields() {
        let mut set = IndexSet::new("id", ["default", "default"]);
        set.insert("default", IndexKey::from("a"), pos(0));
        set.insert("default", IndexKey::from("b"), pos(1));
        assert_eq!(set.len("default"), 2);
    }

    proptest! {
        #[test]
        fn adjacent_pages_concatenate(fitness in prop::collection::vec(-50i64..50, 1..60), k in 1u32..20) {
            let set = build(&fitness);
            let mut joined = set.page(Some("fitness"), 0, k).unwrap();
            joined.extend(set.page(Some("fitness"), 1, k).unwrap());
            prop_assert_eq!(joined, set.page(Some("fitness"), 0, 2 * k).unwrap());
        }

        #[test]
        fn distinct_primary_keys_come_back_descending(n in 1usize..80) {
            let set = build(&vec![0; n]);
            let page = set.page(None, 0, u32::try_from(n).unwrap()).unwrap();
            let expected: Vec<Position> = (0..n as u64).rev().map(pos).collect();
            prop_assert_eq!(page, expected);
        }

        #[test]
        fn find_returns_only_equal_keys(fitness in prop::collection::vec(0i64..5, 1..40), probe in 0i64..5, limit in 1usize..10) {
            let set = build(&fitness);
            let hits = set.find("fitness", &IndexKey::from(probe), limit).unwrap();
            prop_assert!(hits.len() <= limit);
            for hit in hits {
                let i = usize::try_from(hit.offset / 10).unwrap();
                prop_assert_eq!(fitness[i], probe);
            }
        }
    }
}
