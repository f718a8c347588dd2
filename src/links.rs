//! Link Integrity - reconstructing each page's chain of records
//!
//! Records are held in an arena keyed by uuid; the walk follows `follows`
//! back from the current record and is bounded by the arena size.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::pagedata::PageData;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    pub first: String,
    pub last: String,
    /// uuids in chronological order
    pub sequence: Vec<String>,
    pub is_linked: bool,
}

/// uuid -> follows, for every record attached to one page.
pub struct ChainIndex<'a> {
    follows: HashMap<&'a str, &'a str>,
}

impl<'a> ChainIndex<'a> {
    pub fn new(data: &'a PageData) -> Self {
        let follows = data
            .records()
            .map(|d| (d.uuid.as_str(), d.follows.as_str()))
            .collect();
        Self { follows }
    }

    pub fn len(&self) -> usize {
        self.follows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.follows.is_empty()
    }

    /// Walk back from `start`, stopping at an empty or unknown predecessor
    /// or on revisiting a uuid. Returned oldest first.
    pub fn walk(&self, start: &'a str) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut chain = Vec::new();
        let mut at = start;
        while !at.is_empty() && chain.len() < self.follows.len() {
            let Some(&prev) = self.follows.get(at) else { break };
            if !seen.insert(at) {
                break;
            }
            chain.push(at.to_string());
            at = prev;
        }
        chain.reverse();
        chain
    }
}

pub fn link(data: &PageData) -> Link {
    let index = ChainIndex::new(data);
    let sequence = index.walk(&data.current.uuid);
    Link {
        first: sequence.first().cloned().unwrap_or_default(),
        last: sequence.last().cloned().unwrap_or_default(),
        is_linked: !sequence.is_empty() && sequence.len() == index.len(),
        sequence,
    }
}

/// Check every page. Never fails; broken chains come back with
/// `is_linked == false`.
pub fn check(pages: &BTreeMap<u32, PageData>) -> BTreeMap<u32, Link> {
    pages
        .iter()
        .map(|(&page, data)| {
            let result = link(data);
            if !result.is_linked {
                tracing::warn!(
                    page,
                    linked = result.sequence.len(),
                    records = data.record_count(),
                    "page history is not one unbroken chain"
                );
            }
            (page, result)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pagedata::PageDetail;

    fn record(uuid: &str, follows: &str) -> PageDetail {
        PageDetail { uuid: uuid.into(), follows: follows.into(), ..Default::default() }
    }

    #[test]
    fn test_single_record_is_linked() {
        let data = PageData::new(record("a", ""));
        let l = link(&data);
        assert!(l.is_linked);
        assert_eq!(l.first, "a");
        assert_eq!(l.last, "a");
    }

    #[test]
    fn test_cycle_terminates() {
        let data = PageData { current: record("a", "b"), previous: vec![record("b", "a")] };
        let l = link(&data);
        assert_eq!(l.sequence, vec!["b", "a"]);
        // every record was reached, even though there is no root
        assert!(l.is_linked);
    }

    #[test]
    fn test_duplicate_branch_is_not_linked() {
        let data = PageData {
            current: record("c", "b"),
            previous: vec![record("a", ""), record("b", "a"), record("b2", "a")],
        };
        let l = link(&data);
        assert_eq!(l.sequence, vec!["a", "b", "c"]);
        assert!(!l.is_linked);
    }

    #[test]
    fn test_empty_identity_is_not_linked() {
        let l = link(&PageData::default());
        assert!(!l.is_linked);
        assert!(l.sequence.is_empty());
    }

    #[test]
    fn test_check_covers_every_page() {
        let mut pages = BTreeMap::new();
        pages.insert(1, PageData::new(record("a", "")));
        pages.insert(2, PageData { current: record("y", "x"), previous: vec![record("q", "")] });
        let links = check(&pages);
        assert!(links[&1].is_linked);
        assert!(!links[&2].is_linked);
    }
}
