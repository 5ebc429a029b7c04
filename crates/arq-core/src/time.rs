// SPDX-License-Identifier: MIT OR Apache-2.0
//! Time and causal semantics for persisted envelopes.

use std::collections::{BTreeMap, HashMap};

const DEFAULT_DOMAIN: &str = "default";

/// Per-domain monotonic sequence generator.
///
/// Domains are isolated: each tenant gets its own counter starting at 1.
/// Callers needing cross-task sharing wrap this in a mutex; the generator
/// itself is plain state.
///
/// # Examples
///
/// ```
/// use arq_core::MonotonicSequenceGenerator;
///
/// let mut seq = MonotonicSequenceGenerator::default();
/// assert_eq!(seq.next("tenant-a"), 1);
/// assert_eq!(seq.next("tenant-a"), 2);
/// assert_eq!(seq.next("tenant-b"), 1);
/// assert_eq!(seq.current("tenant-a"), 2);
/// ```
#[derive(Debug, Default)]
pub struct MonotonicSequenceGenerator {
    counters: HashMap<String, u64>,
}

impl MonotonicSequenceGenerator {
    /// Advance and return the counter for `domain` (empty maps to `default`).
    pub fn next(&mut self, domain: &str) -> u64 {
        let key = if domain.is_empty() { DEFAULT_DOMAIN } else { domain };
        let counter = self.counters.entry(key.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    /// Current value for `domain` without advancing; 0 if never used.
    #[must_use]
    pub fn current(&self, domain: &str) -> u64 {
        let key = if domain.is_empty() { DEFAULT_DOMAIN } else { domain };
        self.counters.get(key).copied().unwrap_or(0)
    }
}

/// Component-wise maximum of two vector clocks.
#[must_use]
pub fn vector_clock_merge(
    left: &BTreeMap<String, u64>,
    right: &BTreeMap<String, u64>,
) -> BTreeMap<String, u64> {
    let mut merged = left.clone();
    for (node, &count) in right {
        merged
            .entry(node.clone())
            .and_modify(|existing| *existing = (*existing).max(count))
            .or_insert(count);
    }
    merged
}

/// Causal relation between two vector clocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockOrdering {
    /// Identical on every component.
    Equal,
    /// Left happened before right.
    Before,
    /// Left happened after right.
    After,
    /// Neither dominates.
    Concurrent,
}

impl ClockOrdering {
    /// Wire name of the relation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "equal",
            Self::Before => "before",
            Self::After => "after",
            Self::Concurrent => "concurrent",
        }
    }
}

/// Compare two vector clocks per the standard causal rules. Absent
/// components count as zero.
#[must_use]
pub fn vector_clock_compare(
    left: &BTreeMap<String, u64>,
    right: &BTreeMap<String, u64>,
) -> ClockOrdering {
    let mut left_lt = false;
    let mut right_lt = false;

    for node in left.keys().chain(right.keys()) {
        let l = left.get(node).copied().unwrap_or(0);
        let r = right.get(node).copied().unwrap_or(0);
        if l < r {
            left_lt = true;
        } else if l > r {
            right_lt = true;
        }
    }

    match (left_lt, right_lt) {
        (false, false) => ClockOrdering::Equal,
        (true, false) => ClockOrdering::Before,
        (false, true) => ClockOrdering::After,
        (true, true) => ClockOrdering::Concurrent,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock(entries: &[(&str, u64)]) -> BTreeMap<String, u64> {
        entries.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn sequence_increments_per_domain() {
        let mut seq = MonotonicSequenceGenerator::default();
        assert_eq!(seq.next("tenant-a"), 1);
        assert_eq!(seq.next("tenant-a"), 2);
        assert_eq!(seq.next("tenant-a"), 3);
        assert_eq!(seq.current("tenant-a"), 3);
    }

    #[test]
    fn sequence_domains_are_isolated() {
        let mut seq = MonotonicSequenceGenerator::default();
        assert_eq!(seq.next("tenant-a"), 1);
        assert_eq!(seq.next("tenant-b"), 1);
        assert_eq!(seq.next("tenant-a"), 2);
        assert_eq!(seq.current("tenant-b"), 1);
    }

    #[test]
    fn empty_domain_maps_to_default() {
        let mut seq = MonotonicSequenceGenerator::default();
        assert_eq!(seq.next(""), 1);
        assert_eq!(seq.current("default"), 1);
    }

    #[test]
    fn merge_takes_component_wise_max() {
        let merged = vector_clock_merge(&clock(&[("a", 1), ("b", 4)]), &clock(&[("a", 3), ("c", 2)]));
        assert_eq!(merged, clock(&[("a", 3), ("b", 4), ("c", 2)]));
    }

    #[test]
    fn compare_covers_all_relations() {
        assert_eq!(vector_clock_compare(&clock(&[("a", 1)]), &clock(&[("a", 1)])), ClockOrdering::Equal);
        assert_eq!(vector_clock_compare(&clock(&[("a", 1)]), &clock(&[("a", 2)])), ClockOrdering::Before);
        assert_eq!(vector_clock_compare(&clock(&[("a", 3)]), &clock(&[("a", 2)])), ClockOrdering::After);
        assert_eq!(
            vector_clock_compare(&clock(&[("a", 2), ("b", 1)]), &clock(&[("a", 1), ("b", 2)])),
            ClockOrdering::Concurrent
        );
    }

    #[test]
    fn empty_clocks_are_equal() {
        assert_eq!(
            vector_clock_compare(&BTreeMap::new(), &BTreeMap::new()),
            ClockOrdering::Equal
        );
    }
}
