//! Closed address intervals and disjoint interval sets.

use std::collections::BTreeMap;
use std::fmt;

use crate::address::Address;

/// Closed interval `[start, end]` of defined addresses, `start <= end`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct AddressRange {
    start: Address,
    end: Address,
}

impl AddressRange {
    /// Create a range. Both endpoints must be defined and ordered.
    pub fn new(start: Address, end: Address) -> Self {
        assert!(start.is_defined() && end.is_defined() && start <= end);
        Self { start, end }
    }

    /// Create a range, rejecting undefined or inverted endpoints.
    pub fn try_new(start: Address, end: Address) -> Option<Self> {
        if start.is_defined() && end.is_defined() && start <= end {
            Some(Self { start, end })
        } else {
            None
        }
    }

    pub fn start(&self) -> Address {
        self.start
    }

    pub fn end(&self) -> Address {
        self.end
    }

    /// Number of addresses covered, `end - start + 1`.
    pub fn size(&self) -> u64 {
        self.end.value() - self.start.value() + 1
    }

    pub fn contains(&self, addr: Address) -> bool {
        addr.is_defined() && self.start <= addr && addr <= self.end
    }
}

impl fmt::Display for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

impl fmt::Debug for AddressRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Set of disjoint `AddressRange`s in ascending order.
///
/// Insertion merges adjacent and overlapping ranges; removal trims or splits
/// the ranges it intersects.
#[derive(Clone, Default, Debug)]
pub struct RangeSet {
    /// start -> end, both inclusive.
    ranges: BTreeMap<u64, u64>,
}

impl RangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    /// Insert a range, merging with any range it overlaps or touches.
    pub fn insert(&mut self, r: AddressRange) {
        let mut start = r.start().value();
        let mut end = r.end().value();

        // Candidates begin at or before end + 1; of those, absorb every range
        // that reaches start - 1 or further.
        let upper = end.saturating_add(1);
        let absorbed: Vec<u64> = self
            .ranges
            .range(..=upper)
            .filter(|(_, &e)| e.saturating_add(1) >= start)
            .map(|(&s, _)| s)
            .collect();

        for s in absorbed {
            let e = self.ranges.remove(&s).unwrap();
            start = start.min(s);
            end = end.max(e);
        }

        self.ranges.insert(start, end);
        self.debug_verify();
    }

    /// Remove a range. Ranges partially covered are trimmed; a range strictly
    /// containing `r` is split into two.
    pub fn remove(&mut self, r: AddressRange) {
        let start = r.start().value();
        let end = r.end().value();

        let affected: Vec<(u64, u64)> = self
            .ranges
            .range(..=end)
            .filter(|(_, &e)| e >= start)
            .map(|(&s, &e)| (s, e))
            .collect();

        for (s, e) in affected {
            self.ranges.remove(&s);
            if s < start {
                self.ranges.insert(s, start - 1);
            }
            if e > end {
                self.ranges.insert(end + 1, e);
            }
        }
        self.debug_verify();
    }

    /// The range enclosing `addr`, if any.
    pub fn get(&self, addr: Address) -> Option<AddressRange> {
        if addr.is_undefined() {
            return None;
        }
        let a = addr.value();
        self.ranges
            .range(..=a)
            .next_back()
            .filter(|(_, &e)| e >= a)
            .map(|(&s, &e)| AddressRange::new(Address::new(s), Address::new(e)))
    }

    /// Iterate ranges in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = AddressRange> + '_ {
        self.ranges
            .iter()
            .map(|(&s, &e)| AddressRange::new(Address::new(s), Address::new(e)))
    }

    /// Re-check disjointness and ordering after mutations (debug builds).
    fn debug_verify(&self) {
        if cfg!(debug_assertions) {
            let mut prev_end: Option<u64> = None;
            for (&s, &e) in &self.ranges {
                debug_assert!(s <= e);
                if let Some(pe) = prev_end {
                    debug_assert!(pe < s, "ranges overlap or touch out of order");
                }
                prev_end = Some(e);
            }
        }
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for r in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{r}")?;
            first = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn r(start: u64, end: u64) -> AddressRange {
        AddressRange::new(Address::new(start), Address::new(end))
    }

    #[test]
    fn test_range_size() {
        assert_eq!(r(0x1000, 0x1004).size(), 5);
        assert_eq!(r(0x1000, 0x1000).size(), 1);
    }

    #[test]
    fn test_try_new_rejects_bad_ranges() {
        assert!(AddressRange::try_new(Address::new(0x2000), Address::new(0x1000)).is_none());
        assert!(AddressRange::try_new(Address::UNDEFINED, Address::new(0x1000)).is_none());
        assert!(AddressRange::try_new(Address::new(0x1000), Address::new(0x1000)).is_some());
    }

    #[test]
    fn test_insert_merges_adjacent() {
        let mut set = RangeSet::new();
        set.insert(r(0x1000, 0x10ff));
        set.insert(r(0x1100, 0x11ff));
        assert_eq!(set.len(), 1);
        assert_eq!(set.get(Address::new(0x1180)), Some(r(0x1000, 0x11ff)));
    }

    #[test]
    fn test_insert_merges_overlapping() {
        let mut set = RangeSet::new();
        set.insert(r(0x1000, 0x2000));
        set.insert(r(0x1800, 0x2800));
        set.insert(r(0x3000, 0x4000));
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(Address::new(0x2400)), Some(r(0x1000, 0x2800)));
    }

    #[test]
    fn test_remove_splits() {
        let mut set = RangeSet::new();
        set.insert(r(0x1000, 0x2000));
        set.remove(r(0x1400, 0x14ff));
        assert_eq!(set.len(), 2);
        assert_eq!(set.get(Address::new(0x1400)), None);
        assert_eq!(set.get(Address::new(0x14ff)), None);
        assert_eq!(set.get(Address::new(0x13ff)), Some(r(0x1000, 0x13ff)));
        assert_eq!(set.get(Address::new(0x1500)), Some(r(0x1500, 0x2000)));
    }

    #[test]
    fn test_remove_trims_ends() {
        let mut set = RangeSet::new();
        set.insert(r(0x1000, 0x2000));
        set.remove(r(0x0800, 0x10ff));
        set.remove(r(0x1f00, 0x2800));
        assert_eq!(set.get(Address::new(0x1100)), Some(r(0x1100, 0x1eff)));
    }

    #[test]
    fn test_remove_covers_whole() {
        let mut set = RangeSet::new();
        set.insert(r(0x1000, 0x1fff));
        set.remove(r(0x1000, 0x1fff));
        assert!(set.is_empty());
    }

    #[test]
    fn test_get_after_remove_never_returns_removed() {
        let mut set = RangeSet::new();
        set.insert(r(0x1000, 0x1004));
        set.remove(r(0x1000, 0x1002));
        for a in 0x1000..=0x1002u64 {
            assert_eq!(set.get(Address::new(a)), None);
        }
        assert!(set.get(Address::new(0x1003)).is_some());
    }

    #[test]
    fn test_get_undefined() {
        let mut set = RangeSet::new();
        set.insert(r(0x1000, 0x2000));
        assert_eq!(set.get(Address::UNDEFINED), None);
    }
}
