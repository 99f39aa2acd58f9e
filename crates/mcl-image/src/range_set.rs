//! Disjoint sorted set of address ranges.

use std::collections::BTreeMap;
use std::fmt;

use crate::address::AddressRange;

/// A disjoint, sorted collection of half-open address ranges.
///
/// Insertion merges overlapping and adjacent ranges; removal punches
/// holes, splitting ranges where needed. No zero-size range ever
/// survives either operation. All lookups are logarithmic in the number
/// of stored ranges.
#[derive(Clone, Debug, Default)]
pub struct RangeSet {
    /// start -> end, disjoint and sorted by construction.
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

    /// Insert a range, merging with any overlapping or adjacent ranges.
    pub fn insert(&mut self, range: AddressRange) {
        if range.is_empty() {
            return;
        }

        let mut start = range.start;
        let mut end = range.end;

        // A range starting before us may swallow or touch our start.
        if let Some((&s, &e)) = self.ranges.range(..=start).next_back() {
            if e >= start {
                start = s;
                end = end.max(e);
                self.ranges.remove(&s);
            }
        }

        // Absorb every range beginning inside or right at the new end.
        let absorbed: Vec<u64> = self
            .ranges
            .range(start..=end)
            .map(|(&s, _)| s)
            .collect();
        for s in absorbed {
            let e = self.ranges.remove(&s).unwrap();
            end = end.max(e);
        }

        self.ranges.insert(start, end);
    }

    /// Subtract a range, splitting any overlapping range around it.
    pub fn remove(&mut self, range: AddressRange) {
        if range.is_empty() {
            return;
        }

        // The range starting before us may extend into the removed span.
        if let Some((&s, &e)) = self.ranges.range(..range.start).next_back() {
            if e > range.start {
                self.ranges.insert(s, range.start);
                if e > range.end {
                    self.ranges.insert(range.end, e);
                }
            }
        }

        // Ranges starting inside the removed span.
        let inside: Vec<(u64, u64)> = self
            .ranges
            .range(range.start..range.end)
            .map(|(&s, &e)| (s, e))
            .collect();
        for (s, e) in inside {
            self.ranges.remove(&s);
            if e > range.end {
                self.ranges.insert(range.end, e);
            }
        }
    }

    /// Check whether an address lies inside any stored range.
    pub fn contains(&self, addr: u64) -> bool {
        self.range_of(addr).is_some()
    }

    /// The unique range containing `addr`, if any.
    pub fn range_of(&self, addr: u64) -> Option<AddressRange> {
        let (&s, &e) = self.ranges.range(..=addr).next_back()?;
        if addr < e {
            Some(AddressRange::new(s, e))
        } else {
            None
        }
    }

    /// Iterate ranges in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = AddressRange> + '_ {
        self.ranges
            .iter()
            .map(|(&s, &e)| AddressRange::new(s, e))
    }

    /// Total number of addresses covered.
    pub fn coverage(&self) -> u64 {
        self.ranges.iter().map(|(&s, &e)| e - s).sum()
    }
}

impl fmt::Display for RangeSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for r in self.iter() {
            if !first {
                write!(f, ", ")?;
            }
            write!(f, "{}", r)?;
            first = false;
        }
        Ok(())
    }
}
