//! Region algebra: `region_t` as a byte-key range, `region_map<T>` as a
//! sorted, non-overlapping partition of the universe.

use std::cmp::Ordering;

/// A half-open range of primary-key bytes: `[start, end)`. `end == None`
/// means "to the end of the key space", matching `key_range_t`'s unbounded
/// right edge.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Region {
    pub start: Vec<u8>,
    pub end: Option<Vec<u8>>,
}

impl Region {
    pub fn universe() -> Self {
        Region { start: Vec::new(), end: None }
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        key >= self.start.as_slice()
            && match &self.end {
                Some(e) => key < e.as_slice(),
                None => true,
            }
    }

    pub fn is_empty(&self) -> bool {
        match &self.end {
            Some(e) => e <= &self.start,
            None => false,
        }
    }

    /// Intersection of two regions; `None` if disjoint.
    pub fn intersect(&self, other: &Region) -> Option<Region> {
        let start = if self.start > other.start { self.start.clone() } else { other.start.clone() };
        let end = match (&self.end, &other.end) {
            (Some(a), Some(b)) => Some(if a < b { a.clone() } else { b.clone() }),
            (Some(a), None) => Some(a.clone()),
            (None, Some(b)) => Some(b.clone()),
            (None, None) => None,
        };
        let r = Region { start, end };
        if r.is_empty() {
            None
        } else {
            Some(r)
        }
    }
}

fn end_cmp(a: &Option<Vec<u8>>, b: &Option<Vec<u8>>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) => x.cmp(y),
    }
}

/// A total partitioning of the universe into disjoint regions, each mapped
/// to a value. Kept sorted by start key with no gaps and no overlaps.
/// Invariant: `get_domain()` always equals `Region::universe()` for a region
/// map that has gone through `set`/`update` starting from a whole-universe
/// map.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RegionMap<T> {
    entries: Vec<(Region, T)>,
}

impl<T: Clone> RegionMap<T> {
    pub fn single(value: T) -> Self {
        RegionMap { entries: vec![(Region::universe(), value)] }
    }

    pub fn entries(&self) -> &[(Region, T)] {
        &self.entries
    }

    pub fn from_entries(entries: Vec<(Region, T)>) -> Self {
        let mut entries = entries;
        entries.sort_by(|a, b| a.0.start.cmp(&b.0.start));
        RegionMap { entries }
    }

    /// The union of all covered regions. For a well-formed map this is a
    /// single contiguous region; this returns the min-start/max-end span so
    /// callers can assert it equals the universe.
    pub fn get_domain(&self) -> Region {
        if self.entries.is_empty() {
            return Region { start: Vec::new(), end: Some(Vec::new()) };
        }
        let start = self.entries.first().unwrap().0.start.clone();
        let end = self
            .entries
            .iter()
            .map(|(r, _)| r.end.clone())
            .max_by(end_cmp)
            .unwrap();
        Region { start, end }
    }

    pub fn is_universe_domain(&self) -> bool {
        let d = self.get_domain();
        d.start.is_empty() && d.end.is_none()
    }

    /// Replace-in-place: the portion of the map overlapping `region` is cut
    /// out and replaced wholesale with `value`. Non-additive, the
    /// region-algebra operation `update_metainfo` relies on.
    pub fn set(&mut self, region: &Region, value: T) {
        let mut new_entries = Vec::with_capacity(self.entries.len() + 2);
        for (r, v) in self.entries.drain(..) {
            match r.intersect(region) {
                None => new_entries.push((r, v)),
                Some(_) => {
                    // Split off the parts of `r` outside `region`, keep their old value.
                    if r.start < region.start {
                        new_entries.push((
                            Region { start: r.start.clone(), end: Some(region.start.clone()) },
                            v.clone(),
                        ));
                    }
                    if end_cmp(&r.end, &region.end) == Ordering::Greater {
                        if let Some(region_end) = &region.end {
                            new_entries.push((
                                Region { start: region_end.clone(), end: r.end.clone() },
                                v.clone(),
                            ));
                        }
                    }
                }
            }
        }
        new_entries.push((region.clone(), value));
        new_entries.sort_by(|a, b| a.0.start.cmp(&b.0.start));
        self.entries = new_entries;
    }

    /// Apply every region/value pair of `other` onto `self` via `set`.
    /// Used by `update_metainfo(old, new, sb)`: `old.update(new)`.
    pub fn update(&mut self, other: &RegionMap<T>) {
        for (r, v) in &other.entries {
            self.set(r, v.clone());
        }
    }

    /// Restrict the map to the given domain, dropping (or trimming) entries
    /// outside it. Used to mask metainfo to a backfill callback's domain.
    pub fn mask(&self, domain: &Region) -> RegionMap<T> {
        let mut out = Vec::new();
        for (r, v) in &self.entries {
            if let Some(clipped) = r.intersect(domain) {
                out.push((clipped, v.clone()));
            }
        }
        RegionMap { entries: out }
    }

    pub fn iter(&self) -> impl Iterator<Item = &(Region, T)> {
        self.entries.iter()
    }
}

impl<T: Clone + PartialEq> RegionMap<T> {
    /// Whether every entry carries exactly `value`, used to decide whether a
    /// pending `set` would leave no non-zero region anywhere in the map.
    pub fn all_equal(&self, value: &T) -> bool {
        self.entries.iter().all(|(_, v)| v == value)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn universe_round_trips() {
        let m: RegionMap<Vec<u8>> = RegionMap::single(b"zero".to_vec());
        assert!(m.is_universe_domain());
    }

    #[test]
    fn set_splits_and_preserves_domain() {
        let mut m: RegionMap<u32> = RegionMap::single(0);
        let mid = Region { start: b"m".to_vec(), end: Some(b"z".to_vec()) };
        m.set(&mid, 1);
        assert!(m.is_universe_domain());
        assert_eq!(m.entries().len(), 3);
        assert!(m.entries().iter().any(|(r, v)| *r == mid && *v == 1));
    }

    #[test]
    fn all_equal_detects_uniform_map() {
        let mut m: RegionMap<u32> = RegionMap::single(0);
        assert!(m.all_equal(&0));
        m.set(&Region { start: b"m".to_vec(), end: Some(b"z".to_vec()) }, 0);
        assert!(m.all_equal(&0));
        m.set(&Region { start: b"m".to_vec(), end: Some(b"z".to_vec()) }, 1);
        assert!(!m.all_equal(&0));
    }

    #[test]
    fn mask_restricts_domain() {
        let mut m: RegionMap<u32> = RegionMap::single(0);
        m.set(&Region { start: b"m".to_vec(), end: Some(b"z".to_vec()) }, 1);
        let masked = m.mask(&Region { start: b"a".to_vec(), end: Some(b"n".to_vec()) });
        assert_eq!(masked.get_domain(), Region { start: b"a".to_vec(), end: Some(b"n".to_vec()) });
    }
}
