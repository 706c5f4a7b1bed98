//! Sorted subnet index for fast membership lookups.
//!
//! A [`RangeIndex`] holds the subnets of one address family sorted by base
//! address, each linked to the nearest entry that encloses it. A lookup
//! binary-searches for the rightmost entry whose base is at or below the
//! query, then follows enclosing links. CIDR ranges are either nested or
//! disjoint, so every range containing the query encloses that first
//! candidate: disjoint lists cost a single probe and nested lists cost one
//! probe per nesting level, however many siblings share a parent.

use std::io::{self, Read};
use std::net::IpAddr;

use crate::error::{Result, ShortcutError};
use crate::lists;
use crate::subnet::{normalize, Family, Subnet};

/// Immutable membership index over the subnets of one family.
#[derive(Debug, Clone)]
pub struct RangeIndex {
    family: Family,
    /// Sorted by base ascending, prefix descending, no duplicates.
    entries: Vec<Subnet>,
    /// `parents[i]` is the nearest earlier entry strictly enclosing
    /// `entries[i]`. Exact for the widest entry at each base, which is the
    /// only kind a lookup starts from or passes through.
    parents: Vec<Option<usize>>,
    skipped: usize,
}

impl RangeIndex {
    /// Build an index from CIDR text, skipping entries that fail to parse or
    /// belong to the other family.
    ///
    /// # Examples
    /// ```
    /// use shortcut::{Family, RangeIndex};
    /// let index = RangeIndex::build(Family::V4, ["1.0.1.0/24", "1.0.2.0/23", "1.0.8.0/21"]);
    /// assert!(index.contains("1.0.3.9".parse().unwrap()));
    /// assert!(!index.contains("1.0.4.9".parse().unwrap()));
    /// ```
    pub fn build<I, S>(family: Family, cidrs: I) -> RangeIndex
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut subnets = Vec::new();
        let mut skipped = 0;

        for raw in cidrs {
            let raw = raw.as_ref().trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }
            match Subnet::parse(raw) {
                Ok(subnet) if subnet.family() == family => subnets.push(subnet),
                Ok(subnet) => {
                    tracing::debug!("Skip {}: not an {} subnet", subnet, family);
                    skipped += 1;
                }
                Err(e) => {
                    tracing::debug!("Skip {}: {}", raw, e);
                    skipped += 1;
                }
            }
        }

        let index = Self::from_parts(family, subnets, skipped);
        if let Some((container, contained)) = index.first_overlap() {
            tracing::debug!(
                family = %family,
                "Index has overlapping ranges, first: {} contains {}",
                container,
                contained
            );
        }
        tracing::debug!(
            family = %family,
            entries = index.len(),
            skipped = index.skipped,
            "Built subnet index"
        );
        index
    }

    /// Like [`RangeIndex::build`], but fails on the first pair of
    /// overlapping subnets.
    pub fn build_strict<I, S>(family: Family, cidrs: I) -> Result<RangeIndex>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let index = Self::build(family, cidrs);
        match index.first_overlap() {
            Some((container, contained)) => Err(ShortcutError::Overlap {
                container,
                contained,
            }),
            None => Ok(index),
        }
    }

    /// Build from already parsed subnets. Subnets of the other family are
    /// dropped and counted as skipped.
    pub fn from_subnets<I>(family: Family, subnets: I) -> RangeIndex
    where
        I: IntoIterator<Item = Subnet>,
    {
        let (kept, dropped): (Vec<Subnet>, Vec<Subnet>) =
            subnets.into_iter().partition(|s| s.family() == family);
        Self::from_parts(family, kept, dropped.len())
    }

    /// Build from line-oriented text, one CIDR per line.
    pub fn from_reader<R: Read>(family: Family, reader: R) -> io::Result<RangeIndex> {
        let entries = lists::read_lines(reader)?;
        Ok(Self::build(family, entries))
    }

    /// An index that contains nothing.
    pub fn empty(family: Family) -> RangeIndex {
        Self::from_parts(family, Vec::new(), 0)
    }

    fn from_parts(family: Family, mut entries: Vec<Subnet>, skipped: usize) -> RangeIndex {
        entries.sort();
        entries.dedup();

        let parents = enclosing_links(&entries);

        RangeIndex {
            family,
            entries,
            parents,
            skipped,
        }
    }

    /// Whether any subnet in the index contains `ip`.
    ///
    /// IPv4-mapped IPv6 addresses are looked up as IPv4. Addresses of the
    /// other family never match.
    pub fn contains(&self, ip: IpAddr) -> bool {
        self.find(ip).is_some()
    }

    /// Return a subnet containing `ip`, if any.
    ///
    /// When several subnets contain the address, the one with the highest
    /// base is returned; among subnets sharing that base, the widest.
    pub fn find(&self, ip: IpAddr) -> Option<&Subnet> {
        let (family, bits) = normalize(ip);
        if family != self.family {
            return None;
        }

        self.locate(bits).0.map(|pos| &self.entries[pos])
    }

    /// Position of the matching entry, and how many entries were visited.
    fn locate(&self, bits: u128) -> (Option<usize>, usize) {
        let candidate = self.entries.partition_point(|e| e.base_bits() <= bits);
        let mut next = candidate.checked_sub(1);
        let mut probes = 0;
        while let Some(pos) = next {
            probes += 1;
            if self.entries[pos].contains_bits(bits) {
                return (Some(pos), probes);
            }
            next = self.parents[pos];
        }
        (None, probes)
    }

    /// First pair of overlapping subnets in sort order, as
    /// `(container, contained)`.
    pub fn first_overlap(&self) -> Option<(Subnet, Subnet)> {
        let first = self.entries.first()?;
        let mut holder = *first;
        let mut highest = first.last_bits();

        for entry in &self.entries[1..] {
            if entry.base_bits() <= highest {
                // CIDR ranges are either nested or disjoint
                return if holder.contains_subnet(entry) {
                    Some((holder, *entry))
                } else {
                    Some((*entry, holder))
                };
            }
            if entry.last_bits() > highest {
                highest = entry.last_bits();
                holder = *entry;
            }
        }
        None
    }

    pub fn family(&self) -> Family {
        self.family
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of input entries dropped during construction.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    /// Subnets in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Subnet> {
        self.entries.iter()
    }
}

/// Link every entry to the nearest earlier entry that encloses it.
///
/// Entries are sorted by base with the widest last among equal bases. The
/// stack holds the chain of open ranges; a narrower entry is popped by the
/// wider one sharing its base, so only widest-at-base entries stay on it.
fn enclosing_links(entries: &[Subnet]) -> Vec<Option<usize>> {
    let mut parents = Vec::with_capacity(entries.len());
    let mut open: Vec<usize> = Vec::new();

    for (i, entry) in entries.iter().enumerate() {
        while let Some(&top) = open.last() {
            if entries[top].contains_subnet(entry) {
                break;
            }
            open.pop();
        }
        parents.push(open.last().copied());
        open.push(i);
    }
    parents
}
