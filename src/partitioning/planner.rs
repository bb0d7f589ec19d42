//! Offset/range tables derived from an externally computed partition.
//!
//! A permutation assigns each global entity a destination index in a
//! worker-contiguous ordering: after reordering, the first `counts[0]`
//! entities belong to worker 0, the next `counts[1]` to worker 1, and so on.
//! [`PartitionPlanner`] turns the counts into prefix-sum offsets and answers
//! "which worker owns destination index `d`, and at which slot".

use crate::mesh_error::MeshHaloError;
use std::ops::Range;

/// Prefix-sum table over per-partition counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlanner {
    what: &'static str,
    offsets: Vec<usize>,
}

impl PartitionPlanner {
    /// Build the table, checking that the counts cover exactly `total` entities.
    ///
    /// # Errors
    /// `Config` when `counts` is empty, `PartitionCountMismatch` when the
    /// counts do not sum to `total`.
    pub fn new(what: &'static str, total: usize, counts: &[usize]) -> Result<Self, MeshHaloError> {
        if counts.is_empty() {
            return Err(MeshHaloError::Config(format!(
                "no partitions given for {what}"
            )));
        }
        let mut offsets = Vec::with_capacity(counts.len() + 1);
        let mut acc = 0usize;
        offsets.push(0);
        for &c in counts {
            acc += c;
            offsets.push(acc);
        }
        if acc != total {
            return Err(MeshHaloError::PartitionCountMismatch {
                what,
                expected: total,
                found: acc,
            });
        }
        Ok(Self { what, offsets })
    }

    pub fn num_parts(&self) -> usize {
        self.offsets.len() - 1
    }

    pub fn total(&self) -> usize {
        self.offsets[self.num_parts()]
    }

    /// `P + 1` prefix sums; worker `w` owns `offsets[w]..offsets[w + 1]`.
    pub fn offsets(&self) -> &[usize] {
        &self.offsets
    }

    pub fn range(&self, worker: usize) -> Range<usize> {
        self.offsets[worker]..self.offsets[worker + 1]
    }

    pub fn count(&self, worker: usize) -> usize {
        self.offsets[worker + 1] - self.offsets[worker]
    }

    /// Worker whose range contains destination index `dest`.
    pub fn owner_of(&self, dest: usize) -> Result<usize, MeshHaloError> {
        if dest >= self.total() {
            return Err(MeshHaloError::IndexOutOfRange {
                what: self.what,
                index: dest as i64,
                bound: self.total(),
            });
        }
        // Last offset <= dest; empty partitions share an offset with their
        // successor and are skipped because that successor also satisfies it.
        Ok(self.offsets.partition_point(|&o| o <= dest) - 1)
    }

    /// `(owner, slot within the owner's range)` for destination index `dest`.
    pub fn slot_of(&self, dest: usize) -> Result<(usize, usize), MeshHaloError> {
        let owner = self.owner_of(dest)?;
        Ok((owner, dest - self.offsets[owner]))
    }
}

/// Invert a permutation: `inv[perm[i]] = i`.
///
/// # Errors
/// `IndexOutOfRange` for a destination past the end, `Config` when two
/// entities claim the same destination.
pub fn invert(perm: &[usize]) -> Result<Vec<usize>, MeshHaloError> {
    const UNSET: usize = usize::MAX;
    let mut inv = vec![UNSET; perm.len()];
    for (orig, &dest) in perm.iter().enumerate() {
        let slot = inv.get_mut(dest).ok_or(MeshHaloError::IndexOutOfRange {
            what: "permutation destination",
            index: dest as i64,
            bound: perm.len(),
        })?;
        if *slot != UNSET {
            return Err(MeshHaloError::Config(format!(
                "destination {dest} assigned to both {} and {orig}",
                *slot
            )));
        }
        *slot = orig;
    }
    Ok(inv)
}

/// A decoded permutation file: 0-based destinations plus per-partition counts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Permutation {
    dest: Vec<usize>,
    counts: Vec<usize>,
}

impl Permutation {
    /// Decode the on-disk layout: `total` 1-based destinations followed by
    /// `parts` counts.
    pub fn from_raw(
        what: &'static str,
        raw: &[i32],
        total: usize,
        parts: usize,
    ) -> Result<Self, MeshHaloError> {
        if total.checked_add(parts) != Some(raw.len()) {
            return Err(MeshHaloError::Config(format!(
                "{what} permutation holds {} entries, expected {total} destinations and {parts} counts",
                raw.len()
            )));
        }
        let dest = raw[..total]
            .iter()
            .map(|&d| one_based(what, d, total))
            .collect::<Result<Vec<_>, _>>()?;
        let counts = raw[total..]
            .iter()
            .map(|&c| {
                usize::try_from(c).map_err(|_| {
                    MeshHaloError::Config(format!("negative partition count {c} for {what}"))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { dest, counts })
    }

    pub fn new(dest: Vec<usize>, counts: Vec<usize>) -> Self {
        Self { dest, counts }
    }

    /// Identity ordering split into the given counts.
    pub fn identity(counts: Vec<usize>) -> Self {
        let total = counts.iter().sum();
        Self {
            dest: (0..total).collect(),
            counts,
        }
    }

    /// Encode back into the 1-based on-disk layout.
    pub fn to_raw(&self) -> Vec<i32> {
        self.dest
            .iter()
            .map(|&d| d as i32 + 1)
            .chain(self.counts.iter().map(|&c| c as i32))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.dest.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dest.is_empty()
    }

    pub fn destinations(&self) -> &[usize] {
        &self.dest
    }

    pub fn counts(&self) -> &[usize] {
        &self.counts
    }

    /// Destination index of original entity `orig`.
    pub fn dest(&self, orig: usize) -> usize {
        self.dest[orig]
    }

    /// Validate the counts and build the matching planner.
    pub fn planner(&self, what: &'static str) -> Result<PartitionPlanner, MeshHaloError> {
        PartitionPlanner::new(what, self.dest.len(), &self.counts)
    }

    /// Check that every destination is used exactly once; returns the inverse.
    pub fn validate(&self) -> Result<Vec<usize>, MeshHaloError> {
        invert(&self.dest)
    }
}

fn one_based(what: &'static str, raw: i32, bound: usize) -> Result<usize, MeshHaloError> {
    let idx = i64::from(raw) - 1;
    if idx < 0 || idx as usize >= bound {
        return Err(MeshHaloError::IndexOutOfRange {
            what,
            index: idx,
            bound,
        });
    }
    Ok(idx as usize)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_are_prefix_sums() {
        let p = PartitionPlanner::new("elements", 10, &[3, 0, 4, 3]).unwrap();
        assert_eq!(p.offsets(), &[0, 3, 3, 7, 10]);
        assert_eq!(p.range(2), 3..7);
        assert_eq!(p.count(1), 0);
        assert_eq!(p.num_parts(), 4);
    }

    #[test]
    fn owner_lookup_skips_empty_partitions() {
        let p = PartitionPlanner::new("elements", 10, &[3, 0, 4, 3]).unwrap();
        assert_eq!(p.owner_of(0).unwrap(), 0);
        assert_eq!(p.owner_of(2).unwrap(), 0);
        assert_eq!(p.owner_of(3).unwrap(), 2);
        assert_eq!(p.slot_of(8).unwrap(), (3, 1));
        assert!(matches!(
            p.owner_of(10),
            Err(MeshHaloError::IndexOutOfRange { index: 10, .. })
        ));
    }

    #[test]
    fn count_sum_is_checked() {
        let err = PartitionPlanner::new("nodes", 5, &[2, 2]).unwrap_err();
        assert!(matches!(
            err,
            MeshHaloError::PartitionCountMismatch {
                expected: 5,
                found: 4,
                ..
            }
        ));
    }

    #[test]
    fn invert_rejects_duplicates() {
        assert_eq!(invert(&[2, 0, 1]).unwrap(), vec![1, 2, 0]);
        assert!(matches!(invert(&[0, 0, 1]), Err(MeshHaloError::Config(_))));
        assert!(matches!(
            invert(&[0, 3, 1]),
            Err(MeshHaloError::IndexOutOfRange { .. })
        ));
    }

    #[test]
    fn raw_layout_decodes_one_based() {
        let perm = Permutation::from_raw("elements", &[2, 1, 3, 2, 1], 3, 2).unwrap();
        assert_eq!(perm.destinations(), &[1, 0, 2]);
        assert_eq!(perm.counts(), &[2, 1]);
        assert_eq!(perm.to_raw(), vec![2, 1, 3, 2, 1]);
        let err = Permutation::from_raw("elements", &[0, 1, 3, 2, 1], 3, 2).unwrap_err();
        assert!(matches!(err, MeshHaloError::IndexOutOfRange { index: -1, .. }));
    }
}
