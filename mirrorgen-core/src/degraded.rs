// vim: tw=80
//! Degraded-position tracking and range resolution
//!
//! A position is degraded over an LBA range when its copy of that range is
//! not readable, either because the drive is missing or because the range
//! still awaits rebuild.  Every fragment must see a single, uniform set of
//! degraded positions across its whole range, so before a fragment is
//! finalized its range gets narrowed to the longest prefix with one uniform
//! answer.

use std::ops::Range;

use fixedbitset::FixedBitSet;
use tracing::debug;

use crate::{
    siots::SiotsBuilder,
    types::*,
};

/// Which positions of one fragment's range are unreadable
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DegradedBitmap {
    bits: FixedBitSet,
}

impl DegradedBitmap {
    pub fn new(width: u32) -> Self {
        DegradedBitmap {
            bits: FixedBitSet::with_capacity(width as usize),
        }
    }

    pub fn width(&self) -> u32 {
        self.bits.len() as u32
    }

    pub fn set(&mut self, pos: PositionT) {
        self.bits.insert(pos as usize);
    }

    pub fn is_degraded(&self, pos: PositionT) -> bool {
        self.bits.contains(pos as usize)
    }

    pub fn degraded_count(&self) -> u32 {
        self.bits.count_ones(..) as u32
    }

    pub fn is_empty(&self) -> bool {
        self.degraded_count() == 0
    }

    /// The lowest-indexed readable position, if any position is readable
    pub fn first_readable(&self) -> Option<PositionT> {
        self.readable().next()
    }

    /// Iterate over readable positions in index order
    pub fn readable(&self) -> impl Iterator<Item = PositionT> + '_ {
        (0..self.width()).filter(move |pos| !self.is_degraded(*pos))
    }
}

/// Resolves the degraded positions over a fragment's range.
///
/// `resolve` may shrink the fragment, never grow it: when degradation
/// changes partway through the range, the fragment is narrowed to the
/// uniform prefix and the remainder is left for the next fragment.
pub trait DegradedResolver {
    /// Fill in the fragment's degraded bitmap, narrowing its range as
    /// needed.
    ///
    /// With `allow_split` unset, a range whose uniform prefix has no
    /// readable position at all is an error.  With it set, such a prefix is
    /// accepted and the caller is expected to treat it as a region to skip.
    fn resolve(&self, builder: &mut SiotsBuilder, allow_split: bool)
        -> Result<()>;
}

/// [`DegradedResolver`] backed by per-position rebuild extents.
///
/// Each position carries a sorted list of LBA ranges still awaiting
/// rebuild.  A position is degraded at an LBA iff some extent covers it.
#[derive(Clone, Debug, Default)]
pub struct RebuildLogResolver {
    extents: Vec<Vec<Range<LbaT>>>,
}

impl RebuildLogResolver {
    pub fn new(width: u32) -> Self {
        RebuildLogResolver {
            extents: vec![Vec::new(); width as usize],
        }
    }

    /// Record that `pos` needs rebuild over `range`.
    ///
    /// Abutting and overlapping extents are merged, so a continuously
    /// degraded region never presents a fragment boundary in its interior.
    pub fn mark_needs_rebuild(&mut self, pos: PositionT, range: Range<LbaT>) {
        let v = &mut self.extents[pos as usize];
        v.push(range);
        v.sort_by_key(|r| r.start);
        let mut merged: Vec<Range<LbaT>> = Vec::with_capacity(v.len());
        for r in v.drain(..) {
            match merged.last_mut() {
                Some(last) if r.start <= last.end =>
                    last.end = last.end.max(r.end),
                _ => merged.push(r),
            }
        }
        *v = merged;
    }

    fn degraded_at(&self, pos: PositionT, lba: LbaT) -> bool {
        self.extents[pos as usize].iter().any(|r| r.contains(&lba))
    }

    /// The first LBA in `[lba, end)` where `pos`'s degradation differs from
    /// its state at `lba`, or `end` if it is uniform throughout.
    fn next_change(&self, pos: PositionT, lba: LbaT, end: LbaT) -> LbaT {
        let at_start = self.degraded_at(pos, lba);
        for r in self.extents[pos as usize].iter() {
            if at_start {
                if r.contains(&lba) && r.end < end {
                    return r.end;
                }
            } else if r.start > lba && r.start < end {
                return r.start;
            }
        }
        end
    }
}

impl DegradedResolver for RebuildLogResolver {
    fn resolve(&self, builder: &mut SiotsBuilder, allow_split: bool)
        -> Result<()>
    {
        if !builder.degraded().is_empty() {
            return Err(Error::DegradedAlreadySet);
        }
        let width = builder.degraded().width();
        let start = builder.start_lba();
        let end = start + builder.xfer_count();

        // Longest prefix over which every position's answer is uniform
        let boundary = (0..width)
            .map(|pos| self.next_change(pos, start, end))
            .min()
            .unwrap_or(end);
        if boundary < end {
            debug!(start, end, boundary, "narrowing to uniform prefix");
            builder.narrow(boundary - start);
        }

        let mut degraded_count = 0;
        for pos in 0..width {
            if self.degraded_at(pos, start) {
                builder.degraded_mut().set(pos);
                degraded_count += 1;
            }
        }
        if degraded_count == width && !allow_split {
            return Err(Error::NoReadablePosition);
        }
        Ok(())
    }
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
    use super::*;
    use crate::siots::SiotsRequest;

    fn builder(start_lba: LbaT, xfer_count: BlockCountT, width: u32)
        -> SiotsBuilder
    {
        let req = SiotsRequest {
            opcode: BlockOpcode::Read,
            start_lba,
            xfer_count,
            nested: false,
            parent: None,
        };
        SiotsBuilder::new(&req, width)
    }

    mod bitmap {
        use pretty_assertions::assert_eq;
        use super::*;

        #[test]
        fn basic() {
            let mut bm = DegradedBitmap::new(3);
            assert!(bm.is_empty());
            bm.set(1);
            assert!(bm.is_degraded(1));
            assert!(!bm.is_degraded(0));
            assert_eq!(bm.degraded_count(), 1);
            assert_eq!(bm.first_readable(), Some(0));
            assert_eq!(bm.readable().collect::<Vec<_>>(), vec![0, 2]);
        }

        #[test]
        fn all_degraded() {
            let mut bm = DegradedBitmap::new(2);
            bm.set(0);
            bm.set(1);
            assert_eq!(bm.first_readable(), None);
        }
    }

    mod resolve {
        use pretty_assertions::assert_eq;
        use super::*;

        #[test]
        fn healthy() {
            let resolver = RebuildLogResolver::new(3);
            let mut b = builder(0x100, 0x80, 3);
            resolver.resolve(&mut b, false).unwrap();
            assert_eq!(b.xfer_count(), 0x80);
            assert!(b.degraded().is_empty());
        }

        #[test]
        fn uniform_degraded() {
            let mut resolver = RebuildLogResolver::new(3);
            resolver.mark_needs_rebuild(2, 0x0..0x1000);
            let mut b = builder(0x100, 0x80, 3);
            resolver.resolve(&mut b, false).unwrap();
            assert_eq!(b.xfer_count(), 0x80);
            assert!(b.degraded().is_degraded(2));
            assert_eq!(b.degraded().degraded_count(), 1);
        }

        #[test]
        fn narrows_at_extent_start() {
            let mut resolver = RebuildLogResolver::new(3);
            resolver.mark_needs_rebuild(1, 0x140..0x1000);
            let mut b = builder(0x100, 0x80, 3);
            resolver.resolve(&mut b, false).unwrap();
            assert_eq!(b.xfer_count(), 0x40);
            assert!(b.degraded().is_empty());
        }

        #[test]
        fn narrows_at_extent_end() {
            let mut resolver = RebuildLogResolver::new(3);
            resolver.mark_needs_rebuild(1, 0x0..0x140);
            let mut b = builder(0x100, 0x80, 3);
            resolver.resolve(&mut b, false).unwrap();
            assert_eq!(b.xfer_count(), 0x40);
            assert!(b.degraded().is_degraded(1));
        }

        #[test]
        fn narrows_to_earliest_change() {
            let mut resolver = RebuildLogResolver::new(3);
            resolver.mark_needs_rebuild(1, 0x160..0x1000);
            resolver.mark_needs_rebuild(2, 0x120..0x1000);
            let mut b = builder(0x100, 0x80, 3);
            resolver.resolve(&mut b, false).unwrap();
            assert_eq!(b.xfer_count(), 0x20);
            assert!(b.degraded().is_empty());
        }

        // Two touching extents describe one continuous degraded region, so
        // their shared endpoint must not split the fragment.
        #[test]
        fn adjacent_extents_coalesce() {
            let mut resolver = RebuildLogResolver::new(3);
            resolver.mark_needs_rebuild(1, 0x0..0x140);
            resolver.mark_needs_rebuild(1, 0x140..0x1000);
            let mut b = builder(0x100, 0x80, 3);
            resolver.resolve(&mut b, false).unwrap();
            assert_eq!(b.xfer_count(), 0x80);
            assert!(b.degraded().is_degraded(1));
        }

        #[test]
        fn overlapping_extents_coalesce() {
            let mut resolver = RebuildLogResolver::new(3);
            resolver.mark_needs_rebuild(1, 0x120..0x1000);
            resolver.mark_needs_rebuild(1, 0x0..0x140);
            let mut b = builder(0x100, 0x80, 3);
            resolver.resolve(&mut b, false).unwrap();
            assert_eq!(b.xfer_count(), 0x80);
            assert!(b.degraded().is_degraded(1));
        }

        #[test]
        fn fully_degraded_rejected() {
            let mut resolver = RebuildLogResolver::new(2);
            resolver.mark_needs_rebuild(0, 0x0..0x1000);
            resolver.mark_needs_rebuild(1, 0x0..0x1000);
            let mut b = builder(0x100, 0x80, 2);
            assert_eq!(resolver.resolve(&mut b, false),
                       Err(Error::NoReadablePosition));
        }

        #[test]
        fn fully_degraded_split_allowed() {
            let mut resolver = RebuildLogResolver::new(2);
            resolver.mark_needs_rebuild(0, 0x0..0x140);
            resolver.mark_needs_rebuild(1, 0x0..0x1000);
            let mut b = builder(0x100, 0x80, 2);
            resolver.resolve(&mut b, true).unwrap();
            assert_eq!(b.xfer_count(), 0x40);
            assert_eq!(b.degraded().degraded_count(), 2);
        }

        #[test]
        fn already_set() {
            let resolver = RebuildLogResolver::new(3);
            let mut b = builder(0x100, 0x80, 3);
            b.degraded_mut().set(0);
            assert_eq!(resolver.resolve(&mut b, false),
                       Err(Error::DegradedAlreadySet));
        }
    }
}
// LCOV_EXCL_STOP
