// vim: tw=80
//! Fragment construction and validation
//!
//! Each pass of the generation engine produces one fragment: a
//! self-contained unit of work covering a prefix of the parent request's
//! remaining range.  [`SiotsBuilder`] accumulates the fragment's fields
//! while the per-operation generators shape it; [`SiotsBuilder::finish`]
//! validates the result and freezes it into an immutable [`Siots`].

use std::sync::Arc;

use tracing::error;

use crate::{
    degraded::DegradedBitmap,
    types::*,
};

/// Input to one generation pass: which slice of the parent still needs a
/// fragment
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SiotsRequest {
    pub opcode: BlockOpcode,
    pub start_lba: LbaT,
    pub xfer_count: BlockCountT,
    /// Set for fragments spawned by another fragment's recovery path.
    /// Nested fragments re-cover blocks the parent already accounted for.
    pub nested: bool,
    /// The fragment whose recovery path spawned this one.  Only nested
    /// requests carry one.
    pub parent: Option<Arc<Siots>>,
}

/// Mutable fragment under construction
#[derive(Clone, Debug)]
pub struct SiotsBuilder {
    opcode: BlockOpcode,
    nested: bool,
    parent: Option<Arc<Siots>>,
    start_lba: LbaT,
    xfer_count: BlockCountT,
    width: u32,
    data_disks: u32,
    start_pos: Option<PositionT>,
    second_pos: Option<PositionT>,
    algorithm: Option<Algorithm>,
    retry_count: u32,
    drive_operations: u32,
    page_size: u32,
    parity_start: LbaT,
    parity_count: BlockCountT,
    blocks_to_allocate: BlockCountT,
    degraded: DegradedBitmap,
}

impl SiotsBuilder {
    pub fn new(req: &SiotsRequest, width: u32) -> Self {
        SiotsBuilder {
            opcode: req.opcode,
            nested: req.nested,
            parent: req.parent.clone(),
            start_lba: req.start_lba,
            xfer_count: req.xfer_count,
            width,
            data_disks: 0,
            start_pos: None,
            second_pos: None,
            algorithm: None,
            retry_count: 0,
            drive_operations: 0,
            page_size: 0,
            // On a mirror the redundancy range is the data range
            parity_start: req.start_lba,
            parity_count: req.xfer_count,
            blocks_to_allocate: req.xfer_count,
            degraded: DegradedBitmap::new(width),
        }
    }

    pub fn opcode(&self) -> BlockOpcode {
        self.opcode
    }

    pub fn nested(&self) -> bool {
        self.nested
    }

    pub fn start_lba(&self) -> LbaT {
        self.start_lba
    }

    pub fn xfer_count(&self) -> BlockCountT {
        self.xfer_count
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn data_disks(&self) -> u32 {
        self.data_disks
    }

    pub fn degraded(&self) -> &DegradedBitmap {
        &self.degraded
    }

    pub fn degraded_mut(&mut self) -> &mut DegradedBitmap {
        &mut self.degraded
    }

    pub fn set_algorithm(&mut self, algorithm: Algorithm) {
        self.algorithm = Some(algorithm);
    }

    pub fn set_data_disks(&mut self, data_disks: u32) {
        self.data_disks = data_disks;
    }

    /// Shrink the fragment to its first `new_count` blocks.  The
    /// redundancy range shrinks with it.
    pub fn narrow(&mut self, new_count: BlockCountT) {
        debug_assert!(new_count <= self.xfer_count);
        self.xfer_count = new_count;
        self.parity_count = new_count;
        self.blocks_to_allocate = new_count;
    }

    pub fn set_positions(
        &mut self,
        primary: PositionT,
        secondary: Option<PositionT>,
    ) {
        self.start_pos = Some(primary);
        self.second_pos = secondary;
    }

    pub fn set_retry_count(&mut self, retry_count: u32) {
        self.retry_count = retry_count;
    }

    pub fn set_drive_operations(&mut self, drive_operations: u32) {
        self.drive_operations = drive_operations;
    }

    pub fn set_blocks_to_allocate(&mut self, blocks: BlockCountT) {
        self.blocks_to_allocate = blocks;
    }

    pub fn blocks_to_allocate(&self) -> BlockCountT {
        self.blocks_to_allocate
    }

    pub fn set_page_size(&mut self, page_size: u32) {
        self.page_size = page_size;
    }

    /// Pick the buffer page size from the fragment's footprint.  Small
    /// fragments use the standard page; ones whose allocation plus
    /// per-position tracking overhead would need too many standard pages
    /// step up to the large page.
    pub fn set_optimal_page_size(
        &mut self,
        fru_count: u32,
        blocks_to_allocate: BlockCountT,
    ) {
        let footprint =
            blocks_to_allocate + BlockCountT::from(fru_count) * 2;
        self.page_size =
            if footprint > BlockCountT::from(PAGE_SIZE_STD) * 32 {
                PAGE_SIZE_MAX
            } else {
                PAGE_SIZE_STD
            };
    }

    /// Validate the fragment and freeze it.
    ///
    /// Checks run in a fixed order and the first failure wins; each is
    /// logged before returning.
    pub fn finish(self) -> Result<Siots> {
        if self.width < MIN_WIDTH || self.width > MAX_WIDTH {
            let e = Error::WidthOutOfRange { width: self.width };
            error!(error = %e, "fragment validation failed");
            return Err(e);
        }
        let start_pos = match self.start_pos {
            None => {
                let e = Error::UnsetStartPos;
                error!(error = %e, "fragment validation failed");
                return Err(e);
            },
            Some(p) if p >= self.width => {
                let e = Error::StartPosOutOfRange {
                    start_pos: p,
                    width: self.width,
                };
                error!(error = %e, "fragment validation failed");
                return Err(e);
            },
            Some(p) => p,
        };
        if self.data_disks == 0 || self.data_disks > self.width {
            let e = Error::DataDisksOutOfRange {
                data_disks: self.data_disks,
                width: self.width,
            };
            error!(error = %e, "fragment validation failed");
            return Err(e);
        }
        if self.xfer_count == 0 {
            let e = Error::ZeroTransferCount;
            error!(error = %e, "fragment validation failed");
            return Err(e);
        }
        if self.parity_count == 0 {
            let e = Error::ZeroParityCount;
            error!(error = %e, "fragment validation failed");
            return Err(e);
        }
        let algorithm = match self.algorithm {
            Some(a) => a,
            None => {
                let e = Error::UnsetAlgorithm;
                error!(error = %e, "fragment validation failed");
                return Err(e);
            },
        };
        if self.page_size != PAGE_SIZE_STD && self.page_size != PAGE_SIZE_MAX
        {
            let e = Error::InvalidPageSize { page_size: self.page_size };
            error!(error = %e, "fragment validation failed");
            return Err(e);
        }
        Ok(Siots {
            opcode: self.opcode,
            nested: self.nested,
            parent: self.parent,
            start_lba: self.start_lba,
            xfer_count: self.xfer_count,
            width: self.width,
            data_disks: self.data_disks,
            start_pos,
            second_pos: self.second_pos,
            algorithm,
            retry_count: self.retry_count,
            drive_operations: self.drive_operations,
            page_size: self.page_size,
            parity_start: self.parity_start,
            parity_count: self.parity_count,
            blocks_to_allocate: self.blocks_to_allocate,
            degraded: self.degraded,
        })
    }
}

/// A validated, immutable fragment ready for execution
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Siots {
    opcode: BlockOpcode,
    nested: bool,
    parent: Option<Arc<Siots>>,
    start_lba: LbaT,
    xfer_count: BlockCountT,
    width: u32,
    data_disks: u32,
    start_pos: PositionT,
    second_pos: Option<PositionT>,
    algorithm: Algorithm,
    retry_count: u32,
    drive_operations: u32,
    page_size: u32,
    parity_start: LbaT,
    parity_count: BlockCountT,
    blocks_to_allocate: BlockCountT,
    degraded: DegradedBitmap,
}

impl Siots {
    pub fn opcode(&self) -> BlockOpcode {
        self.opcode
    }

    pub fn nested(&self) -> bool {
        self.nested
    }

    pub fn parent(&self) -> Option<&Siots> {
        self.parent.as_deref()
    }

    pub fn start_lba(&self) -> LbaT {
        self.start_lba
    }

    pub fn xfer_count(&self) -> BlockCountT {
        self.xfer_count
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn data_disks(&self) -> u32 {
        self.data_disks
    }

    pub fn start_pos(&self) -> PositionT {
        self.start_pos
    }

    pub fn second_pos(&self) -> Option<PositionT> {
        self.second_pos
    }

    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn drive_operations(&self) -> u32 {
        self.drive_operations
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn parity_start(&self) -> LbaT {
        self.parity_start
    }

    pub fn parity_count(&self) -> BlockCountT {
        self.parity_count
    }

    pub fn blocks_to_allocate(&self) -> BlockCountT {
        self.blocks_to_allocate
    }

    pub fn degraded(&self) -> &DegradedBitmap {
        &self.degraded
    }
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
    use super::*;

    fn builder() -> SiotsBuilder {
        let req = SiotsRequest {
            opcode: BlockOpcode::Read,
            start_lba: 0x100,
            xfer_count: 0x80,
            nested: false,
            parent: None,
        };
        let mut b = SiotsBuilder::new(&req, 3);
        b.set_algorithm(Algorithm::Read);
        b.set_data_disks(1);
        b.set_positions(0, Some(1));
        b.set_page_size(PAGE_SIZE_STD);
        b
    }

    mod finish {
        use pretty_assertions::assert_eq;
        use super::*;

        #[test]
        fn basic() {
            let siots = builder().finish().unwrap();
            assert_eq!(siots.start_lba(), 0x100);
            assert_eq!(siots.xfer_count(), 0x80);
            assert_eq!(siots.parity_start(), 0x100);
            assert_eq!(siots.parity_count(), 0x80);
            assert_eq!(siots.start_pos(), 0);
            assert_eq!(siots.second_pos(), Some(1));
            assert_eq!(siots.algorithm(), Algorithm::Read);
        }

        #[test]
        fn width_too_large() {
            let req = SiotsRequest {
                opcode: BlockOpcode::Read,
                start_lba: 0,
                xfer_count: 1,
                nested: false,
                parent: None,
            };
            let b = SiotsBuilder::new(&req, MAX_WIDTH + 1);
            assert_eq!(b.finish().unwrap_err(),
                       Error::WidthOutOfRange { width: MAX_WIDTH + 1 });
        }

        #[test]
        fn unset_start_pos() {
            let req = SiotsRequest {
                opcode: BlockOpcode::Read,
                start_lba: 0,
                xfer_count: 1,
                nested: false,
                parent: None,
            };
            let mut b = SiotsBuilder::new(&req, 3);
            b.set_algorithm(Algorithm::Read);
            b.set_data_disks(1);
            b.set_page_size(PAGE_SIZE_STD);
            assert_eq!(b.finish().unwrap_err(), Error::UnsetStartPos);
        }

        #[test]
        fn start_pos_beyond_width() {
            let mut b = builder();
            b.set_positions(3, None);
            assert_eq!(b.finish().unwrap_err(),
                       Error::StartPosOutOfRange { start_pos: 3, width: 3 });
        }

        #[test]
        fn zero_data_disks() {
            let mut b = builder();
            b.set_data_disks(0);
            assert_eq!(b.finish().unwrap_err(),
                       Error::DataDisksOutOfRange {
                           data_disks: 0,
                           width: 3
                       });
        }

        #[test]
        fn data_disks_beyond_width() {
            let mut b = builder();
            b.set_data_disks(4);
            assert_eq!(b.finish().unwrap_err(),
                       Error::DataDisksOutOfRange {
                           data_disks: 4,
                           width: 3
                       });
        }

        #[test]
        fn zero_xfer() {
            let mut b = builder();
            b.narrow(0);
            assert_eq!(b.finish().unwrap_err(), Error::ZeroTransferCount);
        }

        #[test]
        fn unset_algorithm() {
            let req = SiotsRequest {
                opcode: BlockOpcode::Read,
                start_lba: 0,
                xfer_count: 1,
                nested: false,
                parent: None,
            };
            let mut b = SiotsBuilder::new(&req, 3);
            b.set_data_disks(1);
            b.set_positions(0, None);
            b.set_page_size(PAGE_SIZE_STD);
            assert_eq!(b.finish().unwrap_err(), Error::UnsetAlgorithm);
        }

        #[test]
        fn bad_page_size() {
            let mut b = builder();
            b.set_page_size(17);
            assert_eq!(b.finish().unwrap_err(),
                       Error::InvalidPageSize { page_size: 17 });
        }
    }

    mod page_size {
        use pretty_assertions::assert_eq;
        use super::*;

        #[test]
        fn small_footprint() {
            let mut b = builder();
            b.set_optimal_page_size(3, 0x100);
            assert_eq!(b.finish().unwrap().page_size(), PAGE_SIZE_STD);
        }

        #[test]
        fn large_footprint() {
            let mut b = builder();
            b.set_optimal_page_size(3, 0x4000);
            assert_eq!(b.finish().unwrap().page_size(), PAGE_SIZE_MAX);
        }
    }

    #[test]
    fn narrow_shrinks_redundancy_range() {
        let mut b = builder();
        b.narrow(0x20);
        let siots = b.finish().unwrap();
        assert_eq!(siots.xfer_count(), 0x20);
        assert_eq!(siots.parity_count(), 0x20);
        assert_eq!(siots.blocks_to_allocate(), 0x20);
    }
}
// LCOV_EXCL_STOP
