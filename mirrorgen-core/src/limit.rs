// vim: tw=80
//! Per-operation resource limits
//!
//! Before a fragment is finalized its range is clamped so that no single
//! pass outruns the buffer pool or the per-drive transfer ceiling.  Each
//! operation family has its own limiter because each consumes resources
//! differently: a read touches one position and allocates nothing extra, a
//! rebuild touches every position and buffers the whole range.

use serde_derive::{Deserialize, Serialize};
use tracing::debug;

use crate::{
    siots::SiotsBuilder,
    types::*,
};

/// Clamps a fragment's range and sets its buffer accounting
pub trait ResourceLimiter {
    fn limit(&self, builder: &mut SiotsBuilder) -> Result<()>;
}

/// Tunable ceilings shared by the limiters
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct LimitConfig {
    /// Most blocks any one fragment may cover
    pub max_blocks_per_request: BlockCountT,
    /// Most blocks of buffer any one fragment may allocate
    pub max_buffer_blocks: BlockCountT,
}

impl Default for LimitConfig {
    fn default() -> Self {
        LimitConfig {
            max_blocks_per_request: 0x800,
            max_buffer_blocks: 0x1000,
        }
    }
}

fn clamp(builder: &mut SiotsBuilder, budget: BlockCountT) {
    if builder.xfer_count() > budget {
        debug!(
            xfer_count = builder.xfer_count(),
            budget,
            "clamping fragment to resource budget"
        );
        builder.narrow(budget);
    }
}

/// Reads touch one position and borrow the host buffer
#[derive(Clone, Copy, Debug)]
pub struct ReadLimiter {
    config: LimitConfig,
}

impl ReadLimiter {
    pub fn new(config: LimitConfig) -> Self {
        ReadLimiter { config }
    }
}

impl ResourceLimiter for ReadLimiter {
    fn limit(&self, builder: &mut SiotsBuilder) -> Result<()> {
        clamp(builder, self.config.max_blocks_per_request);
        builder.set_blocks_to_allocate(0);
        builder.set_optimal_page_size(1, 0);
        Ok(())
    }
}

/// Writes fan out to every position; an unaligned write also buffers the
/// pre-read envelope around its edges
#[derive(Clone, Copy, Debug)]
pub struct WriteLimiter {
    config: LimitConfig,
    blocks_per_physical: u32,
}

impl WriteLimiter {
    pub fn new(config: LimitConfig, blocks_per_physical: u32) -> Self {
        WriteLimiter { config, blocks_per_physical }
    }

    /// Blocks of buffer needed for the edge pre-reads of an unaligned
    /// range
    fn preread_blocks(&self, start_lba: LbaT, xfer_count: BlockCountT)
        -> BlockCountT
    {
        let bpp = BlockCountT::from(self.blocks_per_physical);
        let mut blocks = 0;
        if start_lba % bpp != 0 {
            blocks += bpp;
        }
        if (start_lba + xfer_count) % bpp != 0 {
            blocks += bpp;
        }
        blocks
    }
}

impl ResourceLimiter for WriteLimiter {
    fn limit(&self, builder: &mut SiotsBuilder) -> Result<()> {
        clamp(builder, self.config.max_blocks_per_request);
        let preread =
            self.preread_blocks(builder.start_lba(), builder.xfer_count());
        builder.set_blocks_to_allocate(preread);
        builder.set_optimal_page_size(builder.width(), preread);
        Ok(())
    }
}

/// Rebuilds read from the survivors and write to the rebuilding
/// positions, buffering the whole range
#[derive(Clone, Copy, Debug)]
pub struct RebuildLimiter {
    config: LimitConfig,
}

impl RebuildLimiter {
    pub fn new(config: LimitConfig) -> Self {
        RebuildLimiter { config }
    }
}

impl ResourceLimiter for RebuildLimiter {
    fn limit(&self, builder: &mut SiotsBuilder) -> Result<()> {
        let budget = self.config.max_blocks_per_request
            .min(self.config.max_buffer_blocks);
        clamp(builder, budget);
        builder.set_blocks_to_allocate(builder.xfer_count());
        builder.set_optimal_page_size(builder.width(),
                                      builder.xfer_count());
        Ok(())
    }
}

/// Verifies read every position's copy of the range
#[derive(Clone, Copy, Debug)]
pub struct VerifyLimiter {
    config: LimitConfig,
}

impl VerifyLimiter {
    pub fn new(config: LimitConfig) -> Self {
        VerifyLimiter { config }
    }
}

impl ResourceLimiter for VerifyLimiter {
    fn limit(&self, builder: &mut SiotsBuilder) -> Result<()> {
        let width = BlockCountT::from(builder.width());
        // Every position's copy gets buffered, so the per-fragment budget
        // divides by the width.
        let budget = (self.config.max_buffer_blocks / width.max(1))
            .min(self.config.max_blocks_per_request)
            .max(1);
        clamp(builder, budget);
        builder.set_blocks_to_allocate(builder.xfer_count() * width);
        builder.set_optimal_page_size(builder.width(),
                                      builder.blocks_to_allocate());
        Ok(())
    }
}

// LCOV_EXCL_START
#[cfg(test)]
mod t {
    use super::*;
    use crate::siots::SiotsRequest;

    fn builder(start_lba: LbaT, xfer_count: BlockCountT) -> SiotsBuilder {
        let req = SiotsRequest {
            opcode: BlockOpcode::Read,
            start_lba,
            xfer_count,
            nested: false,
            parent: None,
        };
        SiotsBuilder::new(&req, 3)
    }

    mod read {
        use pretty_assertions::assert_eq;
        use super::*;

        #[test]
        fn within_budget() {
            let limiter = ReadLimiter::new(LimitConfig::default());
            let mut b = builder(0x100, 0x80);
            limiter.limit(&mut b).unwrap();
            assert_eq!(b.xfer_count(), 0x80);
            assert_eq!(b.blocks_to_allocate(), 0);
        }

        #[test]
        fn clamped() {
            let limiter = ReadLimiter::new(LimitConfig::default());
            let mut b = builder(0x100, 0x2000);
            limiter.limit(&mut b).unwrap();
            assert_eq!(b.xfer_count(), 0x800);
        }
    }

    mod write {
        use pretty_assertions::assert_eq;
        use super::*;

        #[test]
        fn aligned() {
            let limiter = WriteLimiter::new(LimitConfig::default(), 8);
            let mut b = builder(0x100, 0x80);
            limiter.limit(&mut b).unwrap();
            assert_eq!(b.blocks_to_allocate(), 0);
        }

        #[test]
        fn unaligned_both_edges() {
            let limiter = WriteLimiter::new(LimitConfig::default(), 8);
            let mut b = builder(0x101, 0x80);
            limiter.limit(&mut b).unwrap();
            assert_eq!(b.xfer_count(), 0x80);
            assert_eq!(b.blocks_to_allocate(), 16);
        }

        #[test]
        fn unaligned_end_only() {
            let limiter = WriteLimiter::new(LimitConfig::default(), 8);
            let mut b = builder(0x100, 0x81);
            limiter.limit(&mut b).unwrap();
            assert_eq!(b.blocks_to_allocate(), 8);
        }
    }

    mod rebuild {
        use pretty_assertions::assert_eq;
        use super::*;

        #[test]
        fn buffers_whole_range() {
            let limiter = RebuildLimiter::new(LimitConfig::default());
            let mut b = builder(0x100, 0x80);
            limiter.limit(&mut b).unwrap();
            assert_eq!(b.blocks_to_allocate(), 0x80);
        }

        #[test]
        fn clamped_by_buffer_budget() {
            let config = LimitConfig {
                max_blocks_per_request: 0x800,
                max_buffer_blocks: 0x40,
            };
            let limiter = RebuildLimiter::new(config);
            let mut b = builder(0x100, 0x80);
            limiter.limit(&mut b).unwrap();
            assert_eq!(b.xfer_count(), 0x40);
        }
    }

    mod verify {
        use pretty_assertions::assert_eq;
        use super::*;

        #[test]
        fn budget_divides_by_width() {
            let config = LimitConfig {
                max_blocks_per_request: 0x800,
                max_buffer_blocks: 0xc0,
            };
            let limiter = VerifyLimiter::new(config);
            let mut b = builder(0x100, 0x80);
            limiter.limit(&mut b).unwrap();
            assert_eq!(b.xfer_count(), 0x40);
            assert_eq!(b.blocks_to_allocate(), 0xc0);
        }
    }
}
// LCOV_EXCL_STOP
