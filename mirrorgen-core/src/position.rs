// vim: tw=80
//! Read-position selection
//!
//! Reads on a mirror can be served by any readable position.  The selector
//! picks the primary position a fragment reads from and, when one exists,
//! a secondary to fail over to.

use crate::{
    degraded::DegradedBitmap,
    types::*,
};

/// Picks the primary and failover positions for a fragment
pub trait PositionSelector {
    fn select(&self, degraded: &DegradedBitmap)
        -> Result<(PositionT, Option<PositionT>)>;
}

/// Selector that always prefers the lowest-indexed readable position.
///
/// Deterministic by construction, which keeps fragment generation
/// reproducible for a given degradation state.
#[derive(Clone, Copy, Debug, Default)]
pub struct PreferLowIndex;

impl PositionSelector for PreferLowIndex {
    fn select(&self, degraded: &DegradedBitmap)
        -> Result<(PositionT, Option<PositionT>)>
    {
        let mut readable = degraded.readable();
        let primary = readable.next().ok_or(Error::NoReadablePosition)?;
        Ok((primary, readable.next()))
    }
}

// LCOV_EXCL_STOP
