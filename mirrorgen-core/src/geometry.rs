// vim: tw=80
//! Geometry provider for mirrored redundancy groups
//!
//! The generation engine never owns the physical layout; it consumes it
//! through the narrow [`RaidGeometry`] contract.  [`MirrorGeometry`] is the
//! standard implementation, configured by the control plane.

#[cfg(test)]
use mockall::automock;
use serde_derive::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::*;

/// The flavors of redundancy group the mirror engine serves
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum RaidGroupType {
    /// A user-visible RAID-1 group
    Raid1,
    /// An internal mirror sitting underneath a striper
    MirrorUnderStriper,
    /// An internal mirror holding paged metadata
    MetadataMirror,
    /// A raw mirror: blocks carry their own sequence/validity stamps
    RawMirror,
    /// A sparing group, used for hot-spare and proactive-copy operations
    Spare,
}

/// Layout snapshot for one fragment's LBA range, taken at generation time.
///
/// Mirrors store identical data at identical offsets on every position, so
/// the snapshot is small: the group width and how much of the configured
/// extent remains past the fragment's start.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GeometrySnapshot {
    pub width: u32,
    pub blocks_remaining: BlockCountT,
}

/// Physical layout oracle for one redundancy group.
///
/// All methods are synchronous and infallible except [`snapshot`], which
/// validates the range.
///
/// [`snapshot`]: RaidGeometry::snapshot
#[cfg_attr(test, automock)]
pub trait RaidGeometry {
    fn uuid(&self) -> Uuid;

    fn width(&self) -> u32;

    fn raid_type(&self) -> RaidGroupType;

    /// Alignment granularity for verify and recovery ranges, in blocks
    fn optimal_block_size(&self) -> u32;

    /// Ceiling on the block count any single position may be asked to
    /// transfer in one fragment
    fn max_blocks_per_drive(&self) -> BlockCountT;

    fn is_raw_mirror(&self) -> bool;

    fn is_sparing(&self) -> bool;

    /// True when the sparing group is serving a hot spare rather than a
    /// proactive replacement
    fn is_hot_sparing(&self) -> bool;

    /// True when the range is not aligned to the physical block size, so a
    /// write (or zero) of it needs an edge pre-read
    fn needs_alignment(&self, start_lba: LbaT, xfer_count: BlockCountT)
        -> bool;

    fn metadata_start_lba(&self) -> LbaT;

    /// Offset of a second metadata copy, if one is configured.  The mirror
    /// engine rejects I/O to groups that have one.
    fn metadata_copy_offset(&self) -> Option<LbaT>;

    /// Compute the layout snapshot for `[start_lba, start_lba+xfer_count)`
    fn snapshot(&self, start_lba: LbaT, xfer_count: BlockCountT)
        -> Result<GeometrySnapshot>;
}

/// Control-plane configuration for a [`MirrorGeometry`]
#[derive(Clone, Copy, Debug, Deserialize, Serialize)]
pub struct GeometryConfig {
    pub width: u32,
    pub raid_type: RaidGroupType,
    /// Total capacity of the group, in blocks per position
    pub capacity: LbaT,
    pub optimal_block_size: u32,
    /// Logical blocks per physical block; 8 for 512e drives with 4K physical
    /// sectors
    pub blocks_per_physical: u32,
    pub max_blocks_per_drive: BlockCountT,
    pub metadata_start_lba: LbaT,
    pub metadata_copy_offset: Option<LbaT>,
    /// Only meaningful for [`RaidGroupType::Spare`]
    pub hot_sparing: bool,
}

/// The standard geometry provider
#[derive(Clone, Debug)]
pub struct MirrorGeometry {
    uuid: Uuid,
    config: GeometryConfig,
}

impl MirrorGeometry {
    pub fn new(config: GeometryConfig) -> Self {
        MirrorGeometry {
            uuid: Uuid::new_v4(),
            config,
        }
    }

    pub fn open(uuid: Uuid, config: GeometryConfig) -> Self {
        MirrorGeometry { uuid, config }
    }
}

impl RaidGeometry for MirrorGeometry {
    fn uuid(&self) -> Uuid {
        self.uuid
    }

    fn width(&self) -> u32 {
        self.config.width
    }

    fn raid_type(&self) -> RaidGroupType {
        self.config.raid_type
    }

    fn optimal_block_size(&self) -> u32 {
        self.config.optimal_block_size
    }

    fn max_blocks_per_drive(&self) -> BlockCountT {
        self.config.max_blocks_per_drive
    }

    fn is_raw_mirror(&self) -> bool {
        self.config.raid_type == RaidGroupType::RawMirror
    }

    fn is_sparing(&self) -> bool {
        self.config.raid_type == RaidGroupType::Spare
    }

    fn is_hot_sparing(&self) -> bool {
        self.is_sparing() && self.config.hot_sparing
    }

    fn needs_alignment(&self, start_lba: LbaT, xfer_count: BlockCountT)
        -> bool
    {
        let bpp = BlockCountT::from(self.config.blocks_per_physical);
        start_lba % bpp != 0 || (start_lba + xfer_count) % bpp != 0
    }

    fn metadata_start_lba(&self) -> LbaT {
        self.config.metadata_start_lba
    }

    fn metadata_copy_offset(&self) -> Option<LbaT> {
        self.config.metadata_copy_offset
    }

    fn snapshot(&self, start_lba: LbaT, xfer_count: BlockCountT)
        -> Result<GeometrySnapshot>
    {
        let end = start_lba.checked_add(xfer_count)
            .ok_or(Error::InvalidRange { start_lba, xfer_count })?;
        if xfer_count == 0 || end > self.config.capacity {
            return Err(Error::InvalidRange { start_lba, xfer_count });
        }
        Ok(GeometrySnapshot {
            width: self.config.width,
            blocks_remaining: self.config.capacity - start_lba,
        })
    }
}

// LCOV_EXCL_STOP
