// vim: tw=80
//! Common type definitions used throughout the mirror generation engine

use enum_primitive_derive::Primitive;
use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

use crate::geometry::RaidGroupType;

/// Indexes an LBA.  LBAs are always 4096 bytes
pub type LbaT = u64;

/// A count of blocks, in the same units as [`LbaT`]
pub type BlockCountT = u64;

/// Indexes one replica position within a mirror group
pub type PositionT = u32;

/// Widest mirror supported: a 3-way mirror
pub const MAX_WIDTH: u32 = 3;

/// Narrowest mirror accepted by validation.  A single-position "mirror" has
/// no redundancy, but raw-mirror bootstrap uses it.
pub const MIN_WIDTH: u32 = 1;

/// Retry hint handed to the downstream state machines.  This layer never
/// retries anything itself.
pub const DEFAULT_RETRY_COUNT: u32 = 3;

/// Standard allocation page size, in blocks
pub const PAGE_SIZE_STD: u32 = 64;

/// Maximum allocation page size, in blocks
pub const PAGE_SIZE_MAX: u32 = 1024;

/// Block operation opcodes accepted from the layer above.
///
/// The numeric values exist so upstream payloads can round-trip opcodes
/// through `u32`.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Primitive, Serialize)]
pub enum BlockOpcode {
    Nop                         = 0,
    Read                        = 1,
    Write                       = 2,
    WriteVerify                 = 3,
    WriteNoncached              = 4,
    VerifyWrite                 = 5,
    CorruptData                 = 6,
    RekeyWrite                  = 7,
    RekeyWriteZeros             = 8,
    WriteZeros                  = 9,
    Zero                        = 10,
    UnmarkZero                  = 11,
    RekeyZero                   = 12,
    CheckZeroed                 = 13,
    Rebuild                     = 14,
    RekeyReadPaged              = 15,
    Verify                      = 16,
    ReadOnlyVerify              = 17,
    ErrorVerify                 = 18,
    IncompleteWriteVerify       = 19,
    SystemVerify                = 20,
    VerifySpecificArea          = 21,
    ReadOnlyVerifySpecificArea  = 22,
    VerifyWithBuffer            = 23,
}

/// Discriminates the write-family opcodes once they reach the write
/// generator.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WriteKind {
    Plain,
    WriteVerify,
    Noncached,
    RekeyWrite,
    RekeyWriteZeros,
    WriteZeros,
    CorruptData,
    VerifyWrite,
}

/// Discriminates the verify-family opcodes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VerifyKind {
    Standard,
    ReadOnly,
    Error,
    IncompleteWrite,
    System,
    SpecificArea,
    ReadOnlySpecificArea,
    WithBuffer,
}

/// Closed classification of every opcode into its generator family.
///
/// The dispatcher matches this exhaustively, so a new opcode cannot silently
/// fall through to the unsupported path.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OpClass {
    Read,
    WriteFamily(WriteKind),
    Rebuild,
    Verify(VerifyKind),
    Zero,
    CheckZeroed,
    Rekey,
    Unsupported,
}

impl From<BlockOpcode> for OpClass {
    fn from(opcode: BlockOpcode) -> Self {
        match opcode {
            BlockOpcode::Read => OpClass::Read,
            BlockOpcode::Write => OpClass::WriteFamily(WriteKind::Plain),
            BlockOpcode::WriteVerify =>
                OpClass::WriteFamily(WriteKind::WriteVerify),
            BlockOpcode::WriteNoncached =>
                OpClass::WriteFamily(WriteKind::Noncached),
            BlockOpcode::VerifyWrite =>
                OpClass::WriteFamily(WriteKind::VerifyWrite),
            BlockOpcode::CorruptData =>
                OpClass::WriteFamily(WriteKind::CorruptData),
            BlockOpcode::RekeyWrite =>
                OpClass::WriteFamily(WriteKind::RekeyWrite),
            BlockOpcode::RekeyWriteZeros =>
                OpClass::WriteFamily(WriteKind::RekeyWriteZeros),
            BlockOpcode::WriteZeros =>
                OpClass::WriteFamily(WriteKind::WriteZeros),
            BlockOpcode::Zero |
            BlockOpcode::UnmarkZero |
            BlockOpcode::RekeyZero => OpClass::Zero,
            BlockOpcode::CheckZeroed => OpClass::CheckZeroed,
            BlockOpcode::Rebuild => OpClass::Rebuild,
            BlockOpcode::RekeyReadPaged => OpClass::Rekey,
            BlockOpcode::Verify => OpClass::Verify(VerifyKind::Standard),
            BlockOpcode::ReadOnlyVerify =>
                OpClass::Verify(VerifyKind::ReadOnly),
            BlockOpcode::ErrorVerify => OpClass::Verify(VerifyKind::Error),
            BlockOpcode::IncompleteWriteVerify =>
                OpClass::Verify(VerifyKind::IncompleteWrite),
            BlockOpcode::SystemVerify => OpClass::Verify(VerifyKind::System),
            BlockOpcode::VerifySpecificArea =>
                OpClass::Verify(VerifyKind::SpecificArea),
            BlockOpcode::ReadOnlyVerifySpecificArea =>
                OpClass::Verify(VerifyKind::ReadOnlySpecificArea),
            BlockOpcode::VerifyWithBuffer =>
                OpClass::Verify(VerifyKind::WithBuffer),
            BlockOpcode::Nop => OpClass::Unsupported,
        }
    }
}

/// The algorithm a generated fragment is bound to.  Each value corresponds
/// to one downstream state machine.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Algorithm {
    Read,
    Write,
    Verify,
    RecoveryVerify,
    VerifyWrite,
    VerifyWithBuffer,
    Rebuild,
    Copy,
    ProactiveCopy,
    CopyVerify,
    Rekey,
    CorruptData,
    Zero,
    CheckZeroed,
}

/// The generation engine's error type.
///
/// Every variant is a parameter/validation error from the generators' point
/// of view.  The dispatcher is the single point that promotes any of them to
/// the fatal "unexpected error" fragment state.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum Error {
    #[error("opcode {opcode:?} not supported by the {path} path")]
    UnsupportedOpcode { opcode: BlockOpcode, path: &'static str },

    #[error("raid group type {raid_type:?} cannot be rebuilt")]
    UnsupportedRaidType { raid_type: RaidGroupType },

    #[error("lba range {start_lba:#x}..+{xfer_count:#x} is outside the group")]
    InvalidRange { start_lba: LbaT, xfer_count: BlockCountT },

    #[error("width {width} is outside [{MIN_WIDTH}, {MAX_WIDTH}]")]
    WidthOutOfRange { width: u32 },

    #[error("start position {start_pos} is not below width {width}")]
    StartPosOutOfRange { start_pos: PositionT, width: u32 },

    #[error("unset start position")]
    UnsetStartPos,

    #[error("data_disks {data_disks} is invalid for width {width}")]
    DataDisksOutOfRange { data_disks: u32, width: u32 },

    #[error("transfer count is zero")]
    ZeroTransferCount,

    #[error("parity count is zero")]
    ZeroParityCount,

    #[error("unset algorithm")]
    UnsetAlgorithm,

    #[error("page size {page_size} is not a supported page size")]
    InvalidPageSize { page_size: u32 },

    #[error("degraded bitmap is already populated")]
    DegradedAlreadySet,

    #[error("no readable position for the fragment's range")]
    NoReadablePosition,

    #[error("transaction completion callback is not set")]
    MissingCallback,

    #[error("multiple metadata copies are not supported \
             (metadata start {metadata_start:#x}, copy offset {copy_offset:#x})")]
    MultipleMetadataCopies { metadata_start: LbaT, copy_offset: LbaT },
}

pub type Result<T> = std::result::Result<T, Error>;

// LCOV_EXCL_START
#[cfg(test)]
mod t {
    use num_traits::{FromPrimitive, ToPrimitive};
    use pretty_assertions::assert_eq;
    use super::*;

    #[test]
    fn opcode_roundtrip() {
        for raw in 0..=23u32 {
            let opcode = BlockOpcode::from_u32(raw).unwrap();
            assert_eq!(opcode.to_u32().unwrap(), raw);
        }
        assert_eq!(BlockOpcode::from_u32(24), None);
    }

    #[test]
    fn classify_write_family() {
        assert_eq!(OpClass::from(BlockOpcode::Write),
                   OpClass::WriteFamily(WriteKind::Plain));
        assert_eq!(OpClass::from(BlockOpcode::VerifyWrite),
                   OpClass::WriteFamily(WriteKind::VerifyWrite));
        assert_eq!(OpClass::from(BlockOpcode::RekeyWriteZeros),
                   OpClass::WriteFamily(WriteKind::RekeyWriteZeros));
    }

    #[test]
    fn classify_zero_family() {
        for opcode in [BlockOpcode::Zero, BlockOpcode::UnmarkZero,
                       BlockOpcode::RekeyZero]
        {
            assert_eq!(OpClass::from(opcode), OpClass::Zero);
        }
    }

    #[test]
    fn classify_unsupported() {
        assert_eq!(OpClass::from(BlockOpcode::Nop), OpClass::Unsupported);
    }
}
// LCOV_EXCL_STOP
