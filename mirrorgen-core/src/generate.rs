// vim: tw=80
//! Fragment generation for mirrored redundancy groups
//!
//! The [`MirrorGenerator`] is the entry point for carving one host request
//! into executable fragments.  Each call to [`generate`] produces at most
//! one fragment covering a prefix of the requested range; the caller keeps
//! calling with the remainder until the parent's remaining-block count
//! reaches zero.
//!
//! Generation is pure decision logic.  The generator reads layout through
//! [`RaidGeometry`], degradation through [`DegradedResolver`], and hands
//! every outcome to a [`StateMachine`]; it never performs drive I/O and
//! never blocks on fragment execution.
//!
//! [`generate`]: MirrorGenerator::generate

use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::{
    degraded::DegradedResolver,
    geometry::{RaidGeometry, RaidGroupType},
    iots::Iots,
    limit::ResourceLimiter,
    position::PositionSelector,
    siots::{Siots, SiotsBuilder, SiotsRequest},
    transition::{EntryState, ExecutionStatus, StateMachine},
    types::*,
    util::roundup,
};

/// The verify range a fragment's recovery path should cover
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct RecoveryVerifyRange {
    pub start_lba: LbaT,
    pub xfer_count: BlockCountT,
    /// True when the verify exists to recover data for another operation,
    /// false when the operation's own protocol requires it
    pub is_recovery: bool,
}

enum Outcome {
    /// A fragment was handed off (or completed in place)
    Ran,
    /// The opcode is not one the mirror engine serves
    InvalidOpcode,
}

/// Generates fragments for one mirrored redundancy group
#[derive(Clone)]
pub struct MirrorGenerator {
    geometry: Arc<dyn RaidGeometry + Send + Sync>,
    resolver: Arc<dyn DegradedResolver + Send + Sync>,
    read_limit: Arc<dyn ResourceLimiter + Send + Sync>,
    write_limit: Arc<dyn ResourceLimiter + Send + Sync>,
    rebuild_limit: Arc<dyn ResourceLimiter + Send + Sync>,
    verify_limit: Arc<dyn ResourceLimiter + Send + Sync>,
    selector: Arc<dyn PositionSelector + Send + Sync>,
    machine: Arc<dyn StateMachine + Send + Sync>,
}

impl MirrorGenerator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        geometry: Arc<dyn RaidGeometry + Send + Sync>,
        resolver: Arc<dyn DegradedResolver + Send + Sync>,
        read_limit: Arc<dyn ResourceLimiter + Send + Sync>,
        write_limit: Arc<dyn ResourceLimiter + Send + Sync>,
        rebuild_limit: Arc<dyn ResourceLimiter + Send + Sync>,
        verify_limit: Arc<dyn ResourceLimiter + Send + Sync>,
        selector: Arc<dyn PositionSelector + Send + Sync>,
        machine: Arc<dyn StateMachine + Send + Sync>,
    ) -> Self
    {
        MirrorGenerator {
            geometry,
            resolver,
            read_limit,
            write_limit,
            rebuild_limit,
            verify_limit,
            selector,
            machine,
        }
    }

    /// Run one generation pass for `req`, a slice of `iots`'s range.
    ///
    /// Every path through this function reaches the state machine exactly
    /// once with the pass's outcome, then contends for the parent's
    /// generation slot so a queued sibling pass can be released.
    pub fn generate(&self, iots: &Iots, req: &SiotsRequest)
        -> ExecutionStatus
    {
        match self.generate_inner(iots, req) {
            Ok(Outcome::Ran) => {},
            Ok(Outcome::InvalidOpcode) => {
                warn!(opcode = ?req.opcode, "opcode not served by mirror");
                self.machine.fail_invalid_opcode(req.opcode);
            },
            Err(e) => {
                error!(opcode = ?req.opcode, error = %e,
                       "fragment generation failed");
                self.machine.fail_unexpected(req.opcode, e);
            },
        }
        if self.machine.acquire_generate_lock(iots) ==
            ExecutionStatus::Waiting
        {
            debug!("generation pass queued behind an earlier one");
        }
        ExecutionStatus::Executing
    }

    fn generate_inner(&self, iots: &Iots, req: &SiotsRequest)
        -> Result<Outcome>
    {
        if !iots.has_callback() {
            return Err(Error::MissingCallback);
        }
        let geo = self.geometry.snapshot(req.start_lba, req.xfer_count)?;
        if let Some(copy_offset) = self.geometry.metadata_copy_offset() {
            let metadata_start = self.geometry.metadata_start_lba();
            if req.start_lba >= metadata_start {
                return Err(Error::MultipleMetadataCopies {
                    metadata_start,
                    copy_offset,
                });
            }
        }

        let mut builder = SiotsBuilder::new(req, geo.width);
        let entry = match OpClass::from(req.opcode) {
            OpClass::Read => {
                if req.nested {
                    self.gen_verify(&mut builder)?
                } else {
                    self.gen_read(&mut builder)?
                }
            },
            OpClass::WriteFamily(_) => self.gen_write(&mut builder)?,
            OpClass::Rebuild => self.gen_rebuild(&mut builder)?,
            OpClass::Verify(_) => self.gen_verify(&mut builder)?,
            OpClass::Zero => self.gen_zero(&mut builder)?,
            OpClass::CheckZeroed => self.gen_check_zeroed(&mut builder)?,
            OpClass::Rekey => self.gen_rekey(&mut builder)?,
            OpClass::Unsupported => return Ok(Outcome::InvalidOpcode),
        };

        let siots = builder.finish()?;
        // Nested fragments re-cover blocks the parent already accounted
        // for; decrementing again would undercount the host range.
        if !req.nested {
            iots.dec_blocks(siots.xfer_count());
        }
        debug!(
            opcode = ?siots.opcode(),
            algorithm = ?siots.algorithm(),
            start_lba = siots.start_lba(),
            xfer_count = siots.xfer_count(),
            degraded = siots.degraded().degraded_count(),
            "generated fragment"
        );
        match entry {
            Some(entry) => self.machine.transition(siots, entry),
            None => self.machine.complete_success(siots),
        }
        Ok(Outcome::Ran)
    }

    fn gen_read(&self, b: &mut SiotsBuilder) -> Result<Option<EntryState>> {
        b.set_algorithm(Algorithm::Read);
        b.set_data_disks(1);
        self.read_limit.limit(b)?;
        self.resolver.resolve(b, false)?;
        let (primary, secondary) = self.selector.select(b.degraded())?;
        b.set_positions(primary, secondary);
        b.set_retry_count(DEFAULT_RETRY_COUNT);
        b.set_drive_operations(1);
        Ok(Some(EntryState::Read0))
    }

    fn gen_write(&self, b: &mut SiotsBuilder) -> Result<Option<EntryState>> {
        // A nested write-family fragment is the pre-read pass of an
        // unaligned write, which is a recovery verify.  The zero
        // generator's redirection lands here too, so the check lives in
        // the generator rather than the dispatcher.
        if b.nested() {
            return self.gen_verify(b);
        }
        let algorithm = match b.opcode() {
            BlockOpcode::Write |
            BlockOpcode::WriteVerify |
            BlockOpcode::WriteNoncached |
            BlockOpcode::Zero |
            BlockOpcode::RekeyWrite |
            BlockOpcode::RekeyWriteZeros |
            BlockOpcode::WriteZeros |
            BlockOpcode::RekeyZero => Algorithm::Write,
            BlockOpcode::CorruptData => Algorithm::CorruptData,
            BlockOpcode::VerifyWrite => Algorithm::VerifyWrite,
            opcode => {
                return Err(Error::UnsupportedOpcode {
                    opcode,
                    path: "write",
                })
            },
        };
        b.set_algorithm(algorithm);
        b.set_data_disks(b.width());
        self.write_limit.limit(b)?;
        self.resolver.resolve(b, false)?;
        let (primary, secondary) = self.selector.select(b.degraded())?;
        b.set_positions(primary, secondary);
        b.set_retry_count(DEFAULT_RETRY_COUNT);
        b.set_drive_operations(b.width());
        Ok(Some(EntryState::Write0))
    }

    fn gen_zero(&self, b: &mut SiotsBuilder) -> Result<Option<EntryState>> {
        // A raw mirror's blocks carry stamps, so even a zero writes real
        // block contents.  Unaligned zeros need the write path's edge
        // pre-reads.
        if b.opcode() == BlockOpcode::Zero && self.geometry.is_raw_mirror()
        {
            return self.gen_write(b);
        }
        if self.geometry.needs_alignment(b.start_lba(), b.xfer_count()) {
            return self.gen_write(b);
        }
        b.set_algorithm(Algorithm::Zero);
        b.set_data_disks(b.width());
        self.resolver.resolve(b, false)?;
        let (primary, secondary) = self.selector.select(b.degraded())?;
        b.set_positions(primary, secondary);
        b.set_blocks_to_allocate(0);
        b.set_optimal_page_size(b.width(), 0);
        b.set_retry_count(DEFAULT_RETRY_COUNT);
        b.set_drive_operations(b.width());
        Ok(Some(EntryState::Zero0))
    }

    fn gen_rebuild(&self, b: &mut SiotsBuilder)
        -> Result<Option<EntryState>>
    {
        let algorithm = match self.geometry.raid_type() {
            RaidGroupType::Raid1 |
            RaidGroupType::MirrorUnderStriper |
            RaidGroupType::MetadataMirror |
            RaidGroupType::RawMirror => Algorithm::Rebuild,
            RaidGroupType::Spare => {
                if self.geometry.is_hot_sparing() {
                    Algorithm::Copy
                } else {
                    Algorithm::ProactiveCopy
                }
            },
        };
        b.set_algorithm(algorithm);
        b.set_data_disks(b.width());
        self.rebuild_limit.limit(b)?;
        self.resolver.resolve(b, false)?;
        let degraded_count = b.degraded().degraded_count();
        b.set_data_disks(b.width() - degraded_count);
        let (primary, secondary) = self.selector.select(b.degraded())?;
        b.set_positions(primary, secondary);
        b.set_retry_count(DEFAULT_RETRY_COUNT);
        b.set_drive_operations(b.width() - degraded_count);
        if degraded_count == 0 {
            // Nothing in this prefix needs rebuilding; its blocks are
            // consumed without touching any drive.
            debug!(start_lba = b.start_lba(), xfer_count = b.xfer_count(),
                   "rebuild range already consistent");
            Ok(None)
        } else {
            Ok(Some(EntryState::Rebuild0))
        }
    }

    fn gen_verify(&self, b: &mut SiotsBuilder)
        -> Result<Option<EntryState>>
    {
        let nested = b.nested();
        let algorithm = if nested {
            match b.opcode() {
                BlockOpcode::Read |
                BlockOpcode::Write |
                BlockOpcode::WriteNoncached |
                BlockOpcode::Zero |
                BlockOpcode::CorruptData |
                BlockOpcode::RekeyWrite => Algorithm::RecoveryVerify,
                BlockOpcode::VerifyWrite => Algorithm::VerifyWrite,
                opcode => {
                    return Err(Error::UnsupportedOpcode {
                        opcode,
                        path: "nested verify",
                    })
                },
            }
        } else {
            match b.opcode() {
                BlockOpcode::Verify |
                BlockOpcode::ReadOnlyVerify |
                BlockOpcode::ErrorVerify |
                BlockOpcode::IncompleteWriteVerify |
                BlockOpcode::SystemVerify |
                BlockOpcode::VerifySpecificArea |
                BlockOpcode::ReadOnlyVerifySpecificArea => {
                    if self.geometry.is_sparing() {
                        Algorithm::CopyVerify
                    } else {
                        Algorithm::Verify
                    }
                },
                BlockOpcode::VerifyWithBuffer => Algorithm::VerifyWithBuffer,
                opcode => {
                    return Err(Error::UnsupportedOpcode {
                        opcode,
                        path: "verify",
                    })
                },
            }
        };
        b.set_algorithm(algorithm);
        b.set_data_disks(b.width());
        let max = self.geometry.max_blocks_per_drive();
        if b.xfer_count() > max {
            b.narrow(max);
        }
        self.verify_limit.limit(b)?;
        // A standalone verify may split around a fully dead region; a
        // nested one must read its exact range or fail.
        self.resolver.resolve(b, !nested)?;
        let degraded_count = b.degraded().degraded_count();
        b.set_data_disks(b.width() - degraded_count);
        let (primary, secondary) = match self.selector.select(b.degraded())
        {
            Ok(positions) => positions,
            // Every position degraded: data_disks is zero and validation
            // rejects the fragment.
            Err(_) => (0, None),
        };
        b.set_positions(primary, secondary);
        b.set_retry_count(DEFAULT_RETRY_COUNT);
        b.set_drive_operations(b.width() - degraded_count);
        Ok(Some(EntryState::Verify0))
    }

    fn gen_rekey(&self, b: &mut SiotsBuilder) -> Result<Option<EntryState>> {
        b.set_algorithm(Algorithm::Rekey);
        b.set_data_disks(1);
        self.resolver.resolve(b, false)?;
        let (primary, secondary) = self.selector.select(b.degraded())?;
        b.set_positions(primary, secondary);
        b.set_blocks_to_allocate(0);
        b.set_optimal_page_size(1, b.xfer_count());
        b.set_retry_count(DEFAULT_RETRY_COUNT);
        b.set_drive_operations(1);
        Ok(Some(EntryState::Rekey0))
    }

    fn gen_check_zeroed(&self, b: &mut SiotsBuilder)
        -> Result<Option<EntryState>>
    {
        b.set_algorithm(Algorithm::CheckZeroed);
        b.set_data_disks(b.width());
        self.resolver.resolve(b, false)?;
        let degraded_count = b.degraded().degraded_count();
        b.set_data_disks(b.width() - degraded_count);
        let (primary, secondary) = self.selector.select(b.degraded())?;
        b.set_positions(primary, secondary);
        b.set_blocks_to_allocate(0);
        b.set_page_size(PAGE_SIZE_STD);
        b.set_retry_count(DEFAULT_RETRY_COUNT);
        b.set_drive_operations(b.width() - degraded_count);
        Ok(Some(EntryState::CheckZeroed0))
    }

    /// Compute the range a recovery verify spawned under `parent` should
    /// cover.
    ///
    /// The range starts at the parent's redundancy range and its end is
    /// rounded up to the group's optimal block size, so the verify always
    /// evaluates whole optimal blocks.  The start is left unaligned; blocks
    /// before the parent's range were not implicated by its failure.
    pub fn recovery_verify_range(
        &self,
        parent: &Siots,
        opcode: BlockOpcode,
    ) -> Result<RecoveryVerifyRange>
    {
        let is_recovery = match opcode {
            BlockOpcode::Read |
            BlockOpcode::Write |
            BlockOpcode::WriteNoncached |
            BlockOpcode::Zero |
            BlockOpcode::CorruptData |
            BlockOpcode::RekeyWrite |
            BlockOpcode::RekeyWriteZeros |
            BlockOpcode::RekeyZero |
            BlockOpcode::WriteZeros => true,
            BlockOpcode::VerifyWrite => false,
            opcode => {
                return Err(Error::UnsupportedOpcode {
                    opcode,
                    path: "recovery verify range",
                })
            },
        };
        let start_lba = parent.parity_start();
        let end = start_lba + parent.parity_count();
        let aligned_end =
            roundup(end, u64::from(self.geometry.optimal_block_size()));
        Ok(RecoveryVerifyRange {
            start_lba,
            xfer_count: aligned_end - start_lba,
            is_recovery,
        })
    }
}

// LCOV_EXCL_STOP
