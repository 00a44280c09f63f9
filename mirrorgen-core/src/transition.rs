// vim: tw=80
//! Hand-off from generation to execution
//!
//! The generation engine never executes fragments itself.  Once a fragment
//! is validated the engine hands it to a [`StateMachine`], naming the
//! entry state the fragment should start executing in.

#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::{
    iots::Iots,
    siots::Siots,
    types::*,
};

/// What the caller should do after a generation pass
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ExecutionStatus {
    /// The pass ran to a decision; proceed
    Executing,
    /// The pass is queued behind another generation for the same parent
    Waiting,
}

/// First execution state for a freshly generated fragment
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EntryState {
    Read0,
    Write0,
    Zero0,
    Rebuild0,
    Verify0,
    Rekey0,
    CheckZeroed0,
}

/// Receives generated fragments and generation failures.
///
/// Implementations own fragment execution; the engine only ever calls in,
/// never waits on completion.
#[cfg_attr(test, automock)]
pub trait StateMachine {
    /// Start executing `siots` from `entry`
    fn transition(&self, siots: Siots, entry: EntryState);

    /// The fragment's work is already satisfied without any drive I/O
    fn complete_success(&self, siots: Siots);

    /// Generation failed in a way the engine could not express as a
    /// fragment
    fn fail_unexpected(&self, opcode: BlockOpcode, error: Error);

    /// The parent carried an opcode the mirror engine does not serve
    fn fail_invalid_opcode(&self, opcode: BlockOpcode);

    /// Acquire the parent's generation slot, reporting whether this pass
    /// may proceed now or must wait its turn
    fn acquire_generate_lock(&self, iots: &Iots) -> ExecutionStatus;
}

/// [`StateMachine`] that accepts everything and executes nothing.
///
/// Useful as a placeholder while wiring an execution backend, and in
/// tooling that only needs the generation decisions.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullStateMachine;

impl StateMachine for NullStateMachine {
    fn transition(&self, siots: Siots, entry: EntryState) {
        debug!(?entry, start_lba = siots.start_lba(),
               xfer_count = siots.xfer_count(), "discarding fragment");
    }

    fn complete_success(&self, siots: Siots) {
        debug!(start_lba = siots.start_lba(),
               xfer_count = siots.xfer_count(),
               "discarding completed fragment");
    }

    fn fail_unexpected(&self, opcode: BlockOpcode, error: Error) {
        debug!(?opcode, %error, "discarding generation failure");
    }

    fn fail_invalid_opcode(&self, opcode: BlockOpcode) {
        debug!(?opcode, "discarding invalid opcode");
    }

    fn acquire_generate_lock(&self, iots: &Iots) -> ExecutionStatus {
        let _guard = iots.lock_generate();
        ExecutionStatus::Executing
    }
}
