// vim: tw=80
//! Parent I/O tracking structure
//!
//! An [`Iots`] describes one host request in flight against a redundancy
//! group.  Generation carves it into fragments; the parent tracks how many
//! blocks remain unassigned and owns the lock that serializes generation
//! for it.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
    Mutex,
    MutexGuard,
};

use crate::types::*;

type Callback = Arc<dyn Fn() + Send + Sync>;

/// One host I/O against a redundancy group
pub struct Iots {
    opcode: BlockOpcode,
    start_lba: LbaT,
    xfer_count: BlockCountT,
    /// Blocks of the host range not yet covered by a fragment
    remaining_blocks: AtomicU64,
    callback: Option<Callback>,
    generate_lock: Mutex<()>,
}

impl Iots {
    pub fn new(
        opcode: BlockOpcode,
        start_lba: LbaT,
        xfer_count: BlockCountT,
        callback: Option<Callback>,
    ) -> Self
    {
        Iots {
            opcode,
            start_lba,
            xfer_count,
            remaining_blocks: AtomicU64::new(xfer_count),
            callback,
            generate_lock: Mutex::new(()),
        }
    }

    pub fn opcode(&self) -> BlockOpcode {
        self.opcode
    }

    pub fn start_lba(&self) -> LbaT {
        self.start_lba
    }

    pub fn xfer_count(&self) -> BlockCountT {
        self.xfer_count
    }

    pub fn has_callback(&self) -> bool {
        self.callback.is_some()
    }

    /// Account `count` blocks of the host range as covered
    pub fn dec_blocks(&self, count: BlockCountT) {
        self.remaining_blocks.fetch_sub(count, Ordering::Relaxed);
    }

    pub fn remaining(&self) -> BlockCountT {
        self.remaining_blocks.load(Ordering::Relaxed)
    }

    /// Serialize fragment generation for this request.
    ///
    /// Held only across one generation pass, never across fragment
    /// execution.
    pub fn lock_generate(&self) -> MutexGuard<()> {
        self.generate_lock.lock().unwrap()
    }
}

impl std::fmt::Debug for Iots {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Iots")
            .field("opcode", &self.opcode)
            .field("start_lba", &self.start_lba)
            .field("xfer_count", &self.xfer_count)
            .field("remaining_blocks", &self.remaining())
            .field("has_callback", &self.has_callback())
            .finish()
    }
}

// LCOV_EXCL_STOP
