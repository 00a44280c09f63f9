// vim: tw=80
//! Fragment generation engine for mirrored redundancy groups
//!
//! Carves host I/O requests against RAID-1 style mirrors into validated,
//! executable fragments: reads pick a position, writes fan out to every
//! position, rebuilds and verifies narrow themselves to uniformly degraded
//! ranges.  The engine makes decisions only; drive I/O, buffering, and
//! state-machine execution belong to the caller.

pub mod degraded;
pub mod generate;
pub mod geometry;
pub mod iots;
pub mod limit;
pub mod position;
pub mod siots;
pub mod transition;
pub mod types;
pub mod util;

pub use crate::types::*;
