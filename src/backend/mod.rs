//! Buffer allocation and handoff helpers
//!
//! - [`allocator`] describes buffers and how they are created
//! - [`swapper`] moves ownership of a fixed set of buffers between a client and the compositor

pub mod allocator;
pub mod swapper;
