//! Various utilities functions and types

mod geometry;
#[cfg_attr(not(feature = "allocator_memory"), allow(dead_code))]
pub(crate) mod ids;

pub use self::geometry::{Buffer, Size};
