//! Buffer allocation and description.
//!
//! Collection of common traits and types around buffers, which are handed
//! between the client and the compositor by a [`BufferSwapper`](crate::backend::swapper::BufferSwapper).
//!
//! The swapping logic never allocates pixel storage on its own. It is handed a
//! list of pre-allocated buffers, either directly or through an [`Allocator`]
//! used by the [`SwapperFactory`](crate::backend::swapper::SwapperFactory).
//!
//! Allocators provided:
//! - CPU memory through [`memory::MemoryAllocator`]
//!
//! Helpers:
//! - [`format`] tables to look up the memory layout of a [`Fourcc`]

use std::fmt;

use crate::utils::{Buffer as BufferCoords, Size};

pub mod format;
#[cfg(feature = "allocator_memory")]
pub mod memory;

pub use drm_fourcc::DrmFourcc as Fourcc;

/// Opaque identifier of a buffer
///
/// Ids are unique among all live buffers of one allocator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) usize);

impl BufferId {
    /// Create an id from its raw value.
    ///
    /// Allocators outside of this crate use this to expose their own identifiers.
    pub fn from_raw(id: usize) -> BufferId {
        BufferId(id)
    }

    /// Raw value of this id
    pub fn as_raw(&self) -> usize {
        self.0
    }
}

impl fmt::Display for BufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buffer#{}", self.0)
    }
}

/// Intended usage of a buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    /// Rendered to by the gpu and sampled or scanned out without cpu access
    Hardware,
    /// Written by the cpu
    Software,
}

/// Static description of the buffers handled by one swapper.
///
/// The properties are fixed for the lifetime of the swapper.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferProperties {
    /// Dimensions of the buffers
    pub size: Size<i32, BufferCoords>,
    /// Pixel format of the buffers
    pub format: Fourcc,
    /// Intended usage of the buffers
    pub usage: BufferUsage,
}

impl BufferProperties {
    /// Create a new set of buffer properties
    pub fn new(size: impl Into<Size<i32, BufferCoords>>, format: Fourcc, usage: BufferUsage) -> Self {
        BufferProperties {
            size: size.into(),
            format,
            usage,
        }
    }
}

/// Common trait describing the properties of buffers passed through a swapper.
///
/// Buffers are shared between the swapper and the role currently holding them,
/// so they travel as `Arc<B>`. The pixel storage is freed once the last reference is dropped.
pub trait Buffer {
    /// Identifier of this buffer
    fn id(&self) -> BufferId;
    /// Size (w x h) of the two-dimensional buffer
    fn size(&self) -> Size<i32, BufferCoords>;
    /// Width of the two-dimensional buffer
    fn width(&self) -> u32 {
        self.size().w as u32
    }
    /// Height of the two-dimensional buffer
    fn height(&self) -> u32 {
        self.size().h as u32
    }
    /// Number of bytes between the start of two consecutive rows
    fn stride(&self) -> u32;
    /// Pixel format of the buffer
    fn format(&self) -> Fourcc;
}

/// Interface to create Buffers
pub trait Allocator<B: Buffer> {
    /// Error type thrown if allocations fail
    type Error: std::error::Error + Send + Sync + 'static;

    /// Try to create a buffer matching the given properties
    fn create_buffer(&mut self, properties: &BufferProperties) -> Result<B, Self::Error>;
}
