//! Module for buffers backed by plain cpu memory
//!
//! Useful for software rendered clients and for driving a
//! [`BufferSwapper`](crate::backend::swapper::BufferSwapper) without any graphics device.

use std::fmt;
use std::sync::RwLock;

use tracing::trace;

use super::{format::get_bytes_per_pixel, Allocator, Buffer, BufferId, BufferProperties, Fourcc};
use crate::utils::{ids::id_gen, Buffer as BufferCoords, Size};

id_gen!(memory_buffer_ids);

/// Buffer storing its pixels in cpu memory
pub struct MemoryBuffer {
    id: BufferId,
    size: Size<i32, BufferCoords>,
    stride: u32,
    format: Fourcc,
    pixels: RwLock<Box<[u8]>>,
}

impl fmt::Debug for MemoryBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryBuffer")
            .field("id", &self.id)
            .field("size", &self.size)
            .field("stride", &self.stride)
            .field("format", &self.format)
            .finish()
    }
}

impl MemoryBuffer {
    /// Access the pixel contents of this buffer.
    ///
    /// Rows are `stride` bytes apart.
    pub fn with_pixels<T>(&self, f: impl FnOnce(&[u8]) -> T) -> T {
        let pixels = self.pixels.read().unwrap();
        f(&pixels)
    }

    /// Mutably access the pixel contents of this buffer.
    ///
    /// Only the role currently holding the buffer is supposed to write to it.
    pub fn with_pixels_mut<T>(&self, f: impl FnOnce(&mut [u8]) -> T) -> T {
        let mut pixels = self.pixels.write().unwrap();
        f(&mut pixels)
    }
}

impl Buffer for MemoryBuffer {
    fn id(&self) -> BufferId {
        self.id
    }

    fn size(&self) -> Size<i32, BufferCoords> {
        self.size
    }

    fn stride(&self) -> u32 {
        self.stride
    }

    fn format(&self) -> Fourcc {
        self.format
    }
}

impl Drop for MemoryBuffer {
    fn drop(&mut self) {
        memory_buffer_ids::remove(self.id.0);
    }
}

/// Error returned when a [`MemoryBuffer`] cannot be created
#[derive(Debug, thiserror::Error)]
pub enum MemoryAllocatorError {
    /// The requested size has no pixels
    #[error("Cannot allocate a buffer of empty size {0:?}")]
    EmptySize(Size<i32, BufferCoords>),
    /// The pixel format has no known memory layout
    #[error("Unsupported pixel format {0:?}")]
    UnsupportedFormat(Fourcc),
    /// The requested buffer does not fit into the address space
    #[error("Buffer of size {0:?} is too large")]
    TooLarge(Size<i32, BufferCoords>),
}

/// Allocator handing out [`MemoryBuffer`]s
#[derive(Debug, Default)]
pub struct MemoryAllocator {
    allocated: usize,
}

impl MemoryAllocator {
    /// Create a new memory allocator
    pub fn new() -> MemoryAllocator {
        MemoryAllocator::default()
    }

    /// Number of buffers created by this allocator so far
    pub fn allocated(&self) -> usize {
        self.allocated
    }
}

impl Allocator<MemoryBuffer> for MemoryAllocator {
    type Error = MemoryAllocatorError;

    fn create_buffer(&mut self, properties: &BufferProperties) -> Result<MemoryBuffer, Self::Error> {
        let size = properties.size;
        if size.is_empty() {
            return Err(MemoryAllocatorError::EmptySize(size));
        }
        let bpp = get_bytes_per_pixel(properties.format)
            .ok_or(MemoryAllocatorError::UnsupportedFormat(properties.format))?;

        // rows are tightly packed
        let stride = (size.w as usize)
            .checked_mul(bpp)
            .filter(|stride| *stride <= u32::MAX as usize)
            .ok_or(MemoryAllocatorError::TooLarge(size))?;
        let len = stride
            .checked_mul(size.h as usize)
            .ok_or(MemoryAllocatorError::TooLarge(size))?;

        let id = BufferId(memory_buffer_ids::next());
        self.allocated += 1;
        trace!(%id, ?size, format = ?properties.format, "Allocated memory buffer");

        Ok(MemoryBuffer {
            id,
            size,
            stride: stride as u32,
            format: properties.format,
            pixels: RwLock::new(vec![0u8; len].into_boxed_slice()),
        })
    }
}
