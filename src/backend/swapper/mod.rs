//! Buffer ownership handoff between a client and the compositor.
//!
//! A client renders into a buffer, submits it and continues with the next one,
//! while the compositor independently picks up submitted buffers to display them.
//! Both sides only ever exchange a fixed pool of buffers, which a [`BufferSwapper`]
//! arbitrates: at any time every buffer is in exactly one of four places.
//!
//! - *free for the client*, ready to be handed out by [`client_acquire`](BufferSwapper::client_acquire)
//! - *held by the client*, currently being drawn into
//! - *free for the compositor*, submitted by [`client_release`](BufferSwapper::client_release)
//! - *held by the compositor*, currently being composited or scanned out
//!
//! ## Strategies
//!
//! Two strategies are provided:
//!
//! - [`QueueingSwapper`] delivers every submitted frame to the compositor in submission order.
//!   A client running ahead of the compositor blocks in `client_acquire` until a buffer is returned.
//! - [`SpinningSwapper`] never blocks the client. The compositor always gets the most recently
//!   submitted frame, older frames are dropped. It works on exactly three buffers.
//!
//! ## How am I supposed to use this?
//!
//! Most code should only ever talk to a [`SwapperDirector`], usually created through a
//! [`SwapperFactory`]. The director hides the strategy in use, can switch between them at runtime
//! (see [`SwapperDirector::allow_framedropping`]) and can be shut down.
//!
//! ```
//! use buffer_swapper::backend::{
//!     allocator::{
//!         memory::{MemoryAllocator, MemoryBuffer},
//!         BufferProperties, BufferUsage, Fourcc,
//!     },
//!     swapper::{ClientBuffer, CompositorBuffer, SwapperFactory, SwapperStrategy},
//! };
//!
//! let factory: SwapperFactory<_, MemoryBuffer> = SwapperFactory::new(MemoryAllocator::new());
//! let properties = BufferProperties::new((64, 64), Fourcc::Argb8888, BufferUsage::Software);
//! let director = factory.create_swapper(&properties, SwapperStrategy::Queueing).unwrap();
//!
//! // client side
//! {
//!     let frame = ClientBuffer::acquire(&director).unwrap();
//!     frame.with_pixels_mut(|pixels| pixels.fill(0xff));
//!     // submitted once `frame` goes out of scope
//! }
//!
//! // compositor side
//! let frame = CompositorBuffer::acquire(&director).unwrap();
//! assert!(frame.with_pixels(|pixels| pixels.iter().all(|p| *p == 0xff)));
//! ```
//!
//! Acquired buffers should always be returned to the swapper they were acquired from.
//! [`ClientBuffer`] and [`CompositorBuffer`] do this automatically when dropped.

use std::fmt;
use std::sync::Arc;

use crate::backend::allocator::Buffer;

mod director;
mod factory;
mod handle;
mod queueing;
mod spinning;

pub use self::director::SwapperDirector;
pub use self::factory::{FactoryError, SwapperFactory, DEFAULT_BUFFERS, MAX_BUFFERS, MIN_BUFFERS};
pub use self::handle::{ClientBuffer, CompositorBuffer};
pub use self::queueing::QueueingSwapper;
pub use self::spinning::{SpinningSwapper, SPINNING_BUFFERS};

/// Policy used to hand buffers between client and compositor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SwapperStrategy {
    /// Every frame is delivered in order, the client may block ([`QueueingSwapper`])
    Queueing,
    /// The newest frame wins, the client never blocks ([`SpinningSwapper`])
    Spinning,
}

impl SwapperStrategy {
    /// Strategy matching the given framedropping policy
    pub fn from_framedropping(allowed: bool) -> SwapperStrategy {
        if allowed {
            SwapperStrategy::Spinning
        } else {
            SwapperStrategy::Queueing
        }
    }

    /// Whether the compositor may skip frames with this strategy
    pub fn allows_framedropping(&self) -> bool {
        matches!(self, SwapperStrategy::Spinning)
    }
}

impl fmt::Display for SwapperStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwapperStrategy::Queueing => f.write_str("queueing"),
            SwapperStrategy::Spinning => f.write_str("spinning"),
        }
    }
}

/// Errors returned by [`BufferSwapper`] operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SwapperError {
    /// The client tried to hold every buffer of the swapper at once.
    ///
    /// This is a programming error of the caller.
    #[error("The client may hold at most {max_held} buffers at once")]
    TooManyBuffersHeld {
        /// Number of buffers the client is allowed to hold
        max_held: usize,
    },
    /// Nothing is available for the compositor.
    ///
    /// This is the expected outcome when no new frame was submitted.
    #[error("No buffer is available")]
    NoBufferAvailable,
    /// Client requests were aborted by [`BufferSwapper::force_client_abort`]
    #[error("Client requests were aborted")]
    Aborted,
    /// The swapper handed its buffers to a new owner via [`BufferSwapper::end_responsibility`]
    #[error("The swapper is no longer responsible for its buffers")]
    Retired,
    /// A buffer was released by a role not holding any buffer
    #[error("A buffer was released without being acquired")]
    UnexpectedRelease,
    /// The swapper cannot work with the number of buffers given
    #[error("The {strategy} strategy cannot work with {got} buffers")]
    InvalidBufferCount {
        /// Strategy rejecting the buffers
        strategy: SwapperStrategy,
        /// Number of buffers passed
        got: usize,
    },
    /// Preconditions of [`BufferSwapper::force_requests_to_complete`] are not met
    #[error("Requests cannot be forced to complete while the client holds {held_by_client} and the compositor holds {held_by_compositor} buffers")]
    CannotForceCompletion {
        /// Buffers held by the client
        held_by_client: usize,
        /// Buffers held by the compositor
        held_by_compositor: usize,
    },
}

/// Distribution of the buffers of a swapper at one point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SwapperSnapshot {
    /// Buffers ready to be handed to the client
    pub free_for_client: usize,
    /// Buffers currently drawn into by the client
    pub held_by_client: usize,
    /// Buffers submitted by the client and waiting for the compositor
    pub free_for_compositor: usize,
    /// Buffers currently used by the compositor
    pub held_by_compositor: usize,
}

impl SwapperSnapshot {
    /// Total number of buffers accounted for
    pub fn total(&self) -> usize {
        self.free_for_client + self.held_by_client + self.free_for_compositor + self.held_by_compositor
    }
}

/// Buffers handed out by [`BufferSwapper::end_responsibility`]
///
/// `buffers` is ordered by content, most recent first: the first `free_for_compositor`
/// entries are submitted frames the compositor did not pick up yet, newest first. The remaining
/// idle buffers follow, starting with the one displayed last.
#[derive(Debug)]
pub struct DrainedBuffers<B> {
    /// Every buffer not held by either role
    pub buffers: Vec<Arc<B>>,
    /// Number of leading `buffers` waiting to be displayed
    pub free_for_compositor: usize,
    /// Number of buffers the swapper was responsible for
    pub original_size: usize,
    /// Buffers still held by the client
    pub held_by_client: usize,
    /// Buffers still held by the compositor
    pub held_by_compositor: usize,
}

impl<B> DrainedBuffers<B> {
    pub(crate) fn new(buffers: Vec<Arc<B>>) -> DrainedBuffers<B> {
        DrainedBuffers {
            original_size: buffers.len(),
            buffers,
            free_for_compositor: 0,
            held_by_client: 0,
            held_by_compositor: 0,
        }
    }

    fn accounted(&self) -> bool {
        self.free_for_compositor <= self.buffers.len()
            && self.buffers.len() + self.held_by_client + self.held_by_compositor == self.original_size
    }
}

/// Contract for handing a fixed set of buffers between a client and the compositor
///
/// All operations are safe to call concurrently from one client thread and one compositor
/// thread. Only [`client_acquire`](BufferSwapper::client_acquire) may block.
pub trait BufferSwapper<B: Buffer>: fmt::Debug + Send + Sync {
    /// Get a buffer the client may exclusively draw into.
    ///
    /// Fails with [`SwapperError::TooManyBuffersHeld`] if the client would hold every buffer.
    fn client_acquire(&self) -> Result<Arc<B>, SwapperError>;

    /// Submit a buffer previously returned by [`client_acquire`](BufferSwapper::client_acquire).
    ///
    /// Never blocks. After [`force_client_abort`](BufferSwapper::force_client_abort) the buffer is
    /// taken back without being shown and [`SwapperError::Aborted`] is returned.
    fn client_release(&self, buffer: Arc<B>) -> Result<(), SwapperError>;

    /// Get the next buffer to display.
    ///
    /// Returns [`SwapperError::NoBufferAvailable`] if there is nothing to display. Acquiring twice
    /// without an intermediate [`compositor_release`](BufferSwapper::compositor_release) is not supported.
    fn compositor_acquire(&self) -> Result<Arc<B>, SwapperError>;

    /// Return a buffer previously returned by [`compositor_acquire`](BufferSwapper::compositor_acquire).
    fn compositor_release(&self, buffer: Arc<B>) -> Result<(), SwapperError>;

    /// Make every blocked and future client request fail with [`SwapperError::Aborted`].
    ///
    /// The compositor side is unaffected.
    fn force_client_abort(&self);

    /// Unblock a waiting client without failing its request.
    ///
    /// Only valid while the compositor holds no buffer and the client holds at most one,
    /// otherwise [`SwapperError::CannotForceCompletion`] is returned and nothing changes.
    fn force_requests_to_complete(&self) -> Result<(), SwapperError>;

    /// Hand every idle buffer to the caller and permanently disable the swapper.
    ///
    /// Afterwards every operation fails with [`SwapperError::Retired`], including a client
    /// currently blocked in [`client_acquire`](BufferSwapper::client_acquire).
    fn end_responsibility(&self) -> Result<DrainedBuffers<B>, SwapperError>;

    /// Current distribution of the buffers
    fn snapshot(&self) -> SwapperSnapshot;
}
