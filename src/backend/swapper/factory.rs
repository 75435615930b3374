use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use tracing::{debug, info_span, instrument};

use super::spinning::SPINNING_BUFFERS;
use super::{SwapperDirector, SwapperError, SwapperStrategy};
use crate::backend::allocator::{Allocator, Buffer, BufferProperties};

/// Smallest number of buffers a swapper can work with
pub const MIN_BUFFERS: usize = 2;
/// Largest number of buffers a [`SwapperFactory`] hands to a queueing swapper
pub const MAX_BUFFERS: usize = 5;
/// Number of buffers used by [`SwapperFactory::new`]
pub const DEFAULT_BUFFERS: usize = 3;

type AnyError = Box<dyn std::error::Error + Send + Sync>;

/// Type erased [`Allocator`], used by directors to grow their pool
pub(crate) trait BufferSource<B>: Send {
    fn allocate(&mut self, properties: &BufferProperties) -> Result<B, AnyError>;
}

impl<A, B> BufferSource<B> for A
where
    A: Allocator<B> + Send,
    B: Buffer,
{
    fn allocate(&mut self, properties: &BufferProperties) -> Result<B, AnyError> {
        self.create_buffer(properties).map_err(|err| Box::new(err) as AnyError)
    }
}

/// Error returned when creating or reconfiguring a swapper
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    /// The factory was configured with an unusable buffer count
    #[error("Buffer count {0} is out of range {min}..={max}", min = MIN_BUFFERS, max = MAX_BUFFERS)]
    Configuration(usize),
    /// The allocator failed to create a buffer
    #[error("Failed to allocate a buffer")]
    Allocation(#[source] AnyError),
    /// The swapper refused the buffers
    #[error(transparent)]
    Swapper(#[from] SwapperError),
}

/// Creates [`SwapperDirector`]s with freshly allocated buffers.
///
/// The allocator is shared with every director created, so they can allocate additional
/// buffers when switching strategies.
pub struct SwapperFactory<A, B> {
    allocator: Arc<Mutex<A>>,
    buffer_count: usize,
    span: tracing::Span,
    _buffer: PhantomData<fn() -> B>,
}

impl<A: fmt::Debug, B> fmt::Debug for SwapperFactory<A, B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SwapperFactory")
            .field("allocator", &self.allocator)
            .field("buffer_count", &self.buffer_count)
            .finish()
    }
}

impl<A, B> SwapperFactory<A, B>
where
    A: Allocator<B> + Send + 'static,
    B: Buffer + Send + Sync + 'static,
{
    /// Create a factory allocating [`DEFAULT_BUFFERS`] buffers per queueing swapper
    pub fn new(allocator: A) -> SwapperFactory<A, B> {
        SwapperFactory {
            allocator: Arc::new(Mutex::new(allocator)),
            buffer_count: DEFAULT_BUFFERS,
            span: info_span!("swapper_factory"),
            _buffer: PhantomData,
        }
    }

    /// Create a factory allocating `buffer_count` buffers per queueing swapper.
    ///
    /// Spinning swappers always use [`SPINNING_BUFFERS`] buffers.
    pub fn with_buffer_count(allocator: A, buffer_count: usize) -> Result<SwapperFactory<A, B>, FactoryError> {
        if !(MIN_BUFFERS..=MAX_BUFFERS).contains(&buffer_count) {
            return Err(FactoryError::Configuration(buffer_count));
        }
        Ok(SwapperFactory {
            buffer_count,
            ..SwapperFactory::new(allocator)
        })
    }

    /// Number of buffers allocated for queueing swappers
    pub fn buffer_count(&self) -> usize {
        self.buffer_count
    }

    /// Access the underlying allocator
    pub fn with_allocator<T>(&self, f: impl FnOnce(&mut A) -> T) -> T {
        f(&mut self.allocator.lock().unwrap())
    }

    /// Allocate buffers matching `properties` and create a director using `strategy`.
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    pub fn create_swapper(
        &self,
        properties: &BufferProperties,
        strategy: SwapperStrategy,
    ) -> Result<Arc<SwapperDirector<B>>, FactoryError> {
        let count = match strategy {
            SwapperStrategy::Queueing => self.buffer_count,
            SwapperStrategy::Spinning => SPINNING_BUFFERS,
        };

        let buffers = {
            let mut allocator = self.allocator.lock().unwrap();
            (0..count)
                .map(|_| {
                    allocator
                        .create_buffer(properties)
                        .map(Arc::new)
                        .map_err(|err| FactoryError::Allocation(Box::new(err)))
                })
                .collect::<Result<Vec<_>, _>>()?
        };
        debug!(count, "Allocated buffers for new swapper");

        let source: Arc<Mutex<dyn BufferSource<B>>> = self.allocator.clone();
        let director = SwapperDirector::with_source(*properties, buffers, strategy, Some(source))?;
        Ok(Arc::new(director))
    }
}
