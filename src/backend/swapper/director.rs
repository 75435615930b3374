use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, info_span, instrument, warn};

use super::factory::{BufferSource, FactoryError};
use super::spinning::SPINNING_BUFFERS;
use super::{
    BufferSwapper, DrainedBuffers, QueueingSwapper, SpinningSwapper, SwapperError, SwapperSnapshot,
    SwapperStrategy,
};
use crate::backend::allocator::{Buffer, BufferProperties};

struct Current<B> {
    swapper: Arc<dyn BufferSwapper<B>>,
    strategy: SwapperStrategy,
    // bumped on every strategy switch
    generation: u64,
}

/// Strategy independent access to the buffers of one surface.
///
/// Wraps either a [`QueueingSwapper`] or a [`SpinningSwapper`] and exposes the
/// [`BufferProperties`] shared by all its buffers. The wrapped strategy can be replaced at
/// runtime through [`allow_framedropping`](SwapperDirector::allow_framedropping) without
/// invalidating buffers currently held by the client or the compositor.
///
/// The director implements [`BufferSwapper`] itself, so code consuming buffers never needs to
/// know which strategy is in use.
pub struct SwapperDirector<B> {
    properties: BufferProperties,
    current: RwLock<Current<B>>,
    buffer_source: Option<Arc<Mutex<dyn BufferSource<B>>>>,
    shut_down: AtomicBool,
    span: tracing::Span,
}

impl<B> fmt::Debug for SwapperDirector<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let current = self.current.read().unwrap();
        f.debug_struct("SwapperDirector")
            .field("properties", &self.properties)
            .field("strategy", &current.strategy)
            .field("swapper", &current.swapper)
            .field("shut_down", &self.shut_down.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

impl<B: Buffer + Send + Sync + 'static> SwapperDirector<B> {
    /// Create a director over pre-allocated buffers.
    ///
    /// The buffers are expected to match `properties`. A director created this way cannot
    /// allocate additional buffers, so switching to the spinning strategy requires exactly
    /// [`SPINNING_BUFFERS`] buffers or more.
    pub fn new(
        properties: BufferProperties,
        buffers: Vec<Arc<B>>,
        strategy: SwapperStrategy,
    ) -> Result<SwapperDirector<B>, SwapperError> {
        SwapperDirector::with_source(properties, buffers, strategy, None)
    }

    pub(super) fn with_source(
        properties: BufferProperties,
        buffers: Vec<Arc<B>>,
        strategy: SwapperStrategy,
        buffer_source: Option<Arc<Mutex<dyn BufferSource<B>>>>,
    ) -> Result<SwapperDirector<B>, SwapperError> {
        let span = info_span!(
            "swapper_director",
            size = ?properties.size,
            format = ?properties.format,
        );
        let swapper = adopt(strategy, DrainedBuffers::new(buffers))?;
        span.in_scope(|| debug!(%strategy, "Created swapper director"));

        Ok(SwapperDirector {
            properties,
            current: RwLock::new(Current {
                swapper,
                strategy,
                generation: 0,
            }),
            buffer_source,
            shut_down: AtomicBool::new(false),
            span,
        })
    }

    /// Properties shared by all buffers of this director
    pub fn properties(&self) -> &BufferProperties {
        &self.properties
    }

    /// Strategy currently in use
    pub fn strategy(&self) -> SwapperStrategy {
        self.current.read().unwrap().strategy
    }

    /// Whether the compositor may currently skip frames
    pub fn framedropping_allowed(&self) -> bool {
        self.strategy().allows_framedropping()
    }

    /// Whether [`shutdown`](SwapperDirector::shutdown) was called
    pub fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::SeqCst)
    }

    /// Stop serving the client and settle the buffer pool.
    ///
    /// Blocked and future client requests fail with [`SwapperError::Aborted`]. Frames still
    /// waiting for the compositor are drained except for the newest one, which the compositor
    /// may still display. Buffers held by either role stay valid and can be released as usual.
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    pub fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("Shutting down swapper");

        let mut current = self.current.write().unwrap();
        current.swapper.force_client_abort();
        let mut drained = match current.swapper.end_responsibility() {
            Ok(drained) => drained,
            Err(err) => {
                debug!(?err, "No buffers left to drain");
                return;
            }
        };
        let dropped = drained.free_for_compositor.saturating_sub(1);
        drained.free_for_compositor -= dropped;

        match adopt(current.strategy, drained) {
            Ok(swapper) => {
                swapper.force_client_abort();
                current.swapper = swapper;
                current.generation += 1;
                debug!(dropped, "Drained pending frames");
            }
            Err(err) => warn!(?err, "Failed to settle buffers after shutdown"),
        }
    }

    /// Switch between the queueing (`false`) and the spinning (`true`) strategy.
    ///
    /// The buffer pool is carried over. Moving to the spinning strategy allocates missing buffers
    /// if fewer than [`SPINNING_BUFFERS`] exist and gives up surplus idle buffers. If the switch
    /// cannot be done, the previous strategy stays in place.
    #[instrument(level = "debug", parent = &self.span, skip(self))]
    pub fn allow_framedropping(&self, allowed: bool) -> Result<(), FactoryError> {
        let target = SwapperStrategy::from_framedropping(allowed);
        let mut current = self.current.write().unwrap();
        if current.strategy == target {
            return Ok(());
        }

        let drained = current.swapper.end_responsibility()?;
        let (swapper, strategy, result) = match target {
            SwapperStrategy::Queueing => (adopt(target, drained)?, target, Ok(())),
            SwapperStrategy::Spinning => match self.resize_for_spinning(drained) {
                Ok(drained) => (adopt(target, drained)?, target, Ok(())),
                Err((drained, err)) => {
                    warn!(?err, "Cannot switch to spinning swapper, staying with queueing");
                    let queueing = SwapperStrategy::Queueing;
                    (adopt(queueing, drained)?, queueing, Err(err))
                }
            },
        };

        if self.is_shut_down() {
            swapper.force_client_abort();
        }
        current.swapper = swapper;
        current.strategy = strategy;
        current.generation += 1;
        if result.is_ok() {
            info!(%strategy, "Switched swapper strategy");
        }
        result
    }

    fn resize_for_spinning(
        &self,
        mut drained: DrainedBuffers<B>,
    ) -> Result<DrainedBuffers<B>, (DrainedBuffers<B>, FactoryError)> {
        let held = drained.held_by_client + drained.held_by_compositor;
        if held > SPINNING_BUFFERS || drained.held_by_client >= SPINNING_BUFFERS {
            let err = SwapperError::InvalidBufferCount {
                strategy: SwapperStrategy::Spinning,
                got: drained.original_size,
            };
            return Err((drained, err.into()));
        }

        // surplus idle buffers are oldest last
        while drained.original_size > SPINNING_BUFFERS {
            drained.buffers.pop();
            drained.original_size -= 1;
        }
        drained.free_for_compositor = drained.free_for_compositor.min(drained.buffers.len());

        while drained.original_size < SPINNING_BUFFERS {
            let Some(source) = self.buffer_source.as_ref() else {
                let err = SwapperError::InvalidBufferCount {
                    strategy: SwapperStrategy::Spinning,
                    got: drained.original_size,
                };
                return Err((drained, err.into()));
            };
            let allocated = source.lock().unwrap().allocate(&self.properties);
            match allocated {
                Ok(buffer) => {
                    debug!(id = %buffer.id(), "Allocated additional buffer");
                    drained.buffers.push(Arc::new(buffer));
                    drained.original_size += 1;
                }
                Err(err) => return Err((drained, FactoryError::Allocation(err))),
            }
        }

        Ok(drained)
    }

    fn current(&self) -> (Arc<dyn BufferSwapper<B>>, u64) {
        let current = self.current.read().unwrap();
        (current.swapper.clone(), current.generation)
    }
}

fn adopt<B: Buffer + Send + Sync + 'static>(
    strategy: SwapperStrategy,
    drained: DrainedBuffers<B>,
) -> Result<Arc<dyn BufferSwapper<B>>, SwapperError> {
    let swapper: Arc<dyn BufferSwapper<B>> = match strategy {
        SwapperStrategy::Queueing => Arc::new(QueueingSwapper::adopt(drained)?),
        SwapperStrategy::Spinning => Arc::new(SpinningSwapper::adopt(drained)?),
    };
    Ok(swapper)
}

impl<B: Buffer + Send + Sync + 'static> BufferSwapper<B> for SwapperDirector<B> {
    fn client_acquire(&self) -> Result<Arc<B>, SwapperError> {
        loop {
            if self.is_shut_down() {
                return Err(SwapperError::Aborted);
            }

            // may block, so the strategy must stay replaceable meanwhile
            let (swapper, generation) = self.current();
            match swapper.client_acquire() {
                Err(SwapperError::Retired) if self.current.read().unwrap().generation != generation => {
                    debug!(parent: &self.span, "Strategy changed while waiting, retrying");
                    continue;
                }
                result => return result,
            }
        }
    }

    fn client_release(&self, buffer: Arc<B>) -> Result<(), SwapperError> {
        self.current.read().unwrap().swapper.client_release(buffer)
    }

    fn compositor_acquire(&self) -> Result<Arc<B>, SwapperError> {
        self.current.read().unwrap().swapper.compositor_acquire()
    }

    fn compositor_release(&self, buffer: Arc<B>) -> Result<(), SwapperError> {
        self.current.read().unwrap().swapper.compositor_release(buffer)
    }

    fn force_client_abort(&self) {
        self.shutdown()
    }

    fn force_requests_to_complete(&self) -> Result<(), SwapperError> {
        self.current.read().unwrap().swapper.force_requests_to_complete()
    }

    fn end_responsibility(&self) -> Result<DrainedBuffers<B>, SwapperError> {
        self.current.read().unwrap().swapper.end_responsibility()
    }

    fn snapshot(&self) -> SwapperSnapshot {
        self.current.read().unwrap().swapper.snapshot()
    }
}
