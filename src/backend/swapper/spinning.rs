use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex};

use tracing::{debug, info_span, instrument, trace};

use super::{BufferSwapper, DrainedBuffers, SwapperError, SwapperSnapshot, SwapperStrategy};
use crate::backend::allocator::Buffer;

/// Number of buffers a [`SpinningSwapper`] works with
pub const SPINNING_BUFFERS: usize = 3;

struct SpinState<B> {
    // front: newest frame, back: next buffer for the client
    buffer_queue: VecDeque<Arc<B>>,
    client_submitted_new_buffer: bool,
    in_use_by_client: usize,
    in_use_by_compositor: usize,
    aborted: bool,
    retired: bool,
}

/// Triple-buffering swapper which never blocks the client.
///
/// All idle buffers live in one queue. The client takes buffers from the back and submits
/// them to the front, the compositor always takes the front, which is the most recently
/// submitted frame. Frames superseded before the compositor picked them up are dropped.
///
/// When the compositor returns its buffer, it is put back to the front if the client did not
/// submit anything in the meantime, so the same frame can be shown again right away.
/// Otherwise it is stale and goes to the back, where the client will reuse it next.
///
/// Suited for clients rendering as fast as they can, where only the latest content matters.
pub struct SpinningSwapper<B> {
    state: Mutex<SpinState<B>>,
    span: tracing::Span,
}

impl<B> fmt::Debug for SpinningSwapper<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpinningSwapper").finish_non_exhaustive()
    }
}

impl<B: Buffer + Send + Sync + 'static> SpinningSwapper<B> {
    /// Create a new swapper from exactly [`SPINNING_BUFFERS`] buffers.
    ///
    /// The last buffer is handed to the client first.
    pub fn new(buffers: Vec<Arc<B>>) -> Result<SpinningSwapper<B>, SwapperError> {
        SpinningSwapper::adopt(DrainedBuffers::new(buffers))
    }

    /// Take over the buffers another swapper gave up with [`BufferSwapper::end_responsibility`].
    ///
    /// The swapper must have been responsible for exactly [`SPINNING_BUFFERS`] buffers.
    /// The first idle buffer is shown next. If it is a pending frame, a buffer the compositor
    /// still holds is considered stale once released.
    pub fn adopt(drained: DrainedBuffers<B>) -> Result<SpinningSwapper<B>, SwapperError> {
        if drained.original_size != SPINNING_BUFFERS
            || !drained.accounted()
            || drained.held_by_client >= SPINNING_BUFFERS
        {
            return Err(SwapperError::InvalidBufferCount {
                strategy: SwapperStrategy::Spinning,
                got: drained.original_size,
            });
        }

        let span = info_span!("swapper_spinning");
        span.in_scope(|| {
            debug!(
                idle = drained.buffers.len(),
                pending = drained.free_for_compositor,
                held_by_client = drained.held_by_client,
                held_by_compositor = drained.held_by_compositor,
                "Creating spinning swapper"
            )
        });

        Ok(SpinningSwapper {
            state: Mutex::new(SpinState {
                buffer_queue: drained.buffers.into(),
                client_submitted_new_buffer: drained.free_for_compositor > 0,
                in_use_by_client: drained.held_by_client,
                in_use_by_compositor: drained.held_by_compositor,
                aborted: false,
                retired: false,
            }),
            span,
        })
    }
}

impl<B: Buffer + Send + Sync + 'static> BufferSwapper<B> for SpinningSwapper<B> {
    #[instrument(level = "trace", parent = &self.span, skip(self))]
    fn client_acquire(&self) -> Result<Arc<B>, SwapperError> {
        let mut state = self.state.lock().unwrap();
        if state.retired {
            return Err(SwapperError::Retired);
        }
        if state.aborted {
            return Err(SwapperError::Aborted);
        }
        if state.in_use_by_client >= SPINNING_BUFFERS - 1 {
            return Err(SwapperError::TooManyBuffersHeld {
                max_held: SPINNING_BUFFERS - 1,
            });
        }

        let buffer = state.buffer_queue.pop_back().ok_or(SwapperError::NoBufferAvailable)?;
        if state.buffer_queue.is_empty() {
            // the client took the only waiting frame
            state.client_submitted_new_buffer = false;
        }
        state.in_use_by_client += 1;
        trace!(id = %buffer.id(), "Client acquired buffer");
        Ok(buffer)
    }

    #[instrument(level = "trace", parent = &self.span, skip(self, buffer), fields(id = %buffer.id()))]
    fn client_release(&self, buffer: Arc<B>) -> Result<(), SwapperError> {
        let mut state = self.state.lock().unwrap();
        if state.retired {
            return Err(SwapperError::Retired);
        }
        if state.in_use_by_client == 0 {
            return Err(SwapperError::UnexpectedRelease);
        }
        state.in_use_by_client -= 1;

        if state.aborted {
            state.buffer_queue.push_back(buffer);
            return Err(SwapperError::Aborted);
        }
        state.buffer_queue.push_front(buffer);
        state.client_submitted_new_buffer = true;
        Ok(())
    }

    #[instrument(level = "trace", parent = &self.span, skip(self))]
    fn compositor_acquire(&self) -> Result<Arc<B>, SwapperError> {
        let mut state = self.state.lock().unwrap();
        if state.retired {
            return Err(SwapperError::Retired);
        }

        match state.buffer_queue.pop_front() {
            Some(buffer) => {
                state.client_submitted_new_buffer = false;
                state.in_use_by_compositor += 1;
                trace!(id = %buffer.id(), "Compositor acquired buffer");
                Ok(buffer)
            }
            None => {
                trace!("Every buffer is in use");
                Err(SwapperError::NoBufferAvailable)
            }
        }
    }

    #[instrument(level = "trace", parent = &self.span, skip(self, buffer), fields(id = %buffer.id()))]
    fn compositor_release(&self, buffer: Arc<B>) -> Result<(), SwapperError> {
        let mut state = self.state.lock().unwrap();
        if state.retired {
            return Err(SwapperError::Retired);
        }
        if state.in_use_by_compositor == 0 {
            return Err(SwapperError::UnexpectedRelease);
        }
        state.in_use_by_compositor -= 1;

        if state.client_submitted_new_buffer {
            trace!("Released buffer is stale");
            state.buffer_queue.push_back(buffer);
        } else {
            state.buffer_queue.push_front(buffer);
        }
        Ok(())
    }

    #[instrument(level = "debug", parent = &self.span, skip(self))]
    fn force_client_abort(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.aborted {
            debug!("Aborting client requests");
        }
        state.aborted = true;
    }

    #[instrument(level = "debug", parent = &self.span, skip(self))]
    fn force_requests_to_complete(&self) -> Result<(), SwapperError> {
        let state = self.state.lock().unwrap();
        if state.retired {
            return Err(SwapperError::Retired);
        }
        if state.in_use_by_compositor != 0 || state.in_use_by_client > 1 {
            return Err(SwapperError::CannotForceCompletion {
                held_by_client: state.in_use_by_client,
                held_by_compositor: state.in_use_by_compositor,
            });
        }
        // clients never wait on this strategy
        Ok(())
    }

    #[instrument(level = "debug", parent = &self.span, skip(self))]
    fn end_responsibility(&self) -> Result<DrainedBuffers<B>, SwapperError> {
        let mut state = self.state.lock().unwrap();
        if state.retired {
            return Err(SwapperError::Retired);
        }
        state.retired = true;

        let buffers: Vec<_> = state.buffer_queue.drain(..).collect();
        let free_for_compositor = usize::from(state.client_submitted_new_buffer && !buffers.is_empty());
        debug!(
            idle = buffers.len(),
            pending = free_for_compositor,
            held_by_client = state.in_use_by_client,
            held_by_compositor = state.in_use_by_compositor,
            "Giving up responsibility for buffers"
        );
        Ok(DrainedBuffers {
            buffers,
            free_for_compositor,
            original_size: SPINNING_BUFFERS,
            held_by_client: state.in_use_by_client,
            held_by_compositor: state.in_use_by_compositor,
        })
    }

    fn snapshot(&self) -> SwapperSnapshot {
        let state = self.state.lock().unwrap();
        let idle = state.buffer_queue.len();
        let waiting = usize::from(state.client_submitted_new_buffer && idle > 0);
        SwapperSnapshot {
            free_for_client: idle - waiting,
            held_by_client: state.in_use_by_client,
            free_for_compositor: waiting,
            held_by_compositor: state.in_use_by_compositor,
        }
    }
}
