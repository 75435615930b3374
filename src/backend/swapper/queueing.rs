use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Condvar, Mutex};

use tracing::{debug, info_span, instrument, trace};

use super::{BufferSwapper, DrainedBuffers, SwapperError, SwapperSnapshot, SwapperStrategy};
use crate::backend::allocator::Buffer;

struct QueueState<B> {
    client_queue: VecDeque<Arc<B>>,
    compositor_queue: VecDeque<Arc<B>>,
    in_use_by_client: usize,
    in_use_by_compositor: usize,
    aborted: bool,
    retired: bool,
}

/// Swapper delivering every submitted frame to the compositor, in submission order.
///
/// Buffers cycle through two queues: the client takes buffers from the front of the
/// client queue and submits them to the back of the compositor queue, the compositor
/// takes the oldest submitted buffer and returns it to the back of the client queue.
///
/// If the client runs ahead of the compositor, [`client_acquire`](BufferSwapper::client_acquire)
/// blocks until the compositor returns a buffer. Use this strategy whenever dropping frames
/// is not acceptable.
pub struct QueueingSwapper<B> {
    state: Mutex<QueueState<B>>,
    client_available: Condvar,
    swapper_size: usize,
    span: tracing::Span,
}

impl<B> fmt::Debug for QueueingSwapper<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueingSwapper")
            .field("swapper_size", &self.swapper_size)
            .finish_non_exhaustive()
    }
}

impl<B: Buffer + Send + Sync + 'static> QueueingSwapper<B> {
    /// Create a new swapper handing out the given buffers to the client, in order.
    ///
    /// At least two buffers are required.
    pub fn new(buffers: Vec<Arc<B>>) -> Result<QueueingSwapper<B>, SwapperError> {
        QueueingSwapper::adopt(DrainedBuffers::new(buffers))
    }

    /// Take over the buffers another swapper gave up with [`BufferSwapper::end_responsibility`].
    ///
    /// Frames still waiting for the compositor are queued for it in submission order, the other
    /// idle buffers become available to the client. Buffers held by either role join the queues
    /// once they are released.
    pub fn adopt(mut drained: DrainedBuffers<B>) -> Result<QueueingSwapper<B>, SwapperError> {
        if drained.original_size < 2 || !drained.accounted() || drained.held_by_client >= drained.original_size {
            return Err(SwapperError::InvalidBufferCount {
                strategy: SwapperStrategy::Queueing,
                got: drained.original_size,
            });
        }

        let span = info_span!("swapper_queueing", size = drained.original_size);
        span.in_scope(|| {
            debug!(
                idle = drained.buffers.len(),
                pending = drained.free_for_compositor,
                held_by_client = drained.held_by_client,
                held_by_compositor = drained.held_by_compositor,
                "Creating queueing swapper"
            )
        });

        let compositor_queue = drained.buffers.drain(..drained.free_for_compositor).rev().collect();
        let client_queue = drained.buffers.into_iter().rev().collect();
        Ok(QueueingSwapper {
            state: Mutex::new(QueueState {
                client_queue,
                compositor_queue,
                in_use_by_client: drained.held_by_client,
                in_use_by_compositor: drained.held_by_compositor,
                aborted: false,
                retired: false,
            }),
            client_available: Condvar::new(),
            swapper_size: drained.original_size,
            span,
        })
    }

    /// Number of buffers this swapper is responsible for
    pub fn size(&self) -> usize {
        self.swapper_size
    }
}

impl<B: Buffer + Send + Sync + 'static> BufferSwapper<B> for QueueingSwapper<B> {
    #[instrument(level = "trace", parent = &self.span, skip(self))]
    fn client_acquire(&self) -> Result<Arc<B>, SwapperError> {
        let mut state = self.state.lock().unwrap();
        loop {
            if state.retired {
                return Err(SwapperError::Retired);
            }
            if state.aborted {
                return Err(SwapperError::Aborted);
            }
            // the compositor always needs a buffer to show
            if state.in_use_by_client >= self.swapper_size - 1 {
                return Err(SwapperError::TooManyBuffersHeld {
                    max_held: self.swapper_size - 1,
                });
            }

            if let Some(buffer) = state.client_queue.pop_front() {
                state.in_use_by_client += 1;
                trace!(id = %buffer.id(), "Client acquired buffer");
                return Ok(buffer);
            }

            trace!("Waiting for the compositor to return a buffer");
            state = self.client_available.wait(state).unwrap();
        }
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

        let result = if state.aborted {
            state.client_queue.push_back(buffer);
            Err(SwapperError::Aborted)
        } else {
            state.compositor_queue.push_back(buffer);
            Ok(())
        };
        self.client_available.notify_all();
        result
    }

    #[instrument(level = "trace", parent = &self.span, skip(self))]
    fn compositor_acquire(&self) -> Result<Arc<B>, SwapperError> {
        let mut state = self.state.lock().unwrap();
        if state.retired {
            return Err(SwapperError::Retired);
        }

        match state.compositor_queue.pop_front() {
            Some(buffer) => {
                state.in_use_by_compositor += 1;
                trace!(id = %buffer.id(), "Compositor acquired buffer");
                Ok(buffer)
            }
            None => {
                trace!("No frame submitted");
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
        state.client_queue.push_back(buffer);
        self.client_available.notify_all();
        Ok(())
    }

    #[instrument(level = "debug", parent = &self.span, skip(self))]
    fn force_client_abort(&self) {
        let mut state = self.state.lock().unwrap();
        if !state.aborted {
            debug!("Aborting client requests");
        }
        state.aborted = true;
        self.client_available.notify_all();
    }

    #[instrument(level = "debug", parent = &self.span, skip(self))]
    fn force_requests_to_complete(&self) -> Result<(), SwapperError> {
        let mut state = self.state.lock().unwrap();
        if state.retired {
            return Err(SwapperError::Retired);
        }
        if state.in_use_by_compositor != 0 || state.in_use_by_client > 1 {
            return Err(SwapperError::CannotForceCompletion {
                held_by_client: state.in_use_by_client,
                held_by_compositor: state.in_use_by_compositor,
            });
        }

        if state.client_queue.is_empty() {
            if let Some(buffer) = state.compositor_queue.pop_front() {
                debug!(id = %buffer.id(), "Dropping frame to unblock the client");
                state.client_queue.push_back(buffer);
                self.client_available.notify_all();
            }
        }
        Ok(())
    }

    #[instrument(level = "debug", parent = &self.span, skip(self))]
    fn end_responsibility(&self) -> Result<DrainedBuffers<B>, SwapperError> {
        let mut state = self.state.lock().unwrap();
        if state.retired {
            return Err(SwapperError::Retired);
        }
        state.retired = true;

        let free_for_compositor = state.compositor_queue.len();
        let mut buffers = Vec::with_capacity(self.swapper_size);
        buffers.extend(state.compositor_queue.drain(..).rev());
        // the compositor returns buffers to the back
        buffers.extend(state.client_queue.drain(..).rev());
        self.client_available.notify_all();

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
            original_size: self.swapper_size,
            held_by_client: state.in_use_by_client,
            held_by_compositor: state.in_use_by_compositor,
        })
    }

    fn snapshot(&self) -> SwapperSnapshot {
        let state = self.state.lock().unwrap();
        SwapperSnapshot {
            free_for_client: state.client_queue.len(),
            held_by_client: state.in_use_by_client,
            free_for_compositor: state.compositor_queue.len(),
            held_by_compositor: state.in_use_by_compositor,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{mpsc, Arc};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::backend::swapper::test_utils::{buffers, id, TestBuffer};

    fn swapper(count: usize) -> QueueingSwapper<TestBuffer> {
        QueueingSwapper::new(buffers(count)).unwrap()
    }

    #[test]
    fn rejects_single_buffer() {
        assert_eq!(
            QueueingSwapper::new(buffers(1)).unwrap_err(),
            SwapperError::InvalidBufferCount {
                strategy: SwapperStrategy::Queueing,
                got: 1
            }
        );
        assert!(QueueingSwapper::new(buffers(0)).is_err());
    }

    #[test]
    fn round_trip_returns_buffer_to_client() {
        let swapper = swapper(3);

        let a = swapper.client_acquire().unwrap();
        let b = swapper.client_acquire().unwrap();
        assert_eq!((id(&a), id(&b)), (0, 1));

        swapper.client_release(a).unwrap();
        let composited = swapper.compositor_acquire().unwrap();
        assert_eq!(id(&composited), 0);
        swapper.compositor_release(composited).unwrap();

        // c is still first in line, a went to the back
        let c = swapper.client_acquire().unwrap();
        assert_eq!(id(&c), 2);
        assert_ne!(id(&c), id(&b));
        swapper.client_release(b).unwrap();
        let a = swapper.client_acquire().unwrap();
        assert_eq!(id(&a), 0);
        assert_ne!(id(&a), id(&c));

        // b waits for the compositor, a and c are drawn into
        let composited = swapper.compositor_acquire().unwrap();
        assert_eq!(id(&composited), 1);
        let mut held = vec![id(&a), id(&c), id(&composited)];
        held.sort_unstable();
        held.dedup();
        assert_eq!(held.len(), 3);

        assert_eq!(swapper.snapshot().total(), 3);
    }

    #[test]
    fn compositor_sees_frames_in_order() {
        let swapper = swapper(4);
        let mut submitted = Vec::new();
        for _ in 0..3 {
            let buffer = swapper.client_acquire().unwrap();
            submitted.push(id(&buffer));
            swapper.client_release(buffer).unwrap();
        }

        let mut composited = Vec::new();
        for _ in 0..3 {
            let buffer = swapper.compositor_acquire().unwrap();
            composited.push(id(&buffer));
            swapper.compositor_release(buffer).unwrap();
        }
        assert_eq!(submitted, composited);
    }

    #[test]
    fn compositor_starves_without_frames() {
        let swapper = swapper(2);
        assert_eq!(swapper.compositor_acquire().unwrap_err(), SwapperError::NoBufferAvailable);

        let buffer = swapper.client_acquire().unwrap();
        assert_eq!(swapper.compositor_acquire().unwrap_err(), SwapperError::NoBufferAvailable);
        swapper.client_release(buffer).unwrap();
        assert!(swapper.compositor_acquire().is_ok());
    }

    #[test]
    fn client_cannot_hold_every_buffer() {
        for count in 2..6 {
            let swapper = swapper(count);
            let held = (0..count - 1)
                .map(|_| swapper.client_acquire().unwrap())
                .collect::<Vec<_>>();
            assert_eq!(
                swapper.client_acquire().unwrap_err(),
                SwapperError::TooManyBuffersHeld { max_held: count - 1 }
            );
            assert_eq!(held.len(), count - 1);
            assert_eq!(swapper.snapshot().held_by_client, count - 1);
        }
    }

    #[test]
    fn release_without_acquire() {
        let swapper = swapper(2);
        let stray = Arc::new(TestBuffer(42));
        assert_eq!(
            swapper.client_release(stray.clone()).unwrap_err(),
            SwapperError::UnexpectedRelease
        );
        assert_eq!(
            swapper.compositor_release(stray).unwrap_err(),
            SwapperError::UnexpectedRelease
        );
        assert_eq!(swapper.snapshot().total(), 2);
    }

    #[test]
    fn blocked_client_wakes_on_compositor_release() {
        let swapper = Arc::new(swapper(2));

        let a = swapper.client_acquire().unwrap();
        swapper.client_release(a).unwrap();
        let b = swapper.client_acquire().unwrap();
        swapper.client_release(b).unwrap();

        let (tx, rx) = mpsc::channel();
        let client = {
            let swapper = swapper.clone();
            thread::spawn(move || {
                let result = swapper.client_acquire().map(|buffer| id(&buffer));
                tx.send(()).unwrap();
                result
            })
        };

        // both buffers wait for the compositor
        assert!(rx.recv_timeout(Duration::from_millis(50)).is_err());

        let composited = swapper.compositor_acquire().unwrap();
        assert_eq!(id(&composited), 0);
        swapper.compositor_release(composited).unwrap();

        assert_eq!(client.join().unwrap(), Ok(0));
    }

    #[test]
    fn abort_unblocks_waiting_client() {
        let swapper = Arc::new(swapper(2));
        let a = swapper.client_acquire().unwrap();
        swapper.client_release(a).unwrap();
        let b = swapper.client_acquire().unwrap();
        swapper.client_release(b).unwrap();

        let client = {
            let swapper = swapper.clone();
            thread::spawn(move || swapper.client_acquire().map(|buffer| id(&buffer)))
        };
        thread::sleep(Duration::from_millis(20));
        swapper.force_client_abort();

        assert_eq!(client.join().unwrap(), Err(SwapperError::Aborted));
        assert_eq!(swapper.client_acquire().unwrap_err(), SwapperError::Aborted);
        // compositor keeps working
        let buffer = swapper.compositor_acquire().unwrap();
        swapper.compositor_release(buffer).unwrap();
    }

    #[test]
    fn release_after_abort_keeps_buffer() {
        let swapper = swapper(3);
        let buffer = swapper.client_acquire().unwrap();
        swapper.force_client_abort();
        assert_eq!(swapper.client_release(buffer).unwrap_err(), SwapperError::Aborted);

        let snapshot = swapper.snapshot();
        assert_eq!(snapshot.held_by_client, 0);
        assert_eq!(snapshot.free_for_compositor, 0);
        assert_eq!(snapshot.total(), 3);
    }

    #[test]
    fn force_requests_to_complete_drops_oldest_frame() {
        let swapper = Arc::new(swapper(2));
        let a = swapper.client_acquire().unwrap();
        swapper.client_release(a).unwrap();
        let b = swapper.client_acquire().unwrap();
        swapper.client_release(b).unwrap();

        let client = {
            let swapper = swapper.clone();
            thread::spawn(move || swapper.client_acquire().map(|buffer| id(&buffer)))
        };
        thread::sleep(Duration::from_millis(20));
        swapper.force_requests_to_complete().unwrap();

        assert_eq!(client.join().unwrap(), Ok(0));
        let composited = swapper.compositor_acquire().unwrap();
        assert_eq!(id(&composited), 1);
    }

    #[test]
    fn force_requests_to_complete_checks_preconditions() {
        let swapper = swapper(3);
        let a = swapper.client_acquire().unwrap();
        swapper.client_release(a).unwrap();
        let composited = swapper.compositor_acquire().unwrap();

        assert_eq!(
            swapper.force_requests_to_complete().unwrap_err(),
            SwapperError::CannotForceCompletion {
                held_by_client: 0,
                held_by_compositor: 1
            }
        );
        swapper.compositor_release(composited).unwrap();
        assert!(swapper.force_requests_to_complete().is_ok());
    }

    #[test]
    fn end_responsibility_drains_idle_buffers() {
        let swapper = swapper(4);
        let held = swapper.client_acquire().unwrap();
        let submitted = swapper.client_acquire().unwrap();
        swapper.client_release(submitted).unwrap();
        let composited = swapper.compositor_acquire().unwrap();
        let pending = swapper.client_acquire().unwrap();
        swapper.client_release(pending).unwrap();

        let drained = swapper.end_responsibility().unwrap();
        assert_eq!(drained.original_size, 4);
        assert_eq!(drained.held_by_client, 1);
        assert_eq!(drained.held_by_compositor, 1);
        // the pending frame comes first
        assert_eq!(drained.free_for_compositor, 1);
        assert_eq!(drained.buffers.iter().map(id).collect::<Vec<_>>(), vec![2, 3]);

        assert_eq!(swapper.client_acquire().unwrap_err(), SwapperError::Retired);
        assert_eq!(swapper.client_release(held).unwrap_err(), SwapperError::Retired);
        assert_eq!(swapper.compositor_release(composited).unwrap_err(), SwapperError::Retired);
        assert_eq!(swapper.end_responsibility().unwrap_err(), SwapperError::Retired);
    }

    #[test]
    fn end_responsibility_wakes_waiting_client() {
        let swapper = Arc::new(swapper(2));
        let a = swapper.client_acquire().unwrap();
        swapper.client_release(a).unwrap();
        let b = swapper.client_acquire().unwrap();
        swapper.client_release(b).unwrap();

        let client = {
            let swapper = swapper.clone();
            thread::spawn(move || swapper.client_acquire().map(|buffer| id(&buffer)))
        };
        thread::sleep(Duration::from_millis(20));
        let drained = swapper.end_responsibility().unwrap();
        assert_eq!(drained.buffers.len(), 2);
        assert_eq!(client.join().unwrap(), Err(SwapperError::Retired));
    }

    #[test]
    fn adopted_pending_frames_keep_their_order() {
        let original = swapper(4);
        for _ in 0..3 {
            let buffer = original.client_acquire().unwrap();
            original.client_release(buffer).unwrap();
        }
        let drained = original.end_responsibility().unwrap();
        assert_eq!(drained.free_for_compositor, 3);

        let swapper = QueueingSwapper::adopt(drained).unwrap();
        let snapshot = swapper.snapshot();
        assert_eq!((snapshot.free_for_client, snapshot.free_for_compositor), (1, 3));
        for expected in 0..3 {
            let composited = swapper.compositor_acquire().unwrap();
            assert_eq!(id(&composited), expected);
            swapper.compositor_release(composited).unwrap();
        }
        assert_eq!(id(&swapper.client_acquire().unwrap()), 3);
    }

    #[test]
    fn adopted_buffers_join_on_release() {
        let original = swapper(3);
        let held = original.client_acquire().unwrap();
        let drained = original.end_responsibility().unwrap();

        let swapper = QueueingSwapper::adopt(drained).unwrap();
        assert_eq!(swapper.snapshot().held_by_client, 1);
        swapper.client_release(held).unwrap();
        let composited = swapper.compositor_acquire().unwrap();
        assert_eq!(id(&composited), 0);
        assert_eq!(swapper.snapshot().total(), 3);
    }
}
