use std::fmt;
use std::ops::Deref;
use std::sync::{Arc, Weak};

use tracing::{trace, warn};

use super::{BufferSwapper, SwapperDirector, SwapperError};
use crate::backend::allocator::Buffer;

macro_rules! scoped_buffer {
    (
        $(#[$attr:meta])*
        $name:ident, $role:literal, $acquire:ident, $release:ident
    ) => {
        $(#[$attr])*
        pub struct $name<B: Buffer, S: BufferSwapper<B> + ?Sized = SwapperDirector<B>> {
            buffer: Option<Arc<B>>,
            swapper: Weak<S>,
        }

        impl<B: Buffer, S: BufferSwapper<B> + ?Sized> $name<B, S> {
            #[doc = concat!("Acquire a buffer for the ", $role, " from `swapper`.")]
            ///
            /// The buffer is released again once the returned value is dropped.
            pub fn acquire(swapper: &Arc<S>) -> Result<Self, SwapperError> {
                let buffer = swapper.$acquire()?;
                Ok($name {
                    buffer: Some(buffer),
                    swapper: Arc::downgrade(swapper),
                })
            }

            /// The acquired buffer
            pub fn buffer(&self) -> &Arc<B> {
                // only taken on release
                self.buffer.as_ref().unwrap()
            }

            /// Release the buffer now, reporting failures to the caller.
            ///
            /// Releasing into a swapper that was already destroyed is a no-op.
            pub fn release(mut self) -> Result<(), SwapperError> {
                match (self.buffer.take(), self.swapper.upgrade()) {
                    (Some(buffer), Some(swapper)) => swapper.$release(buffer),
                    _ => Ok(()),
                }
            }
        }

        impl<B: Buffer, S: BufferSwapper<B> + ?Sized> Deref for $name<B, S> {
            type Target = B;

            fn deref(&self) -> &B {
                self.buffer()
            }
        }

        impl<B: Buffer, S: BufferSwapper<B> + ?Sized> fmt::Debug for $name<B, S> {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($name))
                    .field("buffer", &self.buffer.as_ref().map(|buffer| buffer.id()))
                    .finish()
            }
        }

        impl<B: Buffer, S: BufferSwapper<B> + ?Sized> Drop for $name<B, S> {
            fn drop(&mut self) {
                let Some(buffer) = self.buffer.take() else {
                    return;
                };
                let id = buffer.id();
                let Some(swapper) = self.swapper.upgrade() else {
                    trace!(%id, "Swapper is gone, dropping buffer");
                    return;
                };
                match swapper.$release(buffer) {
                    Ok(()) => {}
                    // expected during teardown
                    Err(SwapperError::Aborted) | Err(SwapperError::Retired) => {
                        trace!(%id, "{} buffer returned to a closed swapper", $role)
                    }
                    Err(err) => warn!(%id, ?err, "Failed to release {} buffer", $role),
                }
            }
        }
    };
}

scoped_buffer!(
    /// Buffer held by the client for drawing.
    ///
    /// Acquired on creation and submitted to the compositor when dropped. Only a weak
    /// reference to the swapper is kept, so dropping the handle after the swapper is gone
    /// does nothing.
    ClientBuffer,
    "client",
    client_acquire,
    client_release
);

scoped_buffer!(
    /// Buffer held by the compositor for display.
    ///
    /// Acquired on creation and handed back to the swapper when dropped. Only a weak
    /// reference to the swapper is kept, so dropping the handle after the swapper is gone
    /// does nothing.
    CompositorBuffer,
    "compositor",
    compositor_acquire,
    compositor_release
);

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::backend::swapper::test_utils::{buffers, TestBuffer};
    use crate::backend::swapper::{QueueingSwapper, SpinningSwapper};

    fn queueing() -> Arc<QueueingSwapper<TestBuffer>> {
        Arc::new(QueueingSwapper::new(buffers(3)).unwrap())
    }

    #[test]
    fn released_on_drop() {
        let swapper = queueing();
        {
            let buffer = ClientBuffer::acquire(&swapper).unwrap();
            assert_eq!(buffer.0, 0);
            assert_eq!(swapper.snapshot().held_by_client, 1);
        }
        assert_eq!(swapper.snapshot().free_for_compositor, 1);

        {
            let buffer = CompositorBuffer::acquire(&swapper).unwrap();
            assert_eq!(buffer.id().as_raw(), 0);
            assert_eq!(swapper.snapshot().held_by_compositor, 1);
        }
        assert_eq!(swapper.snapshot().free_for_client, 3);
    }

    #[test]
    fn released_on_early_return() {
        fn draw(swapper: &Arc<QueueingSwapper<TestBuffer>>, fail: bool) -> Result<(), ()> {
            let _buffer = ClientBuffer::acquire(swapper).map_err(|_| ())?;
            if fail {
                return Err(());
            }
            Ok(())
        }

        let swapper = queueing();
        for fail in [true, false, true] {
            let _ = draw(&swapper, fail);
            assert_eq!(swapper.snapshot().held_by_client, 0);
        }
        assert_eq!(swapper.snapshot().free_for_compositor, 3);
    }

    #[test]
    fn explicit_release_reports_errors() {
        let swapper = queueing();
        let buffer = ClientBuffer::acquire(&swapper).unwrap();
        swapper.force_client_abort();
        assert_eq!(buffer.release(), Err(SwapperError::Aborted));
        assert_eq!(swapper.snapshot().held_by_client, 0);
    }

    #[test]
    fn outliving_the_swapper_is_harmless() {
        let swapper = Arc::new(SpinningSwapper::new(buffers(3)).unwrap());
        let client = ClientBuffer::acquire(&swapper).unwrap();
        drop(swapper);

        // the buffer itself stays valid
        assert_eq!(client.buffer().0, 2);
        assert_eq!(Arc::strong_count(client.buffer()), 1);
        drop(client);
    }

    #[test]
    fn works_with_trait_objects() {
        let swapper: Arc<dyn BufferSwapper<TestBuffer>> = queueing();
        let buffer = ClientBuffer::acquire(&swapper).unwrap();
        assert_eq!(buffer.0, 0);
        buffer.release().unwrap();
        assert!(CompositorBuffer::acquire(&swapper).is_ok());
    }
}
