use std::fmt;
use std::hash::{Hash, Hasher};

/// Type-level marker for the buffer coordinate space
#[derive(Debug)]
pub struct Buffer;

/// A size as seen by the coordinate space `Kind`
///
/// Buffers are always described in the [`Buffer`] coordinate space,
/// which counts pixels of the underlying storage.
///
/// Constructors of this type ensure that the values are always positive via
/// `debug_assert!()`, however manually changing the values of the fields
/// can break this invariant.
#[repr(C)]
pub struct Size<N, Kind> {
    /// horizontal coordinate
    pub w: N,
    /// vertical coordinate
    pub h: N,
    _kind: std::marker::PhantomData<Kind>,
}

impl<N: Copy + Default + PartialEq, Kind> Size<N, Kind> {
    /// Check if this [`Size`] is empty
    ///
    /// Returns true if either the width or the height is zero
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.w == N::default() || self.h == N::default()
    }
}

impl<N: fmt::Debug, S> fmt::Debug for Size<N, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("Size<{}>", std::any::type_name::<S>()))?;
        f.debug_struct("")
            .field("w", &self.w)
            .field("h", &self.h)
            .finish()
    }
}

impl<N: fmt::Debug + PartialOrd + Default, Kind> From<(N, N)> for Size<N, Kind> {
    #[inline]
    fn from((w, h): (N, N)) -> Size<N, Kind> {
        debug_assert!(
            w >= N::default() && h >= N::default(),
            "Attempting to create a `Size` of negative size: {:?}",
            (w, h)
        );
        Size {
            w,
            h,
            _kind: std::marker::PhantomData,
        }
    }
}

impl<N, Kind> From<Size<N, Kind>> for (N, N) {
    #[inline]
    fn from(size: Size<N, Kind>) -> (N, N) {
        (size.w, size.h)
    }
}

impl<N: Clone, Kind> Clone for Size<N, Kind> {
    #[inline]
    fn clone(&self) -> Self {
        Size {
            w: self.w.clone(),
            h: self.h.clone(),
            _kind: std::marker::PhantomData,
        }
    }
}

impl<N: Copy, Kind> Copy for Size<N, Kind> {}

impl<N: PartialEq, Kind> PartialEq for Size<N, Kind> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        self.w == other.w && self.h == other.h
    }
}

impl<N: Eq, Kind> Eq for Size<N, Kind> {}

impl<N: Hash, Kind> Hash for Size<N, Kind> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.w.hash(state);
        self.h.hash(state);
    }
}

impl<N: Default, Kind> Default for Size<N, Kind> {
    #[inline]
    fn default() -> Self {
        Size {
            w: N::default(),
            h: N::default(),
            _kind: std::marker::PhantomData,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Buffer, Size};

    #[test]
    fn size_from_tuple() {
        let size: Size<i32, Buffer> = (640, 480).into();
        assert_eq!(size.w, 640);
        assert_eq!(size.h, 480);
        assert_eq!(<(i32, i32)>::from(size), (640, 480));
    }

    #[test]
    fn empty_size() {
        assert!(Size::<i32, Buffer>::from((0, 480)).is_empty());
        assert!(Size::<i32, Buffer>::from((640, 0)).is_empty());
        assert!(!Size::<i32, Buffer>::from((1, 1)).is_empty());
    }
}
