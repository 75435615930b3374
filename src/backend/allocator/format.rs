//! Format info tables for the pixel formats buffers can be allocated with.
//!
//! [`get_bpp`] returns the number of bits per pixel of a format.
//!
//! ```
//! # use buffer_swapper::backend::allocator::Fourcc;
//! # use buffer_swapper::backend::allocator::format::get_bpp;
//! assert_eq!(get_bpp(Fourcc::Argb8888), Some(32));
//! assert_eq!(get_bpp(Fourcc::Rgb565), Some(16));
//! ```

/// Macro to generate table lookup functions for formats.
macro_rules! format_tables {
    (
        $($fourcc: ident {
            bpp: $bpp: expr $(,)?
        }),* $(,)?
    ) => {
        /// Returns the bits per pixel of the specified format.
        ///
        /// Unknown formats will always return [`None`].
        pub const fn get_bpp(
            fourcc: $crate::backend::allocator::Fourcc,
        ) -> Option<usize> {
            match fourcc {
                $($crate::backend::allocator::Fourcc::$fourcc => Some($bpp),)*
                _ => None,
            }
        }

        /// All formats with known layout, in table order.
        pub fn known_formats() -> &'static [$crate::backend::allocator::Fourcc] {
            &[
                $(
                    $crate::backend::allocator::Fourcc::$fourcc,
                )*
            ]
        }
    };
}

format_tables! {
    // 16-bit bpp RGB
    Rgb565 { bpp: 16 },
    Bgr565 { bpp: 16 },

    // 24-bit bpp RGB
    Rgb888 { bpp: 24 },
    Bgr888 { bpp: 24 },

    // 32-bit bpp RGB, 8 bits per channel
    Argb8888 { bpp: 32 },
    Xrgb8888 { bpp: 32 },
    Abgr8888 { bpp: 32 },
    Xbgr8888 { bpp: 32 },
    Rgba8888 { bpp: 32 },
    Rgbx8888 { bpp: 32 },
    Bgra8888 { bpp: 32 },
    Bgrx8888 { bpp: 32 },
}

/// Returns the number of bytes a single pixel of the format occupies.
///
/// Only formats with a whole number of bytes per pixel are reported.
pub const fn get_bytes_per_pixel(fourcc: super::Fourcc) -> Option<usize> {
    match get_bpp(fourcc) {
        Some(bpp) if bpp % 8 == 0 => Some(bpp / 8),
        _ => None,
    }
}
