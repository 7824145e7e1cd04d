//! Plain-data element types that may travel through streams.

mod private {
    pub trait Sealed {}
}

/// A stream element: plain old data, valid for any bit pattern, with
/// alignment no larger than its size.
///
/// # Safety
/// Implementors must be `Copy` types without padding or invalid bit
/// patterns. The trait is sealed.
pub unsafe trait Element: Copy + Send + Sync + 'static + private::Sealed {}

macro_rules! impl_element {
    ($($ty:ty),* $(,)?) => {
        $(
            impl private::Sealed for $ty {}
            unsafe impl Element for $ty {}
        )*
    };
}

impl_element!(u8, i8, u16, i16, u32, i32, u64, i64, u128, i128, usize, isize, f32, f64);

/// View `bytes` as a slice of `T`.
///
/// # Safety
/// `bytes` must be aligned for `T` and its length a multiple of
/// `size_of::<T>()`.
#[inline]
pub(crate) unsafe fn cast_slice<T: Element>(bytes: &[u8]) -> &[T] {
    debug_assert_eq!(bytes.as_ptr() as usize % std::mem::align_of::<T>(), 0);
    debug_assert_eq!(bytes.len() % std::mem::size_of::<T>(), 0);
    std::slice::from_raw_parts(
        bytes.as_ptr() as *const T,
        bytes.len() / std::mem::size_of::<T>(),
    )
}

/// Mutable counterpart of [`cast_slice`].
///
/// # Safety
/// Same requirements as [`cast_slice`].
#[inline]
pub(crate) unsafe fn cast_slice_mut<T: Element>(bytes: &mut [u8]) -> &mut [T] {
    debug_assert_eq!(bytes.as_ptr() as usize % std::mem::align_of::<T>(), 0);
    debug_assert_eq!(bytes.len() % std::mem::size_of::<T>(), 0);
    std::slice::from_raw_parts_mut(
        bytes.as_mut_ptr() as *mut T,
        bytes.len() / std::mem::size_of::<T>(),
    )
}
