//! Rust element types with a matching [`ScalarType`].

use crate::sys::ScalarType;

/// An element type tensors can be viewed as.
///
/// # Safety
///
/// `SCALAR_TYPE` must have the size of `Self`, and every bit pattern the
/// executor may write for it must be a valid `Self`.
pub unsafe trait Scalar: Copy + 'static {
    const SCALAR_TYPE: ScalarType;
}

macro_rules! impl_scalar {
    ($($ty:ty => $scalar_type:ident),* $(,)?) => {
        $(
            unsafe impl Scalar for $ty {
                const SCALAR_TYPE: ScalarType = ScalarType::$scalar_type;
            }
        )*
    };
}

impl_scalar! {
    u8 => Byte,
    i8 => Char,
    i16 => Short,
    i32 => Int,
    i64 => Long,
    f32 => Float,
    f64 => Double,
    u16 => UInt16,
    u32 => UInt32,
    u64 => UInt64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check<T: Scalar>() {
        assert_eq!(T::SCALAR_TYPE.element_size(), std::mem::size_of::<T>());
    }

    #[test]
    fn test_sizes_match() {
        check::<u8>();
        check::<i8>();
        check::<i16>();
        check::<i32>();
        check::<i64>();
        check::<f32>();
        check::<f64>();
        check::<u16>();
        check::<u32>();
        check::<u64>();
    }
}
