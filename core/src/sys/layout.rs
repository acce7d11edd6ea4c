//! Compile-time layout contract between the shadow blobs and the runtime types.

use std::mem::{align_of, size_of, MaybeUninit};

/// Fails const evaluation unless `A` and `B` have the same size and alignment.
///
/// Used in `const` items, so a mismatch is a build error:
///
/// ```compile_fail
/// const _: () = executorch_bridge::sys::assert_equal_layout::<[u64; 2], [u64; 3]>();
/// ```
///
/// ```
/// const _: () = executorch_bridge::sys::assert_equal_layout::<[usize; 2], (usize, usize)>();
/// ```
pub const fn assert_equal_layout<A, B>() {
    assert!(size_of::<A>() == size_of::<B>(), "size mismatch");
    assert!(align_of::<A>() == align_of::<B>(), "alignment mismatch");
}

/// A host-visible blob standing in for a runtime type of the same layout.
///
/// # Safety
///
/// Only implemented through [`shadow!`], which checks the layout at compile time.
pub(crate) unsafe trait Shadow: Sized {
    type Target;
}

/// Declares `shadow => target` pairs and checks their layouts.
macro_rules! shadow {
    ($($shadow:ty => $target:ty),* $(,)?) => {
        $(
            const _: () = $crate::sys::layout::assert_equal_layout::<$shadow, $target>();
            unsafe impl $crate::sys::layout::Shadow for $shadow {
                type Target = $target;
            }
        )*
    };
}
pub(crate) use shadow;

/// `TryFrom<u32>` for enums whose discriminants come from the host. Values
/// that name no variant are an invalid argument.
macro_rules! raw_enum {
    ($($ty:ty { $($variant:ident),* $(,)? })*) => {
        $(
            impl TryFrom<u32> for $ty {
                type Error = $crate::sys::Error;

                fn try_from(raw: u32) -> Result<Self, Self::Error> {
                    $(
                        if raw == <$ty>::$variant as u32 {
                            return Ok(<$ty>::$variant);
                        }
                    )*
                    $crate::runtime::pal::et_log!(Error, "{} is not a valid {}", raw, stringify!($ty));
                    Err($crate::sys::Error::InvalidArgument)
                }
            }
        )*
    };
}
pub(crate) use raw_enum;

/// # Safety
///
/// `ptr` must point to an initialized target that outlives `'a`.
pub(crate) unsafe fn cast<'a, S: Shadow>(ptr: *const S) -> &'a S::Target {
    &*ptr.cast::<S::Target>()
}

/// # Safety
///
/// `ptr` must point to an initialized target that outlives `'a` and is not
/// otherwise borrowed.
pub(crate) unsafe fn cast_mut<'a, S: Shadow>(ptr: *mut S) -> &'a mut S::Target {
    &mut *ptr.cast::<S::Target>()
}

/// Storage of `S` viewed as uninitialized storage of its target.
pub(crate) fn slot<S: Shadow>(ptr: *mut S) -> *mut S::Target {
    ptr.cast()
}

/// Constructs `value` in place.
///
/// # Safety
///
/// `out` must be valid for writes. Whatever it held is overwritten without
/// being dropped.
pub(crate) unsafe fn place<S: Shadow>(out: *mut S, value: S::Target) {
    slot(out).write(value);
}

/// Runs the target's destructor, leaving the storage uninitialized.
///
/// # Safety
///
/// `ptr` must hold an initialized target that is not used afterwards.
pub(crate) unsafe fn destroy<S: Shadow>(ptr: *mut S) {
    std::ptr::drop_in_place(slot(ptr));
}

/// Moves `value` into a fresh shadow, for returning trivially copyable targets by value.
pub(crate) fn wrap<S: Shadow>(value: S::Target) -> S {
    let mut out = MaybeUninit::<S>::uninit();
    // SAFETY: `S` has the layout of its target and every shadow is a blob of
    // `MaybeUninit` words, valid for any contents.
    unsafe {
        place(out.as_mut_ptr(), value);
        out.assume_init()
    }
}
