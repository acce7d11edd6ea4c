//! Owned storage for objects constructed in place through the C ABI.

use std::mem::MaybeUninit;

use crate::error::{check, Result};
use crate::sys;

/// A shadow type with a destructor function.
pub(crate) trait Destroy {
    /// # Safety
    ///
    /// `this` must hold a live object that is not used afterwards.
    unsafe fn destroy(this: *mut Self);
}

macro_rules! impl_destroy {
    ($($ty:ty => $destructor:path;)*) => {
        $(
            impl Destroy for $ty {
                unsafe fn destroy(this: *mut Self) {
                    $destructor(this)
                }
            }
        )*
    };
}

impl_destroy! {
    sys::TensorImpl => sys::executorch_TensorImpl_destructor;
    sys::MallocMemoryAllocator => sys::executorch_MallocMemoryAllocator_destructor;
    sys::HierarchicalAllocator => sys::executorch_HierarchicalAllocator_destructor;
    sys::ETDumpGen => sys::executorch_ETDumpGen_destructor;
    sys::Program => sys::executorch_Program_destructor;
    sys::Method => sys::executorch_Method_destructor;
}

#[cfg(feature = "data-loader")]
impl_destroy! {
    sys::FileDataLoader => sys::executorch_FileDataLoader_destructor;
}

#[cfg(all(feature = "data-loader", unix))]
impl_destroy! {
    sys::MmapDataLoader => sys::executorch_MmapDataLoader_destructor;
}

#[cfg(feature = "module")]
impl_destroy! {
    sys::Module => sys::executorch_Module_destructor;
}

impl Destroy for sys::TensorStorage {
    unsafe fn destroy(this: *mut Self) {
        sys::executorch_Tensor_destructor(sys::TensorRefMut::from_ptr(this))
    }
}

impl Destroy for sys::EValueStorage {
    unsafe fn destroy(this: *mut Self) {
        sys::executorch_EValue_destructor(sys::EValueRefMut::from_ptr(this))
    }
}

/// Heap storage holding one live object, destroyed exactly once on drop.
///
/// The object never moves, so pointers handed to the runtime stay valid for
/// as long as the slot lives.
pub(crate) struct Slot<T: Destroy> {
    storage: Box<MaybeUninit<T>>,
}

impl<T: Destroy> Slot<T> {
    /// Runs a constructor that cannot fail.
    ///
    /// # Safety
    ///
    /// `init` must construct a live object in the storage it is given.
    pub(crate) unsafe fn new(init: impl FnOnce(*mut T)) -> Self {
        let mut storage = Box::new(MaybeUninit::uninit());
        init(storage.as_mut_ptr());
        Self { storage }
    }

    /// Runs a fallible constructor. Nothing is destroyed when it fails.
    ///
    /// # Safety
    ///
    /// On [`sys::Error::Ok`], `init` must have constructed a live object in the
    /// storage it is given.
    pub(crate) unsafe fn try_new(init: impl FnOnce(*mut T) -> sys::Error) -> Result<Self> {
        let mut storage = Box::new(MaybeUninit::uninit());
        check(init(storage.as_mut_ptr()))?;
        Ok(Self { storage })
    }

    pub(crate) fn as_ptr(&self) -> *const T {
        self.storage.as_ptr()
    }

    pub(crate) fn as_mut_ptr(&mut self) -> *mut T {
        self.storage.as_mut_ptr()
    }
}

impl<T: Destroy> Drop for Slot<T> {
    fn drop(&mut self) {
        // SAFETY: the storage holds a live object from construction until now.
        unsafe { T::destroy(self.storage.as_mut_ptr()) }
    }
}

/// Boxed storage for a trivially destructible shadow.
///
/// # Safety
///
/// `T` must be a shadow type, and `init` must construct a live object in the
/// storage it is given.
pub(crate) unsafe fn boxed<T>(init: impl FnOnce(*mut T)) -> Box<T> {
    let mut storage = Box::new(MaybeUninit::<T>::uninit());
    init(storage.as_mut_ptr());
    Box::from_raw(Box::into_raw(storage).cast::<T>())
}

/// Runs a function that reports through an output pointer.
///
/// # Safety
///
/// On [`sys::Error::Ok`], `f` must have written a valid `T` to its argument.
pub(crate) unsafe fn try_out<T>(f: impl FnOnce(*mut T) -> sys::Error) -> Result<T> {
    let mut out = MaybeUninit::uninit();
    check(f(out.as_mut_ptr()))?;
    Ok(out.assume_init())
}
