//! Opaque handles.
//!
//! A `*Ref` is a read-only pointer to a live object, a `*RefMut` an exclusive
//! one, possibly to storage about to be constructed. Neither owns anything.
//! Interfaces the runtime dispatches on (data loaders, allocators, event
//! tracers) are handed over as a pointer plus the kind of the concrete object,
//! obtained from that object's `as_*` function.

use std::ffi::{c_char, c_void, CStr};
use std::ptr::{self, NonNull};

use crate::runtime;

use super::data_loader::BufferDataLoader;
#[cfg(feature = "data-loader")]
use super::data_loader::FileDataLoader;
#[cfg(all(feature = "data-loader", unix))]
use super::data_loader::MmapDataLoader;
use super::event_tracer::ETDumpGen;
use super::evalue::EValueStorage;
use super::layout::{cast, cast_mut, raw_enum, Shadow};
use super::memory::{MallocMemoryAllocator, MemoryAllocator};
use super::tensor::{OptionalTensorStorage, TensorStorage};

macro_rules! handles {
    ($($(#[$doc:meta])* $name:ident => $storage:ty;)*) => {
        $(
            $(#[$doc])*
            #[repr(transparent)]
            #[derive(Debug, Clone, Copy)]
            pub struct $name {
                pub ptr: *const c_void,
            }

            impl $name {
                pub const fn null() -> Self {
                    Self { ptr: ptr::null() }
                }

                pub fn from_ref(storage: &$storage) -> Self {
                    Self { ptr: (storage as *const $storage).cast() }
                }

                pub fn is_null(&self) -> bool {
                    self.ptr.is_null()
                }

                /// # Safety
                ///
                /// The handle must point to a live object that outlives `'a`.
                pub(crate) unsafe fn get<'a>(self) -> &'a <$storage as Shadow>::Target {
                    cast(self.ptr.cast::<$storage>())
                }
            }
        )*
    };
}

macro_rules! handles_mut {
    ($($(#[$doc:meta])* $name_mut:ident => $name:ident, $storage:ty;)*) => {
        $(
            $(#[$doc])*
            #[repr(transparent)]
            #[derive(Debug, Clone, Copy)]
            pub struct $name_mut {
                pub ptr: *mut c_void,
            }

            impl $name_mut {
                pub fn from_ptr(storage: *mut $storage) -> Self {
                    Self { ptr: storage.cast() }
                }

                pub fn as_ref(&self) -> $name {
                    $name { ptr: self.ptr }
                }

                pub(crate) fn storage(self) -> *mut $storage {
                    self.ptr.cast()
                }
            }

            impl $name {
                pub(crate) fn from_target(target: &<$storage as Shadow>::Target) -> Self {
                    Self { ptr: (target as *const <$storage as Shadow>::Target).cast() }
                }
            }
        )*
    };
}

handles! {
    /// Handle to an [`EValueStorage`].
    EValueRef => EValueStorage;
    /// Handle to a [`TensorStorage`].
    TensorRef => TensorStorage;
    /// Handle to an [`OptionalTensorStorage`].
    OptionalTensorRef => OptionalTensorStorage;
}

handles_mut! {
    /// Exclusive handle to an [`EValueStorage`], possibly not yet constructed.
    EValueRefMut => EValueRef, EValueStorage;
    /// Exclusive handle to a [`TensorStorage`], possibly not yet constructed.
    TensorRefMut => TensorRef, TensorStorage;
}

impl EValueRefMut {
    /// # Safety
    ///
    /// The handle must point to a live value that outlives `'a` and is not
    /// otherwise borrowed.
    pub(crate) unsafe fn get<'a>(self) -> &'a mut <EValueStorage as Shadow>::Target {
        cast_mut(self.ptr.cast::<EValueStorage>())
    }
}

/// Concrete type behind a [`DataLoaderRef`].
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLoaderKind {
    Buffer = 0,
    File = 1,
    Mmap = 2,
}

/// Data loader accepted by `executorch_Program_load`.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct DataLoaderRef {
    pub ptr: *const c_void,
    /// A [`DataLoaderKind`].
    pub kind: u32,
}

impl DataLoaderRef {
    /// # Safety
    ///
    /// The handle must be null or come from an `as_data_loader` function of a
    /// live loader.
    pub(crate) unsafe fn resolve(self) -> runtime::Result<Option<NonNull<dyn runtime::data_loader::DataLoader>>> {
        if self.ptr.is_null() {
            return Ok(None);
        }
        let kind = DataLoaderKind::try_from(self.kind).map_err(|_| runtime::Error::InvalidArgument)?;
        let loader: NonNull<dyn runtime::data_loader::DataLoader> = match kind {
            DataLoaderKind::Buffer => NonNull::<runtime::data_loader::BufferDataLoader>::from(cast(
                self.ptr.cast::<BufferDataLoader>(),
            )),
            #[cfg(feature = "data-loader")]
            DataLoaderKind::File => NonNull::<runtime::data_loader::FileDataLoader>::from(cast(
                self.ptr.cast::<FileDataLoader>(),
            )),
            #[cfg(all(feature = "data-loader", unix))]
            DataLoaderKind::Mmap => NonNull::<runtime::data_loader::MmapDataLoader>::from(cast(
                self.ptr.cast::<MmapDataLoader>(),
            )),
            #[allow(unreachable_patterns)]
            _ => return Err(runtime::Error::NotSupported),
        };
        Ok(Some(loader))
    }
}

/// Concrete type behind a [`MemoryAllocatorRefMut`].
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryAllocatorKind {
    Arena = 0,
    Malloc = 1,
}

/// Allocator accepted by `executorch_MemoryManager_new`. A null pointer means none.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct MemoryAllocatorRefMut {
    pub ptr: *mut c_void,
    /// A [`MemoryAllocatorKind`].
    pub kind: u32,
}

impl MemoryAllocatorRefMut {
    pub const fn null() -> Self {
        Self {
            ptr: ptr::null_mut(),
            kind: MemoryAllocatorKind::Arena as u32,
        }
    }

    /// # Safety
    ///
    /// The handle must be null or come from an `as_memory_allocator` function
    /// of a live allocator.
    pub(crate) unsafe fn resolve(self) -> runtime::Result<Option<NonNull<dyn runtime::memory::Allocator>>> {
        if self.ptr.is_null() {
            return Ok(None);
        }
        let kind = MemoryAllocatorKind::try_from(self.kind).map_err(|_| runtime::Error::InvalidArgument)?;
        let allocator: NonNull<dyn runtime::memory::Allocator> = match kind {
            MemoryAllocatorKind::Arena => NonNull::<runtime::memory::MemoryAllocator>::from(cast_mut(
                self.ptr.cast::<MemoryAllocator>(),
            )),
            MemoryAllocatorKind::Malloc => NonNull::<runtime::memory::MallocMemoryAllocator>::from(
                cast_mut(self.ptr.cast::<MallocMemoryAllocator>()),
            ),
        };
        Ok(Some(allocator))
    }
}

/// Concrete type behind an [`EventTracerRefMut`].
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTracerKind {
    ETDump = 0,
}

/// Event tracer accepted by `executorch_Program_load_method`. A null pointer means none.
#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct EventTracerRefMut {
    pub ptr: *mut c_void,
    /// An [`EventTracerKind`].
    pub kind: u32,
}

impl EventTracerRefMut {
    pub const fn null() -> Self {
        Self {
            ptr: ptr::null_mut(),
            kind: EventTracerKind::ETDump as u32,
        }
    }

    /// # Safety
    ///
    /// The handle must be null or come from an `as_event_tracer` function of a
    /// live tracer.
    pub(crate) unsafe fn resolve(self) -> runtime::Result<Option<NonNull<dyn runtime::event_tracer::EventTracer>>> {
        if self.ptr.is_null() {
            return Ok(None);
        }
        let kind = EventTracerKind::try_from(self.kind).map_err(|_| runtime::Error::InvalidArgument)?;
        let tracer: NonNull<dyn runtime::event_tracer::EventTracer> = match kind {
            EventTracerKind::ETDump => NonNull::<runtime::event_tracer::ETDumpGen>::from(cast_mut(
                self.ptr.cast::<ETDumpGen>(),
            )),
        };
        Ok(Some(tracer))
    }
}

raw_enum! {
    DataLoaderKind { Buffer, File, Mmap }
    MemoryAllocatorKind { Arena, Malloc }
    EventTracerKind { ETDump }
}

/// Borrows a NUL-terminated UTF-8 argument. Null or invalid UTF-8 is an invalid argument.
///
/// # Safety
///
/// `ptr` must be null or point to a NUL-terminated string that outlives `'a`.
pub(crate) unsafe fn str_arg<'a>(ptr: *const c_char) -> runtime::Result<&'a str> {
    if ptr.is_null() {
        return Err(runtime::Error::InvalidArgument);
    }
    CStr::from_ptr(ptr)
        .to_str()
        .map_err(|_| runtime::Error::InvalidArgument)
}
