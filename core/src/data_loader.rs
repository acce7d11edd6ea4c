//! Sources of program bytes.

use std::marker::PhantomData;

#[cfg(feature = "data-loader")]
use std::ffi::CString;
#[cfg(feature = "data-loader")]
use std::path::Path;

use crate::error::{check, Result};
#[cfg(feature = "data-loader")]
use crate::error::ExecutorchError;
use crate::sys;
#[cfg(feature = "data-loader")]
use crate::util::Slot;
use crate::util::boxed;

/// Anything a [`Program`](crate::program::Program) can be loaded from.
pub trait DataLoader {
    #[doc(hidden)]
    fn data_loader_handle(&self) -> sys::DataLoaderRef;

    /// Total number of bytes the loader serves.
    fn size(&self) -> Result<usize> {
        let mut size = 0;
        check(unsafe { sys::executorch_DataLoader_size(self.data_loader_handle(), &mut size) })?;
        Ok(size)
    }
}

/// Loader over bytes already in memory.
pub struct BufferDataLoader<'a> {
    inner: Box<sys::BufferDataLoader>,
    _data: PhantomData<&'a [u8]>,
}

impl<'a> BufferDataLoader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        let inner = unsafe {
            boxed(|out| sys::executorch_BufferDataLoader_new(out, data.as_ptr(), data.len()))
        };
        Self {
            inner,
            _data: PhantomData,
        }
    }
}

impl DataLoader for BufferDataLoader<'_> {
    fn data_loader_handle(&self) -> sys::DataLoaderRef {
        unsafe { sys::executorch_BufferDataLoader_as_data_loader(&*self.inner) }
    }
}

#[cfg(feature = "data-loader")]
fn path_arg(path: &Path) -> Result<CString> {
    if !path.exists() {
        return Err(ExecutorchError::FileNotFound(path.to_path_buf()));
    }
    let path = path
        .to_str()
        .ok_or_else(|| ExecutorchError::config(format!("path is not UTF-8: {}", path.display())))?;
    CString::new(path).map_err(|_| ExecutorchError::config("path contains a NUL byte"))
}

/// Loader that reads each requested range from a file into an aligned heap buffer.
#[cfg(feature = "data-loader")]
pub struct FileDataLoader {
    inner: Slot<sys::FileDataLoader>,
}

#[cfg(feature = "data-loader")]
impl FileDataLoader {
    pub const DEFAULT_ALIGNMENT: usize = 16;

    /// Opens `path`. `alignment` defaults to [`Self::DEFAULT_ALIGNMENT`].
    pub fn from_path(path: impl AsRef<Path>, alignment: Option<usize>) -> Result<Self> {
        let path = path_arg(path.as_ref())?;
        let alignment = alignment.unwrap_or(Self::DEFAULT_ALIGNMENT);
        let inner = unsafe {
            Slot::try_new(|out| sys::executorch_FileDataLoader_new(path.as_ptr(), alignment, out))?
        };
        Ok(Self { inner })
    }
}

#[cfg(feature = "data-loader")]
impl DataLoader for FileDataLoader {
    fn data_loader_handle(&self) -> sys::DataLoaderRef {
        unsafe { sys::executorch_FileDataLoader_as_data_loader(self.inner.as_ptr()) }
    }
}

/// Loader that maps requested ranges of a file into memory.
#[cfg(all(feature = "data-loader", unix))]
pub struct MmapDataLoader {
    inner: Slot<sys::MmapDataLoader>,
}

#[cfg(all(feature = "data-loader", unix))]
impl MmapDataLoader {
    pub fn from_path(path: impl AsRef<Path>, mlock_config: sys::MmapDataLoaderMlockConfig) -> Result<Self> {
        let path = path_arg(path.as_ref())?;
        let inner = unsafe {
            Slot::try_new(|out| sys::executorch_MmapDataLoader_new(path.as_ptr(), mlock_config as u32, out))?
        };
        Ok(Self { inner })
    }
}

#[cfg(all(feature = "data-loader", unix))]
impl DataLoader for MmapDataLoader {
    fn data_loader_handle(&self) -> sys::DataLoaderRef {
        unsafe { sys::executorch_MmapDataLoader_as_data_loader(self.inner.as_ptr()) }
    }
}
