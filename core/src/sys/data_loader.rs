use std::mem::MaybeUninit;

#[cfg(feature = "data-loader")]
use std::ffi::c_char;
#[cfg(all(feature = "data-loader", unix))]
use std::ffi::c_int;

use crate::runtime::data_loader as rt;
#[cfg(all(feature = "data-loader", unix))]
use crate::runtime::data_loader::MlockConfig;

use super::error::{write_value, Error};
#[cfg(feature = "data-loader")]
use super::error::write_result;
#[cfg(feature = "data-loader")]
use super::handles::str_arg;
use super::handles::{DataLoaderKind, DataLoaderRef};
#[cfg(feature = "data-loader")]
use super::layout::destroy;
use super::layout::{place, raw_enum, shadow};

/// Storage for a loader over bytes the caller keeps alive. Trivially destructible.
#[repr(C)]
pub struct BufferDataLoader {
    _blob: [MaybeUninit<usize>; 2],
}

/// Storage for a loader that reads from an open file.
#[cfg(feature = "data-loader")]
#[repr(C)]
pub struct FileDataLoader {
    _blob: [MaybeUninit<usize>; 5],
}

/// Storage for a loader that maps an open file.
#[cfg(all(feature = "data-loader", unix))]
#[repr(C)]
pub struct MmapDataLoader {
    _blob_1: [MaybeUninit<usize>; 4],
    _blob_2: [MaybeUninit<c_int>; 2],
}

shadow! {
    BufferDataLoader => rt::BufferDataLoader,
}

#[cfg(feature = "data-loader")]
shadow! {
    FileDataLoader => rt::FileDataLoader,
}

#[cfg(all(feature = "data-loader", unix))]
shadow! {
    MmapDataLoader => rt::MmapDataLoader,
}

#[no_mangle]
pub unsafe extern "C" fn executorch_BufferDataLoader_new(out: *mut BufferDataLoader, data: *const u8, size: usize) {
    place(out, rt::BufferDataLoader::new(data, size));
}

#[no_mangle]
pub unsafe extern "C" fn executorch_BufferDataLoader_as_data_loader(this: *const BufferDataLoader) -> DataLoaderRef {
    DataLoaderRef {
        ptr: this.cast(),
        kind: DataLoaderKind::Buffer as u32,
    }
}

/// Opens `file_path`. A missing file is `NotFound`, any other I/O failure `AccessFailed`.
#[cfg(feature = "data-loader")]
#[no_mangle]
pub unsafe extern "C" fn executorch_FileDataLoader_new(
    file_path: *const c_char,
    alignment: usize,
    out: *mut FileDataLoader,
) -> Error {
    let loader = str_arg(file_path).and_then(|path| rt::FileDataLoader::from(path, alignment));
    write_result(out, loader)
}

/// Closes the file.
#[cfg(feature = "data-loader")]
#[no_mangle]
pub unsafe extern "C" fn executorch_FileDataLoader_destructor(this: *mut FileDataLoader) {
    destroy(this);
}

#[cfg(feature = "data-loader")]
#[no_mangle]
pub unsafe extern "C" fn executorch_FileDataLoader_as_data_loader(this: *const FileDataLoader) -> DataLoaderRef {
    DataLoaderRef {
        ptr: this.cast(),
        kind: DataLoaderKind::File as u32,
    }
}

#[cfg(all(feature = "data-loader", unix))]
#[no_mangle]
pub unsafe extern "C" fn executorch_MmapDataLoader_new(
    file_path: *const c_char,
    mlock_config: u32,
    out: *mut MmapDataLoader,
) -> Error {
    let mlock_config = match MlockConfig::try_from(mlock_config) {
        Ok(mlock_config) => mlock_config,
        Err(e) => return e,
    };
    let loader = str_arg(file_path).and_then(|path| rt::MmapDataLoader::from(path, mlock_config));
    write_result(out, loader)
}

raw_enum! {
    rt::MlockConfig { NoMlock, UseMlock, UseMlockIgnoreErrors }
}

/// Closes the file. Regions still mapped by a program stay valid until freed.
#[cfg(all(feature = "data-loader", unix))]
#[no_mangle]
pub unsafe extern "C" fn executorch_MmapDataLoader_destructor(this: *mut MmapDataLoader) {
    destroy(this);
}

#[cfg(all(feature = "data-loader", unix))]
#[no_mangle]
pub unsafe extern "C" fn executorch_MmapDataLoader_as_data_loader(this: *const MmapDataLoader) -> DataLoaderRef {
    DataLoaderRef {
        ptr: this.cast(),
        kind: DataLoaderKind::Mmap as u32,
    }
}

/// Total number of bytes the loader can serve.
#[no_mangle]
pub unsafe extern "C" fn executorch_DataLoader_size(loader: DataLoaderRef, out: *mut usize) -> Error {
    match loader.resolve() {
        Ok(Some(loader)) => write_value(out, loader.as_ref().size()),
        Ok(None) => Error::InvalidArgument,
        Err(e) => e.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_loader_size() {
        let bytes = [0u8; 24];
        let mut slot = MaybeUninit::<BufferDataLoader>::uninit();
        let mut size = 0;
        unsafe {
            executorch_BufferDataLoader_new(slot.as_mut_ptr(), bytes.as_ptr(), bytes.len());
            let loader = executorch_BufferDataLoader_as_data_loader(slot.as_ptr());
            assert_eq!(executorch_DataLoader_size(loader, &mut size), Error::Ok);
        }
        assert_eq!(size, 24);
    }

    #[test]
    fn test_null_loader_is_rejected() {
        let loader = DataLoaderRef {
            ptr: std::ptr::null(),
            kind: DataLoaderKind::Buffer as u32,
        };
        let mut size = 7;
        assert_eq!(unsafe { executorch_DataLoader_size(loader, &mut size) }, Error::InvalidArgument);
        assert_eq!(size, 7);
    }

    #[test]
    fn test_unknown_loader_kind_is_rejected() {
        let bytes = [0u8; 8];
        let mut slot = MaybeUninit::<BufferDataLoader>::uninit();
        let mut size = 7;
        unsafe {
            executorch_BufferDataLoader_new(slot.as_mut_ptr(), bytes.as_ptr(), bytes.len());
            let mut loader = executorch_BufferDataLoader_as_data_loader(slot.as_ptr());
            loader.kind = 42;
            assert_eq!(executorch_DataLoader_size(loader, &mut size), Error::InvalidArgument);
        }
        assert_eq!(size, 7);
        assert_eq!(DataLoaderKind::try_from(2), Ok(DataLoaderKind::Mmap));
        assert_eq!(DataLoaderKind::try_from(3), Err(Error::InvalidArgument));
    }

    #[cfg(feature = "data-loader")]
    #[test]
    fn test_file_loader_missing_file() {
        let mut slot = MaybeUninit::<FileDataLoader>::uninit();
        let status = unsafe { executorch_FileDataLoader_new(c"/no/such/model.pte".as_ptr(), 16, slot.as_mut_ptr()) };
        assert_eq!(status, Error::NotFound);
    }
}
