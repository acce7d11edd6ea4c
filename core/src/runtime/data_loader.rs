//! Data loaders: where program bytes come from.

use std::ptr;

use serde::{Deserialize, Serialize};

use super::pal::et_log;
use super::{Error, Result};

/// Releases a buffer returned by a loader: `(context, data, size)`.
pub type FreeFn = unsafe fn(usize, *const u8, usize);

/// Bytes handed out by a loader, released exactly once on drop.
#[repr(C)]
#[derive(Debug)]
pub struct FreeableBuffer {
    data: *const u8,
    size: usize,
    free_fn: Option<FreeFn>,
    context: usize,
}

impl FreeableBuffer {
    pub fn empty() -> Self {
        Self {
            data: ptr::null(),
            size: 0,
            free_fn: None,
            context: 0,
        }
    }

    /// Wraps memory the caller keeps alive itself.
    pub fn borrowed(data: *const u8, size: usize) -> Self {
        Self {
            data,
            size,
            free_fn: None,
            context: 0,
        }
    }

    /// # Safety
    ///
    /// `free_fn(context, data, size)` must be the one correct way to release `data`.
    pub unsafe fn owned(data: *const u8, size: usize, free_fn: FreeFn, context: usize) -> Self {
        Self {
            data,
            size,
            free_fn: Some(free_fn),
            context,
        }
    }

    pub fn data(&self) -> *const u8 {
        self.data
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { super::array::raw_slice(self.data, self.size) }
    }

    pub fn free(&mut self) {
        if let Some(free_fn) = self.free_fn.take() {
            unsafe { free_fn(self.context, self.data, self.size) };
        }
        self.data = ptr::null();
        self.size = 0;
    }
}

impl Drop for FreeableBuffer {
    fn drop(&mut self) {
        self.free();
    }
}

/// Source of program bytes.
pub trait DataLoader {
    /// Returns `size` bytes starting at `offset`.
    fn load(&self, offset: usize, size: usize) -> Result<FreeableBuffer>;

    /// Total number of bytes available.
    fn size(&self) -> Result<usize>;
}

fn check_range(offset: usize, size: usize, total: usize) -> Result<()> {
    match offset.checked_add(size) {
        Some(end) if end <= total => Ok(()),
        _ => {
            et_log!(
                Error,
                "offset {} + size {} > total size {}",
                offset,
                size,
                total
            );
            Err(Error::InvalidArgument)
        }
    }
}

/// Loader over bytes already in memory. Hands out borrowed slices.
#[repr(C)]
#[derive(Debug)]
pub struct BufferDataLoader {
    data: *const u8,
    size: usize,
}

impl BufferDataLoader {
    /// # Safety
    ///
    /// `data` must be readable for `size` bytes while the loader and anything
    /// loaded from it are in use.
    pub unsafe fn new(data: *const u8, size: usize) -> Self {
        Self { data, size }
    }
}

impl DataLoader for BufferDataLoader {
    fn load(&self, offset: usize, size: usize) -> Result<FreeableBuffer> {
        check_range(offset, size, self.size)?;
        Ok(FreeableBuffer::borrowed(self.data.wrapping_add(offset), size))
    }

    fn size(&self) -> Result<usize> {
        Ok(self.size)
    }
}

/// Locking behavior of the mmap loader.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MlockConfig {
    /// Do not call `mlock()` on loaded pages.
    NoMlock = 0,
    /// Call `mlock()` and fail the load when it fails.
    #[default]
    UseMlock = 1,
    /// Call `mlock()` and ignore failures.
    UseMlockIgnoreErrors = 2,
}

#[cfg(feature = "data-loader")]
pub use file::FileDataLoader;
#[cfg(all(feature = "data-loader", unix))]
pub use mmap::MmapDataLoader;

#[cfg(feature = "data-loader")]
mod file {
    use std::ffi::c_void;
    use std::fs::File;
    use std::io::{Read, Seek, SeekFrom};

    use super::*;
    use crate::runtime::pal;

    /// Loader that reads each requested range into a fresh aligned heap buffer.
    #[repr(C)]
    #[derive(Debug)]
    pub struct FileDataLoader {
        file_name: Box<str>,
        file_size: usize,
        alignment: usize,
        file: File,
    }

    impl FileDataLoader {
        pub fn from(file_name: &str, alignment: usize) -> Result<Self> {
            if !alignment.is_power_of_two() {
                et_log!(Error, "alignment {} is not a power of two", alignment);
                return Err(Error::InvalidArgument);
            }
            let file = File::open(file_name).map_err(|e| {
                et_log!(Error, "failed to open {}: {}", file_name, e);
                io_error(&e)
            })?;
            let file_size = file
                .metadata()
                .map_err(|e| {
                    et_log!(Error, "could not stat {}: {}", file_name, e);
                    Error::AccessFailed
                })?
                .len() as usize;
            Ok(Self {
                file_name: file_name.into(),
                file_size,
                alignment,
                file,
            })
        }

        pub fn file_name(&self) -> &str {
            &self.file_name
        }
    }

    /// `raw` is the block returned by [`pal::allocate_aligned`].
    unsafe fn free_block(raw: usize, _data: *const u8, _size: usize) {
        pal::free(raw as *mut c_void);
    }

    impl DataLoader for FileDataLoader {
        fn load(&self, offset: usize, size: usize) -> Result<FreeableBuffer> {
            check_range(offset, size, self.file_size)?;
            if size == 0 {
                return Ok(FreeableBuffer::empty());
            }
            let Some((data, raw)) = pal::allocate_aligned(size, self.alignment) else {
                et_log!(Error, "could not allocate {} bytes for {}", size, self.file_name);
                return Err(Error::MemoryAllocationFailed);
            };
            let data = data.as_ptr();
            let buffer = unsafe { FreeableBuffer::owned(data, size, free_block, raw as usize) };
            let target = unsafe { std::slice::from_raw_parts_mut(data, size) };
            let mut file = &self.file;
            file.seek(SeekFrom::Start(offset as u64))
                .and_then(|_| file.read_exact(target))
                .map_err(|e| {
                    et_log!(
                        Error,
                        "reading {} bytes at {} from {} failed: {}",
                        size,
                        offset,
                        self.file_name,
                        e
                    );
                    Error::AccessFailed
                })?;
            Ok(buffer)
        }

        fn size(&self) -> Result<usize> {
            Ok(self.file_size)
        }
    }
}

#[cfg(all(feature = "data-loader", unix))]
mod mmap {
    use std::ffi::{c_int, CString};

    use super::*;

    /// Loader that maps requested ranges of a file into memory.
    #[repr(C)]
    #[derive(Debug)]
    pub struct MmapDataLoader {
        file_name: Box<str>,
        file_size: usize,
        page_size: usize,
        fd: c_int,
        mlock_config: MlockConfig,
    }

    impl MmapDataLoader {
        pub fn from(file_name: &str, mlock_config: MlockConfig) -> Result<Self> {
            let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
            if page_size <= 0 || !(page_size as usize).is_power_of_two() {
                et_log!(Error, "bad page size {}", page_size);
                return Err(Error::InvalidArgument);
            }
            let path = CString::new(file_name).map_err(|_| Error::InvalidArgument)?;
            let fd = unsafe { libc::open(path.as_ptr(), libc::O_RDONLY | libc::O_CLOEXEC) };
            if fd < 0 {
                let e = std::io::Error::last_os_error();
                et_log!(Error, "failed to open {}: {}", file_name, e);
                return Err(io_error(&e));
            }
            let mut st = std::mem::MaybeUninit::<libc::stat>::uninit();
            if unsafe { libc::fstat(fd, st.as_mut_ptr()) } < 0 {
                et_log!(Error, "could not stat {}", file_name);
                unsafe { libc::close(fd) };
                return Err(Error::AccessFailed);
            }
            let file_size = unsafe { st.assume_init() }.st_size as usize;
            Ok(Self {
                file_name: file_name.into(),
                file_size,
                page_size: page_size as usize,
                fd,
                mlock_config,
            })
        }

        pub fn file_name(&self) -> &str {
            &self.file_name
        }
    }

    // `context` is the distance from the page boundary the mapping starts at.
    unsafe fn unmap(context: usize, data: *const u8, size: usize) {
        let base = data.wrapping_sub(context) as *mut libc::c_void;
        libc::munmap(base, size + context);
    }

    impl DataLoader for MmapDataLoader {
        fn load(&self, offset: usize, size: usize) -> Result<FreeableBuffer> {
            check_range(offset, size, self.file_size)?;
            if size == 0 {
                return Ok(FreeableBuffer::empty());
            }
            let map_offset = offset & !(self.page_size - 1);
            let adjust = offset - map_offset;
            let map_size = size + adjust;
            let pages = unsafe {
                libc::mmap(
                    ptr::null_mut(),
                    map_size,
                    libc::PROT_READ,
                    libc::MAP_PRIVATE,
                    self.fd,
                    map_offset as libc::off_t,
                )
            };
            if pages == libc::MAP_FAILED {
                et_log!(
                    Error,
                    "mmap of {} bytes at {} from {} failed: {}",
                    map_size,
                    map_offset,
                    self.file_name,
                    std::io::Error::last_os_error()
                );
                return Err(Error::AccessFailed);
            }
            if self.mlock_config != MlockConfig::NoMlock && unsafe { libc::mlock(pages, map_size) } != 0 {
                let e = std::io::Error::last_os_error();
                if self.mlock_config == MlockConfig::UseMlock {
                    et_log!(Error, "mlock of {} failed: {}", self.file_name, e);
                    unsafe { libc::munmap(pages, map_size) };
                    return Err(Error::NotSupported);
                }
                et_log!(Debug, "ignoring mlock failure on {}: {}", self.file_name, e);
            }
            let data = (pages as *const u8).wrapping_add(adjust);
            Ok(unsafe { FreeableBuffer::owned(data, size, unmap, adjust) })
        }

        fn size(&self) -> Result<usize> {
            Ok(self.file_size)
        }
    }

    impl Drop for MmapDataLoader {
        fn drop(&mut self) {
            if self.fd >= 0 {
                unsafe { libc::close(self.fd) };
                self.fd = -1;
            }
        }
    }
}

#[cfg(feature = "data-loader")]
fn io_error(e: &std::io::Error) -> Error {
    match e.kind() {
        std::io::ErrorKind::NotFound => Error::NotFound,
        _ => Error::AccessFailed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_loader_bounds() {
        let bytes = [1u8, 2, 3, 4];
        let loader = unsafe { BufferDataLoader::new(bytes.as_ptr(), bytes.len()) };
        assert_eq!(loader.size(), Ok(4));
        assert_eq!(loader.load(1, 2).unwrap().as_slice(), &[2, 3]);
        assert_eq!(loader.load(3, 2).err(), Some(Error::InvalidArgument));
    }

    #[cfg(feature = "data-loader")]
    #[test]
    fn test_file_loader_reads_ranges() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();
        let path = file.path().to_str().unwrap();

        let loader = FileDataLoader::from(path, 16).unwrap();
        assert_eq!(loader.size(), Ok(11));
        let buffer = loader.load(6, 5).unwrap();
        assert_eq!(buffer.as_slice(), b"world");
        assert_eq!(buffer.data() as usize % 16, 0);
    }

    #[cfg(feature = "data-loader")]
    #[test]
    fn test_missing_file() {
        let err = FileDataLoader::from("/definitely/not/here.pte", 16).unwrap_err();
        assert_eq!(err, Error::NotFound);
    }

    #[cfg(all(feature = "data-loader", unix))]
    #[test]
    fn test_mmap_loader_reads_unaligned_ranges() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[7u8; 5000]).unwrap();
        file.write_all(b"tail").unwrap();
        let path = file.path().to_str().unwrap();

        let loader = MmapDataLoader::from(path, MlockConfig::NoMlock).unwrap();
        assert_eq!(loader.size(), Ok(5004));
        assert_eq!(loader.load(5000, 4).unwrap().as_slice(), b"tail");
    }
}
