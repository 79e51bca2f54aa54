//! Memory-mapped file reader.

use std::{
    ffi::c_void,
    fs,
    io::{Error, ErrorKind},
    ptr, slice,
};

use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};

use super::*;

/// File reader based on `mmap(2)`.
pub struct Mmap {
    content: MmapContent,
}

impl FileReader for Mmap {
    type Bytes = MmapContent;

    fn open<P>(path: P) -> Result<Self>
    where
        P: AsRef<Path>,
    {
        let file = fs::File::open(path)?;

        let length = {
            let length: usize = file.metadata()?.len().try_into().map_err(|_| {
                Error::new(
                    ErrorKind::InvalidData,
                    "Memory map length is too large to fit in `usize`",
                )
            })?;

            if length == 0 {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    "Memory map's length must not be zero",
                ));
            }

            length
        };

        let pointer = unsafe {
            mmap(ptr::null_mut(), length, ProtFlags::READ, MapFlags::PRIVATE, &file, 0)
                .map_err(|errno| Error::from_raw_os_error(errno.raw_os_error()))?
        };

        Ok(Self { content: MmapContent { _file: file, pointer, length } })
    }

    fn read_as_bytes(self) -> Result<Self::Bytes> {
        Ok(self.content)
    }
}

/// Represents the content read from a [`Mmap`].
pub struct MmapContent {
    _file: fs::File,
    pointer: *const c_void,
    length: usize,
}

impl Deref for MmapContent {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        // SAFETY: The mapping covers `length` readable bytes for the whole
        // lifetime of `self`.
        unsafe { slice::from_raw_parts(self.pointer as *const u8, self.length) }
    }
}

impl Drop for MmapContent {
    fn drop(&mut self) {
        // `mmap(2)` returned a page-aligned pointer, `munmap(2)` rounds the
        // length up to a page boundary itself.
        let _ = unsafe { munmap(self.pointer as *mut _, self.length) };
    }
}

// SAFETY: `MmapContent.pointer`'s lifetime is tied to `MmapContent._file`, and
// the mapping is private and read-only.
unsafe impl Send for MmapContent {}
