// SPDX-FileCopyrightText: 2025 Contributors to the OpenCDM Rust project.
// SPDX-License-Identifier: Apache-2.0

//! Named POSIX shared memory mappings.

use std::ffi::CString;
use std::fs::File;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};

use tracing::error;

use crate::{Error, Result};

/// A `MAP_SHARED` read/write mapping of a named shared memory object.
///
/// The creating side owns the name and unlinks it on drop; attached mappings
/// only unmap.
pub(crate) struct SharedMemory {
    name: CString,
    ptr: *mut u8,
    size: usize,
    owner: bool,
}

// Safety: the mapping is plain memory shared with another process. All
// concurrent access goes through the channel handshake, which hands the
// non-atomic parts to exactly one party at a time.
unsafe impl Send for SharedMemory {}
unsafe impl Sync for SharedMemory {}

impl SharedMemory {
    /// Creates and maps a new object of `size` bytes. Fails if `name` exists.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let name = CString::new(name)?;
        let fd = unsafe {
            libc::shm_open(
                name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };
        if fd < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        // Safety: shm_open just returned this descriptor and nothing else owns it.
        let file = File::from(unsafe { OwnedFd::from_raw_fd(fd) });
        let mapped = file
            .set_len(size as u64)
            .map_err(Error::from)
            .and_then(|()| map(&file, size));
        match mapped {
            Ok(ptr) => Ok(Self {
                name,
                ptr,
                size,
                owner: true,
            }),
            Err(error) => {
                unsafe { libc::shm_unlink(name.as_ptr()) };
                Err(error)
            }
        }
    }

    /// Maps an existing object in full.
    pub fn open(name: &str) -> Result<Self> {
        let name = CString::new(name)?;
        let fd = unsafe { libc::shm_open(name.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        // Safety: see `create`.
        let file = File::from(unsafe { OwnedFd::from_raw_fd(fd) });
        let size = file.metadata()?.len() as usize;
        let ptr = map(&file, size)?;
        Ok(Self {
            name,
            ptr,
            size,
            owner: false,
        })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn name(&self) -> &str {
        self.name.to_str().unwrap_or_default()
    }
}

fn map(file: &File, size: usize) -> Result<*mut u8> {
    if size == 0 {
        return Err(Error::InvalidArg);
    }
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            size,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            file.as_raw_fd(),
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(ptr.cast())
}

impl Drop for SharedMemory {
    fn drop(&mut self) {
        if unsafe { libc::munmap(self.ptr.cast(), self.size) } != 0 {
            error!(
                "Failed to unmap shared memory {:?}: {}",
                self.name,
                std::io::Error::last_os_error()
            );
        }
        if self.owner && unsafe { libc::shm_unlink(self.name.as_ptr()) } != 0 {
            error!(
                "Failed to unlink shared memory {:?}: {}",
                self.name,
                std::io::Error::last_os_error()
            );
        }
    }
}
