//! POSIX shared-memory mapping for trace regions.
//!
//! The protocol core only needs two stable memory blocks; this module is what
//! lets a real external process be the probe, by putting those blocks in a
//! named shm object both sides can map.

use crate::error::{Result, TraceError};
use rustix::fd::OwnedFd;
use rustix::fs::ftruncate;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use rustix::shm::{shm_open, shm_unlink, Mode, ShmOFlags};
use std::ffi::CString;
use std::ptr::NonNull;

const SHM_PREFIX: &str = "/tracelink_";
const MAX_NAME_LEN: usize = 255 - SHM_PREFIX.len();

/// A mapped shared-memory object. The creating side owns the name and
/// unlinks it on drop; openers just unmap.
pub struct SharedMem {
    #[allow(dead_code)]
    fd: OwnedFd,
    addr: NonNull<u8>,
    size: usize,
    name: String,
    is_owner: bool,
}

// SAFETY: the mapping itself is plain memory; every access through it is the
// responsibility of the protocol layers above.
unsafe impl Send for SharedMem {}
unsafe impl Sync for SharedMem {}

fn shm_name(name: &str) -> Result<CString> {
    if name.len() > MAX_NAME_LEN {
        return Err(TraceError::NameTooLong {
            max: MAX_NAME_LEN,
            got: name.len(),
        });
    }
    // The prefix and length check leave no room for interior NULs from a
    // str, so this cannot fail.
    Ok(CString::new(format!("{SHM_PREFIX}{name}")).expect("shm name contains NUL"))
}

fn map(fd: &OwnedFd, size: usize) -> Result<NonNull<u8>> {
    let addr = unsafe {
        mmap(
            std::ptr::null_mut(),
            size,
            ProtFlags::READ | ProtFlags::WRITE,
            MapFlags::SHARED,
            fd,
            0,
        )
        .map_err(|e| TraceError::Mmap(e.into()))?
    };
    Ok(NonNull::new(addr.cast::<u8>()).expect("mmap returned null"))
}

impl SharedMem {
    /// Create (or re-create) a region of `size` bytes, zero-filled.
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let c_name = shm_name(name)?;
        let mode = Mode::RUSR | Mode::WUSR | Mode::RGRP | Mode::WGRP;

        let fd = match shm_open(
            c_name.as_c_str(),
            ShmOFlags::CREATE | ShmOFlags::EXCL | ShmOFlags::RDWR,
            mode,
        ) {
            Ok(fd) => fd,
            // Stale object from a previous run; reuse it.
            Err(_) => shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(|e| {
                TraceError::ShmCreate {
                    name: name.to_string(),
                    source: e.into(),
                }
            })?,
        };

        ftruncate(&fd, size as u64).map_err(|e| TraceError::Truncate(e.into()))?;
        let addr = map(&fd, size)?;
        unsafe {
            std::ptr::write_bytes(addr.as_ptr(), 0, size);
        }

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: true,
        })
    }

    /// Map an existing region created by another process.
    pub fn open(name: &str) -> Result<Self> {
        let c_name = shm_name(name)?;
        let wrap_err = |e: rustix::io::Errno| TraceError::ShmOpen {
            name: name.to_string(),
            source: e.into(),
        };

        let fd = shm_open(c_name.as_c_str(), ShmOFlags::RDWR, Mode::empty()).map_err(wrap_err)?;
        let size = rustix::fs::fstat(&fd).map_err(wrap_err)?.st_size as usize;
        let addr = map(&fd, size)?;

        Ok(Self {
            fd,
            addr,
            size,
            name: name.to_string(),
            is_owner: false,
        })
    }

    #[inline]
    pub fn as_ptr(&self) -> *mut u8 {
        self.addr.as_ptr()
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.size
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn is_owner(&self) -> bool {
        self.is_owner
    }
}

impl Drop for SharedMem {
    fn drop(&mut self) {
        unsafe {
            let _ = munmap(self.addr.as_ptr().cast(), self.size);
        }
        if self.is_owner {
            if let Ok(c_name) = shm_name(&self.name) {
                let _ = shm_unlink(c_name.as_c_str());
            }
        }
    }
}
