// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! POSIX shared memory segment.
//!
//! Safe wrapper around `shm_open`, `ftruncate` and `mmap`.
//!
//! # Segment Lifecycle
//!
//! 1. Producer calls [`ShmSegment::create`] (create-or-open, idempotent on the name)
//! 2. Consumers call [`ShmSegment::open`]
//! 3. [`ShmSegment::close`] (or drop) unmaps and closes the descriptor
//! 4. The backing object persists until [`ShmSegment::unlink`]
//!
//! # Naming Convention
//!
//! Names are normalized to a leading `/` and must contain no other `/`.
//! Example: `seg1` becomes `/seg1`.
//!
//! The segment does no internal locking. The producing side is the only writer.

use super::{normalize_name, Result, ShmError};
use std::ffi::CString;
use std::io;
use std::ptr;

/// Permissions for newly created segments: owner rw, group rw, others r.
const CREATE_MODE: libc::mode_t = 0o664;

/// Named POSIX shared memory region.
///
/// While open, `fd >= 0` and `ptr` maps `size` bytes. After [`close`](Self::close)
/// `fd` is `-1` and `ptr` is null; reads and writes fail with
/// [`ShmError::NotOpen`].
pub struct ShmSegment {
    name: String,
    size: usize,
    fd: libc::c_int,
    ptr: *mut u8,
}

// SAFETY: the mapping is process-shared memory. The segment never hands out
// references into it; access goes through bounds-checked copies or through
// atomics placed by the channel layer.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Create-or-open the named region and map `size` bytes.
    ///
    /// A new object gets mode `0664`. An existing object smaller than `size` is
    /// grown; it is never shrunk, other processes may have it mapped.
    ///
    /// # Errors
    ///
    /// - [`ShmError::InvalidName`] for a malformed name
    /// - [`ShmError::Resource`] when an OS call fails
    pub fn create(name: &str, size: usize) -> Result<Self> {
        let segment = Self::map(name, size, CREATE_MODE)?;
        log::info!("[SHM] Created segment {} ({} bytes)", segment.name, size);
        Ok(segment)
    }

    /// Attach to the named region, creating it if absent.
    pub fn open(name: &str, size: usize) -> Result<Self> {
        let segment = Self::map(name, size, 0)?;
        log::debug!("[SHM] Opened segment {} ({} bytes)", segment.name, size);
        Ok(segment)
    }

    fn map(name: &str, size: usize, mode: libc::mode_t) -> Result<Self> {
        let name = normalize_name(name);
        Self::validate_name(&name)?;
        if size == 0 {
            return Err(ShmError::Resource {
                op: "mmap",
                source: io::Error::new(io::ErrorKind::InvalidInput, "segment size must be > 0"),
            });
        }

        let c_name = CString::new(name.as_str()).map_err(|_| ShmError::InvalidName(name.clone()))?;

        // SAFETY:
        // - c_name is a valid null-terminated CString created above
        // - O_RDWR | O_CREAT opens an existing object or creates a new one
        // - mode is a valid permission mask (ignored for existing objects)
        // - shm_open returns a valid fd on success or -1 on error (checked below)
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR | libc::O_CREAT, mode as libc::c_uint) };
        if fd < 0 {
            return Err(ShmError::os("shm_open"));
        }

        if let Err(e) = Self::ensure_len(fd, size) {
            // SAFETY: fd is valid from shm_open and not used after this point
            unsafe { libc::close(fd) };
            return Err(e);
        }

        // SAFETY:
        // - null address lets the kernel choose the placement
        // - size > 0 (checked above) and the object is at least size bytes long
        // - PROT_READ | PROT_WRITE matches the O_RDWR descriptor
        // - MAP_SHARED makes writes visible to every process mapping the object
        // - mmap returns MAP_FAILED on error (checked below)
        let addr = unsafe {
            libc::mmap(
                ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if addr == libc::MAP_FAILED {
            let err = ShmError::os("mmap");
            // SAFETY: fd is valid from shm_open and not used after this point
            unsafe { libc::close(fd) };
            return Err(err);
        }

        Ok(Self {
            name,
            size,
            fd,
            ptr: addr as *mut u8,
        })
    }

    fn ensure_len(fd: libc::c_int, size: usize) -> Result<()> {
        // SAFETY: zeroed bytes are a valid `stat` value; fstat overwrites it
        let mut st: libc::stat = unsafe { std::mem::zeroed() };
        // SAFETY: fd is a valid descriptor and st is a valid out-pointer
        if unsafe { libc::fstat(fd, &mut st) } < 0 {
            return Err(ShmError::os("fstat"));
        }
        if (st.st_size as u64) < size as u64 {
            // SAFETY: fd is a valid read-write descriptor; ftruncate fails cleanly
            // if the size is not representable
            if unsafe { libc::ftruncate(fd, size as libc::off_t) } < 0 {
                return Err(ShmError::os("ftruncate"));
            }
        }
        Ok(())
    }

    /// Validate segment name follows POSIX rules
    fn validate_name(name: &str) -> Result<()> {
        if !name.starts_with('/') || name.len() < 2 {
            return Err(ShmError::InvalidName(format!(
                "Segment name must be '/' followed by a name: {name}"
            )));
        }
        if name[1..].contains('/') {
            return Err(ShmError::InvalidName(format!(
                "Segment name cannot contain '/' after prefix: {name}"
            )));
        }
        if name.len() > 255 {
            return Err(ShmError::InvalidName(format!(
                "Segment name too long (max 255): {name}"
            )));
        }
        Ok(())
    }

    fn check_range(&self, offset: usize, len: usize) -> Result<()> {
        if self.ptr.is_null() {
            return Err(ShmError::NotOpen);
        }
        match offset.checked_add(len) {
            Some(end) if end <= self.size => Ok(()),
            _ => Err(ShmError::OutOfRange {
                offset,
                len,
                size: self.size,
            }),
        }
    }

    /// Copy `bytes` into the region at `offset`.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.check_range(offset, bytes.len())?;
        // SAFETY:
        // - the mapping is open and [offset, offset + len) lies inside it (checked)
        // - bytes is a distinct Rust slice, so the regions cannot overlap
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(offset), bytes.len());
        }
        Ok(())
    }

    /// Copy `out.len()` bytes from the region at `offset` into `out`.
    pub fn read(&self, offset: usize, out: &mut [u8]) -> Result<()> {
        self.check_range(offset, out.len())?;
        // SAFETY:
        // - the mapping is open and [offset, offset + len) lies inside it (checked)
        // - out is a distinct, exclusively borrowed Rust slice
        unsafe {
            ptr::copy_nonoverlapping(self.ptr.add(offset), out.as_mut_ptr(), out.len());
        }
        Ok(())
    }

    /// Release the mapping and the descriptor. The backing object persists.
    ///
    /// # Errors
    ///
    /// [`ShmError::NotOpen`] if already closed.
    pub fn close(&mut self) -> Result<()> {
        if self.fd < 0 {
            return Err(ShmError::NotOpen);
        }
        // SAFETY:
        // - ptr/size come from the successful mmap in map() and were not unmapped
        //   yet (ptr is nulled right after)
        // - fd is valid and closed exactly once (set to -1 right after)
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.size);
            libc::close(self.fd);
        }
        self.ptr = ptr::null_mut();
        self.fd = -1;
        log::debug!("[SHM] Closed segment {}", self.name);
        Ok(())
    }

    /// Remove this segment's name. Processes that still map it keep their view.
    pub fn unlink(&self) -> Result<()> {
        Self::unlink_name(&self.name)
    }

    /// Remove a segment name without a handle. A missing name is not an error.
    pub fn unlink_name(name: &str) -> Result<()> {
        let name = normalize_name(name);
        let c_name = CString::new(name.as_str()).map_err(|_| ShmError::InvalidName(name.clone()))?;

        // SAFETY: c_name is a valid null-terminated CString; shm_unlink only
        // touches the shared memory namespace
        let ret = unsafe { libc::shm_unlink(c_name.as_ptr()) };
        if ret < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                return Err(ShmError::Resource {
                    op: "shm_unlink",
                    source: err,
                });
            }
        }
        log::debug!("[SHM] Unlinked segment {}", name);
        Ok(())
    }

    /// Check if a segment with the given name exists
    #[must_use]
    pub fn exists(name: &str) -> bool {
        let Ok(c_name) = CString::new(normalize_name(name)) else {
            return false;
        };

        // SAFETY: c_name is a valid CString; O_RDONLY without O_CREAT never
        // creates an object
        let fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDONLY, 0) };
        if fd >= 0 {
            // SAFETY: fd is valid (>= 0) and not used after this point
            unsafe { libc::close(fd) };
            true
        } else {
            false
        }
    }

    /// True while the region is mapped.
    #[inline]
    pub fn is_open(&self) -> bool {
        self.fd >= 0
    }

    /// Raw pointer to the mapping (null when closed).
    #[inline]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    /// Mapped size in bytes.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Normalized segment name.
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        if self.is_open() {
            let _ = self.close();
        }
        // Not unlinked: the creator decides when the name goes away.
    }
}

impl std::fmt::Debug for ShmSegment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmSegment")
            .field("name", &self.name)
            .field("size", &self.size)
            .field("open", &self.is_open())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unique_name() -> String {
        format!("/rtlink_test_{}_{}", std::process::id(), fastrand::u64(..))
    }

    #[test]
    fn test_validate_name() {
        assert!(ShmSegment::validate_name("/foo").is_ok());
        assert!(ShmSegment::validate_name("/").is_err());
        assert!(ShmSegment::validate_name("/foo/bar").is_err());
        assert!(ShmSegment::validate_name(&format!("/{}", "x".repeat(300))).is_err());
    }

    #[test]
    fn test_create_write_open_read() {
        let name = unique_name();
        let mut seg1 = ShmSegment::create(&name, 1024).expect("create");
        seg1.write(0, b"hello").expect("write");

        let seg2 = ShmSegment::open(&name, 1024).expect("open");
        let mut out = [0u8; 5];
        seg2.read(0, &mut out).expect("read");
        assert_eq!(&out, b"hello");

        seg1.unlink().expect("unlink");
    }

    #[test]
    fn test_name_normalized() {
        let bare = format!("rtlink_test_bare_{}", fastrand::u64(..));
        let seg = ShmSegment::create(&bare, 64).expect("create");
        assert_eq!(seg.name(), format!("/{bare}"));
        assert!(ShmSegment::exists(&bare));
        ShmSegment::unlink_name(&bare).expect("unlink");
        assert!(!ShmSegment::exists(&bare));
    }

    #[test]
    fn test_create_is_idempotent_on_name() {
        let name = unique_name();
        let mut a = ShmSegment::create(&name, 256).expect("create");
        a.write(10, &[7, 8, 9]).expect("write");

        let b = ShmSegment::create(&name, 256).expect("create again");
        let mut out = [0u8; 3];
        b.read(10, &mut out).expect("read");
        assert_eq!(out, [7, 8, 9]);

        ShmSegment::unlink_name(&name).expect("unlink");
    }

    #[test]
    fn test_out_of_range_rejected() {
        let name = unique_name();
        let mut seg = ShmSegment::create(&name, 16).expect("create");
        assert!(matches!(
            seg.write(12, &[0u8; 8]),
            Err(ShmError::OutOfRange { offset: 12, len: 8, size: 16 })
        ));
        let mut out = [0u8; 4];
        assert!(matches!(
            seg.read(usize::MAX, &mut out),
            Err(ShmError::OutOfRange { .. })
        ));
        seg.unlink().expect("unlink");
    }

    #[test]
    fn test_close_then_access_fails() {
        let name = unique_name();
        let mut seg = ShmSegment::create(&name, 64).expect("create");
        seg.close().expect("close");
        assert!(!seg.is_open());
        assert!(matches!(seg.write(0, b"x"), Err(ShmError::NotOpen)));
        assert!(matches!(seg.close(), Err(ShmError::NotOpen)));

        // Backing object persists after close
        assert!(ShmSegment::exists(&name));
        seg.unlink().expect("unlink");
        assert!(!ShmSegment::exists(&name));
    }

    #[test]
    fn test_unlink_idempotent() {
        let name = unique_name();
        let seg = ShmSegment::create(&name, 64).expect("create");
        assert!(seg.unlink().is_ok());
        assert!(seg.unlink().is_ok());
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(
            ShmSegment::create(&unique_name(), 0),
            Err(ShmError::Resource { op: "mmap", .. })
        ));
    }
}
