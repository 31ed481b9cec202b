//! Shared memory channel lifecycle
//!
//! Owns the OS mapping for the record's lifetime: create or attach on
//! construction, guaranteed release on every exit path (including a
//! partially failed open), the raw handle never escapes this module.

use crate::{ChannelError, Result, SharedRecord, SHARED_RECORD_SIZE};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info};

/// Handle to the named shared memory mapping holding one [`SharedRecord`].
pub struct SharedChannel {
    name: String,
    record: NonNull<SharedRecord>,
    handle: PlatformHandle,
    is_creator: bool,
    released: AtomicBool,
}

/// Platform-specific state kept for release.
#[derive(Debug)]
enum PlatformHandle {
    #[cfg(unix)]
    Unix,
    #[cfg(windows)]
    Windows { handle: *mut std::ffi::c_void },
}

impl SharedChannel {
    /// Create the named mapping, or attach to it if a peer created it
    /// first. On creation the region is zero-filled, stamped with magic
    /// and version, and armed `Idle`. On attach the existing record is
    /// validated instead; a mismatch fails with a corruption error and
    /// the mapping is released on the way out.
    pub fn open_or_create(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_channel_name(&name)?;

        let (record, handle, is_creator) = platform::open_or_create(&name)?;
        let channel = Self {
            name,
            record,
            handle,
            is_creator,
            released: AtomicBool::new(false),
        };

        if channel.is_creator {
            channel.record().initialize();
            info!(name = %channel.name, "created shared channel");
        } else {
            // Drop on the error path unmaps what we just attached.
            channel.record().validate()?;
            info!(name = %channel.name, "attached to existing shared channel");
        }

        Ok(channel)
    }

    /// Mapping name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether this process created the region.
    pub fn is_creator(&self) -> bool {
        self.is_creator
    }

    /// Live, unsynchronized view of the shared record. Exclusion is the
    /// protocol's single-writer discipline, not this layer's concern.
    /// Must not be used after [`close`](Self::close).
    pub fn record(&self) -> &SharedRecord {
        unsafe { self.record.as_ref() }
    }

    /// Release the mapping. Idempotent: later calls (and the eventual
    /// drop) are no-ops.
    pub fn close(&self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        platform::release(self.record, &self.handle, &self.name, self.is_creator);
        debug!(name = %self.name, "released shared channel");
    }
}

impl Drop for SharedChannel {
    fn drop(&mut self) {
        self.close();
    }
}

// Safety: the record is only reached through atomics, and the platform
// handle is never exposed.
unsafe impl Send for SharedChannel {}
unsafe impl Sync for SharedChannel {}

/// Validate a mapping name before handing it to the OS.
fn validate_channel_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 255 {
        return Err(ChannelError::InvalidName("invalid name length".to_string()));
    }
    if name.contains('\0') {
        return Err(ChannelError::InvalidName("name contains null byte".to_string()));
    }
    Ok(())
}

/// Generate a unique mapping name, mainly for tests and demos that must
/// not collide on the host-local namespace.
pub fn generate_channel_name(prefix: &str) -> String {
    use std::time::{SystemTime, UNIX_EPOCH};

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    format!("{}_{}_{}", prefix, std::process::id(), nanos)
}

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        use unix_impl as platform;
    } else if #[cfg(windows)] {
        use windows_impl as platform;
    }
}

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::ffi::CString;

    fn last_os_error(message: &str) -> ChannelError {
        let errno = std::io::Error::last_os_error()
            .raw_os_error()
            .unwrap_or(0);
        ChannelError::from_platform_error(errno, message)
    }

    pub(super) fn open_or_create(
        name: &str,
    ) -> Result<(NonNull<SharedRecord>, PlatformHandle, bool)> {
        let c_name = CString::new(name)
            .map_err(|_| ChannelError::InvalidName("name contains null byte".to_string()))?;

        // O_EXCL distinguishes creator from attacher.
        let mut is_creator = true;
        let mut fd = unsafe {
            libc::shm_open(
                c_name.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600 as libc::mode_t,
            )
        };
        if fd < 0 {
            if std::io::Error::last_os_error().raw_os_error() != Some(libc::EEXIST) {
                return Err(last_os_error("shm_open failed"));
            }
            is_creator = false;
            fd = unsafe { libc::shm_open(c_name.as_ptr(), libc::O_RDWR, 0 as libc::mode_t) };
            if fd < 0 {
                return Err(last_os_error("shm_open failed"));
            }
        }

        let result = finish_open(fd, is_creator);
        unsafe { libc::close(fd) };
        if result.is_err() && is_creator {
            unsafe { libc::shm_unlink(c_name.as_ptr()) };
        }
        result.map(|record| (record, PlatformHandle::Unix, is_creator))
    }

    /// Size, validate, and map the open descriptor. The descriptor itself
    /// is not kept: the mapping outlives it.
    fn finish_open(fd: libc::c_int, is_creator: bool) -> Result<NonNull<SharedRecord>> {
        if is_creator {
            // ftruncate both sizes and zero-fills the fresh region.
            if unsafe { libc::ftruncate(fd, SHARED_RECORD_SIZE as libc::off_t) } != 0 {
                return Err(last_os_error("ftruncate failed"));
            }
        } else {
            let mut stat: libc::stat = unsafe { std::mem::zeroed() };
            if unsafe { libc::fstat(fd, &mut stat) } != 0 {
                return Err(last_os_error("fstat failed"));
            }
            if stat.st_size as usize != SHARED_RECORD_SIZE {
                return Err(ChannelError::Corruption(format!(
                    "existing region is {} bytes, expected {}",
                    stat.st_size, SHARED_RECORD_SIZE
                )));
            }
        }

        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                SHARED_RECORD_SIZE,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(last_os_error("mmap failed"));
        }
        NonNull::new(ptr as *mut SharedRecord)
            .ok_or_else(|| ChannelError::Allocation("mmap returned null".to_string()))
    }

    pub(super) fn release(
        record: NonNull<SharedRecord>,
        _handle: &PlatformHandle,
        name: &str,
        is_creator: bool,
    ) {
        unsafe {
            libc::munmap(record.as_ptr() as *mut libc::c_void, SHARED_RECORD_SIZE);
        }
        if is_creator {
            if let Ok(c_name) = CString::new(name) {
                unsafe { libc::shm_unlink(c_name.as_ptr()) };
            }
        }
    }
}

#[cfg(windows)]
mod windows_impl {
    use super::*;
    use std::ffi::CString;
    use winapi::shared::winerror::ERROR_ALREADY_EXISTS;
    use winapi::um::errhandlingapi::GetLastError;
    use winapi::um::handleapi::{CloseHandle, INVALID_HANDLE_VALUE};
    use winapi::um::memoryapi::{MapViewOfFile, UnmapViewOfFile, FILE_MAP_ALL_ACCESS};
    use winapi::um::winbase::CreateFileMappingA;
    use winapi::um::winnt::PAGE_READWRITE;

    pub(super) fn open_or_create(
        name: &str,
    ) -> Result<(NonNull<SharedRecord>, PlatformHandle, bool)> {
        let c_name = CString::new(name)
            .map_err(|_| ChannelError::InvalidName("name contains null byte".to_string()))?;

        let handle = unsafe {
            CreateFileMappingA(
                INVALID_HANDLE_VALUE,
                std::ptr::null_mut(),
                PAGE_READWRITE,
                0,
                SHARED_RECORD_SIZE as u32,
                c_name.as_ptr(),
            )
        };
        if handle.is_null() {
            return Err(ChannelError::Allocation(
                "CreateFileMapping failed".to_string(),
            ));
        }
        let is_creator = unsafe { GetLastError() } != ERROR_ALREADY_EXISTS;

        let ptr = unsafe {
            MapViewOfFile(handle, FILE_MAP_ALL_ACCESS, 0, 0, SHARED_RECORD_SIZE)
        };
        if ptr.is_null() {
            unsafe { CloseHandle(handle) };
            return Err(ChannelError::Allocation(
                "MapViewOfFile failed".to_string(),
            ));
        }

        let record = NonNull::new(ptr as *mut SharedRecord)
            .ok_or_else(|| ChannelError::Allocation("MapViewOfFile returned null".to_string()))?;
        Ok((record, PlatformHandle::Windows { handle }, is_creator))
    }

    pub(super) fn release(
        record: NonNull<SharedRecord>,
        handle: &PlatformHandle,
        _name: &str,
        _is_creator: bool,
    ) {
        unsafe {
            UnmapViewOfFile(record.as_ptr() as *const _);
            #[allow(irrefutable_let_patterns)]
            if let PlatformHandle::Windows { handle } = handle {
                CloseHandle(*handle);
            }
        }
    }
}
