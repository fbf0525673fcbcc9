//! Shared memory pools backing `wl_shm` buffers.

use std::os::unix::io::{AsRawFd, OwnedFd};

use parking_lot::Mutex;

struct Mapping {
    ptr: *mut u8,
    len: usize,
}

/// Shared memory pool for SHM buffer pixel data
pub struct ShmPool {
    /// File descriptor for the pool (owned - keeps fd alive!)
    fd: OwnedFd,
    /// Size of the pool in bytes
    size: Mutex<usize>,
    /// mmap'd region (None until first access)
    mapping: Mutex<Option<Mapping>>,
}

// Safety: the mapping pointer is only dereferenced while `mapping` is locked.
unsafe impl Send for ShmPool {}
unsafe impl Sync for ShmPool {}

impl ShmPool {
    /// Create a new SHM pool from file descriptor
    pub fn new(fd: OwnedFd, size: usize) -> Self {
        Self {
            fd,
            size: Mutex::new(size),
            mapping: Mutex::new(None),
        }
    }

    pub fn size(&self) -> usize {
        *self.size.lock()
    }

    /// Grow the pool. Shrinking is refused and returns false.
    pub fn resize(&self, new_size: usize) -> bool {
        let mut size = self.size.lock();
        if new_size < *size {
            return false;
        }
        if new_size == *size {
            return true;
        }
        let mut mapping = self.mapping.lock();
        if let Some(m) = mapping.take() {
            // SAFETY: the region was mapped by us with exactly this length.
            unsafe {
                libc::munmap(m.ptr as *mut libc::c_void, m.len);
            }
        }
        *size = new_size;
        tracing::debug!("Resized SHM pool to {} bytes", new_size);
        true
    }

    /// Run `f` over `len` bytes at `offset`. Returns None when the range is
    /// outside the pool or the mapping fails.
    pub fn with_slice<R>(&self, offset: usize, len: usize, f: impl FnOnce(&[u8]) -> R) -> Option<R> {
        let size = *self.size.lock();
        let end = offset.checked_add(len)?;
        if end > size || size == 0 {
            return None;
        }
        let mut mapping = self.mapping.lock();
        if mapping.is_none() {
            // SAFETY: mmap of a client supplied fd; failures are checked below.
            let ptr = unsafe {
                libc::mmap(
                    std::ptr::null_mut(),
                    size,
                    libc::PROT_READ,
                    libc::MAP_SHARED,
                    self.fd.as_raw_fd(),
                    0,
                )
            };
            if ptr == libc::MAP_FAILED {
                tracing::error!("Failed to mmap SHM pool (fd={}, size={})", self.fd.as_raw_fd(), size);
                return None;
            }
            *mapping = Some(Mapping {
                ptr: ptr as *mut u8,
                len: size,
            });
        }
        let m = mapping.as_ref()?;
        // SAFETY: [offset, end) is inside the mapped length checked above.
        let slice = unsafe { std::slice::from_raw_parts(m.ptr.add(offset), len) };
        Some(f(slice))
    }
}

impl Drop for ShmPool {
    fn drop(&mut self) {
        if let Some(m) = self.mapping.get_mut().take() {
            // SAFETY: region mapped by `with_slice` with this length.
            unsafe {
                libc::munmap(m.ptr as *mut libc::c_void, m.len);
            }
        }
    }
}

impl std::fmt::Debug for ShmPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShmPool")
            .field("fd", &self.fd.as_raw_fd())
            .field("size", &self.size())
            .finish()
    }
}
