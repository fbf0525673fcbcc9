//! DMA-BUF format negotiation (`zwp_linux_dmabuf_v1` feedback).
//!
//! The backend enumerates its devices and formats once; the result is a
//! `DmaFeedback` holding a sealed format table in a memfd. Every feedback
//! object sent to clients points into that same table.

use std::collections::HashSet;
use std::ffi::CStr;
use std::fs::File;
use std::io::Write;
use std::os::unix::io::{AsFd, BorrowedFd, FromRawFd, OwnedFd};
use std::sync::Arc;

use bitflags::bitflags;
use thiserror::Error;

use crate::core::errors::CoreError;
use crate::util::logging::FEEDBACK;
use crate::wlog;

const fn fourcc(a: u8, b: u8, c: u8, d: u8) -> u32 {
    (a as u32) | ((b as u32) << 8) | ((c as u32) << 16) | ((d as u32) << 24)
}

pub const DRM_FORMAT_ARGB8888: u32 = fourcc(b'A', b'R', b'2', b'4');
pub const DRM_FORMAT_XRGB8888: u32 = fourcc(b'X', b'R', b'2', b'4');
pub const DRM_FORMAT_ABGR8888: u32 = fourcc(b'A', b'B', b'2', b'4');
pub const DRM_FORMAT_XBGR8888: u32 = fourcc(b'X', b'B', b'2', b'4');

pub const DRM_FORMAT_MOD_LINEAR: u64 = 0;
pub const DRM_FORMAT_MOD_INVALID: u64 = 0x00ff_ffff_ffff_ffff;

/// Size of one format table entry: `{format: u32, pad: u32, modifier: u64}`
pub const FORMAT_TABLE_ENTRY_SIZE: usize = 16;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedbackError {
    #[error("no tranche targets the main device")]
    NoMainDeviceTranche,

    #[error("more than one tranche targets the main device")]
    MultipleMainDeviceTranches,

    #[error("tranche for device {0} has no formats")]
    EmptyTranche(u64),

    #[error("format 0x{format:08x}:{modifier:#x} repeated for device {device}")]
    DuplicateFormat { format: u32, modifier: u64, device: u64 },

    #[error("format 0x{format:08x}:{modifier:#x} is not in the format table")]
    NotInTable { format: u32, modifier: u64 },

    #[error("format table is limited to {max} entries", max = u16::MAX as usize + 1)]
    TableTooLarge,

    #[error("memfd: {0}")]
    Memfd(String),
}

impl From<FeedbackError> for CoreError {
    fn from(err: FeedbackError) -> Self {
        CoreError::Feedback(err.to_string())
    }
}

bitflags! {
    /// `zwp_linux_dmabuf_feedback_v1.tranche_flags`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TrancheFlags: u32 {
        const SCANOUT = 0x1;
    }
}

// ============================================================================
// Format Table
// ============================================================================

/// Sealed, read-only memfd listing every (format, modifier) pair.
pub struct FormatTable {
    fd: OwnedFd,
    entries: Vec<(u32, u64)>,
}

impl FormatTable {
    pub fn new(entries: Vec<(u32, u64)>) -> Result<Self, FeedbackError> {
        if entries.len() > u16::MAX as usize + 1 {
            return Err(FeedbackError::TableTooLarge);
        }
        let mut bytes = Vec::with_capacity(entries.len() * FORMAT_TABLE_ENTRY_SIZE);
        for (format, modifier) in &entries {
            bytes.extend_from_slice(&format.to_ne_bytes());
            bytes.extend_from_slice(&0u32.to_ne_bytes());
            bytes.extend_from_slice(&modifier.to_ne_bytes());
        }

        let name: &CStr = c"vitrine-dmabuf-formats";
        // SAFETY: name is a valid NUL terminated string.
        let raw = unsafe { libc::memfd_create(name.as_ptr(), libc::MFD_CLOEXEC | libc::MFD_ALLOW_SEALING) };
        if raw < 0 {
            return Err(FeedbackError::Memfd(std::io::Error::last_os_error().to_string()));
        }
        // SAFETY: raw is a freshly created descriptor we own.
        let mut file = unsafe { File::from_raw_fd(raw) };
        file.write_all(&bytes)
            .map_err(|e| FeedbackError::Memfd(e.to_string()))?;

        let seals = libc::F_SEAL_SHRINK | libc::F_SEAL_GROW | libc::F_SEAL_WRITE | libc::F_SEAL_SEAL;
        // SAFETY: fcntl on a valid memfd.
        if unsafe { libc::fcntl(raw, libc::F_ADD_SEALS, seals) } < 0 {
            return Err(FeedbackError::Memfd(std::io::Error::last_os_error().to_string()));
        }

        wlog!(FEEDBACK, "Format table created with {} entries", entries.len());
        Ok(Self {
            fd: OwnedFd::from(file),
            entries,
        })
    }

    pub fn fd(&self) -> BorrowedFd<'_> {
        self.fd.as_fd()
    }

    /// Size of the table in bytes
    pub fn size(&self) -> u32 {
        (self.entries.len() * FORMAT_TABLE_ENTRY_SIZE) as u32
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[(u32, u64)] {
        &self.entries
    }

    pub fn index_of(&self, format: u32, modifier: u64) -> Option<u16> {
        self.entries
            .iter()
            .position(|e| *e == (format, modifier))
            .map(|i| i as u16)
    }
}

impl std::fmt::Debug for FormatTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatTable")
            .field("entries", &self.entries.len())
            .finish()
    }
}

// ============================================================================
// Feedback
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tranche {
    pub device: libc::dev_t,
    pub flags: TrancheFlags,
    /// Indices into the format table
    pub indices: Vec<u16>,
}

/// Immutable feedback: main device plus preference-ordered tranches.
#[derive(Debug, Clone)]
pub struct DmaFeedback {
    main_device: libc::dev_t,
    table: Arc<FormatTable>,
    tranches: Vec<Tranche>,
}

impl DmaFeedback {
    pub fn main_device(&self) -> libc::dev_t {
        self.main_device
    }

    pub fn table(&self) -> &Arc<FormatTable> {
        &self.table
    }

    pub fn tranches(&self) -> &[Tranche] {
        &self.tranches
    }

    /// `dev_t` as sent on the wire (native endian byte array)
    pub fn device_bytes(device: libc::dev_t) -> Vec<u8> {
        device.to_ne_bytes().to_vec()
    }

    /// Every (format, modifier) pair of a tranche
    pub fn tranche_formats(&self, tranche: &Tranche) -> Vec<(u32, u64)> {
        tranche
            .indices
            .iter()
            .filter_map(|i| self.table.entries().get(*i as usize).copied())
            .collect()
    }

    /// Whether any tranche accepts the pair
    pub fn supports(&self, format: u32, modifier: u64) -> bool {
        match self.table.index_of(format, modifier) {
            Some(index) => self.tranches.iter().any(|t| t.indices.contains(&index)),
            None => false,
        }
    }
}

#[derive(Debug)]
struct TrancheSpec {
    device: libc::dev_t,
    flags: TrancheFlags,
    formats: Vec<(u32, u64)>,
}

/// Builds a `DmaFeedback`, validating the tranche layout.
#[derive(Debug)]
pub struct DmaFeedbackBuilder {
    main_device: libc::dev_t,
    tranches: Vec<TrancheSpec>,
    table: Option<Arc<FormatTable>>,
}

impl DmaFeedbackBuilder {
    pub fn new(main_device: libc::dev_t) -> Self {
        Self {
            main_device,
            tranches: Vec::new(),
            table: None,
        }
    }

    /// Reuse an existing table instead of creating one. Every tranche
    /// format must then be present in it.
    pub fn with_table(mut self, table: Arc<FormatTable>) -> Self {
        self.table = Some(table);
        self
    }

    /// Append a tranche. Order is preference order.
    pub fn add_tranche(mut self, device: libc::dev_t, flags: TrancheFlags, formats: Vec<(u32, u64)>) -> Self {
        self.tranches.push(TrancheSpec { device, flags, formats });
        self
    }

    pub fn build(self) -> Result<DmaFeedback, FeedbackError> {
        let main_tranches = self
            .tranches
            .iter()
            .filter(|t| t.device == self.main_device)
            .count();
        match main_tranches {
            0 => return Err(FeedbackError::NoMainDeviceTranche),
            1 => {}
            _ => return Err(FeedbackError::MultipleMainDeviceTranches),
        }

        let mut seen: HashSet<(libc::dev_t, TrancheFlags, u32, u64)> = HashSet::new();
        let mut unique: Vec<(u32, u64)> = Vec::new();
        for tranche in &self.tranches {
            if tranche.formats.is_empty() {
                return Err(FeedbackError::EmptyTranche(tranche.device as u64));
            }
            for &(format, modifier) in &tranche.formats {
                if !seen.insert((tranche.device, tranche.flags, format, modifier)) {
                    return Err(FeedbackError::DuplicateFormat {
                        format,
                        modifier,
                        device: tranche.device as u64,
                    });
                }
                if !unique.contains(&(format, modifier)) {
                    unique.push((format, modifier));
                }
            }
        }

        let table = match self.table {
            Some(table) => table,
            None => Arc::new(FormatTable::new(unique)?),
        };

        let mut tranches = Vec::with_capacity(self.tranches.len());
        for spec in self.tranches {
            let mut indices = Vec::with_capacity(spec.formats.len());
            for (format, modifier) in spec.formats {
                let index = table
                    .index_of(format, modifier)
                    .ok_or(FeedbackError::NotInTable { format, modifier })?;
                indices.push(index);
            }
            tranches.push(Tranche {
                device: spec.device,
                flags: spec.flags,
                indices,
            });
        }

        Ok(DmaFeedback {
            main_device: self.main_device,
            table,
            tranches,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear(formats: &[u32]) -> Vec<(u32, u64)> {
        formats.iter().map(|f| (*f, DRM_FORMAT_MOD_LINEAR)).collect()
    }

    #[test]
    fn test_fourcc_constants() {
        assert_eq!(DRM_FORMAT_ARGB8888, 0x3432_5241);
        assert_eq!(DRM_FORMAT_XRGB8888, 0x3432_5258);
    }

    #[test]
    fn test_table_entries_are_unique_and_indices_in_bounds() {
        let feedback = DmaFeedbackBuilder::new(7)
            .add_tranche(7, TrancheFlags::empty(), linear(&[DRM_FORMAT_ARGB8888, DRM_FORMAT_XRGB8888]))
            .add_tranche(9, TrancheFlags::SCANOUT, linear(&[DRM_FORMAT_XRGB8888]))
            .build()
            .unwrap();

        let table = feedback.table();
        assert_eq!(table.len(), 2);
        assert_eq!(table.size() as usize, 2 * FORMAT_TABLE_ENTRY_SIZE);
        let unique: HashSet<_> = table.entries().iter().collect();
        assert_eq!(unique.len(), table.len());
        for tranche in feedback.tranches() {
            assert!(tranche.indices.iter().all(|i| (*i as usize) < table.len()));
        }
        assert!(feedback.supports(DRM_FORMAT_XRGB8888, DRM_FORMAT_MOD_LINEAR));
        assert!(!feedback.supports(DRM_FORMAT_ABGR8888, DRM_FORMAT_MOD_LINEAR));
    }

    #[test]
    fn test_main_device_tranche_required() {
        let err = DmaFeedbackBuilder::new(1)
            .add_tranche(2, TrancheFlags::empty(), linear(&[DRM_FORMAT_ARGB8888]))
            .build()
            .unwrap_err();
        assert_eq!(err, FeedbackError::NoMainDeviceTranche);
    }

    #[test]
    fn test_second_main_device_tranche_rejected() {
        let err = DmaFeedbackBuilder::new(7)
            .add_tranche(7, TrancheFlags::empty(), linear(&[DRM_FORMAT_ARGB8888]))
            .add_tranche(7, TrancheFlags::SCANOUT, linear(&[DRM_FORMAT_XRGB8888]))
            .build()
            .unwrap_err();
        assert_eq!(err, FeedbackError::MultipleMainDeviceTranches);
    }

    #[test]
    fn test_repeated_format_same_device_and_flags_rejected() {
        let err = DmaFeedbackBuilder::new(1)
            .add_tranche(1, TrancheFlags::empty(), linear(&[DRM_FORMAT_ARGB8888]))
            .add_tranche(2, TrancheFlags::empty(), linear(&[DRM_FORMAT_ARGB8888]))
            .add_tranche(2, TrancheFlags::empty(), linear(&[DRM_FORMAT_ARGB8888]))
            .build()
            .unwrap_err();
        assert!(matches!(err, FeedbackError::DuplicateFormat { device: 2, .. }));
    }

    #[test]
    fn test_table_is_sealed() {
        let table = FormatTable::new(linear(&[DRM_FORMAT_ARGB8888])).unwrap();
        use std::os::unix::io::AsRawFd;
        // SAFETY: querying seals on a valid fd.
        let seals = unsafe { libc::fcntl(table.fd().as_raw_fd(), libc::F_GET_SEALS) };
        assert!(seals & libc::F_SEAL_WRITE != 0);
        assert!(seals & libc::F_SEAL_SEAL != 0);
    }

    #[test]
    fn test_derived_feedback_shares_table() {
        let base = DmaFeedbackBuilder::new(1)
            .add_tranche(1, TrancheFlags::empty(), linear(&[DRM_FORMAT_ARGB8888, DRM_FORMAT_XRGB8888]))
            .build()
            .unwrap();
        let derived = DmaFeedbackBuilder::new(1)
            .with_table(base.table().clone())
            .add_tranche(1, TrancheFlags::SCANOUT, linear(&[DRM_FORMAT_XRGB8888]))
            .build()
            .unwrap();
        assert!(Arc::ptr_eq(base.table(), derived.table()));
        assert_eq!(derived.tranches()[0].indices, vec![1]);
    }
}
