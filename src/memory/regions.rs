//! DMA arena region implementation

use std::{
    ffi::CString,
    fs::{File, OpenOptions},
    os::unix::fs::OpenOptionsExt,
    ptr::NonNull,
};

use memmap2::{MmapMut, MmapOptions};
#[cfg(target_os = "linux")]
use nix::sys::memfd::{memfd_create, MemFdCreateFlag};

use crate::error::{ChanPoolError, Result};

use super::config::{BackingType, RegionConfig};

/// A contiguous mapping that stands in for device-visible physical memory.
///
/// Byte `n` of the mapping is seen by the device at `bus_base + n`.
#[derive(Debug)]
pub struct DmaRegion {
    name: String,
    backing_type: BackingType,
    bus_base: u64,
    base: NonNull<u8>,
    mmap: MmapMut,
    /// Keeps file and memfd backings alive for the mapping's lifetime
    _file: Option<File>,
}

impl DmaRegion {
    /// Create and map a region
    pub fn new(config: RegionConfig) -> Result<Self> {
        config.validate()?;

        let file = Self::create_backing(&config)?;
        let mut mmap = Self::create_mapping(file.as_ref(), config.size)?;

        let base = NonNull::new(mmap.as_mut_ptr())
            .ok_or_else(|| ChanPoolError::memory("Mapping returned a null base"))?;

        log::debug!(
            "mapped DMA region '{}' ({}, {} bytes) at bus {:#x}",
            config.name,
            config.backing_type.name(),
            config.size,
            config.bus_base
        );

        Ok(Self {
            name: config.name,
            backing_type: config.backing_type,
            bus_base: config.bus_base,
            base,
            mmap,
            _file: file,
        })
    }

    fn create_backing(config: &RegionConfig) -> Result<Option<File>> {
        match config.backing_type {
            BackingType::Anonymous => Ok(None),
            BackingType::FileBacked => Self::create_file_backing(config).map(Some),
            #[cfg(target_os = "linux")]
            BackingType::MemFd => Self::create_memfd_backing(config).map(Some),
        }
    }

    fn create_file_backing(config: &RegionConfig) -> Result<File> {
        let path = config.default_file_path();

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .mode(config.permissions)
            .open(&path)
            .map_err(|e| ChanPoolError::from_io(e, "Failed to create/open file"))?;

        file.set_len(config.size as u64)
            .map_err(|e| ChanPoolError::from_io(e, "Failed to set file size"))?;

        Ok(file)
    }

    #[cfg(target_os = "linux")]
    fn create_memfd_backing(config: &RegionConfig) -> Result<File> {
        let name_cstr = CString::new(config.name.clone())
            .map_err(|_| ChanPoolError::invalid_parameter("name", "Name contains null bytes"))?;

        let owned_fd = memfd_create(&name_cstr, MemFdCreateFlag::MFD_CLOEXEC)
            .map_err(|e| ChanPoolError::platform(format!("Failed to create memfd: {}", e)))?;

        let file = File::from(owned_fd);
        file.set_len(config.size as u64)
            .map_err(|e| ChanPoolError::from_io(e, "Failed to set memfd size"))?;

        Ok(file)
    }

    fn create_mapping(file: Option<&File>, size: usize) -> Result<MmapMut> {
        match file {
            // SAFETY: the backing file is created by us, sized to `size` and
            // kept alive alongside the mapping.
            Some(f) => unsafe {
                MmapOptions::new()
                    .len(size)
                    .map_mut(f)
                    .map_err(|e| ChanPoolError::from_io(e, "Failed to create memory mapping"))
            },
            None => MmapOptions::new()
                .len(size)
                .map_anon()
                .map_err(|e| ChanPoolError::from_io(e, "Failed to create anonymous mapping")),
        }
    }

    /// Name of the region
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Backing type of the region
    pub fn backing_type(&self) -> BackingType {
        self.backing_type
    }

    /// Size of the region in bytes
    pub fn size(&self) -> usize {
        self.mmap.len()
    }

    /// Device-visible address of offset 0
    pub fn bus_base(&self) -> u64 {
        self.bus_base
    }

    /// CPU pointer at `offset`, or `None` when outside the region
    pub fn cpu_at(&self, offset: usize) -> Option<NonNull<u8>> {
        if offset >= self.size() {
            return None;
        }
        // SAFETY: offset is within the mapping, so the result is in bounds and non-null.
        Some(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(offset)) })
    }

    /// Bus address at `offset`
    pub fn bus_at(&self, offset: usize) -> u64 {
        self.bus_base + offset as u64
    }

    /// Translate a CPU pointer back to a region offset
    pub fn offset_of(&self, ptr: NonNull<u8>) -> Option<usize> {
        let addr = ptr.as_ptr() as usize;
        let base = self.base.as_ptr() as usize;
        if addr < base || addr >= base + self.size() {
            return None;
        }
        Some(addr - base)
    }

    /// Flush changes to the backing storage (no-op for anonymous regions)
    pub fn flush(&self) -> Result<()> {
        self.mmap
            .flush()
            .map_err(|e| ChanPoolError::from_io(e, "Failed to flush memory mapping"))
    }
}

// The mapping is owned exclusively by the region; access to carved-out
// ranges is arbitrated by the allocator that owns the region.
unsafe impl Send for DmaRegion {}
unsafe impl Sync for DmaRegion {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_region() {
        let region = DmaRegion::new(RegionConfig::new("anon", 16 * 4096).with_bus_base(0x4000_0000))
            .unwrap();
        assert_eq!(region.size(), 16 * 4096);
        assert_eq!(region.bus_at(4096), 0x4000_1000);

        let ptr = region.cpu_at(8192).unwrap();
        assert_eq!(region.offset_of(ptr), Some(8192));
        assert!(region.cpu_at(16 * 4096).is_none());
    }

    #[test]
    fn test_file_backed_region() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = RegionConfig::new("filed", 4 * 4096)
            .with_backing_type(BackingType::FileBacked)
            .with_file_path(dir.path().join("arena.dat"));

        let region = DmaRegion::new(config).unwrap();
        assert_eq!(region.backing_type(), BackingType::FileBacked);
        assert!(region.flush().is_ok());
        assert_eq!(std::fs::metadata(dir.path().join("arena.dat")).unwrap().len(), 4 * 4096);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_memfd_region() {
        let region =
            DmaRegion::new(RegionConfig::new("memfd_arena", 8 * 4096).with_backing_type(BackingType::MemFd))
                .unwrap();
        assert_eq!(region.name(), "memfd_arena");
        assert_eq!(region.size(), 8 * 4096);
    }
}
