//! Integration tests for DMA regions and the arena allocator

use tempfile::TempDir;
use chanpool::{
    allocators::{ArenaAllocator, PhysicalAllocator, PAGE_SIZE},
    error::ChanPoolError,
    memory::{BackingType, DmaRegion, RegionConfig},
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_region_config_default() {
        let config = RegionConfig::default();
        assert_eq!(config.backing_type, BackingType::Anonymous);
        assert_eq!(config.permissions, 0o600);
        assert_eq!(config.bus_base % PAGE_SIZE as u64, 0);
    }

    #[test]
    fn test_region_config_builder() {
        let config = RegionConfig::new("rx", 8192)
            .with_backing_type(BackingType::FileBacked)
            .with_bus_base(0x4000_0000)
            .with_permissions(0o640);

        assert_eq!(config.name, "rx");
        assert_eq!(config.size, 8192);
        assert_eq!(config.backing_type, BackingType::FileBacked);
        assert_eq!(config.bus_base, 0x4000_0000);
        assert_eq!(config.permissions, 0o640);
    }

    #[test]
    fn test_region_config_validation() {
        let mut config = RegionConfig::default();

        // Empty name should fail
        assert!(config.validate().is_err());

        config.name = "test".to_string();
        // Zero size should fail
        assert!(config.validate().is_err());

        config.size = 4096;
        assert!(config.validate().is_ok());

        assert!(matches!(
            DmaRegion::new(RegionConfig::new("odd", 4097)),
            Err(ChanPoolError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_region_address_translation() {
        let region = DmaRegion::new(RegionConfig::new("xlate", 4 * PAGE_SIZE).with_bus_base(0x2000_0000)).unwrap();

        let cpu = region.cpu_at(PAGE_SIZE).unwrap();
        assert_eq!(region.bus_at(PAGE_SIZE), 0x2000_1000);
        assert_eq!(region.offset_of(cpu), Some(PAGE_SIZE));
        assert!(region.cpu_at(4 * PAGE_SIZE).is_none());
    }

    #[test]
    fn test_file_backed_region_persists_size() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("dma_region");
        let config = RegionConfig::new("file_region", 8 * PAGE_SIZE)
            .with_backing_type(BackingType::FileBacked)
            .with_file_path(&path);

        let region = DmaRegion::new(config).unwrap();
        assert_eq!(region.backing_type(), BackingType::FileBacked);
        assert_eq!(std::fs::metadata(&path).unwrap().len(), (8 * PAGE_SIZE) as u64);
    }

    #[test]
    fn test_arena_fragmentation_and_recovery() {
        let arena = ArenaAllocator::new(RegionConfig::new("frag", 16 * PAGE_SIZE)).unwrap();

        let mappings: Vec<_> = (0..8).map(|_| arena.allocate(2 * PAGE_SIZE).unwrap()).collect();
        assert!(arena.allocate(1).is_none());

        // Free every other block: eight pages free but no two contiguous blocks
        for m in mappings.iter().step_by(2) {
            arena.free(2 * PAGE_SIZE, m.kernel_address, m.physical_address).unwrap();
        }
        assert_eq!(arena.free_bytes(), 8 * PAGE_SIZE);
        assert_eq!(arena.largest_free_extent(), 2 * PAGE_SIZE);
        assert!(arena.allocate(3 * PAGE_SIZE).is_none());

        for m in mappings.iter().skip(1).step_by(2) {
            arena.free(2 * PAGE_SIZE, m.kernel_address, m.physical_address).unwrap();
        }
        assert_eq!(arena.free_extents(), 1);
        assert_eq!(arena.largest_free_extent(), 16 * PAGE_SIZE);
    }
}
