//! Formatting operations for non-pool partitions (EFI system partition, swap).

use poolstrap_error::HalResult;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct EspFormatOptions {
    pub dry_run: bool,
    pub confirmed: bool,
    /// FAT cluster size in sectors. 4096-byte-sector devices need a wider
    /// cluster than the 512-byte default.
    pub sectors_per_cluster: u8,
}

impl EspFormatOptions {
    pub fn new(dry_run: bool, confirmed: bool, sectors_per_cluster: u8) -> Self {
        Self {
            dry_run,
            confirmed,
            sectors_per_cluster,
        }
    }

    /// Cluster sizing rule: one sector per cluster on 512-byte devices,
    /// eight on 4096-byte devices.
    pub fn for_sector_size(dry_run: bool, confirmed: bool, logical_sector_size: u64) -> Self {
        let sectors_per_cluster = if logical_sector_size >= 4096 { 8 } else { 1 };
        Self::new(dry_run, confirmed, sectors_per_cluster)
    }
}

#[derive(Debug, Clone)]
pub struct SwapFormatOptions {
    pub dry_run: bool,
    pub confirmed: bool,
}

impl SwapFormatOptions {
    pub fn new(dry_run: bool, confirmed: bool) -> Self {
        Self { dry_run, confirmed }
    }
}

pub trait FormatOps {
    /// Format a boot-firmware partition as FAT32.
    fn format_esp(&self, device: &Path, label: &str, opts: &EspFormatOptions) -> HalResult<()>;

    fn format_swap(&self, device: &Path, label: &str, opts: &SwapFormatOptions) -> HalResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cluster_size_widens_on_4k_sectors() {
        assert_eq!(
            EspFormatOptions::for_sector_size(false, true, 512).sectors_per_cluster,
            1
        );
        assert_eq!(
            EspFormatOptions::for_sector_size(false, true, 4096).sectors_per_cluster,
            8
        );
    }
}
