//! Bootloader installation.

use poolstrap_error::HalResult;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct GrubOptions {
    pub dry_run: bool,
    pub confirmed: bool,
}

impl GrubOptions {
    pub fn new(dry_run: bool, confirmed: bool) -> Self {
        Self { dry_run, confirmed }
    }
}

pub trait BootloaderOps {
    /// Install GRUB into `efi_dir` under the given bootloader id, with the
    /// boot filesystem mounted at `boot_dir`. On success the installer is
    /// expected to have produced `EFI/<id>/grubx64.efi` inside `efi_dir`.
    fn grub_install(
        &self,
        boot_dir: &Path,
        efi_dir: &Path,
        bootloader_id: &str,
        opts: &GrubOptions,
    ) -> HalResult<()>;
}
