//! Read-only host environment information.

use poolstrap_error::HalResult;

pub trait HostInfoOps {
    fn proc_meminfo(&self) -> HalResult<String>;

    fn proc_mountinfo(&self) -> HalResult<String>;

    /// Whether the machine booted in UEFI mode (`/sys/firmware/efi` present).
    fn efi_firmware_present(&self) -> bool;

    fn is_root(&self) -> bool;
}
