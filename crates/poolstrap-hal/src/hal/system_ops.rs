//! Kernel/system-level helpers.

use poolstrap_error::HalResult;
use std::path::Path;

pub trait SystemOps {
    fn sync(&self) -> HalResult<()>;

    fn udev_settle(&self) -> HalResult<()>;

    /// Ask the kernel to re-read a disk's partition table.
    fn partprobe(&self, disk: &Path) -> HalResult<()>;
}
