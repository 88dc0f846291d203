//! Read-only device probing.

use poolstrap_error::HalResult;
use std::path::Path;

pub trait ProbeOps {
    /// Filesystem UUID of a formatted partition (blkid).
    fn blkid_uuid(&self, device: &Path) -> HalResult<String>;

    /// Best-effort detection of an existing filesystem/OS signature on a
    /// device, e.g. `"ext4 (ubuntu-root)"`. `None` means no signature found.
    fn probe_signature(&self, device: &Path) -> HalResult<Option<String>>;

    /// Whether a device node (or any path) currently exists. Partition-node
    /// waits poll this after a partition-table rewrite.
    fn path_exists(&self, path: &Path) -> bool;
}
