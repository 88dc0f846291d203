//! Target-tree filesystem mutations.
//!
//! Dataset permission invariants, fstab records, and cache-file copies all
//! land inside the install-time root; routing them through the HAL keeps the
//! pipeline testable end to end.

use poolstrap_error::HalResult;
use std::path::Path;

pub trait FsOps {
    fn create_dir_all(&self, path: &Path, dry_run: bool) -> HalResult<()>;

    fn set_permissions(&self, path: &Path, mode: u32, dry_run: bool) -> HalResult<()>;

    fn chown(&self, path: &Path, uid: u32, gid: u32, dry_run: bool) -> HalResult<()>;

    fn copy_file(&self, src: &Path, dst: &Path, dry_run: bool) -> HalResult<()>;

    /// Append a single line to a file, creating it if missing (fstab records).
    fn append_line(&self, path: &Path, line: &str, dry_run: bool) -> HalResult<()>;

    fn write_file(&self, path: &Path, content: &str, dry_run: bool) -> HalResult<()>;
}
