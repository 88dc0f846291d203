//! Mount operations for install-time filesystems.

use poolstrap_error::HalResult;
use std::path::Path;

#[derive(Debug, Clone, Default)]
pub struct MountOptions {
    pub options: Option<String>,
}

impl MountOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: &str) -> Self {
        Self {
            options: Some(options.to_string()),
        }
    }
}

pub trait MountOps {
    fn mount_device(
        &self,
        device: &Path,
        target: &Path,
        fstype: Option<&str>,
        options: MountOptions,
        dry_run: bool,
    ) -> HalResult<()>;

    fn unmount(&self, target: &Path, dry_run: bool) -> HalResult<()>;

    /// Unmount everything at or below `target`, deepest paths first.
    fn unmount_recursive(&self, target: &Path, dry_run: bool) -> HalResult<()>;

    fn is_mounted(&self, path: &Path) -> HalResult<bool>;
}
