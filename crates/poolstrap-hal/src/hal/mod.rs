//! HAL trait definitions and implementations.
//!
//! One trait per collaborator concern, with a real Linux implementation and a
//! recording fake for tests.

pub mod bootloader_ops;
pub mod fake_hal;
pub mod format_ops;
pub mod fs_ops;
pub mod host_info_ops;
pub mod linux_hal;
pub mod mount_ops;
pub mod partition_ops;
pub mod probe_ops;
pub mod process_ops;
pub mod system_ops;
pub mod zfs_ops;

pub use bootloader_ops::{BootloaderOps, GrubOptions};
pub use fake_hal::{FakeHal, Operation};
pub use format_ops::{EspFormatOptions, FormatOps, SwapFormatOptions};
pub use fs_ops::FsOps;
pub use host_info_ops::HostInfoOps;
pub use linux_hal::LinuxHal;
pub use mount_ops::{MountOps, MountOptions};
pub use partition_ops::{PartitionOps, SgdiskOp, SgdiskOptions, WipeFsOptions};
pub use probe_ops::ProbeOps;
pub use process_ops::ProcessOps;
pub use system_ops::SystemOps;
pub use zfs_ops::{
    FeaturePolicy, ZfsCreateRequest, ZfsOps, ZfsOptions, ZpoolCreateRequest, ZpoolOptions,
};

/// Complete HAL an installer run needs.
pub trait InstallerHal:
    MountOps
    + PartitionOps
    + FormatOps
    + ZfsOps
    + ProbeOps
    + SystemOps
    + ProcessOps
    + FsOps
    + HostInfoOps
    + BootloaderOps
    + Send
    + Sync
{
}

/// Automatically implement InstallerHal for any type implementing all required traits.
impl<T> InstallerHal for T where
    T: MountOps
        + PartitionOps
        + FormatOps
        + ZfsOps
        + ProbeOps
        + SystemOps
        + ProcessOps
        + FsOps
        + HostInfoOps
        + BootloaderOps
        + Send
        + Sync
{
}
