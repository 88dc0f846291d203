//! Hardware abstraction layer for the poolstrap installer.
//!
//! Every world-touching operation (partitioning, pool management, mounts,
//! formatting, external processes) goes through a trait defined here so the
//! install workflows can be exercised against a recording fake without root
//! privileges or real disks.

pub mod devlinks;
pub mod hal;
pub mod procfs;
pub mod retry;
pub mod sysfs;

pub use hal::bootloader_ops::{BootloaderOps, GrubOptions};
pub use hal::fake_hal::{FakeHal, Operation};
pub use hal::format_ops::{EspFormatOptions, FormatOps, SwapFormatOptions};
pub use hal::fs_ops::FsOps;
pub use hal::host_info_ops::HostInfoOps;
pub use hal::linux_hal::LinuxHal;
pub use hal::mount_ops::{MountOps, MountOptions};
pub use hal::partition_ops::{PartitionOps, SgdiskOp, SgdiskOptions, WipeFsOptions};
pub use hal::probe_ops::ProbeOps;
pub use hal::process_ops::ProcessOps;
pub use hal::system_ops::SystemOps;
pub use hal::zfs_ops::{
    FeaturePolicy, ZfsCreateRequest, ZfsOps, ZfsOptions, ZpoolCreateRequest, ZpoolOptions,
};
pub use hal::InstallerHal;
pub use retry::RetryPolicy;

pub use poolstrap_error::{HalError, HalResult};
