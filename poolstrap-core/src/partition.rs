//! Partition-layout planning and partition-table writing.
//!
//! Every device gets the same fixed layout; only the designated first device
//! carries a swap partition, and every other device's home partition absorbs
//! the space swap would have occupied. Downstream code selects partitions by
//! role, never by raw ordinal.

use crate::config::PartitionLayout;
use crate::inventory::Device;
use anyhow::Result;
use poolstrap_error::{HalError, InstallError};
use poolstrap_hal::retry::{self, RetryPolicy};
use poolstrap_hal::{InstallerHal, SgdiskOp, SgdiskOptions, WipeFsOptions};
use std::path::PathBuf;

const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// Front-alignment gap plus the backup GPT at the end of the disk.
const ALIGNMENT_SLACK: u64 = 2 * MIB;

/// Minimum space the home-pool partition must end up with.
const MIN_HOME_BYTES: u64 = GIB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PartitionRole {
    Efi,
    BootPool,
    RootPool,
    HomePool,
    Swap,
}

impl PartitionRole {
    pub fn number(self) -> u32 {
        match self {
            PartitionRole::Efi => 1,
            PartitionRole::BootPool => 2,
            PartitionRole::RootPool => 3,
            PartitionRole::HomePool => 4,
            PartitionRole::Swap => 5,
        }
    }

    /// GPT partition type code, in sgdisk notation.
    pub fn type_code(self) -> &'static str {
        match self {
            PartitionRole::Efi => "EF00",
            PartitionRole::BootPool => "BE00",
            PartitionRole::RootPool | PartitionRole::HomePool => "BF00",
            PartitionRole::Swap => "8200",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            PartitionRole::Efi => "EFI",
            PartitionRole::BootPool => "BPOOL",
            PartitionRole::RootPool => "RPOOL",
            PartitionRole::HomePool => "HPOOL",
            PartitionRole::Swap => "SWAP",
        }
    }
}

/// One planned partition on one device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedPartition {
    pub role: PartitionRole,
    pub number: u32,
    pub node: PathBuf,
    pub size_bytes: u64,
}

/// The full layout of one device after partitioning. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    pub device_id: String,
    /// Carried forward for firmware-formatting and ashift decisions.
    pub logical_sector_size: u64,
    pub partitions: Vec<PlannedPartition>,
}

impl PartitionPlan {
    pub fn partition(&self, role: PartitionRole) -> Option<&PlannedPartition> {
        self.partitions.iter().find(|p| p.role == role)
    }

    pub fn node(&self, role: PartitionRole) -> Result<PathBuf> {
        self.partition(role)
            .map(|p| p.node.clone())
            .ok_or_else(|| {
                InstallError::Validation(format!(
                    "device {} has no {:?} partition",
                    self.device_id, role
                ))
                .into()
            })
    }
}

/// Partition device node derived from a stable device id
/// (`/dev/disk/by-id/...` links gain a `-partN` suffix).
pub fn partition_node(device_id: &str, number: u32) -> PathBuf {
    PathBuf::from(format!("{}-part{}", device_id, number))
}

/// Roles present on a device, in creation order.
pub fn roles_for(is_first: bool) -> Vec<PartitionRole> {
    let mut roles = vec![
        PartitionRole::Efi,
        PartitionRole::BootPool,
        PartitionRole::RootPool,
        PartitionRole::HomePool,
    ];
    if is_first {
        roles.push(PartitionRole::Swap);
    }
    roles
}

/// Compute the byte size of every partition on a device.
///
/// On the first device the home partition is shrunk by exactly the swap size
/// and a swap partition is appended; everywhere else home takes all remaining
/// space, so same-role partitions across the group differ only by the swap
/// size on the first device.
pub fn compute_sizes(
    device_size: u64,
    is_first: bool,
    layout: &PartitionLayout,
) -> Result<Vec<(PartitionRole, u64)>> {
    let efi = layout.efi_mib * MIB;
    let boot = layout.boot_gib * GIB;
    let root = layout.root_gib * GIB;
    let swap = layout.swap_gib * GIB;

    let fixed = efi + boot + root + if is_first { swap } else { 0 };
    let usable = device_size.saturating_sub(ALIGNMENT_SLACK);
    let home = usable.saturating_sub(fixed);
    if home < MIN_HOME_BYTES {
        return Err(InstallError::Validation(format!(
            "device too small: {} bytes leave no room for the home pool \
             ({} bytes of fixed partitions)",
            device_size, fixed
        ))
        .into());
    }

    let mut sizes = vec![
        (PartitionRole::Efi, efi),
        (PartitionRole::BootPool, boot),
        (PartitionRole::RootPool, root),
        (PartitionRole::HomePool, home),
    ];
    if is_first {
        sizes.push((PartitionRole::Swap, swap));
    }
    Ok(sizes)
}

fn sgdisk_last(role: PartitionRole, is_first: bool, layout: &PartitionLayout) -> String {
    match role {
        PartitionRole::Efi => format!("+{}M", layout.efi_mib),
        PartitionRole::BootPool => format!("+{}G", layout.boot_gib),
        PartitionRole::RootPool => format!("+{}G", layout.root_gib),
        PartitionRole::HomePool if is_first => format!("-{}G", layout.swap_gib),
        PartitionRole::HomePool | PartitionRole::Swap => "0".to_string(),
    }
}

/// Firmware compatibility gate: a 4096-byte-sector device cannot boot
/// reliably without UEFI firmware. Checked for the whole selection before
/// anything destructive happens.
pub fn validate_sector_boot_mode(devices: &[Device], efi_firmware: bool) -> Result<()> {
    if efi_firmware {
        return Ok(());
    }
    for device in devices {
        if device.logical_sector_size >= 4096 {
            return Err(InstallError::Validation(format!(
                "device {} has {}-byte logical sectors, which the bootloader \
                 cannot handle in legacy (non-UEFI) boot mode",
                device.id, device.logical_sector_size
            ))
            .into());
        }
    }
    Ok(())
}

/// Rewrite `device`'s partition table to the fixed layout.
///
/// Destructive. Steps: clear signatures and the old table, create each
/// partition in role order, force a table re-read, then block (bounded) until
/// the kernel exposes every expected partition node.
pub fn plan_device(
    hal: &dyn InstallerHal,
    device: &Device,
    is_first: bool,
    layout: &PartitionLayout,
    retry: &RetryPolicy,
    dry_run: bool,
) -> Result<PartitionPlan> {
    let disk = PathBuf::from(&device.id);
    log::info!(
        "🔪 Partitioning {} ({:.1} GiB{})",
        device.id,
        device.size_gib(),
        if is_first { ", with swap" } else { "" }
    );

    let sizes = compute_sizes(device.size_bytes, is_first, layout)?;

    hal.wipefs_all(&disk, &WipeFsOptions::new(dry_run, true))
        .map_err(|source| step_error("clear signatures", device, source))?;
    hal.sgdisk(&disk, SgdiskOp::ZapAll, &SgdiskOptions::new(dry_run, true))
        .map_err(|source| step_error("clear partition table", device, source))?;

    let mut partitions = Vec::with_capacity(sizes.len());
    for (role, size_bytes) in &sizes {
        let op = SgdiskOp::New {
            number: role.number(),
            first: "0".to_string(),
            last: sgdisk_last(*role, is_first, layout),
            type_code: role.type_code().to_string(),
            label: role.label().to_string(),
        };
        hal.sgdisk(&disk, op, &SgdiskOptions::new(dry_run, true))
            .map_err(|source| step_error("create partition", device, source))?;

        partitions.push(PlannedPartition {
            role: *role,
            number: role.number(),
            node: partition_node(&device.id, role.number()),
            size_bytes: *size_bytes,
        });
    }

    if !dry_run {
        if let Err(err) = hal.partprobe(&disk) {
            log::warn!("partprobe {} failed: {}", disk.display(), err);
        }
        let _ = hal.udev_settle();

        for partition in &partitions {
            let node = partition.node.clone();
            let appeared = retry::wait_for(retry, || hal.path_exists(&node));
            if !appeared {
                return Err(step_error(
                    "wait for partition node",
                    device,
                    HalError::Other(format!(
                        "partition node {} did not appear",
                        partition.node.display()
                    )),
                )
                .into());
            }
        }
    }

    Ok(PartitionPlan {
        device_id: device.id.clone(),
        logical_sector_size: device.logical_sector_size,
        partitions,
    })
}

fn step_error(step: &str, device: &Device, source: HalError) -> InstallError {
    InstallError::DestructiveStep {
        step: format!("{} on {}", step, device.id),
        source,
    }
}
