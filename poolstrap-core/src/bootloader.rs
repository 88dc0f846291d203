//! Redundant bootloader installation across every device.
//!
//! The first device's boot-firmware partition is the primary; every other
//! device gets a backup installation under a numbered mountpoint and a
//! distinct bootloader id. Losing the primary is fatal, losing a backup is a
//! warning — the system still boots via the primary.

use crate::context::InstallContext;
use crate::partition::{partition_node, PartitionRole};
use anyhow::Result;
use poolstrap_error::{HalError, InstallError};
use poolstrap_hal::{EspFormatOptions, GrubOptions, InstallerHal, MountOptions};
use std::path::{Path, PathBuf};

/// One boot-firmware partition, with the sector size of its parent device
/// (drives the FAT cluster sizing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EspTarget {
    pub node: PathBuf,
    pub logical_sector_size: u64,
}

/// The boot-firmware partitions of the selected devices, in device order.
pub fn esp_targets(ctx: &InstallContext) -> Vec<EspTarget> {
    ctx.devices
        .iter()
        .map(|device| EspTarget {
            node: partition_node(&device.id, PartitionRole::Efi.number()),
            logical_sector_size: device.logical_sector_size,
        })
        .collect()
}

/// Format and install the bootloader on every boot-firmware partition.
pub fn install_redundant(
    hal: &dyn InstallerHal,
    ctx: &InstallContext,
    targets: &[EspTarget],
    dry_run: bool,
) -> Result<()> {
    let (primary, backups) = targets.split_first().ok_or_else(|| {
        InstallError::Validation("no boot-firmware partitions to install to".to_string())
    })?;

    install_primary(hal, ctx, primary, dry_run)?;

    for (index, backup) in backups.iter().enumerate() {
        // Backup mountpoints are numbered from 2.
        let ordinal = index + 2;
        if let Err(err) = install_backup(hal, ctx, backup, ordinal, dry_run) {
            log::warn!(
                "⚠️ Backup bootloader install on {} failed: {} (system remains bootable via the primary)",
                backup.node.display(),
                err
            );
        }
    }
    Ok(())
}

fn install_primary(
    hal: &dyn InstallerHal,
    ctx: &InstallContext,
    primary: &EspTarget,
    dry_run: bool,
) -> Result<()> {
    let target = ctx.target();
    let boot_dir = target.join("boot");
    let efi_dir = boot_dir.join("efi");
    let bootloader_id = ctx.config.os_name.clone();

    log::info!(
        "🥾 Installing primary bootloader on {}",
        primary.node.display()
    );

    format_and_mount(hal, ctx, primary, &efi_dir, "/boot/efi", "defaults", dry_run)?;

    hal.grub_install(
        &boot_dir,
        &efi_dir,
        &bootloader_id,
        &GrubOptions::new(dry_run, true),
    )
    .map_err(|source| step_error("install primary bootloader", source))?;

    // Only proceed once the installed binary is actually on disk; a boot
    // entry pointing at nothing is worse than a failed install.
    if !dry_run {
        let binary = grub_binary_path(&efi_dir, &bootloader_id);
        if !hal.path_exists(&binary) {
            return Err(step_error(
                "verify primary bootloader",
                HalError::Other(format!(
                    "bootloader binary missing at {}",
                    binary.display()
                )),
            )
            .into());
        }
    }
    Ok(())
}

fn install_backup(
    hal: &dyn InstallerHal,
    ctx: &InstallContext,
    backup: &EspTarget,
    ordinal: usize,
    dry_run: bool,
) -> Result<()> {
    let target = ctx.target();
    let boot_dir = target.join("boot");
    let mount_name = format!("/boot/efi{}", ordinal);
    let efi_dir = boot_dir.join(format!("efi{}", ordinal));
    let bootloader_id = format!("{}-{}", ctx.config.os_name, ordinal);

    log::info!(
        "🥾 Installing backup bootloader {} on {}",
        ordinal,
        backup.node.display()
    );

    // Backups are not kept mounted during normal operation.
    format_and_mount(hal, ctx, backup, &efi_dir, &mount_name, "noauto,defaults", dry_run)?;

    let result = hal
        .grub_install(
            &boot_dir,
            &efi_dir,
            &bootloader_id,
            &GrubOptions::new(dry_run, true),
        )
        .map_err(|source| step_error("install backup bootloader", source).into());

    // Unmount regardless of the install outcome.
    if let Err(err) = hal.unmount(&efi_dir, dry_run) {
        log::warn!("Could not unmount {}: {}", efi_dir.display(), err);
    }

    result
}

fn format_and_mount(
    hal: &dyn InstallerHal,
    ctx: &InstallContext,
    esp: &EspTarget,
    efi_dir: &Path,
    fstab_mountpoint: &str,
    fstab_options: &str,
    dry_run: bool,
) -> Result<()> {
    hal.format_esp(
        &esp.node,
        "EFI",
        &EspFormatOptions::for_sector_size(dry_run, true, esp.logical_sector_size),
    )
    .map_err(|source| step_error("format boot-firmware partition", source))?;

    hal.create_dir_all(efi_dir, dry_run)
        .map_err(|source| step_error("create firmware mountpoint", source))?;
    hal.mount_device(&esp.node, efi_dir, Some("vfat"), MountOptions::new(), dry_run)
        .map_err(|source| step_error("mount boot-firmware partition", source))?;

    record_fstab_entry(hal, ctx, esp, fstab_mountpoint, fstab_options, dry_run)?;
    Ok(())
}

/// Record the partition in the installed system's mount table by UUID.
fn record_fstab_entry(
    hal: &dyn InstallerHal,
    ctx: &InstallContext,
    esp: &EspTarget,
    mountpoint: &str,
    options: &str,
    dry_run: bool,
) -> Result<()> {
    let uuid = match hal.blkid_uuid(&esp.node) {
        Ok(uuid) if !uuid.is_empty() => uuid,
        Ok(_) | Err(_) if dry_run => return Ok(()),
        Ok(_) => {
            return Err(step_error(
                "record firmware partition in fstab",
                HalError::Other(format!("no UUID for {}", esp.node.display())),
            )
            .into())
        }
        Err(source) => {
            return Err(step_error("record firmware partition in fstab", source).into())
        }
    };

    let fstab = ctx.target().join("etc/fstab");
    let line = format!(
        "/dev/disk/by-uuid/{} {} vfat {},umask=0022 0 0",
        uuid, mountpoint, options
    );
    hal.append_line(&fstab, &line, dry_run)
        .map_err(|source| step_error("record firmware partition in fstab", source))?;
    Ok(())
}

fn grub_binary_path(efi_dir: &Path, bootloader_id: &str) -> PathBuf {
    efi_dir.join("EFI").join(bootloader_id).join("grubx64.efi")
}

fn step_error(step: &str, source: HalError) -> InstallError {
    InstallError::DestructiveStep {
        step: step.to_string(),
        source,
    }
}
