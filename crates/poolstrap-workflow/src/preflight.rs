//! Preflight validation: everything that can reject an installation before
//! the first destructive command.

use anyhow::{anyhow, Context, Result};
use log::info;
use poolstrap_core::context::{pool_names, InstallContext};
use poolstrap_core::{partition, pools};
use poolstrap_error::InstallError;
use poolstrap_hal::procfs::{meminfo, mountinfo};
use poolstrap_hal::InstallerHal;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// ZFS wants real memory for its ARC; below this an install will thrash.
const MIN_RAM_MB: u64 = 2048;

#[derive(Clone, Debug)]
pub struct PreflightConfig {
    pub min_ram_mb: u64,
    pub required_binaries: Vec<String>,
    pub require_root: bool,
}

impl Default for PreflightConfig {
    fn default() -> Self {
        Self {
            min_ram_mb: MIN_RAM_MB,
            required_binaries: vec![
                "zpool".to_string(),
                "zfs".to_string(),
                "sgdisk".to_string(),
                "wipefs".to_string(),
                "mkdosfs".to_string(),
                "mkswap".to_string(),
                "partprobe".to_string(),
                "blkid".to_string(),
                "grub-install".to_string(),
            ],
            require_root: true,
        }
    }
}

impl PreflightConfig {
    /// An empty binary list explicitly means "no binary requirements"
    /// (tests and constrained environments).
    pub fn with_binaries(required_binaries: Vec<String>) -> Self {
        Self {
            required_binaries,
            ..Self::default()
        }
    }
}

pub fn run(hal: &dyn InstallerHal, cfg: &PreflightConfig, ctx: &InstallContext) -> Result<()> {
    info!("🧪 Preflight checks");

    if cfg.require_root && !hal.is_root() {
        return Err(
            InstallError::Validation("installation must run as root".to_string()).into(),
        );
    }

    check_ram(hal, cfg.min_ram_mb)?;
    check_binaries(&cfg.required_binaries)?;
    partition::validate_sector_boot_mode(&ctx.devices, hal.efi_firmware_present())?;
    // Runs the layout and size-tolerance validation on the planned partition
    // sizes, so a doomed redundancy group aborts the run while every disk is
    // still untouched.
    pools::compose_pool_groups(ctx)?;
    check_pool_name_conflicts(hal)?;
    check_devices_unmounted(hal, ctx)?;

    info!("✅ Preflight complete");
    Ok(())
}

fn check_ram(hal: &dyn InstallerHal, min_mb: u64) -> Result<()> {
    let content = hal
        .proc_meminfo()
        .context("failed to read /proc/meminfo for RAM check")?;
    let available_kb = meminfo::parse_mem_available_kb(&content)
        .ok_or_else(|| anyhow!("failed to determine available RAM"))?;
    let available_mb = available_kb / 1024;
    if available_mb < min_mb {
        return Err(InstallError::Validation(format!(
            "insufficient RAM: {} MiB available ({} MiB required for ZFS)",
            available_mb, min_mb
        ))
        .into());
    }
    Ok(())
}

/// Reject the run while the pool names it would create exist anywhere —
/// imported on this host or exported but importable from these or other
/// disks. A leftover pool from an interrupted run must be dealt with
/// explicitly, never silently overwritten or continued into.
fn check_pool_name_conflicts(hal: &dyn InstallerHal) -> Result<()> {
    let imported = hal.zpool_list_names()?;
    let importable = hal.zpool_importable_names()?;
    for name in pool_names() {
        if imported.iter().any(|p| p == name) || importable.iter().any(|p| p == name) {
            return Err(InstallError::PoolNameConflict(name.to_string()).into());
        }
    }
    Ok(())
}

fn check_devices_unmounted(hal: &dyn InstallerHal, ctx: &InstallContext) -> Result<()> {
    let mount_table = mountinfo::parse(&hal.proc_mountinfo().unwrap_or_default());
    for device in &ctx.devices {
        let mounted = mountinfo::mounted_under_device(&mount_table, &device.dev_path);
        if !mounted.is_empty() {
            return Err(InstallError::Validation(format!(
                "device {} has mounted filesystems: {}",
                device.id,
                mounted.join(", ")
            ))
            .into());
        }
    }
    Ok(())
}

fn check_binaries(bins: &[String]) -> Result<()> {
    let path = env::var_os("PATH").unwrap_or_default();
    let entries = env::split_paths(&path).collect::<Vec<_>>();
    for bin in bins {
        let Some(found) = find_in_paths(bin, &entries) else {
            return Err(InstallError::Validation(format!(
                "required binary '{}' not found in PATH",
                bin
            ))
            .into());
        };
        ensure_executable(&found).with_context(|| {
            format!(
                "required binary '{}' was found at {} but is not executable",
                bin,
                found.display()
            )
        })?;
    }
    Ok(())
}

fn ensure_executable(path: &Path) -> Result<()> {
    let md = fs::metadata(path).with_context(|| format!("failed to stat {}", path.display()))?;
    if !md.is_file() {
        anyhow::bail!("{} is not a regular file", path.display());
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = md.permissions().mode();
        if mode & 0o111 == 0 {
            anyhow::bail!("{} is not executable", path.display());
        }
    }
    Ok(())
}

fn find_in_paths(binary: &str, paths: &[PathBuf]) -> Option<PathBuf> {
    paths
        .iter()
        .map(|dir| dir.join(binary))
        .find(|candidate| candidate.exists())
}
