//! Device inventory: discovery, filtering, and stable-identifier resolution.

use anyhow::{Context, Result};
use poolstrap_error::InstallError;
use poolstrap_hal::procfs::mountinfo;
use poolstrap_hal::sysfs::block::{self, BlockDeviceInfo};
use poolstrap_hal::{devlinks, InstallerHal};
use std::path::{Path, PathBuf};

/// Minimum device capacity considered usable for an install.
pub const MIN_DEVICE_BYTES: u64 = 16 * 1024 * 1024 * 1024;

/// A candidate installation target. Referenced, never mutated, throughout
/// planning; physically overwritten during partitioning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Device {
    /// Persistent identifier (a `/dev/disk/by-id` link), independent of
    /// enumeration order. All destructive commands are keyed on this.
    pub id: String,
    /// Kernel device node the id resolves to, for display.
    pub dev_path: PathBuf,
    pub size_bytes: u64,
    pub logical_sector_size: u64,
    pub model: Option<String>,
    /// Pre-existing filesystem/OS signature, for user-facing warnings only.
    pub existing_signature: Option<String>,
}

impl Device {
    pub fn size_gib(&self) -> f64 {
        self.size_bytes as f64 / (1024.0 * 1024.0 * 1024.0)
    }
}

/// Filesystem roots the scan reads from; tests point these at fixtures.
#[derive(Debug, Clone)]
pub struct DiscoverRoots {
    pub sys_block: PathBuf,
    pub by_id: PathBuf,
}

impl Default for DiscoverRoots {
    fn default() -> Self {
        Self {
            sys_block: PathBuf::from("/sys/block"),
            by_id: PathBuf::from("/dev/disk/by-id"),
        }
    }
}

/// Enumerate usable installation targets.
///
/// Removable/USB devices, devices with mounted filesystems or a RAID/dm
/// holder, the host's own root disk, undersized devices, and devices without
/// any stable by-id link are all excluded. Zero remaining devices is fatal.
pub fn discover(hal: &dyn InstallerHal, roots: &DiscoverRoots) -> Result<Vec<Device>> {
    let candidates = block::scan_block_devices_in(&roots.sys_block)
        .with_context(|| format!("failed to scan {}", roots.sys_block.display()))?;

    let mount_table = mountinfo::parse(&hal.proc_mountinfo().unwrap_or_default());
    let host_root_disk = mountinfo::root_source(&mount_table).map(base_device_name);

    let mut devices = Vec::new();
    for info in candidates {
        if let Some(reason) = exclusion_reason(&info, &mount_table, host_root_disk.as_deref()) {
            log::info!("Skipping {}: {}", info.dev_path.display(), reason);
            continue;
        }

        let Some(stable) = devlinks::resolve_stable_link(&roots.by_id, &info.dev_path)? else {
            // A destructive, rebooted-into-later operation keyed on a
            // non-persistent path is an unacceptable risk.
            log::warn!(
                "Skipping {}: no stable by-id link found",
                info.dev_path.display()
            );
            continue;
        };

        // Signature detection is best-effort; failures are non-fatal.
        let existing_signature = match hal.probe_signature(&info.dev_path) {
            Ok(sig) => sig,
            Err(err) => {
                log::warn!(
                    "Could not probe {} for existing signatures: {}",
                    info.dev_path.display(),
                    err
                );
                None
            }
        };

        devices.push(Device {
            id: stable.display().to_string(),
            dev_path: info.dev_path,
            size_bytes: info.size_bytes,
            logical_sector_size: info.logical_sector_size,
            model: info.model,
            existing_signature,
        });
    }

    if devices.is_empty() {
        return Err(InstallError::NoUsableDevices.into());
    }
    Ok(devices)
}

fn exclusion_reason(
    info: &BlockDeviceInfo,
    mount_table: &[mountinfo::MountEntry],
    host_root_disk: Option<&str>,
) -> Option<String> {
    if info.removable {
        return Some("removable device".to_string());
    }
    if info.usb {
        return Some("USB-attached device".to_string());
    }
    if info.claimed {
        return Some("already claimed by a RAID or device-mapper stack".to_string());
    }
    if info.size_bytes < MIN_DEVICE_BYTES {
        return Some(format!(
            "below minimum capacity ({} GiB required)",
            MIN_DEVICE_BYTES / (1024 * 1024 * 1024)
        ));
    }
    let mounted = mountinfo::mounted_under_device(mount_table, &info.dev_path);
    if !mounted.is_empty() {
        return Some(format!("has mounted filesystems: {}", mounted.join(", ")));
    }
    if host_root_disk == Some(info.name.as_str()) {
        return Some("hosts the running system's root filesystem".to_string());
    }
    None
}

/// Strip a partition suffix from a `/dev/...` source to the base device name.
fn base_device_name(device: &str) -> String {
    let name = device.trim_start_matches("/dev/");
    if name.starts_with("nvme") || name.starts_with("mmcblk") {
        if let Some(idx) = name.rfind('p') {
            let suffix = &name[idx + 1..];
            if !suffix.is_empty() && suffix.chars().all(|c| c.is_ascii_digit()) {
                return name[..idx].to_string();
            }
        }
        return name.to_string();
    }
    let trimmed = name.trim_end_matches(|c: char| c.is_ascii_digit());
    if trimmed.is_empty() {
        name.to_string()
    } else {
        trimmed.to_string()
    }
}

/// Map the operator's selected ids to discovered devices, preserving the
/// selection order. Unknown ids are a validation error.
pub fn resolve_selected(discovered: &[Device], ids: &[String]) -> Result<Vec<Device>> {
    let mut selected = Vec::with_capacity(ids.len());
    for id in ids {
        let device = discovered
            .iter()
            .find(|d| &d.id == id || d.dev_path == Path::new(id))
            .ok_or_else(|| {
                InstallError::Validation(format!(
                    "selected device '{}' was not found among usable devices",
                    id
                ))
            })?;
        selected.push(device.clone());
    }
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use poolstrap_hal::FakeHal;
    use std::fs;
    use std::os::unix::fs::symlink;
    use tempfile::tempdir;

    struct Fixture {
        _tmp: tempfile::TempDir,
        roots: DiscoverRoots,
    }

    fn fixture() -> Fixture {
        let tmp = tempdir().unwrap();
        let roots = DiscoverRoots {
            sys_block: tmp.path().join("sys_block"),
            by_id: tmp.path().join("by-id"),
        };
        fs::create_dir_all(&roots.sys_block).unwrap();
        fs::create_dir_all(&roots.by_id).unwrap();
        Fixture { _tmp: tmp, roots }
    }

    fn add_disk(fx: &Fixture, name: &str, size_bytes: u64, link: Option<&str>) {
        let dir = fx.roots.sys_block.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("size"), format!("{}\n", size_bytes / 512)).unwrap();
        if let Some(link) = link {
            symlink(format!("../../{}", name), fx.roots.by_id.join(link)).unwrap();
        }
    }

    const DISK_SIZE: u64 = 64 * 1024 * 1024 * 1024;

    #[test]
    fn discover_resolves_stable_ids() {
        let fx = fixture();
        add_disk(&fx, "sda", DISK_SIZE, Some("ata-SAMSUNG-S1"));
        let hal = FakeHal::new();

        let devices = discover(&hal, &fx.roots).unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].id.ends_with("ata-SAMSUNG-S1"));
        assert_eq!(devices[0].size_bytes, DISK_SIZE);
    }

    #[test]
    fn discover_excludes_devices_without_stable_link() {
        let fx = fixture();
        add_disk(&fx, "sda", DISK_SIZE, None);
        let hal = FakeHal::new();

        let err = discover(&hal, &fx.roots).unwrap_err();
        assert!(err.downcast_ref::<InstallError>().is_some());
    }

    #[test]
    fn discover_excludes_removable_devices() {
        let fx = fixture();
        add_disk(&fx, "sda", DISK_SIZE, Some("ata-GOOD"));
        add_disk(&fx, "sdb", DISK_SIZE, Some("ata-STICK"));
        fs::write(fx.roots.sys_block.join("sdb/removable"), "1\n").unwrap();
        let hal = FakeHal::new();

        let devices = discover(&hal, &fx.roots).unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].id.ends_with("ata-GOOD"));
    }

    #[test]
    fn discover_excludes_raid_members() {
        let fx = fixture();
        add_disk(&fx, "sda", DISK_SIZE, Some("ata-MDMEMBER"));
        add_disk(&fx, "sdb", DISK_SIZE, Some("ata-FREE"));
        fs::create_dir_all(fx.roots.sys_block.join("sda/holders/md0")).unwrap();
        let hal = FakeHal::new();

        let devices = discover(&hal, &fx.roots).unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].id.ends_with("ata-FREE"));
    }

    #[test]
    fn discover_excludes_undersized_devices() {
        let fx = fixture();
        add_disk(&fx, "sda", 1024 * 1024 * 1024, Some("ata-TINY"));
        let hal = FakeHal::new();
        assert!(discover(&hal, &fx.roots).is_err());
    }

    #[test]
    fn discover_excludes_mounted_devices() {
        let fx = fixture();
        add_disk(&fx, "sda", DISK_SIZE, Some("ata-BUSY"));
        add_disk(&fx, "sdb", DISK_SIZE, Some("ata-FREE"));
        let hal = FakeHal::new();
        hal.set_mountinfo("36 28 0:31 / /srv rw,relatime - ext4 /dev/sda1 rw\n");

        let devices = discover(&hal, &fx.roots).unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].id.ends_with("ata-FREE"));
    }

    #[test]
    fn discover_excludes_host_root_disk() {
        let fx = fixture();
        add_disk(&fx, "sda", DISK_SIZE, Some("ata-HOST"));
        add_disk(&fx, "sdb", DISK_SIZE, Some("ata-SPARE"));
        let hal = FakeHal::new();
        hal.set_mountinfo("36 28 0:31 / / rw,relatime - ext4 /dev/sda2 rw\n");

        let devices = discover(&hal, &fx.roots).unwrap();
        assert_eq!(devices.len(), 1);
        assert!(devices[0].id.ends_with("ata-SPARE"));
    }

    #[test]
    fn discover_reports_existing_signatures() {
        let fx = fixture();
        add_disk(&fx, "sda", DISK_SIZE, Some("ata-USED"));
        let hal = FakeHal::new();
        hal.set_signature(Path::new("/dev/sda"), "ext4 (old-root)");

        let devices = discover(&hal, &fx.roots).unwrap();
        assert_eq!(
            devices[0].existing_signature.as_deref(),
            Some("ext4 (old-root)")
        );
    }

    #[test]
    fn resolve_selected_preserves_order_and_rejects_unknown() {
        let fx = fixture();
        add_disk(&fx, "sda", DISK_SIZE, Some("ata-A"));
        add_disk(&fx, "sdb", DISK_SIZE, Some("ata-B"));
        let hal = FakeHal::new();
        let discovered = discover(&hal, &fx.roots).unwrap();

        let b_id = discovered
            .iter()
            .find(|d| d.id.ends_with("ata-B"))
            .unwrap()
            .id
            .clone();
        let a_id = discovered
            .iter()
            .find(|d| d.id.ends_with("ata-A"))
            .unwrap()
            .id
            .clone();

        let selected = resolve_selected(&discovered, &[b_id.clone(), a_id]).unwrap();
        assert_eq!(selected[0].id, b_id);

        assert!(resolve_selected(&discovered, &["/dev/disk/by-id/ata-MISSING".to_string()])
            .is_err());
    }

    #[test]
    fn base_device_name_handles_nvme_and_sata() {
        assert_eq!(base_device_name("/dev/sda3"), "sda");
        assert_eq!(base_device_name("/dev/nvme0n1p2"), "nvme0n1");
        assert_eq!(base_device_name("/dev/mmcblk0p1"), "mmcblk0");
    }
}
