//! Helpers related to block devices in sysfs.

use anyhow::{anyhow, Result};
use std::fs;
use std::path::{Path, PathBuf};

pub fn device_basename(path: &Path) -> Result<String> {
    let name = path
        .file_name()
        .ok_or_else(|| anyhow!("invalid device path {}", path.display()))?
        .to_string_lossy()
        .to_string();
    Ok(name)
}

/// Reads the block device size from `/sys/class/block/<dev>/size`.
///
/// The `size` file is expressed in 512-byte sectors.
pub fn block_device_size_bytes(sys_block_dev_dir: &Path) -> Result<u64> {
    let sectors_str = fs::read_to_string(sys_block_dev_dir.join("size"))?;
    let sectors: u64 = sectors_str.trim().parse()?;
    Ok(sectors.saturating_mul(512))
}

/// Reads `queue/logical_block_size`, defaulting to 512 when absent.
pub fn logical_block_size(sys_block_dev_dir: &Path) -> u64 {
    fs::read_to_string(sys_block_dev_dir.join("queue/logical_block_size"))
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(512)
}

#[derive(Debug, Clone)]
pub struct BlockDeviceInfo {
    pub name: String,
    pub dev_path: PathBuf,
    pub sysfs_path: PathBuf,
    pub size_bytes: u64,
    pub logical_sector_size: u64,
    pub vendor: Option<String>,
    pub model: Option<String>,
    pub removable: bool,
    pub usb: bool,
    /// Another kernel layer (md RAID, device-mapper) holds this device.
    pub claimed: bool,
}

pub fn scan_block_devices() -> Result<Vec<BlockDeviceInfo>> {
    scan_block_devices_in(Path::new("/sys/block"))
}

pub fn scan_block_devices_in(sys_block_root: &Path) -> Result<Vec<BlockDeviceInfo>> {
    let mut out = Vec::new();
    let entries = fs::read_dir(sys_block_root)?;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if should_skip_block_device(&name) {
            continue;
        }
        let sysfs_path = sys_block_root.join(&name);
        let size_bytes = match block_device_size_bytes(&sysfs_path) {
            Ok(v) => v,
            Err(_) => continue,
        };
        if size_bytes == 0 {
            continue;
        }

        let dev_path = PathBuf::from("/dev").join(&name);
        let vendor = read_trimmed(sysfs_path.join("device/vendor"));
        let model = read_trimmed(sysfs_path.join("device/model"));
        let removable = read_trimmed(sysfs_path.join("removable"))
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(0)
            == 1;
        let usb = is_usb_attached(&sysfs_path);
        let claimed = has_holders(&sysfs_path);
        let logical_sector_size = logical_block_size(&sysfs_path);

        out.push(BlockDeviceInfo {
            name,
            dev_path,
            sysfs_path,
            size_bytes,
            logical_sector_size,
            vendor,
            model,
            removable,
            usb,
            claimed,
        });
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

/// USB attachment shows up in the resolved sysfs device path
/// (`.../usbN/...`). Resolution failures count as not-USB; the removable
/// flag still catches most of those devices.
fn is_usb_attached(sysfs_path: &Path) -> bool {
    fs::canonicalize(sysfs_path)
        .map(|real| real.to_string_lossy().contains("/usb"))
        .unwrap_or(false)
}

/// `holders/` lists the devices stacked on top of this one; any entry means
/// an md array or device-mapper target already owns it.
fn has_holders(sysfs_path: &Path) -> bool {
    fs::read_dir(sysfs_path.join("holders"))
        .map(|mut entries| entries.next().is_some())
        .unwrap_or(false)
}

fn read_trimmed(path: PathBuf) -> Option<String> {
    fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
        .and_then(|s| if s.is_empty() { None } else { Some(s) })
}

fn should_skip_block_device(name: &str) -> bool {
    // Virtual and ephemeral devices are never installation targets.
    name.starts_with("loop")
        || name.starts_with("ram")
        || name.starts_with("zram")
        || name.starts_with("dm-")
        || name.starts_with("md")
        || name.starts_with("sr")
}
