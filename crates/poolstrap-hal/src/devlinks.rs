//! Stable device-link resolution under `/dev/disk/by-id`.
//!
//! Destructive operations that survive a reboot must never be keyed on
//! enumeration-order names like `/dev/sda`. Each candidate device is resolved
//! to a persistent link, preferring transport-specific names over generic
//! WWN-based ones; a device with no stable link at all is excluded upstream.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Link-name prefixes in preference order. A lower index wins.
const PREFERRED_PREFIXES: [&str; 4] = ["nvme-", "ata-", "scsi-", "wwn-"];

/// Resolve the preferred stable link for `dev_path` (e.g. `/dev/sda`) by
/// scanning `by_id_dir`. Partition links (`*-partN`) are ignored. Returns
/// `None` when no usable link points at the device.
pub fn resolve_stable_link(by_id_dir: &Path, dev_path: &Path) -> io::Result<Option<PathBuf>> {
    let dev_name = match dev_path.file_name() {
        Some(name) => name.to_os_string(),
        None => return Ok(None),
    };

    let mut best: Option<(usize, PathBuf)> = None;
    let entries = match fs::read_dir(by_id_dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };

    for entry in entries.flatten() {
        let link_name = entry.file_name().to_string_lossy().to_string();
        if link_name.contains("-part") {
            continue;
        }
        let Some(rank) = PREFERRED_PREFIXES
            .iter()
            .position(|prefix| link_name.starts_with(prefix))
        else {
            continue;
        };

        let target = match fs::read_link(entry.path()) {
            Ok(target) => target,
            Err(_) => continue,
        };
        // Targets are relative (`../../sda`); the final component identifies
        // the kernel device name.
        if target.file_name() != Some(dev_name.as_os_str()) {
            continue;
        }

        match &best {
            Some((best_rank, _)) if *best_rank <= rank => {}
            _ => best = Some((rank, entry.path())),
        }
    }

    Ok(best.map(|(_, path)| path))
}
