//! `/proc/self/mountinfo` parsing.
//!
//! The table is parsed once into `MountEntry` records; inventory, preflight
//! and the recursive unmount all query the same parsed form instead of
//! re-splitting the raw text.

use std::path::{Path, PathBuf};

/// One mount-table row: where it is mounted and what backs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountEntry {
    pub mount_point: PathBuf,
    /// Mount source: a device node for block filesystems, a pseudo name
    /// (`tmpfs`, `sysfs`, ...) otherwise.
    pub source: String,
}

/// Parse a mountinfo document. Malformed rows are dropped.
pub fn parse(content: &str) -> Vec<MountEntry> {
    content.lines().filter_map(parse_row).collect()
}

// Row format:
//   <id> <parent> <maj:min> <root> <mount point> <opts>... - <fstype> <source> <super opts>
fn parse_row(line: &str) -> Option<MountEntry> {
    let (pre, post) = line.split_once(" - ")?;
    let mount_point = pre.split_whitespace().nth(4)?;
    let source = post.split_whitespace().nth(1)?;
    Some(MountEntry {
        mount_point: PathBuf::from(unescape(mount_point)),
        source: source.to_string(),
    })
}

pub fn is_mounted(entries: &[MountEntry], path: &Path) -> bool {
    let target = normalize(path);
    entries.iter().any(|e| normalize(&e.mount_point) == target)
}

/// Mount points backed by `dev_path` itself or one of its partitions,
/// sorted and deduplicated.
pub fn mounted_under_device(entries: &[MountEntry], dev_path: &Path) -> Vec<String> {
    let dev = dev_path.to_string_lossy();
    let mut mounts: Vec<String> = entries
        .iter()
        .filter(|e| source_is_device_or_partition(&e.source, &dev))
        .map(|e| e.mount_point.to_string_lossy().into_owned())
        .collect();
    mounts.sort();
    mounts.dedup();
    mounts
}

/// Source device backing the `/` mount.
pub fn root_source(entries: &[MountEntry]) -> Option<&str> {
    entries
        .iter()
        .find(|e| e.mount_point == Path::new("/"))
        .map(|e| e.source.as_str())
}

// `/dev/sda` must match `/dev/sda` and `/dev/sda1` but not `/dev/sdab`;
// nvme/mmcblk partitions carry a `p` separator (`/dev/nvme0n1p2`).
fn source_is_device_or_partition(source: &str, dev: &str) -> bool {
    match source.strip_prefix(dev) {
        Some("") => true,
        Some(rest) => {
            let rest = rest.strip_prefix('p').unwrap_or(rest);
            !rest.is_empty() && rest.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

/// Undo the kernel's octal escaping of whitespace in mount paths.
fn unescape(raw: &str) -> String {
    raw.replace("\\040", " ")
        .replace("\\011", "\t")
        .replace("\\012", "\n")
        .replace("\\134", "\\")
}

fn normalize(path: &Path) -> String {
    let s = path.to_string_lossy();
    if s.len() > 1 && s.ends_with('/') {
        s.trim_end_matches('/').to_string()
    } else {
        s.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
36 28 0:31 / / rw,relatime - ext4 /dev/sda3 rw\n\
37 28 0:32 / /mnt/boot rw,relatime - vfat /dev/sda1 rw\n\
38 28 0:33 / /mnt/other rw,relatime - ext4 /dev/sdb1 rw\n\
39 28 0:34 / /proc rw,nosuid - proc proc rw\n";

    #[test]
    fn parse_extracts_mountpoint_and_source() {
        let entries = parse(SAMPLE);
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].mount_point, PathBuf::from("/"));
        assert_eq!(entries[0].source, "/dev/sda3");
        assert_eq!(entries[3].source, "proc");
    }

    #[test]
    fn parse_drops_malformed_rows() {
        assert!(parse("garbage without separator\n36 28\n").is_empty());
    }

    #[test]
    fn parse_unescapes_whitespace_in_paths() {
        let entries = parse("36 28 0:31 / /mnt/data\\040disk rw - ext4 /dev/sda3 rw\n");
        assert_eq!(entries[0].mount_point, PathBuf::from("/mnt/data disk"));
    }

    #[test]
    fn is_mounted_matches_exact_mountpoints() {
        let entries = parse(SAMPLE);
        assert!(is_mounted(&entries, Path::new("/")));
        assert!(is_mounted(&entries, Path::new("/mnt/boot")));
        assert!(!is_mounted(&entries, Path::new("/mnt")));
    }

    #[test]
    fn mounted_under_device_includes_partitions_only() {
        let entries = parse(SAMPLE);
        assert_eq!(
            mounted_under_device(&entries, Path::new("/dev/sda")),
            vec!["/".to_string(), "/mnt/boot".to_string()]
        );
        assert_eq!(
            mounted_under_device(&entries, Path::new("/dev/sdb")),
            vec!["/mnt/other".to_string()]
        );
    }

    #[test]
    fn sibling_devices_with_a_shared_prefix_do_not_match() {
        let entries = parse("40 28 0:35 / /mnt/x rw - ext4 /dev/sdab1 rw\n");
        assert!(mounted_under_device(&entries, Path::new("/dev/sda")).is_empty());
    }

    #[test]
    fn nvme_partitions_match_their_parent() {
        let entries = parse("41 28 0:36 / /mnt/n rw - ext4 /dev/nvme0n1p2 rw\n");
        assert_eq!(
            mounted_under_device(&entries, Path::new("/dev/nvme0n1")),
            vec!["/mnt/n".to_string()]
        );
    }

    #[test]
    fn root_source_reads_the_root_mount() {
        let entries = parse(SAMPLE);
        assert_eq!(root_source(&entries), Some("/dev/sda3"));
        assert_eq!(root_source(&[]), None);
    }
}
