//! Pool creation and the dataset hierarchy.
//!
//! Three pools back the installed system: a feature-restricted boot pool the
//! bootloader can read, and full-featured (optionally encrypted) root and
//! home pools. Datasets are created container-first because children need
//! their parents to exist.

use crate::context::{InstallContext, BOOT_POOL, HOME_POOL, ROOT_POOL};
use crate::partition::{self, PartitionRole};
use crate::vdev::{self, VdevMember, VdevSpec};
use anyhow::Result;
use poolstrap_error::{HalError, InstallError};
use poolstrap_hal::{
    FeaturePolicy, InstallerHal, ZfsCreateRequest, ZfsOptions, ZpoolCreateRequest, ZpoolOptions,
};
use std::time::{SystemTime, UNIX_EPOCH};

/// Pool features GRUB's pool reader understands. The boot pool must never
/// enable anything outside this list.
pub const GRUB_COMPATIBLE_FEATURES: &[&str] = &[
    "async_destroy",
    "bookmarks",
    "embedded_data",
    "empty_bpobj",
    "enabled_txg",
    "extensible_dataset",
    "filesystem_limits",
    "hole_birth",
    "large_blocks",
    "lz4_compress",
    "spacemap_histogram",
    "zpool_checkpoint",
];

/// Custom property namespace for boot metadata tags.
pub const PROP_BOOTFS: &str = "org.poolstrap:bootfs";
pub const PROP_LAST_USED: &str = "org.poolstrap:last-used";
pub const PROP_BOOTFS_DATASETS: &str = "org.poolstrap:bootfs-datasets";

/// Block-alignment exponent for a logical sector size. Never below 12:
/// 512-byte drives routinely lie about their physical sectors, and a too-low
/// ashift is a permanent performance defect while a too-high one only costs
/// slack space.
pub fn ashift_for_sector(logical_sector_size: u64) -> u32 {
    logical_sector_size.max(512).ilog2().max(12)
}

/// One ashift for the whole install: the largest any member device needs.
pub fn pool_ashift(ctx: &InstallContext) -> u32 {
    ctx.devices
        .iter()
        .map(|d| ashift_for_sector(d.logical_sector_size))
        .max()
        .unwrap_or(12)
}

fn props(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// The three redundancy groups, one per pool role.
#[derive(Debug)]
pub struct PoolGroups {
    pub boot: VdevSpec,
    pub root: VdevSpec,
    pub home: VdevSpec,
}

/// Compose and validate all three groups from the planned partition sizes.
///
/// Pure. Preflight calls this so a device-count or size-tolerance violation
/// aborts the run before the first destructive command; pool creation calls
/// it again for the actual specifications.
pub fn compose_pool_groups(ctx: &InstallContext) -> Result<PoolGroups> {
    let members_for = |role: PartitionRole| -> Result<Vec<VdevMember>> {
        ctx.devices
            .iter()
            .enumerate()
            .map(|(index, device)| {
                let sizes =
                    partition::compute_sizes(device.size_bytes, index == 0, &ctx.config.layout)?;
                let size_bytes = sizes
                    .iter()
                    .find(|(r, _)| *r == role)
                    .map(|(_, s)| *s)
                    .unwrap_or_default();
                Ok(VdevMember {
                    node: partition::partition_node(&device.id, role.number()),
                    size_bytes,
                })
            })
            .collect()
    };

    let mode = ctx.config.mode;
    Ok(PoolGroups {
        boot: vdev::compose(mode, &members_for(PartitionRole::BootPool)?)?,
        root: vdev::compose(mode, &members_for(PartitionRole::RootPool)?)?,
        home: vdev::compose(mode, &members_for(PartitionRole::HomePool)?)?,
    })
}

/// Boot pool: restricted feature set, compression, autotrim, never encrypted
/// (the bootloader must read it without a passphrase).
pub fn boot_pool_request(ctx: &InstallContext, vdev: &VdevSpec) -> ZpoolCreateRequest {
    ZpoolCreateRequest {
        name: BOOT_POOL.to_string(),
        ashift: pool_ashift(ctx),
        features: FeaturePolicy::Restricted(
            GRUB_COMPATIBLE_FEATURES
                .iter()
                .map(|s| s.to_string())
                .collect(),
        ),
        pool_props: props(&[("autotrim", "on")]),
        fs_props: props(&[
            ("acltype", "posixacl"),
            ("compression", "lz4"),
            ("devices", "off"),
            ("normalization", "formD"),
            ("relatime", "on"),
            ("xattr", "sa"),
            ("canmount", "off"),
            ("mountpoint", "/boot"),
        ]),
        encryption: false,
        altroot: Some(ctx.target().clone()),
        force: true,
        vdev: vdev.args.clone(),
    }
}

pub fn root_pool_request(ctx: &InstallContext, vdev: &VdevSpec) -> ZpoolCreateRequest {
    ZpoolCreateRequest {
        name: ROOT_POOL.to_string(),
        ashift: pool_ashift(ctx),
        features: FeaturePolicy::Full,
        pool_props: props(&[("autotrim", "on")]),
        fs_props: props(&[
            ("acltype", "posixacl"),
            ("compression", "lz4"),
            ("dnodesize", "auto"),
            ("normalization", "formD"),
            ("relatime", "on"),
            ("xattr", "sa"),
            ("canmount", "off"),
            ("mountpoint", "/"),
        ]),
        encryption: ctx.config.encrypt_root,
        altroot: Some(ctx.target().clone()),
        force: true,
        vdev: vdev.args.clone(),
    }
}

pub fn home_pool_request(ctx: &InstallContext, vdev: &VdevSpec) -> ZpoolCreateRequest {
    ZpoolCreateRequest {
        name: HOME_POOL.to_string(),
        ashift: pool_ashift(ctx),
        features: FeaturePolicy::Full,
        pool_props: props(&[("autotrim", "on")]),
        fs_props: props(&[
            ("acltype", "posixacl"),
            ("compression", "lz4"),
            ("dnodesize", "auto"),
            ("normalization", "formD"),
            ("relatime", "on"),
            ("xattr", "sa"),
            ("canmount", "off"),
            ("mountpoint", "/home"),
        ]),
        encryption: ctx.config.encrypt_home,
        altroot: Some(ctx.target().clone()),
        force: true,
        vdev: vdev.args.clone(),
    }
}

fn create_pool(hal: &dyn InstallerHal, req: &ZpoolCreateRequest, dry_run: bool) -> Result<()> {
    if req.encryption {
        log::info!(
            "🔐 Creating encrypted pool '{}' — enter the passphrase at the prompt",
            req.name
        );
    } else {
        log::info!("🏗️ Creating pool '{}'", req.name);
    }

    hal.zpool_create(req, &ZpoolOptions::new(dry_run, true))
        .map_err(|source| step_error(&format!("create pool {}", req.name), source))?;

    if !dry_run {
        let health = hal
            .zpool_get(&req.name, "health")
            .map_err(|source| step_error(&format!("verify pool {}", req.name), source))?;
        if health != "ONLINE" {
            return Err(step_error(
                &format!("verify pool {}", req.name),
                HalError::Other(format!("pool health is {} after creation", health)),
            )
            .into());
        }
    }
    Ok(())
}

pub fn create_boot_pool(
    hal: &dyn InstallerHal,
    ctx: &InstallContext,
    vdev: &VdevSpec,
    dry_run: bool,
) -> Result<()> {
    create_pool(hal, &boot_pool_request(ctx, vdev), dry_run)
}

pub fn create_root_pool(
    hal: &dyn InstallerHal,
    ctx: &InstallContext,
    vdev: &VdevSpec,
    dry_run: bool,
) -> Result<()> {
    create_pool(hal, &root_pool_request(ctx, vdev), dry_run)
}

pub fn create_home_pool(
    hal: &dyn InstallerHal,
    ctx: &InstallContext,
    vdev: &VdevSpec,
    dry_run: bool,
) -> Result<()> {
    create_pool(hal, &home_pool_request(ctx, vdev), dry_run)
}

fn now_epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// The full dataset creation sequence, container-first.
///
/// Pure: renders the requests without touching the HAL, so ordering and
/// properties are directly testable.
pub fn dataset_requests(ctx: &InstallContext) -> Vec<ZfsCreateRequest> {
    let root_ds = ctx.root_dataset();
    let last_used = now_epoch_secs().to_string();

    let mut requests = Vec::new();

    // Boot pool: container plus the boot filesystem for this generation.
    requests.push(
        ZfsCreateRequest::new(format!("{}/BOOT", BOOT_POOL))
            .prop("canmount", "off")
            .prop("mountpoint", "none"),
    );
    requests.push(
        ZfsCreateRequest::new(ctx.boot_dataset()).prop("mountpoint", "/boot"),
    );

    // Root pool: container, the bootable system root, then the subtree.
    requests.push(
        ZfsCreateRequest::new(format!("{}/ROOT", ROOT_POOL))
            .prop("canmount", "off")
            .prop("mountpoint", "none"),
    );
    requests.push(
        ZfsCreateRequest::new(root_ds.clone())
            .prop("canmount", "noauto")
            .prop("mountpoint", "/")
            .prop(PROP_BOOTFS, "yes")
            .prop(PROP_LAST_USED, &last_used),
    );
    for container in ["usr", "var"] {
        requests.push(
            ZfsCreateRequest::new(format!("{}/{}", root_ds, container)).prop("canmount", "off"),
        );
    }
    // Leaves inherit the pool's compression/acl settings.
    for leaf in [
        "usr/local",
        "var/lib",
        "var/lib/dpkg",
        "var/log",
        "var/spool",
        "var/cache",
        "var/tmp",
        "srv",
    ] {
        requests.push(ZfsCreateRequest::new(format!("{}/{}", root_ds, leaf)));
    }
    requests.push(
        ZfsCreateRequest::new(format!("{}/USERDATA", ROOT_POOL))
            .prop("canmount", "off")
            .prop("mountpoint", "none"),
    );
    requests.push(
        ZfsCreateRequest::new(format!("{}/USERDATA/root_{}", ROOT_POOL, ctx.install_id))
            .prop("mountpoint", "/root")
            .prop(PROP_BOOTFS_DATASETS, &root_ds),
    );

    // Home pool: container plus one dataset per human user, each carrying a
    // back-reference to the system generation it belongs to.
    requests.push(
        ZfsCreateRequest::new(format!("{}/USERDATA", HOME_POOL))
            .prop("canmount", "off")
            .prop("mountpoint", "none"),
    );
    requests.push(
        ZfsCreateRequest::new(ctx.user_dataset(&ctx.config.username))
            .prop(
                "mountpoint",
                &format!("/home/{}", ctx.config.username),
            )
            .prop(PROP_BOOTFS_DATASETS, &root_ds),
    );

    requests
}

/// Create the full hierarchy and apply the ownership/permission invariants.
pub fn create_dataset_hierarchy(
    hal: &dyn InstallerHal,
    ctx: &InstallContext,
    dry_run: bool,
) -> Result<()> {
    log::info!("🌳 Creating dataset hierarchy");
    let root_ds = ctx.root_dataset();

    for req in dataset_requests(ctx) {
        hal.zfs_create(&req, &ZfsOptions::new(dry_run, true))
            .map_err(|source| step_error(&format!("create dataset {}", req.name), source))?;

        // The system root is canmount=noauto; mount it explicitly so its
        // children land inside the install-time root.
        if req.name == root_ds {
            hal.zfs_mount(&root_ds, dry_run)
                .map_err(|source| step_error(&format!("mount dataset {}", root_ds), source))?;
        }
    }

    apply_permission_invariants(hal, ctx, dry_run)
}

/// Refresh the bootable root's last-used tag. Snapshot/rollback tooling
/// orders system generations by this timestamp.
pub fn touch_last_used(hal: &dyn InstallerHal, ctx: &InstallContext, dry_run: bool) -> Result<()> {
    let root_ds = ctx.root_dataset();
    hal.zfs_set(&root_ds, PROP_LAST_USED, &now_epoch_secs().to_string(), dry_run)
        .map_err(|source| step_error(&format!("tag dataset {}", root_ds), source))?;
    Ok(())
}

/// First regular uid/gid on the target system.
const FIRST_USER_ID: u32 = 1000;

fn apply_permission_invariants(
    hal: &dyn InstallerHal,
    ctx: &InstallContext,
    dry_run: bool,
) -> Result<()> {
    let target = ctx.target();

    let admin_home = target.join("root");
    hal.set_permissions(&admin_home, 0o700, dry_run)
        .map_err(|source| step_error("restrict /root permissions", source))?;

    let var_tmp = target.join("var/tmp");
    hal.set_permissions(&var_tmp, 0o1777, dry_run)
        .map_err(|source| step_error("set /var/tmp sticky bit", source))?;

    let user_home = target.join("home").join(&ctx.config.username);
    hal.chown(&user_home, FIRST_USER_ID, FIRST_USER_ID, dry_run)
        .map_err(|source| step_error("chown user home", source))?;
    hal.set_permissions(&user_home, 0o750, dry_run)
        .map_err(|source| step_error("restrict user home permissions", source))?;

    Ok(())
}

fn step_error(step: &str, source: HalError) -> InstallError {
    InstallError::DestructiveStep {
        step: step.to_string(),
        source,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InstallConfig;
    use crate::inventory::Device;
    use crate::vdev::RedundancyMode;
    use poolstrap_hal::{FakeHal, Operation};
    use std::path::PathBuf;

    fn test_ctx(sector_sizes: &[u64]) -> InstallContext {
        let devices: Vec<Device> = sector_sizes
            .iter()
            .enumerate()
            .map(|(i, &sector)| Device {
                id: format!("/dev/disk/by-id/ata-D{}", i),
                dev_path: PathBuf::from(format!("/dev/sd{}", (b'a' + i as u8) as char)),
                size_bytes: 500 * 1024 * 1024 * 1024,
                logical_sector_size: sector,
                model: None,
                existing_signature: None,
            })
            .collect();
        let config = InstallConfig {
            device_ids: devices.iter().map(|d| d.id.clone()).collect(),
            mode: RedundancyMode::Mirror,
            username: "alice".to_string(),
            dry_run: false,
            execute: true,
            ..InstallConfig::default()
        };
        InstallContext::new(config, devices, "ab12cd".to_string())
    }

    fn spec() -> VdevSpec {
        VdevSpec {
            args: vec![
                "mirror".to_string(),
                "/dev/disk/by-id/ata-D0-part2".to_string(),
                "/dev/disk/by-id/ata-D1-part2".to_string(),
            ],
        }
    }

    fn ctx_with_sizes(sizes_gib: &[u64]) -> InstallContext {
        let devices: Vec<Device> = sizes_gib
            .iter()
            .enumerate()
            .map(|(i, &gib)| Device {
                id: format!("/dev/disk/by-id/ata-D{}", i),
                dev_path: PathBuf::from(format!("/dev/sd{}", (b'a' + i as u8) as char)),
                size_bytes: gib * 1024 * 1024 * 1024,
                logical_sector_size: 512,
                model: None,
                existing_signature: None,
            })
            .collect();
        let config = InstallConfig {
            device_ids: devices.iter().map(|d| d.id.clone()).collect(),
            mode: RedundancyMode::Mirror,
            dry_run: false,
            execute: true,
            ..InstallConfig::default()
        };
        InstallContext::new(config, devices, "ab12cd".to_string())
    }

    #[test]
    fn pool_groups_compose_within_size_tolerance() {
        let groups = compose_pool_groups(&ctx_with_sizes(&[500, 520])).unwrap();
        assert_eq!(groups.root.args[0], "mirror");
        assert!(groups.home.args[1].ends_with("ata-D0-part4"));
    }

    #[test]
    fn pool_groups_reject_a_home_partition_outside_tolerance() {
        // Boot and root partitions are fixed-size and always match; only the
        // home partitions diverge with the raw disks.
        let err = compose_pool_groups(&ctx_with_sizes(&[500, 650])).unwrap_err();
        let install_err = err.downcast_ref::<InstallError>().unwrap();
        assert!(matches!(install_err, InstallError::Validation(_)));
        assert!(err.to_string().contains("part4"));
    }

    #[test]
    fn ashift_tracks_sector_size_with_floor_of_twelve() {
        assert_eq!(ashift_for_sector(512), 12);
        assert_eq!(ashift_for_sector(4096), 12);
        assert_eq!(ashift_for_sector(8192), 13);
    }

    #[test]
    fn pool_ashift_takes_the_widest_member() {
        let ctx = test_ctx(&[512, 8192]);
        assert_eq!(pool_ashift(&ctx), 13);
    }

    #[test]
    fn boot_pool_features_are_a_subset_of_the_grub_whitelist() {
        let ctx = test_ctx(&[512, 512]);
        let req = boot_pool_request(&ctx, &spec());
        let features = req.requested_features();
        assert!(!features.is_empty());
        for feature in features {
            assert!(
                GRUB_COMPATIBLE_FEATURES.contains(&feature.as_str()),
                "feature {} is not GRUB-compatible",
                feature
            );
        }
        assert!(matches!(req.features, FeaturePolicy::Restricted(_)));
    }

    #[test]
    fn boot_pool_is_never_encrypted() {
        let mut ctx = test_ctx(&[512, 512]);
        ctx.config.encrypt_root = true;
        ctx.config.encrypt_home = true;
        assert!(!boot_pool_request(&ctx, &spec()).encryption);
        assert!(root_pool_request(&ctx, &spec()).encryption);
        assert!(home_pool_request(&ctx, &spec()).encryption);
    }

    #[test]
    fn pools_mount_under_the_install_root() {
        let ctx = test_ctx(&[512, 512]);
        let req = root_pool_request(&ctx, &spec());
        assert_eq!(req.altroot.as_deref(), Some(ctx.target().as_path()));
    }

    #[test]
    fn containers_come_before_their_children() {
        let ctx = test_ctx(&[512, 512]);
        let requests = dataset_requests(&ctx);
        let names: Vec<&str> = requests.iter().map(|r| r.name.as_str()).collect();

        let pos = |name: &str| names.iter().position(|n| *n == name).unwrap();
        assert!(pos("rpool/ROOT") < pos("rpool/ROOT/linux_ab12cd"));
        assert!(pos("rpool/ROOT/linux_ab12cd") < pos("rpool/ROOT/linux_ab12cd/var"));
        assert!(pos("rpool/ROOT/linux_ab12cd/var") < pos("rpool/ROOT/linux_ab12cd/var/lib"));
        assert!(
            pos("rpool/ROOT/linux_ab12cd/var/lib") < pos("rpool/ROOT/linux_ab12cd/var/lib/dpkg")
        );
        assert!(pos("hpool/USERDATA") < pos("hpool/USERDATA/alice_ab12cd"));
    }

    #[test]
    fn containers_are_never_mountable_and_leaves_are() {
        let ctx = test_ctx(&[512, 512]);
        for req in dataset_requests(&ctx) {
            let canmount = req
                .props
                .iter()
                .find(|(k, _)| k == "canmount")
                .map(|(_, v)| v.as_str());
            let is_container = matches!(
                req.name.as_str(),
                "bpool/BOOT" | "rpool/ROOT" | "rpool/USERDATA" | "hpool/USERDATA"
            ) || req.name.ends_with("/usr")
                || req.name.ends_with("/var");
            if is_container {
                assert_eq!(canmount, Some("off"), "{} must not be mountable", req.name);
            } else {
                assert_ne!(canmount, Some("off"), "{} must be mountable", req.name);
            }
        }
    }

    #[test]
    fn bootable_root_carries_boot_metadata_tags() {
        let ctx = test_ctx(&[512, 512]);
        let requests = dataset_requests(&ctx);
        let root = requests
            .iter()
            .find(|r| r.name == "rpool/ROOT/linux_ab12cd")
            .unwrap();
        assert!(root.props.iter().any(|(k, v)| k == PROP_BOOTFS && v == "yes"));
        assert!(root.props.iter().any(|(k, _)| k == PROP_LAST_USED));
    }

    #[test]
    fn user_home_references_its_system_generation() {
        let ctx = test_ctx(&[512, 512]);
        let requests = dataset_requests(&ctx);
        let home = requests
            .iter()
            .find(|r| r.name == "hpool/USERDATA/alice_ab12cd")
            .unwrap();
        assert!(home
            .props
            .iter()
            .any(|(k, v)| k == PROP_BOOTFS_DATASETS && v == "rpool/ROOT/linux_ab12cd"));
    }

    #[test]
    fn hierarchy_mounts_the_noauto_root_before_its_children() {
        let hal = FakeHal::new();
        for pool in ["bpool", "rpool", "hpool"] {
            hal.add_imported_pool(pool);
        }
        let ctx = test_ctx(&[512, 512]);

        create_dataset_hierarchy(&hal, &ctx, false).unwrap();

        let ops = hal.operations();
        let mount_pos = ops
            .iter()
            .position(|op| matches!(op, Operation::ZfsMount { dataset } if dataset == "rpool/ROOT/linux_ab12cd"))
            .expect("root dataset must be mounted explicitly");
        let usr_pos = ops
            .iter()
            .position(|op| matches!(op, Operation::ZfsCreate { name, .. } if name == "rpool/ROOT/linux_ab12cd/usr"))
            .unwrap();
        assert!(mount_pos < usr_pos);

        // Permission invariants.
        assert!(hal.has_operation(|op| matches!(
            op,
            Operation::SetPermissions { path, mode: 0o700 } if path.ends_with("root")
        )));
        assert!(hal.has_operation(|op| matches!(
            op,
            Operation::Chown { path, uid: 1000, .. } if path.ends_with("home/alice")
        )));
    }

    #[test]
    fn dataset_creation_failure_is_fatal() {
        let hal = FakeHal::new();
        // No pools imported: the first zfs create fails.
        let ctx = test_ctx(&[512, 512]);
        let err = create_dataset_hierarchy(&hal, &ctx, false).unwrap_err();
        let install_err = err.downcast_ref::<InstallError>().unwrap();
        assert!(matches!(install_err, InstallError::DestructiveStep { .. }));
    }
}
