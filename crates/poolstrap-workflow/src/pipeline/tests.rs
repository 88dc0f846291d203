//! End-to-end pipeline scenarios against the fake HAL.

use super::run::{run_pipeline_execute, PipelineOptions};
use poolstrap_core::config::InstallConfig;
use poolstrap_core::config_states::{ExecuteArmToken, UnvalidatedConfig};
use poolstrap_core::inventory::DiscoverRoots;
use poolstrap_core::state::{self, InstallState};
use poolstrap_core::vdev::RedundancyMode;
use poolstrap_core::InstallError;
use poolstrap_hal::{FakeHal, InstallerHal, Operation, ZfsOps};
use std::fs;
use std::os::unix::fs::symlink;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

const GIB: u64 = 1024 * 1024 * 1024;

struct Rig {
    _tmp: TempDir,
    roots: DiscoverRoots,
    state_path: PathBuf,
    device_ids: Vec<String>,
}

/// Build sysfs/by-id fixtures for `sizes_gib` disks named sda, sdb, ...
fn rig(sizes_gib: &[u64]) -> Rig {
    let tmp = TempDir::new().unwrap();
    let roots = DiscoverRoots {
        sys_block: tmp.path().join("sys_block"),
        by_id: tmp.path().join("by-id"),
    };
    fs::create_dir_all(&roots.sys_block).unwrap();
    fs::create_dir_all(&roots.by_id).unwrap();

    let mut device_ids = Vec::new();
    for (i, gib) in sizes_gib.iter().enumerate() {
        let name = format!("sd{}", (b'a' + i as u8) as char);
        let dir = roots.sys_block.join(&name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("size"), format!("{}\n", gib * GIB / 512)).unwrap();

        let link = roots.by_id.join(format!("ata-DISK{}", i));
        symlink(format!("../../{}", name), &link).unwrap();
        device_ids.push(link.display().to_string());
    }

    Rig {
        state_path: tmp.path().join("state.json"),
        _tmp: tmp,
        roots,
        device_ids,
    }
}

fn config(rig: &Rig, mode: RedundancyMode) -> InstallConfig {
    InstallConfig {
        device_ids: rig.device_ids.clone(),
        mode,
        state_path: rig.state_path.clone(),
        dry_run: false,
        execute: true,
        ..InstallConfig::default()
    }
}

fn execute(cfg: InstallConfig, hal: &Arc<FakeHal>, rig: &Rig) -> anyhow::Result<()> {
    let validated = UnvalidatedConfig::new(cfg).validate()?;
    let armed = validated.arm_execute(ExecuteArmToken::try_new(true)?)?;
    let hal: Arc<dyn InstallerHal> = Arc::clone(hal) as Arc<dyn InstallerHal>;
    run_pipeline_execute(armed, hal, PipelineOptions::for_tests(rig.roots.clone()))?;
    Ok(())
}

fn pool_creates(hal: &FakeHal) -> Vec<(String, Vec<String>, bool)> {
    hal.operations()
        .iter()
        .filter_map(|op| match op {
            Operation::ZpoolCreate {
                name,
                args,
                encrypted,
                ..
            } => Some((name.clone(), args.clone(), *encrypted)),
            _ => None,
        })
        .collect()
}

#[test]
fn scenario_three_device_raidz_install_runs_to_completion() {
    let rig = rig(&[500, 500, 500]);
    let hal = Arc::new(FakeHal::new());

    execute(config(&rig, RedundancyMode::RaidZ1), &hal, &rig).unwrap();

    // Exactly three pools, each over a 3-member single-parity group.
    let creates = pool_creates(&hal);
    assert_eq!(creates.len(), 3);
    for (name, args, encrypted) in &creates {
        assert!(args.contains(&"raidz".to_string()), "{} not raidz", name);
        assert_eq!(
            args.iter().filter(|a| a.contains("-part")).count(),
            3,
            "{} should span 3 partitions",
            name
        );
        assert!(!encrypted);
    }

    // The checkpoint file ends at the terminal phase.
    let persisted = state::load_state(&rig.state_path).unwrap().unwrap();
    assert_eq!(
        persisted.completed_phases.last().map(String::as_str),
        Some("Finalize")
    );

    // No pool is left imported when the orchestrator exits.
    assert!(hal.zpool_list_names().unwrap().is_empty());
    assert_eq!(hal.zpool_importable_names().unwrap().len(), 3);

    // Swap was formatted on the first device only.
    assert_eq!(
        hal.count_operations(|op| matches!(op, Operation::FormatSwap { .. })),
        1
    );
    assert!(hal.has_operation(|op| matches!(
        op,
        Operation::FormatSwap { device, .. } if device.to_string_lossy().contains("DISK0-part5")
    )));

    // Finalize stamped the installed generation as the latest one.
    assert!(hal.has_operation(|op| matches!(
        op,
        Operation::ZfsSet { dataset, prop, .. }
            if dataset.starts_with("rpool/ROOT/linux_") && prop == "org.poolstrap:last-used"
    )));
}

#[test]
fn scenario_boot_pool_is_feature_restricted_and_root_is_not() {
    let rig = rig(&[500, 500]);
    let hal = Arc::new(FakeHal::new());

    execute(config(&rig, RedundancyMode::Mirror), &hal, &rig).unwrap();

    let creates = pool_creates(&hal);
    let boot = creates.iter().find(|(n, _, _)| n == "bpool").unwrap();
    let root = creates.iter().find(|(n, _, _)| n == "rpool").unwrap();
    assert!(boot.1.contains(&"-d".to_string()));
    assert!(!root.1.contains(&"-d".to_string()));
    assert!(!boot.2, "the boot pool can never be encrypted");
}

#[test]
fn scenario_mirror_within_tolerance_proceeds_and_beyond_tolerance_aborts() {
    // 500 GB vs 520 GB: within 10%, proceeds.
    let rig_ok = rig(&[500, 520]);
    let hal_ok = Arc::new(FakeHal::new());
    execute(config(&rig_ok, RedundancyMode::Mirror), &hal_ok, &rig_ok).unwrap();
    assert_eq!(pool_creates(&hal_ok).len(), 3);

    // 500 GB vs 650 GB: the home partitions diverge beyond 10%; the whole
    // run aborts in preflight, before anything destructive at all.
    let rig_bad = rig(&[500, 650]);
    let hal_bad = Arc::new(FakeHal::new());
    let err = execute(config(&rig_bad, RedundancyMode::Mirror), &hal_bad, &rig_bad).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<InstallError>(),
        Some(InstallError::Validation(_))
    ));
    assert_eq!(pool_creates(&hal_bad).len(), 0);
    assert_eq!(
        hal_bad.count_operations(|op| matches!(op, Operation::WipeFsAll { .. })),
        0
    );
}

#[test]
fn scenario_leftover_pools_from_an_interrupted_run_conflict() {
    let rig1 = rig(&[500, 500]);
    let hal = Arc::new(FakeHal::new());

    // First run completes; its pools end up exported but importable.
    execute(config(&rig1, RedundancyMode::Mirror), &hal, &rig1).unwrap();
    assert_eq!(hal.zpool_importable_names().unwrap().len(), 3);

    // Explicit restart wipes the checkpoint, not the pools.
    state::clear_state(&rig1.state_path).unwrap();
    hal.clear_operations();

    let err = execute(config(&rig1, RedundancyMode::Mirror), &hal, &rig1).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<InstallError>(),
        Some(InstallError::PoolNameConflict(_))
    ));
    // The conflict is a validation error: nothing destructive ran.
    assert_eq!(
        hal.count_operations(|op| matches!(op, Operation::WipeFsAll { .. })),
        0
    );
}

#[test]
fn scenario_partition_failure_on_device_three_stops_before_any_pool() {
    let rig = rig(&[500, 500, 500, 500, 500]);
    let hal = Arc::new(FakeHal::new());
    hal.fail_sgdisk_on(&PathBuf::from(&rig.device_ids[2]));

    let err = execute(config(&rig, RedundancyMode::RaidZ3), &hal, &rig).unwrap_err();
    assert!(format!("{:#}", err).contains("device 3 of 5"));

    // Devices 1 and 2 were fully partitioned, 4 and 5 untouched.
    for (index, expected) in [(0usize, true), (1, true), (3, false), (4, false)] {
        let disk = PathBuf::from(&rig.device_ids[index]);
        let touched = hal.has_operation(
            |op| matches!(op, Operation::WipeFsAll { disk: d } if d == &disk),
        );
        assert_eq!(touched, expected, "device {} touch state", index + 1);
    }

    // No pool was created over any device, and cleanup exported zero pools.
    assert_eq!(pool_creates(&hal).len(), 0);
    assert_eq!(
        hal.count_operations(|op| matches!(op, Operation::ZpoolExport { .. })),
        0
    );

    // The failed phase was never checkpointed.
    let persisted = state::load_state(&rig.state_path).unwrap().unwrap();
    assert!(!persisted.is_completed("Partition disks"));
    assert!(persisted.is_completed("Preflight"));
}

#[test]
fn scenario_resume_skips_checkpointed_phases_and_reimports_pools() {
    let rig = rig(&[500, 500]);
    let hal = Arc::new(FakeHal::new());
    // Break the primary bootloader install: the run checkpoints through
    // "Install base system" and dies in "Install bootloader".
    hal.fail_grub_id("linux");

    let err = execute(config(&rig, RedundancyMode::Mirror), &hal, &rig).unwrap_err();
    assert!(err.to_string().contains("Install bootloader"));
    let persisted = state::load_state(&rig.state_path).unwrap().unwrap();
    assert!(persisted.is_completed("Install base system"));
    // Cleanup exported the pools on the way out.
    assert_eq!(hal.zpool_importable_names().unwrap().len(), 3);

    // Second run on a healthy HAL with the same persisted world: pools are
    // re-imported, earlier phases are skipped wholesale.
    let hal2 = Arc::new(FakeHal::new());
    for pool in ["bpool", "rpool", "hpool"] {
        hal2.add_importable_pool(pool);
    }
    execute(config(&rig, RedundancyMode::Mirror), &hal2, &rig).unwrap();

    assert_eq!(
        hal2.count_operations(|op| matches!(op, Operation::ZpoolImport { .. })),
        3
    );
    // Nothing was re-partitioned and no pool was re-created.
    assert_eq!(
        hal2.count_operations(|op| matches!(op, Operation::WipeFsAll { .. })),
        0
    );
    assert_eq!(pool_creates(&hal2).len(), 0);

    let persisted = state::load_state(&rig.state_path).unwrap().unwrap();
    assert_eq!(
        persisted.completed_phases.last().map(String::as_str),
        Some("Finalize")
    );
}

#[test]
fn scenario_resume_with_missing_pools_is_an_explicit_error() {
    let rig = rig(&[500, 500]);

    let mut claimed = InstallState::new(false);
    claimed.install_id = Some("ab12cd".to_string());
    claimed.device_ids = rig.device_ids.clone();
    claimed.redundancy_mode = Some("mirror".to_string());
    claimed.username = Some("admin".to_string());
    for phase in ["Preflight", "Partition disks", "Create pools"] {
        claimed.mark_completed(phase);
    }
    state::save_state_atomic(&rig.state_path, &claimed).unwrap();

    // The world has no such pools: neither imported nor importable.
    let hal = Arc::new(FakeHal::new());
    let err = execute(config(&rig, RedundancyMode::Mirror), &hal, &rig).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<InstallError>(),
        Some(InstallError::ResumeInconsistent(_))
    ));
}

#[test]
fn scenario_resume_with_missing_aux_state_is_an_explicit_error() {
    let rig = rig(&[500, 500]);

    let mut claimed = InstallState::new(false);
    claimed.mark_completed("Preflight");
    // No install id, no device list.
    state::save_state_atomic(&rig.state_path, &claimed).unwrap();

    let hal = Arc::new(FakeHal::new());
    let err = execute(config(&rig, RedundancyMode::Mirror), &hal, &rig).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<InstallError>(),
        Some(InstallError::ResumeInconsistent(_))
    ));
}

#[test]
fn scenario_changed_device_selection_refuses_to_resume() {
    let rig = rig(&[500, 500]);

    let mut claimed = InstallState::new(false);
    claimed.install_id = Some("ab12cd".to_string());
    claimed.device_ids = vec!["/dev/disk/by-id/ata-SOMETHING-ELSE".to_string()];
    claimed.mark_completed("Preflight");
    state::save_state_atomic(&rig.state_path, &claimed).unwrap();

    let hal = Arc::new(FakeHal::new());
    let err = execute(config(&rig, RedundancyMode::Mirror), &hal, &rig).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<InstallError>(),
        Some(InstallError::ResumeInconsistent(_))
    ));
}

#[test]
fn scenario_backup_bootloader_failure_does_not_abort() {
    let rig = rig(&[500, 500, 500]);
    let hal = Arc::new(FakeHal::new());
    hal.fail_grub_id("linux-3");

    execute(config(&rig, RedundancyMode::RaidZ1), &hal, &rig).unwrap();

    let persisted = state::load_state(&rig.state_path).unwrap().unwrap();
    assert_eq!(
        persisted.completed_phases.last().map(String::as_str),
        Some("Finalize")
    );
}

#[test]
fn scenario_encrypted_pools_carry_prompt_keylocation() {
    let rig = rig(&[500, 500]);
    let hal = Arc::new(FakeHal::new());
    let mut cfg = config(&rig, RedundancyMode::Mirror);
    cfg.encrypt_root = true;
    cfg.encrypt_home = true;

    execute(cfg, &hal, &rig).unwrap();

    let creates = pool_creates(&hal);
    let encrypted: Vec<&str> = creates
        .iter()
        .filter(|(_, _, e)| *e)
        .map(|(n, _, _)| n.as_str())
        .collect();
    assert_eq!(encrypted, vec!["rpool", "hpool"]);
    let root = creates.iter().find(|(n, _, _)| n == "rpool").unwrap();
    assert!(root.1.contains(&"keylocation=prompt".to_string()));
}

#[test]
fn simulated_run_touches_nothing_and_leaves_no_checkpoint() {
    let rig = rig(&[500, 500]);
    let hal = Arc::new(FakeHal::new());
    let mut cfg = config(&rig, RedundancyMode::Mirror);
    cfg.dry_run = true;

    let validated = UnvalidatedConfig::new(cfg).validate().unwrap();
    let dyn_hal: Arc<dyn InstallerHal> = Arc::clone(&hal) as Arc<dyn InstallerHal>;
    super::run::run_pipeline_validated(
        validated,
        dyn_hal,
        PipelineOptions::for_tests(rig.roots.clone()),
    )
    .unwrap();

    // Nothing destructive, no pools, and crucially no persisted checkpoint
    // that a later real run could mistake for completed work.
    assert_eq!(
        hal.count_operations(|op| matches!(op, Operation::WipeFsAll { .. })),
        0
    );
    assert_eq!(pool_creates(&hal).len(), 0);
    assert!(state::load_state(&rig.state_path).unwrap().is_none());
}

#[test]
fn dry_run_without_execute_only_plans() {
    let rig = rig(&[500, 500]);
    let cfg = InstallConfig {
        execute: false,
        ..config(&rig, RedundancyMode::Mirror)
    };
    let plan = super::run::run_pipeline(&cfg).unwrap();
    assert_eq!(plan.stages.len(), super::plan::PHASES.len());
}
