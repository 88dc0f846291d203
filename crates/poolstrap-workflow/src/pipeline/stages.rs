//! Phase implementations.
//!
//! Each stage operates on one device at a time, in selection order, so a
//! failure on device N never leaves device N+1 partially modified. Cancel
//! checks sit between destructive steps.

use anyhow::{Context, Result};
use poolstrap_core::bootloader;
use poolstrap_core::cancel::check_cancel;
use poolstrap_core::cleanup::Cleaner;
use poolstrap_core::context::{InstallContext, BOOT_POOL, HOME_POOL, ROOT_POOL};
use poolstrap_core::partition::{self, PartitionRole};
use poolstrap_core::pools;
use poolstrap_error::InstallError;
use poolstrap_hal::procfs::meminfo;
use poolstrap_hal::retry::{self, RetryPolicy};
use poolstrap_hal::{InstallerHal, SwapFormatOptions};
use std::path::Path;
use std::time::Duration;

const BASE_SYSTEM_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Boot-time pool-import cache maintained by the pool event helper.
const ZPOOL_CACHE: &str = "/etc/zfs/zpool.cache";

pub fn run_partition_stage(
    hal: &dyn InstallerHal,
    ctx: &InstallContext,
    node_retry: &RetryPolicy,
    dry_run: bool,
) -> Result<()> {
    let total = ctx.devices.len();
    for (index, device) in ctx.devices.iter().enumerate() {
        check_cancel()?;
        partition::plan_device(
            hal,
            device,
            index == 0,
            &ctx.config.layout,
            node_retry,
            dry_run,
        )
        .with_context(|| format!("partitioning device {} of {} ({})", index + 1, total, device.id))?;
    }

    // Swap lives only on the first device; make it usable right away so the
    // installed system's mount table can reference it.
    let swap_node = partition::partition_node(
        &ctx.first_device().id,
        PartitionRole::Swap.number(),
    );
    hal.format_swap(&swap_node, "SWAP", &SwapFormatOptions::new(dry_run, true))
        .map_err(|source| InstallError::DestructiveStep {
            step: format!("format swap on {}", swap_node.display()),
            source,
        })?;
    Ok(())
}

pub fn run_pools_stage(
    hal: &dyn InstallerHal,
    ctx: &InstallContext,
    cleaner: &Cleaner,
    dry_run: bool,
) -> Result<()> {
    check_cancel()?;
    let groups = pools::compose_pool_groups(ctx)?;

    pools::create_boot_pool(hal, ctx, &groups.boot, dry_run)?;
    cleaner.register_pool(BOOT_POOL);
    check_cancel()?;

    pools::create_root_pool(hal, ctx, &groups.root, dry_run)?;
    cleaner.register_pool(ROOT_POOL);
    check_cancel()?;

    pools::create_home_pool(hal, ctx, &groups.home, dry_run)?;
    cleaner.register_pool(HOME_POOL);
    Ok(())
}

pub fn run_datasets_stage(
    hal: &dyn InstallerHal,
    ctx: &InstallContext,
    dry_run: bool,
) -> Result<()> {
    check_cancel()?;
    pools::create_dataset_hierarchy(hal, ctx, dry_run)
}

pub fn run_base_system_stage(
    hal: &dyn InstallerHal,
    ctx: &InstallContext,
    dry_run: bool,
) -> Result<()> {
    check_cancel()?;
    let command = &ctx.config.base_system_command;
    if command.is_empty() {
        log::info!("📦 No base-system installer configured; root dataset left for the operator");
        return Ok(());
    }
    if dry_run {
        log::info!("DRY RUN: {} {}", command.join(" "), ctx.target().display());
        return Ok(());
    }

    log::info!("📦 Installing base system into {}", ctx.target().display());
    let target = ctx.target().display().to_string();
    let mut args: Vec<&str> = command[1..].iter().map(String::as_str).collect();
    args.push(&target);
    hal.command_status(&command[0], &args, BASE_SYSTEM_TIMEOUT)
        .map_err(|source| InstallError::DestructiveStep {
            step: "install base system".to_string(),
            source,
        })?;
    Ok(())
}

pub fn run_bootloader_stage(
    hal: &dyn InstallerHal,
    ctx: &InstallContext,
    dry_run: bool,
) -> Result<()> {
    check_cancel()?;
    let targets = bootloader::esp_targets(ctx);
    bootloader::install_redundant(hal, ctx, &targets, dry_run)
}

pub fn run_finalize_stage(
    hal: &dyn InstallerHal,
    ctx: &InstallContext,
    settle_retry: &RetryPolicy,
    dry_run: bool,
) -> Result<()> {
    check_cancel()?;

    // Give the pool event helper a bounded window to materialize the
    // boot-time import cache; proceeding without it is allowed.
    let cache = Path::new(ZPOOL_CACHE);
    if retry::wait_for(settle_retry, || hal.path_exists(cache)) {
        let dst = ctx.target().join("etc/zfs/zpool.cache");
        if let Err(err) = hal.copy_file(cache, &dst, dry_run) {
            log::warn!("Could not copy {} into the target: {}", ZPOOL_CACHE, err);
        }
    } else {
        log::warn!(
            "{} did not appear in time; boot-time import will scan devices instead",
            ZPOOL_CACHE
        );
    }

    write_arc_cap(hal, ctx, dry_run)?;

    // The freshly installed generation is the one the machine boots next.
    pools::touch_last_used(hal, ctx, dry_run)?;

    // Swap is referenced by its stable by-id path.
    let swap_node = partition::partition_node(
        &ctx.first_device().id,
        PartitionRole::Swap.number(),
    );
    let fstab = ctx.target().join("etc/fstab");
    let line = format!("{} none swap discard 0 0", swap_node.display());
    hal.append_line(&fstab, &line, dry_run)
        .map_err(|source| InstallError::DestructiveStep {
            step: "record swap in fstab".to_string(),
            source,
        })?;

    let _ = hal.sync();
    Ok(())
}

/// Cap the ARC at half of physical memory on the installed system.
fn write_arc_cap(hal: &dyn InstallerHal, ctx: &InstallContext, dry_run: bool) -> Result<()> {
    let Ok(content) = hal.proc_meminfo() else {
        log::warn!("Could not read meminfo; skipping ARC cap");
        return Ok(());
    };
    let Some(total_kb) = meminfo::parse_mem_total_kb(&content) else {
        log::warn!("Could not parse MemTotal; skipping ARC cap");
        return Ok(());
    };

    let arc_max_bytes = total_kb * 1024 / 2;
    let conf = ctx.target().join("etc/modprobe.d/zfs.conf");
    hal.write_file(
        &conf,
        &format!("options zfs zfs_arc_max={}\n", arc_max_bytes),
        dry_run,
    )
    .map_err(|source| InstallError::DestructiveStep {
        step: "write ARC configuration".to_string(),
        source,
    })?;
    Ok(())
}
