//! Top-level run controller.
//!
//! The only place that decides whether to clean up and how to present a
//! failure. Stages report errors upward; nothing below this level swallows a
//! destructive-operation failure.

use super::plan::{build_plan, InstallPlan};
use super::stages;
use crate::install_runner::{StageDefinition, StageRunner};
use crate::preflight::{self, PreflightConfig};
use anyhow::Result;
use poolstrap_core::cancel;
use poolstrap_core::cleanup::Cleaner;
use poolstrap_core::config::InstallConfig;
use poolstrap_core::config_states::{ArmedConfig, UnvalidatedConfig, ValidatedConfig};
use poolstrap_core::context::{pool_names, InstallContext};
use poolstrap_core::inventory::{self, DiscoverRoots};
use poolstrap_core::state::{self, InstallState};
use poolstrap_core::{logging, InstallError};
use poolstrap_hal::{InstallerHal, LinuxHal, RetryPolicy};
use std::sync::Arc;

/// Injection points for tests and constrained environments.
#[derive(Clone, Debug)]
pub struct PipelineOptions {
    pub roots: DiscoverRoots,
    pub node_retry: RetryPolicy,
    pub settle_retry: RetryPolicy,
    pub preflight: PreflightConfig,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            roots: DiscoverRoots::default(),
            node_retry: RetryPolicy::device_nodes(),
            settle_retry: RetryPolicy::event_helper(),
            preflight: PreflightConfig::default(),
        }
    }
}

impl PipelineOptions {
    /// Instant retries, no binary requirements: suitable for fake-HAL runs.
    pub fn for_tests(roots: DiscoverRoots) -> Self {
        Self {
            roots,
            node_retry: RetryPolicy::immediate(),
            settle_retry: RetryPolicy::immediate(),
            preflight: PreflightConfig::with_binaries(Vec::new()),
        }
    }
}

/// Validate and, in dry-run mode, describe or simulate the install.
pub fn run_pipeline(cfg: &InstallConfig) -> Result<InstallPlan> {
    let validated = UnvalidatedConfig::new(cfg.clone()).validate()?;
    run_pipeline_validated(validated, Arc::new(LinuxHal::new()), PipelineOptions::default())
}

/// Execute a validated, explicitly armed install.
pub fn run_pipeline_execute(
    cfg: ArmedConfig<InstallConfig>,
    hal: Arc<dyn InstallerHal>,
    opts: PipelineOptions,
) -> Result<InstallPlan> {
    if !cfg.cfg.execute || cfg.cfg.dry_run {
        anyhow::bail!("run_pipeline_execute requires execute=true and dry_run=false");
    }
    run_pipeline_impl(cfg.cfg, hal, opts)
}

pub(crate) fn run_pipeline_validated(
    cfg: ValidatedConfig<InstallConfig>,
    hal: Arc<dyn InstallerHal>,
    opts: PipelineOptions,
) -> Result<InstallPlan> {
    if !cfg.0.execute {
        return Ok(build_plan(&cfg.0));
    }

    // For execute-mode, callers must arm to perform destructive operations.
    // Only a simulated run (execute=true, dry_run=true) is allowed here.
    if !cfg.0.dry_run {
        anyhow::bail!("execute-mode requires an ArmedConfig; use run_pipeline_execute");
    }

    run_pipeline_impl(cfg.0, hal, opts)
}

fn run_pipeline_impl(
    cfg: InstallConfig,
    hal: Arc<dyn InstallerHal>,
    opts: PipelineOptions,
) -> Result<InstallPlan> {
    let plan = build_plan(&cfg);
    let dry_run = cfg.dry_run;

    let discovered = inventory::discover(hal.as_ref(), &opts.roots)?;
    let devices = inventory::resolve_selected(&discovered, &cfg.device_ids)?;
    for device in &devices {
        if let Some(signature) = &device.existing_signature {
            log::warn!(
                "⚠️ {} carries an existing signature: {} — it will be erased",
                device.id,
                signature
            );
        }
    }

    let existing_state = state::load_state(&cfg.state_path)?;
    let install_id = match existing_state.as_ref().filter(|s| s.has_progress()) {
        Some(persisted) => {
            check_resume_consistency(hal.as_ref(), persisted, &cfg)?;
            log::info!(
                "▶️ Resuming after checkpoint '{}'",
                persisted
                    .completed_phases
                    .last()
                    .map(String::as_str)
                    .unwrap_or("none")
            );
            // Verified Some by the consistency check.
            persisted.install_id.clone().unwrap_or_default()
        }
        None => InstallContext::generate_install_id(),
    };

    let ctx = Arc::new(InstallContext::new(cfg.clone(), devices, install_id));
    let cleaner = Arc::new(Cleaner::new(Arc::clone(&hal), ctx.target().clone(), dry_run));

    reimport_checkpointed_pools(
        hal.as_ref(),
        existing_state.as_ref(),
        ctx.as_ref(),
        cleaner.as_ref(),
        dry_run,
    )?;

    if let Err(err) = cancel::install_ctrlc_handler() {
        log::warn!("Could not install interrupt handler: {}", err);
    }

    let stage_defs = build_stage_defs(&plan, Arc::clone(&hal), Arc::clone(&ctx), Arc::clone(&cleaner), &opts);

    let mut template = InstallState::new(dry_run);
    template.install_id = Some(ctx.install_id.clone());
    template.device_ids = cfg.device_ids.clone();
    template.redundancy_mode = Some(cfg.mode.to_string());
    template.username = Some(cfg.username.clone());

    let runner = StageRunner::new(cfg.state_path.clone(), dry_run, template);
    let result = runner.run(&stage_defs);

    // A pool must never be left imported when the orchestrator exits,
    // whichever way the run went.
    cleaner.run();

    match result {
        Ok(_) => {
            log::info!("🎉 Installation complete; pools exported for first boot");
            if cfg.encrypt_root || cfg.encrypt_home {
                log::info!(
                    "🔑 Keep the pool passphrase safe: it is the ONLY way to unlock \
                     the encrypted pools"
                );
            }
            log::info!("📄 Full log at {}", logging::LOG_PATH);
            Ok(plan)
        }
        Err(err) => {
            if err
                .downcast_ref::<InstallError>()
                .is_some_and(|e| matches!(e, InstallError::Interrupted))
            {
                log::error!("🛑 Interrupted by operator; pools exported, target unmounted");
            } else {
                log::error!("💥 Install failed: {:#}", err);
                log::error!(
                    "Pools created during this run were exported; a manual `zpool import` \
                     remains possible. Full log at {}",
                    logging::LOG_PATH
                );
            }
            Err(err)
        }
    }
}

fn build_stage_defs<'a>(
    plan: &InstallPlan,
    hal: Arc<dyn InstallerHal>,
    ctx: Arc<InstallContext>,
    cleaner: Arc<Cleaner>,
    opts: &PipelineOptions,
) -> Vec<StageDefinition<'a>> {
    plan.stages
        .iter()
        .map(|stage| match stage.name {
            "Preflight" => {
                let hal = Arc::clone(&hal);
                let ctx = Arc::clone(&ctx);
                let preflight_cfg = opts.preflight.clone();
                StageDefinition {
                    name: stage.name,
                    run: Box::new(move |_state, _dry_run| {
                        preflight::run(hal.as_ref(), &preflight_cfg, &ctx)
                    }),
                }
            }
            "Partition disks" => {
                let hal = Arc::clone(&hal);
                let ctx = Arc::clone(&ctx);
                let retry = opts.node_retry;
                StageDefinition {
                    name: stage.name,
                    run: Box::new(move |_state, dry_run| {
                        stages::run_partition_stage(hal.as_ref(), &ctx, &retry, dry_run)
                    }),
                }
            }
            "Create pools" => {
                let hal = Arc::clone(&hal);
                let ctx = Arc::clone(&ctx);
                let cleaner = Arc::clone(&cleaner);
                StageDefinition {
                    name: stage.name,
                    run: Box::new(move |_state, dry_run| {
                        stages::run_pools_stage(hal.as_ref(), &ctx, &cleaner, dry_run)
                    }),
                }
            }
            "Create datasets" => {
                let hal = Arc::clone(&hal);
                let ctx = Arc::clone(&ctx);
                StageDefinition {
                    name: stage.name,
                    run: Box::new(move |_state, dry_run| {
                        stages::run_datasets_stage(hal.as_ref(), &ctx, dry_run)
                    }),
                }
            }
            "Install base system" => {
                let hal = Arc::clone(&hal);
                let ctx = Arc::clone(&ctx);
                StageDefinition {
                    name: stage.name,
                    run: Box::new(move |_state, dry_run| {
                        stages::run_base_system_stage(hal.as_ref(), &ctx, dry_run)
                    }),
                }
            }
            "Install bootloader" => {
                let hal = Arc::clone(&hal);
                let ctx = Arc::clone(&ctx);
                StageDefinition {
                    name: stage.name,
                    run: Box::new(move |_state, dry_run| {
                        stages::run_bootloader_stage(hal.as_ref(), &ctx, dry_run)
                    }),
                }
            }
            "Finalize" => {
                let hal = Arc::clone(&hal);
                let ctx = Arc::clone(&ctx);
                let retry = opts.settle_retry;
                StageDefinition {
                    name: stage.name,
                    run: Box::new(move |_state, dry_run| {
                        stages::run_finalize_stage(hal.as_ref(), &ctx, &retry, dry_run)
                    }),
                }
            }
            name => {
                let description = stage.description.clone();
                StageDefinition {
                    name,
                    run: Box::new(move |_state, dry_run| {
                        if dry_run {
                            log::info!("DRY RUN: {} — {}", name, description);
                        } else {
                            log::info!("Stage: {} — {}", name, description);
                        }
                        Ok(())
                    }),
                }
            }
        })
        .collect()
}

/// A checkpoint may claim a phase complete only while the world still agrees
/// with it. Anything else must surface as a distinct error, never a silent
/// re-run or skip.
fn check_resume_consistency(
    hal: &dyn InstallerHal,
    persisted: &InstallState,
    cfg: &InstallConfig,
) -> Result<()> {
    if persisted.install_id.is_none() || persisted.device_ids.is_empty() {
        return Err(InstallError::ResumeInconsistent(
            "a checkpoint exists but its auxiliary state (install id, devices) is missing; \
             run `poolstrap restart` to start over"
                .to_string(),
        )
        .into());
    }
    if persisted.device_ids != cfg.device_ids {
        return Err(InstallError::ResumeInconsistent(format!(
            "the checkpointed run used devices [{}] but [{}] were selected now",
            persisted.device_ids.join(", "),
            cfg.device_ids.join(", ")
        ))
        .into());
    }
    if let Some(mode) = &persisted.redundancy_mode {
        if mode != &cfg.mode.to_string() {
            return Err(InstallError::ResumeInconsistent(format!(
                "the checkpointed run used redundancy mode {} but {} was selected now",
                mode, cfg.mode
            ))
            .into());
        }
    }
    if let Some(username) = &persisted.username {
        if username != &cfg.username {
            return Err(InstallError::ResumeInconsistent(format!(
                "the checkpointed run created datasets for user '{}' but '{}' was selected now",
                username, cfg.username
            ))
            .into());
        }
    }

    if persisted.is_completed("Create pools") && !persisted.dry_run {
        let imported = hal.zpool_list_names()?;
        let importable = hal.zpool_importable_names()?;
        for name in pool_names() {
            let present =
                imported.iter().any(|p| p == name) || importable.iter().any(|p| p == name);
            if !present {
                return Err(InstallError::ResumeInconsistent(format!(
                    "the checkpoint claims pool '{}' was created, but it is neither \
                     imported nor importable",
                    name
                ))
                .into());
            }
        }
    }
    Ok(())
}

/// On resume past pool creation the pools were exported by the previous
/// run's cleanup; bring them back under the install root.
fn reimport_checkpointed_pools(
    hal: &dyn InstallerHal,
    persisted: Option<&InstallState>,
    ctx: &InstallContext,
    cleaner: &Cleaner,
    dry_run: bool,
) -> Result<()> {
    let Some(persisted) = persisted else {
        return Ok(());
    };
    if !persisted.is_completed("Create pools") || persisted.dry_run {
        return Ok(());
    }

    let imported = hal.zpool_list_names()?;
    for name in pool_names() {
        if !imported.iter().any(|p| p == name) {
            log::info!("▶️ Re-importing pool '{}' for resume", name);
            hal.zpool_import(name, Some(ctx.target()), dry_run)
                .map_err(|source| InstallError::DestructiveStep {
                    step: format!("re-import pool {}", name),
                    source,
                })?;
        }
        cleaner.register_pool(name);
    }
    Ok(())
}
