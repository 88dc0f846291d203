pub mod cli;

use anyhow::Result;
use clap::Parser;
use poolstrap_core::config::{InstallConfig, PartitionLayout};
use poolstrap_core::config_states::{ExecuteArmToken, UnvalidatedConfig};
use poolstrap_core::inventory::{self, DiscoverRoots};
use poolstrap_core::state;
use poolstrap_hal::{InstallerHal, LinuxHal};
use poolstrap_workflow::pipeline::{run_pipeline, run_pipeline_execute, PipelineOptions};
use std::sync::Arc;

pub fn run() -> Result<()> {
    let cli = cli::Cli::parse();
    poolstrap_core::logging::init();

    match cli.command {
        cli::Command::Inventory => run_inventory(),
        cli::Command::Install {
            devices,
            mode,
            encrypt_root,
            encrypt_home,
            username,
            os_name,
            root_gib,
            swap_gib,
            target,
            state,
            base_cmd,
            execute,
            yes_i_know,
        } => {
            let cfg = InstallConfig {
                device_ids: devices,
                mode,
                layout: PartitionLayout {
                    root_gib,
                    swap_gib,
                    ..PartitionLayout::default()
                },
                encrypt_root,
                encrypt_home,
                username,
                os_name,
                target_root: target,
                state_path: state,
                base_system_command: base_cmd,
                dry_run: cli.dry_run || !execute,
                execute,
            };
            run_install(cfg, yes_i_know)
        }
        cli::Command::Restart { state: state_path } => {
            state::clear_state(&state_path)?;
            log::info!("🔄 Checkpoint cleared; the next install starts from scratch");
            Ok(())
        }
    }
}

fn run_inventory() -> Result<()> {
    let hal = LinuxHal::new();
    let devices = inventory::discover(&hal, &DiscoverRoots::default())?;

    println!("{:<52} {:>9} {:>7}  {}", "STABLE ID", "SIZE", "SECTOR", "MODEL");
    for device in &devices {
        println!(
            "{:<52} {:>7.1}G {:>7}  {}",
            device.id,
            device.size_gib(),
            device.logical_sector_size,
            device.model.as_deref().unwrap_or("-"),
        );
        if let Some(signature) = &device.existing_signature {
            println!("    ⚠️ carries an existing signature: {}", signature);
        }
    }
    Ok(())
}

fn run_install(cfg: InstallConfig, yes_i_know: bool) -> Result<()> {
    if !cfg.execute || cfg.dry_run {
        log::info!("🧪 Dry run — printing the plan, touching nothing");
        let plan = run_pipeline(&cfg)?;
        println!("{}", plan);
        return Ok(());
    }

    let validated = UnvalidatedConfig::new(cfg).validate()?;
    let armed = validated.arm_execute(ExecuteArmToken::try_new(yes_i_know)?)?;
    let hal: Arc<dyn InstallerHal> = Arc::new(LinuxHal::new());
    run_pipeline_execute(armed, hal, PipelineOptions::default())?;
    Ok(())
}
