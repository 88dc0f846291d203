//! CLI argument parsing for poolstrap.

use clap::{Parser, Subcommand};
use poolstrap_core::vdev::RedundancyMode;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "poolstrap")]
#[command(about = "🏗️ poolstrap — multi-disk ZFS installation orchestrator")]
#[command(long_about = "🏗️ poolstrap — multi-disk ZFS installation orchestrator\n\n\
    Partitions a set of disks, assembles redundant boot/root/home pools, \n\
    builds the dataset hierarchy for the target OS and installs a redundant \n\
    bootloader across every disk. Destructive: run `poolstrap inventory` \n\
    first and read the plan output of a dry run before adding --execute.")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Run in dry-run mode (no changes made)
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// 🔍 List usable block devices (stable id, size, sector size, model)
    Inventory,

    /// 💾 Run the installation pipeline (plans by default; destructive with
    /// --execute --yes-i-know)
    Install {
        /// Stable device id (repeatable, order matters: the first device
        /// carries swap and the primary bootloader)
        #[arg(long = "device", required = true)]
        devices: Vec<String>,

        /// Redundancy mode: stripe, mirror, striped-mirror, raidz1, raidz2, raidz3
        #[arg(long, default_value = "mirror")]
        mode: RedundancyMode,

        /// Encrypt the root pool (passphrase prompted at creation)
        #[arg(long)]
        encrypt_root: bool,

        /// Encrypt the home pool (passphrase prompted at creation)
        #[arg(long)]
        encrypt_home: bool,

        /// Human user who gets a home dataset
        #[arg(long, default_value = "admin")]
        username: String,

        /// OS identifier used for dataset names and the bootloader id
        #[arg(long, default_value = "linux")]
        os_name: String,

        /// Root-pool partition size in GiB
        #[arg(long, default_value_t = 32)]
        root_gib: u64,

        /// Swap size in GiB (first device only)
        #[arg(long, default_value_t = 8)]
        swap_gib: u64,

        /// Install-time mount root
        #[arg(long, default_value = "/mnt/install")]
        target: PathBuf,

        /// Checkpoint/state file
        #[arg(long, default_value = "/var/lib/poolstrap/state.json")]
        state: PathBuf,

        /// Base-system installer command; the target root is appended
        /// (repeat for each argument)
        #[arg(long = "base-cmd")]
        base_cmd: Vec<String>,

        /// Actually perform the installation
        #[arg(long)]
        execute: bool,

        /// Confirm the destructive operation (required with --execute)
        #[arg(long)]
        yes_i_know: bool,
    },

    /// 🔄 Forget the persisted checkpoint and start over from scratch
    Restart {
        /// Checkpoint/state file
        #[arg(long, default_value = "/var/lib/poolstrap/state.json")]
        state: PathBuf,
    },
}
