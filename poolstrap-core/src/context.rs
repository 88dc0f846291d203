//! Immutable per-run context.

use crate::config::InstallConfig;
use crate::inventory::Device;
use std::path::PathBuf;

pub const BOOT_POOL: &str = "bpool";
pub const ROOT_POOL: &str = "rpool";
pub const HOME_POOL: &str = "hpool";

pub fn pool_names() -> [&'static str; 3] {
    [BOOT_POOL, ROOT_POOL, HOME_POOL]
}

/// Everything a component needs to know about the current run, constructed
/// once after validation and inventory resolution. Components derive new
/// values from it; nothing here is mutated mid-run.
#[derive(Debug, Clone)]
pub struct InstallContext {
    pub config: InstallConfig,
    /// Resolved devices, in the same order as `config.device_ids`.
    pub devices: Vec<Device>,
    /// Short unique id distinguishing this installation's datasets.
    pub install_id: String,
}

impl InstallContext {
    pub fn new(config: InstallConfig, devices: Vec<Device>, install_id: String) -> Self {
        debug_assert_eq!(config.device_ids.len(), devices.len());
        Self {
            config,
            devices,
            install_id,
        }
    }

    /// Generate a fresh installation id (six hex characters).
    pub fn generate_install_id() -> String {
        uuid::Uuid::new_v4().simple().to_string()[..6].to_string()
    }

    pub fn target(&self) -> &PathBuf {
        &self.config.target_root
    }

    /// The designated first device: carries the swap partition and the
    /// primary boot-firmware partition.
    pub fn first_device(&self) -> &Device {
        &self.devices[0]
    }

    /// System generation name, e.g. `linux_ab12cd`.
    pub fn system_name(&self) -> String {
        format!("{}_{}", self.config.os_name, self.install_id)
    }

    /// Bootable root dataset, e.g. `rpool/ROOT/linux_ab12cd`.
    pub fn root_dataset(&self) -> String {
        format!("{}/ROOT/{}", ROOT_POOL, self.system_name())
    }

    /// Boot dataset, e.g. `bpool/BOOT/linux_ab12cd`.
    pub fn boot_dataset(&self) -> String {
        format!("{}/BOOT/{}", BOOT_POOL, self.system_name())
    }

    /// Per-user home dataset on the home pool.
    pub fn user_dataset(&self, username: &str) -> String {
        format!("{}/USERDATA/{}_{}", HOME_POOL, username, self.install_id)
    }
}
