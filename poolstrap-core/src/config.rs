//! Installation configuration.
//!
//! Built once from CLI input, validated through the typestate pipeline, and
//! never mutated afterwards; every component receives it (or the derived
//! `InstallContext`) by reference.

use crate::config_states::{HasRunMode, ValidateConfig};
use crate::vdev::RedundancyMode;
use anyhow::Result;
use poolstrap_error::InstallError;
use std::path::PathBuf;

/// Fixed partition sizing for every device in the install.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartitionLayout {
    pub efi_mib: u64,
    pub boot_gib: u64,
    pub root_gib: u64,
    pub swap_gib: u64,
}

impl Default for PartitionLayout {
    fn default() -> Self {
        Self {
            efi_mib: 512,
            boot_gib: 2,
            root_gib: 32,
            swap_gib: 8,
        }
    }
}

#[derive(Debug, Clone)]
pub struct InstallConfig {
    /// Stable identifiers of the selected devices, in pool-member order.
    /// The first entry is the designated swap/primary-boot device.
    pub device_ids: Vec<String>,
    pub mode: RedundancyMode,
    pub layout: PartitionLayout,
    pub encrypt_root: bool,
    pub encrypt_home: bool,
    /// Human user receiving a home dataset.
    pub username: String,
    /// Short OS identifier used for dataset names and the bootloader id.
    pub os_name: String,
    /// Install-time root the pools are mounted under.
    pub target_root: PathBuf,
    pub state_path: PathBuf,
    /// External base-system installer; invoked with the target root appended.
    /// Empty means the operator populates the root dataset out of band.
    pub base_system_command: Vec<String>,
    pub dry_run: bool,
    pub execute: bool,
}

impl Default for InstallConfig {
    fn default() -> Self {
        Self {
            device_ids: Vec::new(),
            mode: RedundancyMode::Mirror,
            layout: PartitionLayout::default(),
            encrypt_root: false,
            encrypt_home: false,
            username: "admin".to_string(),
            os_name: "linux".to_string(),
            target_root: PathBuf::from("/mnt/install"),
            state_path: PathBuf::from("/var/lib/poolstrap/state.json"),
            base_system_command: Vec::new(),
            dry_run: true,
            execute: false,
        }
    }
}

fn valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_lowercase() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

impl ValidateConfig for InstallConfig {
    fn validate_cfg(&self) -> Result<()> {
        if self.device_ids.is_empty() {
            return Err(InstallError::Validation(
                "no devices selected for installation".to_string(),
            )
            .into());
        }
        if self.device_ids.len() < self.mode.min_devices() {
            return Err(InstallError::Validation(format!(
                "{} requires at least {} devices, got {}",
                self.mode,
                self.mode.min_devices(),
                self.device_ids.len()
            ))
            .into());
        }
        if self.mode.requires_even_count() && self.device_ids.len() % 2 != 0 {
            return Err(InstallError::Validation(format!(
                "{} requires an even device count, got {}",
                self.mode,
                self.device_ids.len()
            ))
            .into());
        }
        let mut seen = std::collections::BTreeSet::new();
        for id in &self.device_ids {
            if !seen.insert(id) {
                return Err(InstallError::Validation(format!(
                    "device '{}' selected more than once",
                    id
                ))
                .into());
            }
        }
        if !valid_name(&self.username) {
            return Err(InstallError::Validation(format!(
                "invalid username '{}'",
                self.username
            ))
            .into());
        }
        if !valid_name(&self.os_name) {
            return Err(InstallError::Validation(format!(
                "invalid os name '{}'",
                self.os_name
            ))
            .into());
        }
        if self.layout.swap_gib == 0 {
            return Err(
                InstallError::Validation("swap size must be at least 1 GiB".to_string()).into(),
            );
        }
        if self.layout.root_gib < 8 {
            return Err(InstallError::Validation(
                "root pool partition must be at least 8 GiB".to_string(),
            )
            .into());
        }
        Ok(())
    }
}

impl HasRunMode for InstallConfig {
    fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}
