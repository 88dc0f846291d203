//! The declared phase order and the human-readable plan.

use poolstrap_core::config::InstallConfig;
use std::fmt;

/// Linear phase order. The checkpoint refers to these names; reordering or
/// renaming them invalidates persisted state from older runs.
pub const PHASES: [&str; 7] = [
    "Preflight",
    "Partition disks",
    "Create pools",
    "Create datasets",
    "Install base system",
    "Install bootloader",
    "Finalize",
];

#[derive(Debug, Clone)]
pub struct StagePlan {
    pub name: &'static str,
    pub description: String,
}

#[derive(Debug, Clone)]
pub struct InstallPlan {
    pub stages: Vec<StagePlan>,
}

pub fn build_plan(cfg: &InstallConfig) -> InstallPlan {
    let devices = cfg.device_ids.len();
    let encryption = match (cfg.encrypt_root, cfg.encrypt_home) {
        (true, true) => "encrypted root and home pools",
        (true, false) => "encrypted root pool",
        (false, true) => "encrypted home pool",
        (false, false) => "no encryption",
    };

    let descriptions: [String; 7] = [
        "validate RAM, tools, firmware mode and pool-name conflicts".to_string(),
        format!(
            "write the fixed GPT layout to {} device(s); swap lives on the first",
            devices
        ),
        format!(
            "create bpool, rpool and hpool as {} groups ({})",
            cfg.mode, encryption
        ),
        "create the container/leaf dataset hierarchy and permission invariants".to_string(),
        if cfg.base_system_command.is_empty() {
            "no base-system installer configured; skip".to_string()
        } else {
            format!("run `{}` against the mounted root", cfg.base_system_command.join(" "))
        },
        format!(
            "format every boot-firmware partition; 1 primary + {} backup bootloader(s)",
            devices.saturating_sub(1)
        ),
        "settle pool caches, record swap and ARC settings, export pools".to_string(),
    ];

    InstallPlan {
        stages: PHASES
            .iter()
            .copied()
            .zip(descriptions)
            .map(|(name, description)| StagePlan { name, description })
            .collect(),
    }
}

impl fmt::Display for InstallPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Install plan ({} phases):", self.stages.len())?;
        for (index, stage) in self.stages.iter().enumerate() {
            writeln!(f, "  {}. {} — {}", index + 1, stage.name, stage.description)?;
        }
        Ok(())
    }
}
