//! Persisted install state: checkpoint plus phase-scoped auxiliary fields.
//!
//! A single JSON record holds the checkpoint and everything the skip path
//! needs (install id, selected devices, redundancy mode, username), written
//! atomically so a crash can never leave the checkpoint and its supporting
//! state disagreeing. It lives outside the pools, so it survives a reboot
//! from before the pools are importable again.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

type PhaseName = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InstallState {
    pub version: u32,
    pub dry_run: bool,
    pub current_phase: Option<PhaseName>,
    pub completed_phases: Vec<PhaseName>,
    /// Auxiliary state consumed by later phases and the resume path.
    pub install_id: Option<String>,
    pub device_ids: Vec<String>,
    pub redundancy_mode: Option<String>,
    pub username: Option<String>,
}

impl InstallState {
    pub fn new(dry_run: bool) -> Self {
        Self {
            version: 1,
            dry_run,
            current_phase: None,
            completed_phases: Vec::new(),
            install_id: None,
            device_ids: Vec::new(),
            redundancy_mode: None,
            username: None,
        }
    }

    pub fn is_completed(&self, phase: &str) -> bool {
        self.completed_phases.iter().any(|p| p == phase)
    }

    pub fn mark_completed(&mut self, phase: &str) {
        if !self.is_completed(phase) {
            self.completed_phases.push(phase.to_string());
        }
        self.current_phase = None;
    }

    pub fn set_current(&mut self, phase: &str) {
        self.current_phase = Some(phase.to_string());
    }

    /// Whether any checkpoint has been persisted at all.
    pub fn has_progress(&self) -> bool {
        !self.completed_phases.is_empty()
    }
}

pub fn load_state(path: &Path) -> Result<Option<InstallState>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file: {}", path.display()))?;
    let state = serde_json::from_str(&content).context("Failed to parse state file")?;
    Ok(Some(state))
}

pub fn save_state_atomic(path: &Path, state: &InstallState) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create state directory: {}", parent.display()))?;
    }

    let tmp_path = temp_path(path);
    let payload = serde_json::to_string_pretty(state).context("Failed to serialize state")?;

    let mut file = File::create(&tmp_path)
        .with_context(|| format!("Failed to create temp state file: {}", tmp_path.display()))?;
    file.write_all(payload.as_bytes())
        .context("Failed to write state")?;
    file.sync_all().context("Failed to flush state")?;

    fs::rename(&tmp_path, path).with_context(|| {
        format!(
            "Failed to atomically replace state file: {}",
            path.display()
        )
    })?;

    if let Some(parent) = path.parent() {
        let dir = File::open(parent)
            .with_context(|| format!("Failed to open state directory: {}", parent.display()))?;
        dir.sync_all().ok();
    }

    Ok(())
}

/// Explicit restart-from-scratch: forget the checkpoint and its aux state.
pub fn clear_state(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => {
            Err(err).with_context(|| format!("Failed to remove state file: {}", path.display()))
        }
    }
}

fn temp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("state.json");
    let tmp_name = format!("{}.tmp", file_name);
    path.with_file_name(tmp_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_state_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = InstallState::new(false);
        state.install_id = Some("ab12cd".to_string());
        state.device_ids = vec!["/dev/disk/by-id/ata-D0".to_string()];
        state.set_current("Partition disks");
        state.mark_completed("Preflight");

        save_state_atomic(&path, &state).unwrap();
        let loaded = load_state(&path).unwrap().unwrap();
        assert_eq!(state, loaded);
        assert!(loaded.is_completed("Preflight"));
        assert!(!loaded.is_completed("Partition disks"));
    }

    #[test]
    fn load_state_missing_file_is_none() {
        let dir = tempdir().unwrap();
        assert!(load_state(&dir.path().join("none.json")).unwrap().is_none());
    }

    #[test]
    fn clear_state_removes_and_tolerates_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        save_state_atomic(&path, &InstallState::new(false)).unwrap();
        clear_state(&path).unwrap();
        assert!(!path.exists());
        clear_state(&path).unwrap();
    }

    #[test]
    fn checkpoint_and_aux_state_are_one_record() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = InstallState::new(false);
        state.install_id = Some("ff00aa".to_string());
        state.mark_completed("Create pools");
        save_state_atomic(&path, &state).unwrap();

        // Both the checkpoint and the aux field came back from one file.
        let loaded = load_state(&path).unwrap().unwrap();
        assert!(loaded.is_completed("Create pools"));
        assert_eq!(loaded.install_id.as_deref(), Some("ff00aa"));
    }
}
