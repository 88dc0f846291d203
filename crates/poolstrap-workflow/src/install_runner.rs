//! Binds the generic stage runner to the persisted install state.

use anyhow::Result;
use poolstrap_core::state::{load_state, save_state_atomic, InstallState};
use std::path::PathBuf;

use crate::stage_runner as wf;

pub type StageFn<'a> = wf::StageFn<'a, InstallState>;
pub type StageDefinition<'a> = wf::StageDefinition<'a, InstallState>;

#[derive(Clone)]
struct InstallStateFileStore {
    state_path: PathBuf,
}

impl wf::StateStore<InstallState> for InstallStateFileStore {
    fn load(&self) -> Result<Option<InstallState>> {
        load_state(&self.state_path)
    }

    fn save(&self, state: &InstallState) -> Result<()> {
        save_state_atomic(&self.state_path, state)
    }
}

impl wf::WorkflowState for InstallState {
    fn is_completed(&self, stage: &str) -> bool {
        self.is_completed(stage)
    }

    fn set_current(&mut self, stage: &str) {
        self.set_current(stage);
    }

    fn mark_completed(&mut self, stage: &str) {
        self.mark_completed(stage);
    }
}

pub struct StageRunner {
    inner: wf::StageRunner<InstallState, InstallStateFileStore>,
}

impl StageRunner {
    /// `template` seeds a fresh state (checkpoint plus aux fields) when no
    /// state file exists yet; a persisted state always wins over it.
    ///
    /// Dry runs never persist: a simulated phase is not a completed phase,
    /// and a later real run must not skip work on its account.
    pub fn new(state_path: PathBuf, dry_run: bool, template: InstallState) -> Self {
        let store = InstallStateFileStore { state_path };
        Self {
            inner: wf::StageRunner::new_with_persist(store, dry_run, !dry_run, move |_dry| {
                template.clone()
            }),
        }
    }

    pub fn run(&self, stages: &[StageDefinition<'_>]) -> Result<InstallState> {
        self.inner.run(stages)
    }
}
