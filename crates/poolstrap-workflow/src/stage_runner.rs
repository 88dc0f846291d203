//! Generic linear stage runner with persisted checkpoints.
//!
//! Before a stage runs, the last persisted state decides whether it is
//! skipped; a stage is only checkpointed after it completes. Partially
//! completed stages are therefore never recorded.

use anyhow::{Context, Result};

pub type StageFn<'a, S> = Box<dyn Fn(&mut S, bool) -> Result<()> + 'a>;

pub struct StageDefinition<'a, S> {
    pub name: &'a str,
    pub run: StageFn<'a, S>,
}

pub trait WorkflowState {
    fn is_completed(&self, stage: &str) -> bool;
    fn set_current(&mut self, stage: &str);
    fn mark_completed(&mut self, stage: &str);
}

pub trait StateStore<S>: Send + Sync {
    fn load(&self) -> Result<Option<S>>;
    fn save(&self, state: &S) -> Result<()>;
}

pub struct StageRunner<S, Store> {
    store: Store,
    dry_run: bool,
    persist: bool,
    init_state: Box<dyn Fn(bool) -> S + Send + Sync>,
}

impl<S, Store> StageRunner<S, Store>
where
    S: WorkflowState,
    Store: StateStore<S>,
{
    pub fn new(
        store: Store,
        dry_run: bool,
        init_state: impl Fn(bool) -> S + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            dry_run,
            persist: true,
            init_state: Box::new(init_state),
        }
    }

    pub fn new_with_persist(
        store: Store,
        dry_run: bool,
        persist: bool,
        init_state: impl Fn(bool) -> S + Send + Sync + 'static,
    ) -> Self {
        Self {
            store,
            dry_run,
            persist,
            init_state: Box::new(init_state),
        }
    }

    pub fn run(&self, stages: &[StageDefinition<'_, S>]) -> Result<S> {
        let mut state = self
            .store
            .load()?
            .unwrap_or_else(|| (self.init_state)(self.dry_run));

        for stage in stages {
            if state.is_completed(stage.name) {
                log::info!("⏭️ Skipping '{}' (checkpointed)", stage.name);
                continue;
            }
            state.set_current(stage.name);
            if self.persist {
                self.store.save(&state)?;
            }

            (stage.run)(&mut state, self.dry_run)
                .with_context(|| format!("phase '{}' failed", stage.name))?;

            state.mark_completed(stage.name);
            if self.persist {
                self.store.save(&state)?;
            }
        }

        Ok(state)
    }
}
