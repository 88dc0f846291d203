mod plan;
mod run;
mod stages;

pub use plan::{build_plan, InstallPlan, StagePlan, PHASES};
pub use run::{run_pipeline, run_pipeline_execute, PipelineOptions};

#[cfg(test)]
mod tests;
