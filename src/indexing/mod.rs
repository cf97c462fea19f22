pub mod builder;
pub mod progress;

pub use builder::{IndexBuilder, TrainingPlan, indexed_job_ids};
pub use progress::{BuildPhase, BuildReport};
