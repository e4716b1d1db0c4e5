mod job;
mod status;

pub use job::{Job, JobSpec, Params};
pub use status::JobStatus;
