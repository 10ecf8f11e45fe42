mod job;
mod state;

pub use job::{
    JobReport, JobStatus, JobStatusView, StageOutput, TerminalDetail, Job, extract_keyword,
    generate_job_id,
};
pub use state::{Stage, StageEvent, StateMachine, Transition};
