mod backoff;
mod scheduler;

pub use backoff::Backoff;
pub use scheduler::{
    RunStatus, Scheduler, SchedulerConfig, SchedulerExit, EXIT_CONFIG, EXIT_OK, EXIT_TEMPFAIL,
};
