pub mod composer;
pub mod config;
pub mod correlator;
pub mod gateway;
pub mod monitor;
pub mod policy;
pub mod reconciler;
pub mod store;
pub mod subject;
pub mod transport;
pub mod types;

mod scheduler;

#[cfg(test)]
pub(crate) mod testutil;

pub use scheduler::{
    run_account_tick, EngineContext, JobStatus, Scheduler, SchedulerStatus, TickSummary,
};
