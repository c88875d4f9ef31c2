//! Background jobs: AI assistant sessions, Playwright runs and deploys.
//!
//! [`tracker::JobTracker`] owns job state and output, [`process`] spawns and
//! streams external commands, and [`launch::JobLauncher`] ties the two
//! together per job kind.

pub mod launch;
pub mod process;
pub mod tracker;

pub use launch::{
    AiJobRequest, DeployJobRequest, JobCommands, JobLauncher, LaunchRequest, PlaywrightJobRequest,
    PlaywrightSummary,
};
pub use tracker::{JobEvent, JobTracker, ProcessHandle};
