pub mod cache;
pub mod clients;
pub mod config;
pub mod dashboard;
pub mod errors;
pub mod jobs;
pub mod linking;
pub mod logging;
pub mod notes;
pub mod polling;
