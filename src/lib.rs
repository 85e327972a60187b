//! sshfan - run one command on many hosts over SSH under a single deadline

pub mod aggregator;
pub mod banner;
pub mod cli;
pub mod credential;
pub mod dispatcher;
pub mod error;
pub mod executors;
pub mod logging;
pub mod models;
pub mod runner;
pub mod settings;
pub mod task;
