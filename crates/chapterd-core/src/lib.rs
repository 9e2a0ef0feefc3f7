pub mod config;
pub mod logging;

pub mod checker;
pub mod control;
pub mod engine;
pub mod follow_scheduler;
pub mod history;
pub mod queue;
pub mod rate_limit;
pub mod remote;
pub mod retry;
pub mod runner;
pub mod sanitize;
pub mod store;
