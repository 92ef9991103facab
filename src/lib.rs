#![allow(clippy::module_name_repetitions)]

pub mod appeal;
pub mod cli;
pub mod clients;
pub mod config;
pub mod ml;
pub mod observability;
pub mod orchestrator;
