//! Command handlers

pub mod config;
pub mod message;
pub mod status;
pub mod sync;
pub mod thread;
pub mod topic;
pub mod whoami;
