// CMaNGOS TBC - Shared Library
// Configuration and logging used by every tool

pub mod config;
pub mod log;
