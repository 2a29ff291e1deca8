//! Job reaper daemon: command line, configuration and probe API

pub mod api;
pub mod cli;
pub mod config;
