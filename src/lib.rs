pub mod capture;
pub mod cli;
pub mod commands;
pub mod config;
pub mod files;
pub mod host;
pub mod plugin;
pub mod report;
pub mod retention;
pub mod scheduler;
pub mod service;
pub mod store;
