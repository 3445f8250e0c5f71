//! Command handlers

pub mod config;
pub mod export;
pub mod get;
pub mod import;
pub mod list;
pub mod migrate;
pub mod rollback;
pub mod status;
