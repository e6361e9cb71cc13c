//! Homework import worker library
//!
//! This module exports the core components for testing and integration.

pub mod cli;
pub mod config;
pub mod db;
pub mod error;
pub mod extract;
pub mod import;
pub mod jobs;
pub mod server;
pub mod types;
