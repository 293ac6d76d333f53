//! Lineage CLI - Command-line interface for the Lineage migration reconciler.
//!
//! This crate provides the `lineage` tool for checking and repairing
//! migration lineages across environments.

pub mod cli;
pub mod commands;
pub mod config;
pub mod error;
pub mod logging;
pub mod output;
