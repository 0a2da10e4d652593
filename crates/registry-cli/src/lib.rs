//! Operator tooling for the business registry database.
//!
//! The `registry` binary loads [`config::Config`], opens the pooled
//! database and runs one of the [`commands`]: walking the migration
//! ledger, listing reference data, or reporting which versioning engine
//! the configured flags select.

pub mod commands;
pub mod config;
