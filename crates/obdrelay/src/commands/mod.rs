//! Subcommand handlers.

pub mod config_cmd;
pub mod ledger;
pub mod probe;
pub mod run;
