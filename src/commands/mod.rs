//! Command implementations
//!
//! Each module corresponds to a subcommand of the `abstract_forest` CLI.

pub mod build;
pub mod inspect;
pub mod query;

pub use build::{run as build_run, BuildArgs, BuildReport};
pub use inspect::{run as inspect_run, OutputFormat};
pub use query::{run as query_run, QueryArgs, QueryOutcome};
