//! CLI subcommand implementations.

pub mod status;
pub mod today;
pub mod track;
pub mod util;
pub mod watch;
