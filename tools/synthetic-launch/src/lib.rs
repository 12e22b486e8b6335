pub mod cli;
pub mod launch;

pub use cli::Cli;
pub use launch::{LaunchError, LaunchPlan, NumaPolicy, exit_code};
