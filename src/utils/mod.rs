/// Shared helpers for running external tools and waiting on conditions
pub mod command;
pub mod polling;
