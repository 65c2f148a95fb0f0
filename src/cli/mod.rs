mod commands;

pub use commands::{Backend, Cli, Commands};
