pub mod cli;
pub mod sessions;
pub mod setup;

pub use cli::Cli;
pub use cli::run_main;
