//! Command implementations
//!
//! Each subcommand exposes one `run` function called from `main`.

pub mod describe;
pub mod run;
pub mod stop;
