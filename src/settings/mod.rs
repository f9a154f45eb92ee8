//! Layered settings: defaults, then a TOML file, then `TALENTBRIDGE__*`
//! environment variables. See `bin/settings_demo.rs`.

mod cli;
pub use clap::Parser;
pub use cli::*;

mod settings;
pub use settings::*;
