pub mod command;
pub mod config;
pub mod events;
pub mod protocol;
pub mod types;

pub use command::{parse_command, Command};
pub use config::Config;
pub use types::*;
