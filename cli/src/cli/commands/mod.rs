//! Command implementations.

pub mod auth;
pub mod config;
pub mod whitelist;

pub use auth::{handle_login, LoginOptions};
pub use config::{handle_completions, handle_config_init, handle_config_path, handle_config_show};
pub use whitelist::{handle_whitelist_check, handle_whitelist_show};
