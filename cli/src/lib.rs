//! ghgate - GitHub device-flow gatekeeper.
//!
//! Authenticates a user with the OAuth device authorization grant, checks the
//! account against an allow/block list, and hands the token to a command
//! without ever writing it to disk.
//!
//! The entry point for embedding is [`auth::AuthenticationManager`].

pub mod audit;
pub mod auth;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod events;

pub use error::{GateError, Result};
