// LinkedOut — LinkedIn DM triage backend
// License: Apache-2.0

pub mod config;
pub mod health;
pub mod logger;
pub mod pocketbase;
pub mod remote;
pub mod server;
pub mod setup;
pub mod template;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
