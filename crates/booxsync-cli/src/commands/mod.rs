pub mod ask;
pub mod auth_cmd;
pub mod common;
pub mod completions;
pub mod config;
pub mod library;
pub mod open;
pub mod sync;
pub mod watch;
