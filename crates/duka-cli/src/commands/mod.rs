pub mod auth_cmd;
pub mod common;
pub mod completions;
pub mod config;
pub mod conflicts;
pub mod create;
pub mod delete;
pub mod list;
pub mod queue;
pub mod resolve;
pub mod status;
pub mod sync;
pub mod update;
pub mod watch;
