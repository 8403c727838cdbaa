//! CLI command implementations.

pub mod dump_log;
pub mod inspect;
pub mod journal;
pub mod list;
pub mod maintain;
pub mod verify;
