//! Database schema, migrations and settings

pub mod init;
pub mod migrations;
pub mod settings;

pub use init::{init_database, init_memory_database};
