// Infrastructure layer - External dependencies and adapters
pub mod config;
pub mod datafind_locator;
pub mod directory_archive;
pub mod record_writer;
pub mod segment_db_provider;
