pub mod config;
pub mod identity;
pub mod logging;
pub mod object_store;
pub mod record_store;
