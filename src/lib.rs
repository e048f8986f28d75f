pub mod anchor;
pub mod config;
pub mod database;
pub mod dom;
pub mod engine;
pub mod error;
pub mod identity;
pub mod logger;
pub mod models;
pub mod parsers;
pub mod selection;
pub mod store;
pub mod ui;

pub use error::{MarginError, PermissionError, Result};
