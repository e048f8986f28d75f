pub mod annotations;
mod schema;

use crate::config::get_config_dir;
use rusqlite::{Connection, Result};
use std::path::{Path, PathBuf};
use tracing::{error, info};

pub use schema::create_tables;

pub use annotations::{AnnotationError, NewAnnotation};

impl From<AnnotationError> for crate::MarginError {
    fn from(err: AnnotationError) -> Self {
        match err {
            AnnotationError::DatabaseError(e) => crate::MarginError::Database(e),
            AnnotationError::NotFound(id) => crate::MarginError::NotFound(id),
        }
    }
}

/// Path to `annotations.db` in the config directory.
pub fn get_db_path() -> crate::Result<PathBuf> {
    Ok(get_config_dir()?.join("annotations.db"))
}

/// Opens a connection with WAL journaling and a busy timeout.
pub fn get_connection(db_path: &Path) -> Result<Connection> {
    info!("Opening database connection: {:?}", db_path);

    let conn = Connection::open(db_path)?;

    // journal_mode returns a row, so it goes through query_row
    let _journal_mode = conn.query_row("PRAGMA journal_mode = WAL", [], |row| {
        row.get::<_, String>(0)
    })?;

    conn.busy_timeout(std::time::Duration::from_secs(5))?;

    info!("Database connection opened successfully");
    Ok(conn)
}

/// Opens the database and makes sure the schema exists.
pub fn init_db(db_path: &Path) -> Result<Connection> {
    info!("Initializing database");

    let conn = get_connection(db_path)?;

    create_tables(&conn).map_err(|e| {
        error!("Failed to create database tables: {}", e);
        e
    })?;

    info!("Database initialized successfully");
    Ok(conn)
}
