use rusqlite::{Connection, Result};
use tracing::info;

/// Creates the annotation tables and indexes.
///
/// Likes live in their own table keyed by (annotation, caller key), which makes a
/// repeated like a no-op. Replies reference their thread root without a foreign
/// key: deleting a root leaves its replies in place.
pub fn create_tables(conn: &Connection) -> Result<()> {
    info!("Creating database schema");

    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS annotations (
            id TEXT PRIMARY KEY,
            post_id TEXT NOT NULL,
            kind TEXT NOT NULL CHECK (kind IN ('highlight', 'note', 'response')),
            paragraph_id TEXT NOT NULL,
            start_offset INTEGER NOT NULL,
            end_offset INTEGER NOT NULL,
            selected_text TEXT NOT NULL,
            author_kind TEXT NOT NULL,
            author_value TEXT NOT NULL,
            author_name TEXT NOT NULL,
            author_email TEXT,
            author_image TEXT,
            content TEXT,
            parent_annotation_id TEXT,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS annotation_likes (
            annotation_id TEXT NOT NULL,
            user_key TEXT NOT NULL,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (annotation_id, user_key),
            FOREIGN KEY (annotation_id) REFERENCES annotations(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_annotations_post_id ON annotations(post_id)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_annotations_parent_id ON annotations(parent_annotation_id)",
        [],
    )?;

    info!("Database schema created successfully");
    Ok(())
}
