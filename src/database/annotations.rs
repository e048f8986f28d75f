use crate::identity::AuthorId;
use crate::models::{Annotation, AnnotationType, LikeState, ParagraphId};
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Result, Row};
use std::collections::BTreeSet;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum AnnotationError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] rusqlite::Error),

    #[error("Annotation not found: {0}")]
    NotFound(String),
}

/// Row values for an annotation about to be inserted; id, likes and timestamp
/// are assigned here.
#[derive(Debug, Clone)]
pub struct NewAnnotation<'a> {
    pub post_id: &'a str,
    pub kind: AnnotationType,
    pub paragraph_id: &'a ParagraphId,
    pub start_offset: usize,
    pub end_offset: usize,
    pub selected_text: &'a str,
    pub author_id: &'a AuthorId,
    pub author_name: &'a str,
    pub author_email: Option<&'a str>,
    pub author_image: Option<&'a str>,
    pub content: Option<&'a str>,
    pub parent_annotation_id: Option<&'a str>,
}

const SELECT_COLUMNS: &str = "SELECT a.id, a.post_id, a.kind, a.paragraph_id, a.start_offset,
        a.end_offset, a.selected_text, a.author_kind, a.author_value, a.author_name,
        a.author_image, a.content, a.parent_annotation_id, a.created_at
     FROM annotations a";

pub fn insert(conn: &Connection, new: &NewAnnotation<'_>) -> Result<Annotation, AnnotationError> {
    let id = Uuid::new_v4().to_string();
    let now = Utc::now();

    conn.execute(
        "INSERT INTO annotations (id, post_id, kind, paragraph_id, start_offset, end_offset,
            selected_text, author_kind, author_value, author_name, author_email, author_image,
            content, parent_annotation_id, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
        params![
            &id,
            new.post_id,
            new.kind.as_str(),
            new.paragraph_id.as_str(),
            new.start_offset as i64,
            new.end_offset as i64,
            new.selected_text,
            new.author_id.kind(),
            new.author_id.value(),
            new.author_name,
            new.author_email,
            new.author_image,
            new.content,
            new.parent_annotation_id,
            now,
        ],
    )?;

    Ok(Annotation {
        id,
        post_id: new.post_id.to_string(),
        kind: new.kind,
        paragraph_id: new.paragraph_id.clone(),
        start_offset: new.start_offset,
        end_offset: new.end_offset,
        selected_text: new.selected_text.to_string(),
        author_id: new.author_id.clone(),
        author_name: new.author_name.to_string(),
        author_image: new.author_image.map(str::to_string),
        content: new.content.map(str::to_string),
        parent_annotation_id: new.parent_annotation_id.map(str::to_string),
        likes: 0,
        liked_by_user_ids: BTreeSet::new(),
        created_at: now,
    })
}

pub fn get(conn: &Connection, id: &str) -> Result<Option<Annotation>, AnnotationError> {
    let sql = format!("{} WHERE a.id = ?1", SELECT_COLUMNS);
    let found = conn.query_row(&sql, params![id], row_to_annotation).optional()?;

    match found {
        Some(mut annotation) => {
            attach_likes(conn, &mut annotation)?;
            Ok(Some(annotation))
        }
        None => Ok(None),
    }
}

/// Every annotation on a post, newest first. With `parent_id`, only the replies
/// to that thread.
pub fn list_by_post(
    conn: &Connection,
    post_id: &str,
    parent_id: Option<&str>,
) -> Result<Vec<Annotation>, AnnotationError> {
    let mut annotations = match parent_id {
        Some(parent) => {
            let sql = format!(
                "{} WHERE a.post_id = ?1 AND a.parent_annotation_id = ?2
                 ORDER BY a.created_at DESC",
                SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![post_id, parent], row_to_annotation)?;
            rows.collect::<Result<Vec<_>, _>>()?
        }
        None => {
            let sql = format!(
                "{} WHERE a.post_id = ?1 ORDER BY a.created_at DESC",
                SELECT_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![post_id], row_to_annotation)?;
            rows.collect::<Result<Vec<_>, _>>()?
        }
    };

    for annotation in &mut annotations {
        attach_likes(conn, annotation)?;
    }
    Ok(annotations)
}

/// Puts the caller's like into the requested state. Repeating a state is a no-op.
pub fn set_like(
    conn: &Connection,
    annotation_id: &str,
    user_key: &str,
    liked: bool,
) -> Result<LikeState, AnnotationError> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM annotations WHERE id = ?1)",
        params![annotation_id],
        |row| row.get(0),
    )?;
    if !exists {
        return Err(AnnotationError::NotFound(annotation_id.to_string()));
    }

    if liked {
        conn.execute(
            "INSERT OR IGNORE INTO annotation_likes (annotation_id, user_key) VALUES (?1, ?2)",
            params![annotation_id, user_key],
        )?;
    } else {
        conn.execute(
            "DELETE FROM annotation_likes WHERE annotation_id = ?1 AND user_key = ?2",
            params![annotation_id, user_key],
        )?;
    }

    let likes: i64 = conn.query_row(
        "SELECT COUNT(*) FROM annotation_likes WHERE annotation_id = ?1",
        params![annotation_id],
        |row| row.get(0),
    )?;

    Ok(LikeState {
        annotation_id: annotation_id.to_string(),
        likes: likes as u32,
        liked,
    })
}

pub fn delete(conn: &Connection, id: &str) -> Result<(), AnnotationError> {
    let removed = conn.execute("DELETE FROM annotations WHERE id = ?1", params![id])?;
    if removed == 0 {
        return Err(AnnotationError::NotFound(id.to_string()));
    }
    Ok(())
}

fn attach_likes(conn: &Connection, annotation: &mut Annotation) -> Result<(), AnnotationError> {
    let mut stmt =
        conn.prepare("SELECT user_key FROM annotation_likes WHERE annotation_id = ?1")?;
    let keys = stmt
        .query_map(params![&annotation.id], |row| row.get::<_, String>(0))?
        .collect::<Result<BTreeSet<_>, _>>()?;

    annotation.likes = keys.len() as u32;
    annotation.liked_by_user_ids = keys;
    Ok(())
}

fn row_to_annotation(row: &Row<'_>) -> Result<Annotation> {
    let kind: String = row.get(2)?;
    let kind = kind
        .parse::<AnnotationType>()
        .map_err(|_| rusqlite::Error::InvalidColumnType(2, "kind".to_string(), Type::Text))?;

    let author_kind: String = row.get(7)?;
    let author_id = AuthorId::from_parts(&author_kind, row.get(8)?).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(7, "author_kind".to_string(), Type::Text)
    })?;

    let start_offset: i64 = row.get(4)?;
    let end_offset: i64 = row.get(5)?;
    let created_at: DateTime<Utc> = row.get(13)?;

    Ok(Annotation {
        id: row.get(0)?,
        post_id: row.get(1)?,
        kind,
        paragraph_id: ParagraphId::new(row.get::<_, String>(3)?),
        start_offset: start_offset.max(0) as usize,
        end_offset: end_offset.max(0) as usize,
        selected_text: row.get(6)?,
        author_id,
        author_name: row.get(9)?,
        author_image: row.get(10)?,
        content: row.get(11)?,
        parent_annotation_id: row.get(12)?,
        likes: 0,
        liked_by_user_ids: BTreeSet::new(),
        created_at,
    })
}
