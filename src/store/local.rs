use crate::config::Config;
use crate::database::{self, annotations, NewAnnotation};
use crate::error::{MarginError, PermissionError, Result};
use crate::identity::{AdminPolicy, AuthorId, Identity};
use crate::models::{sort_annotations, Annotation, AnnotationType, LikeState};
use crate::store::{AnnotationStore, CreateRequest, ListQuery};
use async_trait::async_trait;
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreateLimits {
    pub min_selection_chars: usize,
    pub max_selection_chars: usize,
    pub max_content_chars: usize,
}

impl CreateLimits {
    pub fn from_config(config: &Config) -> Self {
        Self {
            min_selection_chars: config.min_selection_chars,
            max_selection_chars: config.max_selection_chars,
            max_content_chars: config.max_content_chars,
        }
    }
}

impl Default for CreateLimits {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// SQLite-backed store enforcing the same rules as the blog API.
pub struct LocalAnnotationStore {
    conn: Mutex<Connection>,
    admins: AdminPolicy,
    limits: CreateLimits,
}

impl LocalAnnotationStore {
    pub fn new(conn: Connection, admins: AdminPolicy, limits: CreateLimits) -> Result<Self> {
        database::create_tables(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            admins,
            limits,
        })
    }

    pub fn open(db_path: &Path, config: &Config) -> Result<Self> {
        let conn = database::init_db(db_path)?;
        Ok(Self {
            conn: Mutex::new(conn),
            admins: AdminPolicy::new(&config.admin_emails),
            limits: CreateLimits::from_config(config),
        })
    }

    pub fn in_memory(admins: AdminPolicy) -> Result<Self> {
        Self::new(Connection::open_in_memory()?, admins, CreateLimits::default())
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| MarginError::Internal("Database lock poisoned".to_string()))
    }

    fn validate(&self, conn: &Connection, post_id: &str, request: &CreateRequest) -> Result<()> {
        let selected = request.selected_text.trim().chars().count();
        if selected < self.limits.min_selection_chars || selected > self.limits.max_selection_chars {
            return Err(MarginError::InvalidArgument(format!(
                "Selected text must be {} to {} characters",
                self.limits.min_selection_chars, self.limits.max_selection_chars
            )));
        }
        if request.start_offset >= request.end_offset {
            return Err(MarginError::InvalidArgument(
                "startOffset must be less than endOffset".to_string(),
            ));
        }

        let body = request.content.as_deref().map(str::trim).unwrap_or("");
        if body.chars().count() > self.limits.max_content_chars {
            return Err(MarginError::InvalidArgument(format!(
                "Content is limited to {} characters",
                self.limits.max_content_chars
            )));
        }
        match (request.kind, body.is_empty()) {
            (AnnotationType::Highlight, false) => {
                return Err(MarginError::InvalidArgument(
                    "Highlights carry no content".to_string(),
                ))
            }
            (AnnotationType::Note | AnnotationType::Response, true) => {
                return Err(MarginError::InvalidArgument(format!(
                    "A {} needs content",
                    request.kind
                )))
            }
            _ => {}
        }

        if request.kind == AnnotationType::Response && request.firebase_user_id.is_none() {
            return Err(PermissionError::AuthenticationRequired.into());
        }

        if let Some(parent_id) = &request.parent_annotation_id {
            let parent = annotations::get(conn, parent_id)?
                .ok_or_else(|| MarginError::NotFound(parent_id.clone()))?;
            if request.kind != AnnotationType::Response
                || parent.kind != AnnotationType::Response
                || parent.post_id != post_id
                || parent.is_reply()
            {
                return Err(MarginError::InvalidArgument(
                    "Replies must answer a top-level response on the same post".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn author_of(request: &CreateRequest) -> AuthorId {
    match &request.firebase_user_id {
        Some(uid) => AuthorId::Verified(uid.clone()),
        None => AuthorId::Anonymous(request.anonymous_user_id.clone()),
    }
}

#[async_trait]
impl AnnotationStore for LocalAnnotationStore {
    async fn list(&self, query: &ListQuery) -> Result<Vec<Annotation>> {
        let caller = self.admins.caller(query.identity.clone());
        let conn = self.lock()?;
        let mut visible: Vec<Annotation> =
            annotations::list_by_post(&conn, &query.post_id, query.parent_id.as_deref())?
                .into_iter()
                .filter(|a| caller.can_view(a))
                .collect();
        sort_annotations(&mut visible, query.sort_by);
        Ok(visible)
    }

    async fn create(&self, post_id: &str, request: &CreateRequest) -> Result<Annotation> {
        let conn = self.lock()?;
        self.validate(&conn, post_id, request)?;

        let author = author_of(request);
        let content = request
            .content
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty());
        let created = annotations::insert(
            &conn,
            &NewAnnotation {
                post_id,
                kind: request.kind,
                paragraph_id: &request.paragraph_id,
                start_offset: request.start_offset,
                end_offset: request.end_offset,
                selected_text: request.selected_text.trim(),
                author_id: &author,
                author_name: request.author_name.trim(),
                author_email: request.author_email.as_deref(),
                author_image: request.author_image.as_deref(),
                content,
                parent_annotation_id: request.parent_annotation_id.as_deref(),
            },
        )?;

        info!("Created {} {} on post {}", created.kind, created.id, post_id);
        Ok(created)
    }

    async fn set_like(
        &self,
        annotation_id: &str,
        identity: &Identity,
        liked: bool,
    ) -> Result<LikeState> {
        let caller = self.admins.caller(identity.clone());
        let conn = self.lock()?;
        let target = annotations::get(&conn, annotation_id)?
            .ok_or_else(|| MarginError::NotFound(annotation_id.to_string()))?;
        if !caller.can_view(&target) {
            return Err(PermissionError::PrivateNote.into());
        }

        Ok(annotations::set_like(&conn, annotation_id, &caller.like_key(), liked)?)
    }

    async fn delete(&self, annotation_id: &str, identity: &Identity) -> Result<()> {
        let caller = self.admins.caller(identity.clone());
        let conn = self.lock()?;
        let target = annotations::get(&conn, annotation_id)?
            .ok_or_else(|| MarginError::NotFound(annotation_id.to_string()))?;
        if !caller.can_manage(&target) {
            return Err(PermissionError::NotAuthor.into());
        }

        annotations::delete(&conn, annotation_id)?;
        info!("Deleted annotation {}", annotation_id);
        Ok(())
    }
}
